use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use resilience_engine::policy::{unmarshal_policy, PolicyFormat};

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Management CLI for the resilience policy service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "RESILIENCE_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service status
    Status,
    /// Show aggregated health
    Health,
    /// Manage policies
    #[command(subcommand)]
    Policies(PolicyCommands),
    /// List circuit breaker states
    Circuits,
    /// Force a policy's circuit breaker closed
    Reset { name: String },
    /// Show bulkhead partition usage
    Bulkheads,
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// List all policies
    List,
    /// Show one policy
    Get { name: String },
    /// Create or replace a policy from a JSON or TOML file
    Put { file: PathBuf },
    /// Delete a policy
    Delete { name: String },
    /// Check a policy file without storing it
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .build()?;
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
        Commands::Health => client.get(format!("{base}/admin/health")).send().await?,
        Commands::Circuits => client.get(format!("{base}/admin/circuits")).send().await?,
        Commands::Bulkheads => client.get(format!("{base}/admin/bulkheads")).send().await?,
        Commands::Reset { name } => {
            client
                .post(format!("{base}/admin/circuits/{name}/reset"))
                .send()
                .await?
        }
        Commands::Policies(PolicyCommands::List) => {
            client.get(format!("{base}/admin/policies")).send().await?
        }
        Commands::Policies(PolicyCommands::Get { name }) => {
            client
                .get(format!("{base}/admin/policies/{name}"))
                .send()
                .await?
        }
        Commands::Policies(PolicyCommands::Delete { name }) => {
            client
                .delete(format!("{base}/admin/policies/{name}"))
                .send()
                .await?
        }
        Commands::Policies(PolicyCommands::Put { file }) => {
            let policy = read_policy(&file)?;
            client
                .put(format!("{base}/admin/policies/{}", policy.name))
                .json(&policy)
                .send()
                .await?
        }
        Commands::Policies(PolicyCommands::Validate { file }) => {
            let policy = read_policy(&file)?;
            client
                .post(format!("{base}/admin/policies/validate"))
                .json(&policy)
                .send()
                .await?
        }
    };

    print_response(res).await
}

fn read_policy(file: &Path) -> Result<resilience_engine::Policy, Box<dyn std::error::Error>> {
    let format = PolicyFormat::from_path(file)
        .ok_or_else(|| format!("unsupported policy file extension: {}", file.display()))?;
    let content = std::fs::read_to_string(file)?;
    let policy = unmarshal_policy(&content, format)?;
    if policy.name.is_empty() {
        return Err(format!("{} does not name the policy", file.display()).into());
    }
    Ok(policy)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
