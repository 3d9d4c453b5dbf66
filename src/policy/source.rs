//! Loading policy documents from disk, with optional hot reload.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use notify::RecommendedWatcher;
use thiserror::Error;

use crate::config::watcher::FileWatcher;
use crate::policy::codec::{unmarshal_document, CodecError, PolicyFormat};
use crate::policy::engine::{PolicyEngine, PolicyEvent};
use crate::resilience::error::ResilienceError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid policy path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode '{path}': {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error("policies in '{path}' rejected: {source}")]
    Rejected {
        path: String,
        #[source]
        source: ResilienceError,
    },

    #[error("failed to watch policy file: {0}")]
    Watch(#[from] notify::Error),
}

/// Check that `path` names a policy file inside `base_dir`.
///
/// Rejects NUL bytes and `..` components, then resolves both paths and
/// requires the file to sit under the base directory.
pub fn validate_policy_path(path: &Path, base_dir: &Path) -> Result<PathBuf, SourceError> {
    let invalid = |reason: &str| SourceError::InvalidPath {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    if path.to_string_lossy().contains('\0') {
        return Err(invalid("contains a NUL byte"));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(invalid("contains '..'"));
    }

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let resolved = joined.canonicalize().map_err(|e| SourceError::Io {
        path: joined.display().to_string(),
        source: e,
    })?;
    let base = base_dir.canonicalize().map_err(|e| SourceError::Io {
        path: base_dir.display().to_string(),
        source: e,
    })?;
    if !resolved.starts_with(&base) {
        return Err(invalid("resolves outside the policy directory"));
    }
    if !resolved.is_file() {
        return Err(invalid("is not a file"));
    }
    Ok(resolved)
}

/// A policy document file feeding a [`PolicyEngine`].
#[derive(Debug)]
pub struct PolicyFileSource {
    path: PathBuf,
    format: PolicyFormat,
    engine: Arc<PolicyEngine>,
}

impl PolicyFileSource {
    /// Open `path` relative to `base_dir`. The format follows the extension.
    pub fn open(
        path: &Path,
        base_dir: &Path,
        engine: Arc<PolicyEngine>,
    ) -> Result<Self, SourceError> {
        let path = validate_policy_path(path, base_dir)?;
        let format = PolicyFormat::from_path(&path).ok_or_else(|| SourceError::Codec {
            path: path.display().to_string(),
            source: CodecError::UnsupportedFormat(path.display().to_string()),
        })?;
        Ok(Self {
            path,
            format,
            engine,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document and apply it as one batch.
    pub fn load(&self) -> Result<Vec<PolicyEvent>, SourceError> {
        let path_str = self.path.display().to_string();
        let content = std::fs::read_to_string(&self.path).map_err(|e| SourceError::Io {
            path: path_str.clone(),
            source: e,
        })?;
        let doc = unmarshal_document(&content, self.format).map_err(|e| SourceError::Codec {
            path: path_str.clone(),
            source: e,
        })?;
        let count = doc.policies.len();
        let applied = self
            .engine
            .apply_all(doc.policies)
            .map_err(|e| SourceError::Rejected {
                path: path_str.clone(),
                source: e,
            })?;

        tracing::info!(
            path = %path_str,
            policies = count,
            changed = applied.len(),
            "Policy file applied"
        );
        Ok(applied)
    }

    /// Re-apply the file whenever it changes. A failed reload keeps the
    /// policies currently in force.
    pub fn watch(self: Arc<Self>) -> Result<RecommendedWatcher, SourceError> {
        let source = self.clone();
        let watcher = FileWatcher::new(&self.path).run(move |_| {
            if let Err(e) = source.load() {
                tracing::error!(error = %e, "Policy reload failed, keeping current policies");
            }
        })?;
        Ok(watcher)
    }
}
