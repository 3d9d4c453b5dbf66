//! Versioned policy store with change notifications.
//!
//! The store is an immutable map behind an `ArcSwap`. Writers serialize on
//! a mutex, build the next map from the current one and swap it in whole,
//! so readers always see a complete snapshot. Change events are published
//! after the swap, while the writer lock is still held, which keeps event
//! order identical to mutation order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::{EmitExt, EventBuilder, EventType, Metadata};
use crate::policy::schema::Policy;
use crate::policy::validation::validate_policy;
use crate::resilience::error::{ResilienceError, ResilienceResult};

/// Buffered change notifications per subscriber.
const WATCH_CAPACITY: usize = 100;

pub type PolicyMap = HashMap<String, Arc<Policy>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEventType {
    Created,
    Updated,
    Deleted,
}

/// Notification of one successful store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvent {
    #[serde(rename = "type")]
    pub event_type: PolicyEventType,
    pub policy_name: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Validates, stores and publishes named policies.
pub struct PolicyEngine {
    store: ArcSwap<PolicyMap>,
    writer: Mutex<()>,
    changes: broadcast::Sender<PolicyEvent>,
    events: Option<Arc<EventBuilder>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            store: ArcSwap::from_pointee(PolicyMap::new()),
            writer: Mutex::new(()),
            changes,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<Arc<EventBuilder>>) -> Self {
        self.events = events;
        self
    }

    pub fn validate(&self, policy: &Policy) -> ResilienceResult<()> {
        validate_policy(policy)
    }

    /// Validate and store `policy`. On failure the store is untouched.
    ///
    /// Returns the stored policy with its assigned version. Resubmitting
    /// identical content is a no-op that returns the current version.
    pub fn update_policy(&self, policy: Policy) -> ResilienceResult<Policy> {
        self.validate(&policy)?;

        let _writer = self.writer.lock();
        let current = self.store.load_full();
        let (stored, event) = Self::stage(&current, policy);
        let Some(event) = event else {
            return Ok(stored);
        };

        let mut next = (*current).clone();
        next.insert(stored.name.clone(), Arc::new(stored.clone()));
        self.store.store(Arc::new(next));
        self.publish(event);
        Ok(stored)
    }

    /// Validate every policy, then store them with one swap.
    /// Unchanged policies are skipped. Nothing is stored if any is invalid.
    pub fn apply_all(&self, policies: Vec<Policy>) -> ResilienceResult<Vec<PolicyEvent>> {
        for policy in &policies {
            self.validate(policy)?;
        }
        let mut seen = HashSet::new();
        for policy in &policies {
            if !seen.insert(policy.name.as_str()) {
                return Err(ResilienceError::invalid_policy(
                    &policy.name,
                    "name",
                    "is defined more than once",
                ));
            }
        }

        let _writer = self.writer.lock();
        let current = self.store.load_full();
        let mut next = (*current).clone();
        let mut published = Vec::new();
        for policy in policies {
            if let (stored, Some(event)) = Self::stage(&next, policy) {
                next.insert(stored.name.clone(), Arc::new(stored));
                published.push(event);
            }
        }

        if !published.is_empty() {
            self.store.store(Arc::new(next));
            for event in &published {
                self.publish(event.clone());
            }
        }
        Ok(published)
    }

    /// Remove a policy, returning the removed definition.
    pub fn delete_policy(&self, name: &str) -> ResilienceResult<Policy> {
        let _writer = self.writer.lock();
        let current = self.store.load_full();
        let Some(existing) = current.get(name).cloned() else {
            return Err(ResilienceError::invalid_policy(name, "name", "not found"));
        };

        let mut next = (*current).clone();
        next.remove(name);
        self.store.store(Arc::new(next));
        self.publish(PolicyEvent {
            event_type: PolicyEventType::Deleted,
            policy_name: name.to_string(),
            version: existing.version,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        });
        Ok((*existing).clone())
    }

    /// An independent copy of the named policy.
    pub fn get_policy(&self, name: &str) -> Option<Policy> {
        self.store.load().get(name).map(|p| (**p).clone())
    }

    /// All policies, ordered by name.
    pub fn list(&self) -> Vec<Policy> {
        let snapshot = self.store.load();
        let mut all: Vec<Policy> = snapshot.values().map(|p| (**p).clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// The policy for `service`: an exact name match, else the matching
    /// pattern with the longest literal part.
    pub fn find_for_service(&self, service: &str) -> Option<Policy> {
        let snapshot = self.store.load();
        if let Some(exact) = snapshot.get(service) {
            return Some((**exact).clone());
        }
        snapshot
            .values()
            .filter(|p| p.service_pattern.is_some() && p.matches_service(service))
            .max_by(|a, b| {
                pattern_specificity(a)
                    .cmp(&pattern_specificity(b))
                    .then_with(|| b.name.cmp(&a.name))
            })
            .map(|p| (**p).clone())
    }

    /// The current store snapshot.
    pub fn snapshot(&self) -> Arc<PolicyMap> {
        self.store.load_full()
    }

    pub fn len(&self) -> usize {
        self.store.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to change notifications from now on.
    pub fn watch(&self) -> PolicyWatch {
        PolicyWatch {
            rx: self.changes.subscribe(),
        }
    }

    /// Stamp the version for `policy` against `map`. `None` event means unchanged.
    fn stage(map: &PolicyMap, mut policy: Policy) -> (Policy, Option<PolicyEvent>) {
        let previous = map.get(&policy.name);
        if let Some(prev) = previous {
            if prev.same_content(&policy) {
                return ((**prev).clone(), None);
            }
        }

        let (event_type, version) = match previous {
            Some(prev) => (PolicyEventType::Updated, policy.version.max(prev.version + 1)),
            None => (PolicyEventType::Created, policy.version.max(1)),
        };
        policy.version = version;

        let event = PolicyEvent {
            event_type,
            policy_name: policy.name.clone(),
            version,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        };
        (policy, Some(event))
    }

    fn publish(&self, event: PolicyEvent) {
        tracing::info!(
            policy = %event.policy_name,
            version = event.version,
            change = ?event.event_type,
            "Policy store updated"
        );
        self.events.record(
            EventType::PolicyChange,
            crate::metadata!(
                "policy" => event.policy_name.as_str(),
                "version" => event.version,
                "change" => event.event_type,
            ),
        );
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }
}

fn pattern_specificity(policy: &Policy) -> usize {
    policy
        .service_pattern
        .as_deref()
        .map(|s| s.trim_end_matches('*').len())
        .unwrap_or(0)
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("policies", &self.len())
            .field("watchers", &self.changes.receiver_count())
            .finish()
    }
}

/// A subscription to policy changes.
#[derive(Debug)]
pub struct PolicyWatch {
    rx: broadcast::Receiver<PolicyEvent>,
}

impl PolicyWatch {
    /// Next change, or `None` once the engine is gone. A subscriber that
    /// falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<PolicyEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Policy watcher lagged, skipping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// A change that is already buffered, if any.
    pub fn try_recv(&mut self) -> Option<PolicyEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
