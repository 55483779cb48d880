// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Desired state and per-request reconciliation status

use crate::config::Config;
use crate::registry::RegistryKey;
use crate::types::PullSecretRequest;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lifecycle of a tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Known, not yet converged
    Pending,
    /// Token fetch and propagation in flight
    Converging,
    /// Every target namespace is up to date as of the last pass
    Converged,
    /// The last pass failed for at least one namespace
    Failed,
    /// Removed from the cluster; nothing more is done for it
    Deleted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Pending => "Pending",
            Phase::Converging => "Converging",
            Phase::Converged => "Converged",
            Phase::Failed => "Failed",
            Phase::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// What a request asks for, resolved against operator defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntry {
    pub secret_name: String,
    pub namespaces: BTreeSet<String>,
    pub registry: RegistryKey,
}

impl DesiredEntry {
    pub fn from_request(request: &PullSecretRequest, config: &Config) -> Self {
        Self {
            secret_name: request.spec.secret_name.trim().to_string(),
            namespaces: request.target_namespaces(),
            registry: request.registry_key(&config.registry, &config.region),
        }
    }

    /// A request without a secret name cannot be propagated
    pub fn has_secret_name(&self) -> bool {
        !self.secret_name.is_empty()
    }
}

/// Mirror of the current request set, keyed by request name
#[derive(Debug, Default)]
pub struct DesiredStateStore {
    entries: BTreeMap<String, DesiredEntry>,
}

impl DesiredStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an entry; returns false when it was already identical
    pub fn upsert(&mut self, name: &str, entry: DesiredEntry) -> bool {
        match self.entries.get(name) {
            Some(existing) if *existing == entry => false,
            _ => {
                self.entries.insert(name.to_string(), entry);
                true
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<DesiredEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&DesiredEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Point-in-time copy used for sweeps
    pub fn snapshot(&self) -> Vec<(String, DesiredEntry)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Externally observable status of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStatus {
    pub phase: Phase,
    /// Desired namespaces at the time of the last transition
    pub namespaces: BTreeSet<String>,
    pub failed_namespaces: BTreeSet<String>,
    pub last_error: Option<String>,
    /// Passes finished since the request was first seen
    pub completed_passes: u64,
}
