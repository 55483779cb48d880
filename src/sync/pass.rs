// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! A single convergence pass for one request.
//!
//! The token is obtained first. Each target namespace then gets its secret
//! written and its `default` service account bound, independently of the
//! others, so one broken namespace never holds back the rest.

use crate::config::Config;
use crate::constants::retry::{BINDING_ATTEMPTS, BINDING_BACKOFF_MILLIS};
use crate::error::{FailureKind, OperatorError, Result};
use crate::registry::{RegistryToken, TokenCache};
use crate::sync::secrets::SecretPropagator;
use crate::sync::service_accounts::ServiceAccountPatcher;
use crate::sync::state::DesiredEntry;
use async_trait::async_trait;
use futures::future::join_all;
use kube::Client;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Where a pass writes its results
#[async_trait]
pub trait NamespaceTarget: Send + Sync {
    async fn apply_secret(
        &self,
        namespace: &str,
        secret_name: &str,
        token: &RegistryToken,
    ) -> Result<()>;

    async fn ensure_binding(&self, namespace: &str, secret_name: &str) -> Result<()>;
}

/// The live cluster
pub struct ClusterTarget {
    secrets: SecretPropagator,
    accounts: ServiceAccountPatcher,
}

impl ClusterTarget {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            secrets: SecretPropagator::new(client.clone(), config.api_timeout),
            accounts: ServiceAccountPatcher::new(
                client,
                config.api_timeout,
                BINDING_ATTEMPTS,
                Duration::from_millis(BINDING_BACKOFF_MILLIS),
            ),
        }
    }
}

#[async_trait]
impl NamespaceTarget for ClusterTarget {
    async fn apply_secret(
        &self,
        namespace: &str,
        secret_name: &str,
        token: &RegistryToken,
    ) -> Result<()> {
        self.secrets.apply(namespace, secret_name, token).await
    }

    async fn ensure_binding(&self, namespace: &str, secret_name: &str) -> Result<()> {
        self.accounts.ensure_binding(namespace, secret_name).await
    }
}

/// Which namespaces of a request a pass covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassScope {
    All,
    Namespaces(BTreeSet<String>),
}

impl PassScope {
    /// Combine two pending triggers into one
    pub fn merge(self, other: PassScope) -> PassScope {
        match (self, other) {
            (PassScope::Namespaces(mut a), PassScope::Namespaces(b)) => {
                a.extend(b);
                PassScope::Namespaces(a)
            }
            _ => PassScope::All,
        }
    }

    /// Namespaces to visit given the entry as it is now. Namespaces that
    /// left the entry since the trigger are dropped.
    pub fn resolve(&self, entry: &DesiredEntry) -> BTreeSet<String> {
        match self {
            PassScope::All => entry.namespaces.clone(),
            PassScope::Namespaces(namespaces) => namespaces
                .intersection(&entry.namespaces)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&OperatorError> for Failure {
    fn from(err: &OperatorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub converged: BTreeSet<String>,
    pub failures: BTreeMap<String, Failure>,
    /// Set when the pass could not reach any namespace
    pub request_failure: Option<Failure>,
}

impl PassOutcome {
    /// Every namespace failed for the same reason
    pub fn failed_all(namespaces: &BTreeSet<String>, failure: Failure) -> Self {
        Self {
            converged: BTreeSet::new(),
            failures: namespaces
                .iter()
                .map(|ns| (ns.clone(), failure.clone()))
                .collect(),
            request_failure: Some(failure),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.failures.is_empty() && self.request_failure.is_none()
    }

    /// Failed namespaces worth another attempt
    pub fn retryable_namespaces(&self) -> BTreeSet<String> {
        self.failures
            .iter()
            .filter(|(_, f)| f.kind == FailureKind::Transient)
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    /// Most relevant error message for status reporting
    pub fn error_message(&self) -> Option<String> {
        if let Some(failure) = &self.request_failure {
            return Some(failure.message.clone());
        }
        self.failures
            .iter()
            .next()
            .map(|(ns, f)| format!("{}: {}", ns, f.message))
    }
}

/// Bring the given namespaces of a request up to date
#[instrument(skip_all, fields(secret = %entry.secret_name, registry = %entry.registry))]
pub async fn converge(
    cache: &TokenCache,
    target: &dyn NamespaceTarget,
    entry: &DesiredEntry,
    namespaces: &BTreeSet<String>,
) -> PassOutcome {
    if !entry.has_secret_name() {
        let err = OperatorError::InvalidRequest("secretName must not be empty".to_string());
        return PassOutcome::failed_all(namespaces, Failure::from(&err));
    }

    if namespaces.is_empty() {
        debug!("No target namespaces, nothing to do");
        return PassOutcome::default();
    }

    let token = match cache.get_token(&entry.registry).await {
        Ok(token) => token,
        Err(e) => {
            warn!("Could not obtain registry token: {}", e);
            return PassOutcome::failed_all(namespaces, Failure::from(&OperatorError::Token(e)));
        }
    };

    let results = join_all(namespaces.iter().map(|ns| {
        let token = &token;
        async move {
            let result = converge_namespace(target, ns, &entry.secret_name, token).await;
            (ns.clone(), result)
        }
    }))
    .await;

    let mut outcome = PassOutcome::default();
    for (namespace, result) in results {
        match result {
            Ok(()) => {
                outcome.converged.insert(namespace);
            }
            Err(e) => {
                warn!("Namespace {} failed: {}", namespace, e);
                outcome.failures.insert(namespace, Failure::from(&e));
            }
        }
    }
    outcome
}

async fn converge_namespace(
    target: &dyn NamespaceTarget,
    namespace: &str,
    secret_name: &str,
    token: &RegistryToken,
) -> Result<()> {
    target.apply_secret(namespace, secret_name, token).await?;
    target.ensure_binding(namespace, secret_name).await
}
