// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Binding of pull secrets to the default service account

use crate::constants::DEFAULT_SERVICE_ACCOUNT;
use crate::error::{is_status, with_timeout, OperatorError, Result};
use k8s_openapi::api::core::v1::{LocalObjectReference, ServiceAccount};
use kube::{api::PostParams, Api, Client};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, PartialEq, Eq)]
enum BindOutcome {
    AlreadyBound,
    Bound,
}

/// Adds the pull secret to the `default` service account with optimistic
/// read-modify-write, retrying when another writer got there first
#[derive(Clone)]
pub struct ServiceAccountPatcher {
    client: Client,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl ServiceAccountPatcher {
    pub fn new(client: Client, timeout: Duration, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            client,
            timeout,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    #[instrument(skip(self))]
    pub async fn ensure_binding(&self, namespace: &str, secret_name: &str) -> Result<()> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let mut attempt = 1;

        loop {
            let result = with_timeout(
                self.timeout,
                "service account patch",
                try_bind(&accounts, namespace, secret_name),
            )
            .await;

            match result {
                Ok(BindOutcome::AlreadyBound) => {
                    debug!(
                        "Service account {}/{} already references {}",
                        namespace, DEFAULT_SERVICE_ACCOUNT, secret_name
                    );
                    return Ok(());
                }
                Ok(BindOutcome::Bound) => {
                    info!(
                        "Patched service account {}/{} to use {}",
                        namespace, DEFAULT_SERVICE_ACCOUNT, secret_name
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "Attempt {}/{} to patch service account {}/{} failed: {}",
                        attempt, self.max_attempts, namespace, DEFAULT_SERVICE_ACCOUNT, e
                    );
                    sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn try_bind(
    accounts: &Api<ServiceAccount>,
    namespace: &str,
    secret_name: &str,
) -> Result<BindOutcome> {
    // A missing default account usually means the namespace was just created
    let mut account = accounts.get(DEFAULT_SERVICE_ACCOUNT).await.map_err(|e| {
        if is_status(&e, 404) {
            OperatorError::ServiceAccountNotReady(format!(
                "{}/{}",
                namespace, DEFAULT_SERVICE_ACCOUNT
            ))
        } else {
            OperatorError::KubeError(e)
        }
    })?;

    if !add_pull_secret_reference(&mut account, secret_name) {
        return Ok(BindOutcome::AlreadyBound);
    }

    accounts
        .replace(DEFAULT_SERVICE_ACCOUNT, &PostParams::default(), &account)
        .await
        .map_err(|e| {
            if is_status(&e, 409) || is_status(&e, 404) {
                OperatorError::Conflict(format!(
                    "service account {}/{}",
                    namespace, DEFAULT_SERVICE_ACCOUNT
                ))
            } else {
                OperatorError::KubeError(e)
            }
        })?;

    Ok(BindOutcome::Bound)
}

/// Append the secret to `imagePullSecrets` unless it is already listed.
/// Returns whether the account changed.
pub fn add_pull_secret_reference(account: &mut ServiceAccount, secret_name: &str) -> bool {
    let refs = account.image_pull_secrets.get_or_insert_with(Vec::new);
    if refs.iter().any(|r| r.name == secret_name) {
        return false;
    }
    refs.push(LocalObjectReference {
        name: secret_name.to_string(),
    });
    true
}
