// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rendering and create-or-replace of docker registry pull secrets

use crate::constants::{docker, labels, OPERATOR_NAME};
use crate::error::{is_status, with_timeout, OperatorError, Result};
use crate::registry::RegistryToken;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Writes the pull secret into target namespaces
#[derive(Clone)]
pub struct SecretPropagator {
    client: Client,
    timeout: Duration,
}

impl SecretPropagator {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Create the secret, or replace the existing one as a whole
    #[instrument(skip(self, token), fields(registry = %token.registry_endpoint()))]
    pub async fn apply(
        &self,
        namespace: &str,
        secret_name: &str,
        token: &RegistryToken,
    ) -> Result<()> {
        let desired = build_pull_secret(namespace, secret_name, token)?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        with_timeout(self.timeout, "secret apply", async {
            match secrets.get_opt(secret_name).await? {
                Some(existing) => {
                    let mut replacement = desired.clone();
                    replacement.metadata.resource_version = existing.metadata.resource_version;
                    match secrets
                        .replace(secret_name, &PostParams::default(), &replacement)
                        .await
                    {
                        Ok(_) => info!("Updated secret {}/{}", namespace, secret_name),
                        // Deleted between read and write, the namespace is still there
                        Err(e) if is_status(&e, 404) => {
                            debug!(
                                "Secret {}/{} disappeared before replace, creating it",
                                namespace, secret_name
                            );
                            create_secret(&secrets, namespace, secret_name, &desired).await?;
                        }
                        Err(e) if is_status(&e, 409) => {
                            return Err(conflict(namespace, secret_name));
                        }
                        Err(e) => return Err(OperatorError::KubeError(e)),
                    }
                }
                None => {
                    debug!("Secret {}/{} does not exist yet", namespace, secret_name);
                    create_secret(&secrets, namespace, secret_name, &desired).await?;
                }
            }
            Ok::<(), OperatorError>(())
        })
        .await
    }
}

async fn create_secret(
    secrets: &Api<Secret>,
    namespace: &str,
    secret_name: &str,
    desired: &Secret,
) -> Result<()> {
    match secrets.create(&PostParams::default(), desired).await {
        Ok(_) => {
            info!("Created secret {}/{}", namespace, secret_name);
            Ok(())
        }
        Err(e) if is_status(&e, 404) => {
            Err(OperatorError::NamespaceNotFound(namespace.to_string()))
        }
        Err(e) if is_status(&e, 409) => Err(conflict(namespace, secret_name)),
        Err(e) => Err(OperatorError::KubeError(e)),
    }
}

fn conflict(namespace: &str, secret_name: &str) -> OperatorError {
    OperatorError::Conflict(format!("secret {}/{}", namespace, secret_name))
}

/// Build the docker registry secret for a namespace from the current token
pub fn build_pull_secret(
    namespace: &str,
    secret_name: &str,
    token: &RegistryToken,
) -> Result<Secret> {
    let payload = token.docker_config_json()?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                labels::MANAGED_BY.to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                labels::TOKEN_EXPIRES_AT.to_string(),
                token.expires_at().to_rfc3339(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            docker::CONFIG_KEY.to_string(),
            ByteString(payload),
        )])),
        type_: Some(docker::SECRET_TYPE.to_string()),
        ..Default::default()
    })
}
