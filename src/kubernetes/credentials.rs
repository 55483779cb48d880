// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Credential source backed by an existing Kubernetes secret

use crate::config::Config;
use crate::constants::credentials::{ACCESS_KEY_ID, SECRET_ACCESS_KEY};
use crate::error::{OperatorError, Result};
use crate::registry::{CredentialSource, Credentials};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::{debug, instrument};

/// Reads the AWS key pair, preferring credentials from the environment
pub struct SecretCredentialSource {
    client: Client,
    secret_name: String,
    namespace: String,
    static_credentials: Option<Credentials>,
}

impl SecretCredentialSource {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            secret_name: config.credentials_secret_name.clone(),
            namespace: config.credentials_secret_namespace.clone(),
            static_credentials: config.static_credentials.clone(),
        }
    }

    /// `namespace/name` of the backing secret
    pub fn location(&self) -> String {
        format!("{}/{}", self.namespace, self.secret_name)
    }
}

#[async_trait]
impl CredentialSource for SecretCredentialSource {
    #[instrument(skip(self), fields(secret = %self.location()))]
    async fn get_credentials(&self) -> Result<Credentials> {
        if let Some(credentials) = &self.static_credentials {
            debug!("Using AWS credentials from the environment");
            return Ok(credentials.clone());
        }

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let secret = secrets.get(&self.secret_name).await.map_err(|e| match e {
            kube::Error::Api(ref resp) if resp.code == 404 => OperatorError::CredentialError(
                format!("secret {} not found", self.location()),
            ),
            other => OperatorError::KubeError(other),
        })?;

        let read = |key: &str| -> Result<String> {
            let value = secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| String::from_utf8(v.0.clone()))
                .transpose()
                .map_err(|e| {
                    OperatorError::CredentialError(format!(
                        "{} in {} is not UTF-8: {}",
                        key,
                        self.location(),
                        e
                    ))
                })?
                .unwrap_or_default();

            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(OperatorError::CredentialError(format!(
                    "secret {} is missing {}",
                    self.location(),
                    key
                )));
            }
            Ok(value)
        };

        Ok(Credentials::new(read(ACCESS_KEY_ID)?, read(SECRET_ACCESS_KEY)?))
    }
}
