// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Exchange of long-lived AWS credentials for an ECR authorization token.

use crate::constants::OPERATOR_NAME;
use crate::error::{Result, TokenError};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecr::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecr::operation::get_authorization_token::GetAuthorizationTokenError;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, instrument};

/// Error codes returned by AWS when the access key pair itself is unusable
const AUTH_ERROR_CODES: &[&str] = &[
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "AccessDeniedException",
    "AccessDenied",
    "ExpiredTokenException",
];

/// Long-lived access key pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Leading characters of the access key, safe to log
    pub fn redacted_access_key(&self) -> String {
        let prefix: String = self.access_key_id.chars().take(10).collect();
        format!("{}...", prefix)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.redacted_access_key())
            .finish_non_exhaustive()
    }
}

/// Supplies the long-lived credentials used against the registry
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn get_credentials(&self) -> Result<Credentials>;
}

/// Raw result of a token exchange
#[derive(Clone)]
pub struct ExchangedToken {
    pub token: String,
    /// Expiry reported by the endpoint, when it reports one
    pub expires_at: Option<DateTime<Utc>>,
}

/// Registry endpoint that issues short-lived authorization tokens
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> std::result::Result<ExchangedToken, TokenError>;
}

/// ECR `GetAuthorizationToken` backed endpoint
#[derive(Debug, Default, Clone)]
pub struct EcrTokenEndpoint;

impl EcrTokenEndpoint {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenEndpoint for EcrTokenEndpoint {
    #[instrument(skip(self, credentials), fields(access_key = %credentials.redacted_access_key()))]
    async fn exchange(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> std::result::Result<ExchangedToken, TokenError> {
        let provider = aws_credential_types::Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            None,
            None,
            OPERATOR_NAME,
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .load()
            .await;
        let client = aws_sdk_ecr::Client::new(&sdk_config);

        debug!("Requesting ECR authorization token in region {}", region);

        let output = client
            .get_authorization_token()
            .send()
            .await
            .map_err(classify_exchange_error)?;

        let Some(data) = output.authorization_data().first() else {
            return Err(TokenError::Transient(
                "ECR returned no authorization data".to_string(),
            ));
        };

        let Some(token) = data.authorization_token() else {
            return Err(TokenError::Transient(
                "ECR authorization data has no token".to_string(),
            ));
        };

        let expires_at = data
            .expires_at()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));

        Ok(ExchangedToken {
            token: token.to_string(),
            expires_at,
        })
    }
}

fn classify_exchange_error(err: SdkError<GetAuthorizationTokenError>) -> TokenError {
    let message = DisplayErrorContext(&err).to_string();
    match err.code() {
        Some(code) if is_auth_error_code(code) => TokenError::AuthFailure(message),
        _ => TokenError::Transient(message),
    }
}

/// Whether an AWS error code means the credentials were rejected
pub fn is_auth_error_code(code: &str) -> bool {
    AUTH_ERROR_CODES.contains(&code)
}
