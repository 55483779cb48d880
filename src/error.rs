// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// How the reconciler treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Long-lived credentials were rejected; waits for the next refresh tick
    Auth,
    /// Eligible for the bounded retry policy
    Transient,
    /// Retrying cannot help, e.g. the target namespace does not exist
    Permanent,
}

/// Outcome of a failed token exchange. Cloneable so every caller joined to the
/// same in-flight exchange receives it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Registry rejected credentials: {0}")]
    AuthFailure(String),

    #[error("Token exchange failed: {0}")]
    Transient(String),
}

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Credential source error: {0}")]
    CredentialError(String),

    #[error("Namespace {0} does not exist")]
    NamespaceNotFound(String),

    #[error("Conflict while updating {0}")]
    Conflict(String),

    #[error("Service account {0} does not exist yet")]
    ServiceAccountNotReady(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Invalid registry token: {0}")]
    InvalidToken(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl OperatorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            OperatorError::Token(TokenError::AuthFailure(_))
            | OperatorError::CredentialError(_) => FailureKind::Auth,
            OperatorError::Token(TokenError::Transient(_))
            | OperatorError::Conflict(_)
            | OperatorError::ServiceAccountNotReady(_)
            | OperatorError::Timeout { .. } => FailureKind::Transient,
            OperatorError::NamespaceNotFound(_)
            | OperatorError::InvalidToken(_)
            | OperatorError::InvalidRequest(_) => FailureKind::Permanent,
            OperatorError::KubeError(e) => kube_failure_kind(e),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

impl From<OperatorError> for TokenError {
    fn from(err: OperatorError) -> Self {
        match err {
            OperatorError::Token(token_err) => token_err,
            other if other.kind() == FailureKind::Auth => {
                TokenError::AuthFailure(other.to_string())
            }
            other => TokenError::Transient(other.to_string()),
        }
    }
}

fn kube_failure_kind(err: &kube::Error) -> FailureKind {
    match err {
        kube::Error::Api(resp) => match resp.code {
            400 | 401 | 403 | 422 => FailureKind::Permanent,
            _ => FailureKind::Transient,
        },
        _ => FailureKind::Transient,
    }
}

/// Check whether a Kubernetes error is an API status with the given code
pub fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

/// Bound an external call; an elapsed timeout becomes a transient failure
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(OperatorError::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
