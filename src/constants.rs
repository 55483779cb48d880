// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name used as field manager and `managed-by` label value
pub const OPERATOR_NAME: &str = "ecr-pull-secret-operator";

/// Service account patched in every target namespace
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Kubernetes label and annotation keys written on propagated secrets
pub mod labels {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    /// RFC 3339 expiry of the registry token held in the secret
    pub const TOKEN_EXPIRES_AT: &str = "alchemy.com/token-expires-at";
}

/// Docker registry secret format
pub mod docker {
    pub const SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
    pub const CONFIG_KEY: &str = ".dockerconfigjson";
    pub const PLACEHOLDER_EMAIL: &str = "none@none.local";
}

/// Keys looked up in the credential secret and the process environment
pub mod credentials {
    pub const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
    pub const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
    pub const DEFAULT_SECRET_NAME: &str = "ecr-credential-refresher";
    pub const DEFAULT_SECRET_NAMESPACE: &str = "default";
}

/// Refresh and token lifetime settings
pub mod timing {
    /// Interval between two scheduled refresh sweeps
    pub const REFRESH_INTERVAL_SECS: u64 = 6 * 3600;
    /// Lifetime of an ECR authorization token when the endpoint omits it
    pub const TOKEN_LIFETIME_SECS: i64 = 12 * 3600;
    /// A cached token closer than this to its expiry is exchanged again
    pub const TOKEN_SAFETY_MARGIN_SECS: u64 = 30 * 60;
    /// Upper bound for every call to the registry or the Kubernetes API
    pub const API_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_WORKER_COUNT: usize = 4;
}

/// Retry settings for transient failures
pub mod retry {
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const BASE_DELAY_SECS: u64 = 5;
    pub const MAX_DELAY_SECS: u64 = 300;
    /// Attempts for the service account read-modify-write loop
    pub const BINDING_ATTEMPTS: u32 = 5;
    pub const BINDING_BACKOFF_MILLIS: u64 = 200;
}

/// CRD polling configuration
pub mod crd {
    pub const GROUP: &str = "alchemy.com";
    pub const VERSION: &str = "v1alpha1";
    pub const KIND: &str = "PullSecretRequest";
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
