// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry token model and docker config rendering

use crate::constants::docker;
use crate::error::{OperatorError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one registry endpoint; the token cache holds one entry per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryKey {
    pub region: String,
    pub registry: String,
}

impl RegistryKey {
    pub fn new(region: impl Into<String>, registry: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            registry: registry.into(),
        }
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.registry, self.region)
    }
}

/// Short-lived registry authorization token
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryToken {
    token: String,
    registry_endpoint: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl fmt::Debug for RegistryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryToken")
            .field("registry_endpoint", &self.registry_endpoint)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct DockerConfig<'a> {
    auths: BTreeMap<&'a str, DockerAuth<'a>>,
}

#[derive(Serialize)]
struct DockerAuth<'a> {
    username: &'a str,
    password: &'a str,
    auth: &'a str,
    email: &'a str,
}

impl RegistryToken {
    pub fn new(
        token: impl Into<String>,
        registry_endpoint: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            registry_endpoint: registry_endpoint.into(),
            issued_at,
            expires_at,
        }
    }

    /// The opaque base64 `user:password` blob as returned by the registry
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn registry_endpoint(&self) -> &str {
        &self.registry_endpoint
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True while the token is outside the refresh margin before its expiry
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now < self.expires_at - margin
    }

    /// Decode the token into its username and password parts
    pub fn basic_credentials(&self) -> Result<(String, String)> {
        let decoded = STANDARD
            .decode(self.token.trim())
            .map_err(|e| OperatorError::InvalidToken(format!("not base64: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| OperatorError::InvalidToken(format!("not UTF-8: {}", e)))?;

        let Some((username, password)) = decoded.split_once(':') else {
            return Err(OperatorError::InvalidToken(
                "missing ':' separator between username and password".to_string(),
            ));
        };

        Ok((username.to_string(), password.to_string()))
    }

    /// Render the `.dockerconfigjson` payload for this token
    pub fn docker_config_json(&self) -> Result<Vec<u8>> {
        let (username, password) = self.basic_credentials()?;
        let config = DockerConfig {
            auths: BTreeMap::from([(
                self.registry_endpoint.as_str(),
                DockerAuth {
                    username: &username,
                    password: &password,
                    auth: self.token.trim(),
                    email: docker::PLACEHOLDER_EMAIL,
                },
            )]),
        };

        serde_json::to_vec(&config).map_err(|e| {
            OperatorError::InvalidToken(format!("failed to render docker config: {}", e))
        })
    }
}

/// Strip scheme and trailing slashes so the host can be used as an `auths` key
pub fn normalize_registry(registry: &str) -> String {
    let registry = registry.trim();
    let registry = registry
        .strip_prefix("https://")
        .or_else(|| registry.strip_prefix("http://"))
        .unwrap_or(registry);
    registry.trim_end_matches('/').to_string()
}

/// Extract the region from an ECR host such as `123.dkr.ecr.eu-west-1.amazonaws.com`
pub fn region_from_registry(registry: &str) -> Option<String> {
    let host = normalize_registry(registry);
    let mut parts = host.split('.');
    let _account = parts.next()?;
    if parts.next()? != "dkr" || parts.next()? != "ecr" {
        return None;
    }
    parts
        .next()
        .filter(|region| !region.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const REGISTRY: &str = "209202477790.dkr.ecr.us-east-1.amazonaws.com";

    fn make_token(raw: &str) -> RegistryToken {
        let now = Utc::now();
        RegistryToken::new(raw, REGISTRY, now, now + Duration::hours(12))
    }

    #[test]
    fn test_freshness_honours_margin() {
        let now = Utc::now();
        let token = RegistryToken::new("x", REGISTRY, now, now + Duration::minutes(20));

        assert!(!token.is_expired(now));
        assert!(!token.is_fresh(now, Duration::minutes(30)));
        assert!(token.is_fresh(now, Duration::minutes(10)));
        assert!(token.is_expired(now + Duration::minutes(20)));
    }

    #[test]
    fn test_basic_credentials() {
        let token = make_token(&STANDARD.encode("AWS:p4ss:word"));
        let (username, password) = token.basic_credentials().unwrap();
        assert_eq!(username, "AWS");
        assert_eq!(password, "p4ss:word");
    }

    #[test]
    fn test_basic_credentials_rejects_garbage() {
        assert!(make_token("%%%").basic_credentials().is_err());
        assert!(make_token(&STANDARD.encode("no-separator"))
            .basic_credentials()
            .is_err());
    }

    #[test]
    fn test_docker_config_json() {
        let raw = STANDARD.encode("AWS:secret");
        let token = make_token(&raw);

        let json: serde_json::Value =
            serde_json::from_slice(&token.docker_config_json().unwrap()).unwrap();

        let auth = &json["auths"][REGISTRY];
        assert_eq!(auth["username"], "AWS");
        assert_eq!(auth["password"], "secret");
        assert_eq!(auth["auth"], raw.as_str());
        assert_eq!(auth["email"], docker::PLACEHOLDER_EMAIL);
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = make_token("c3VwZXItc2VjcmV0");
        assert!(!format!("{:?}", token).contains("c3VwZXItc2VjcmV0"));
    }

    #[test]
    fn test_normalize_registry() {
        assert_eq!(normalize_registry("https://reg.example.com/"), "reg.example.com");
        assert_eq!(normalize_registry(" reg.example.com "), "reg.example.com");
    }

    #[test]
    fn test_region_from_registry() {
        assert_eq!(region_from_registry(REGISTRY).as_deref(), Some("us-east-1"));
        assert_eq!(
            region_from_registry("https://1.dkr.ecr.ap-south-1.amazonaws.com").as_deref(),
            Some("ap-south-1")
        );
        assert_eq!(region_from_registry("ghcr.io"), None);
    }
}
