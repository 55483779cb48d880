// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{credentials, retry, timing};
use crate::registry::{normalize_registry, region_from_registry, Credentials};
use crate::sync::retry::RetryPolicy;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const FALLBACK_REGION: &str = "us-east-1";

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Registry host used when a request does not name one
    pub registry: String,
    /// Region used when neither the request nor the registry host names one
    pub region: String,
    pub credentials_secret_name: String,
    pub credentials_secret_namespace: String,
    /// Credentials from the process environment, preferred over the secret
    pub static_credentials: Option<Credentials>,
    pub refresh_interval: Duration,
    pub token_safety_margin: Duration,
    pub api_timeout: Duration,
    pub worker_count: usize,
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let registry = lookup("REGISTRY")
            .map(|r| normalize_registry(&r))
            .context("REGISTRY environment variable not set")?;
        let region = lookup("AWS_REGION")
            .or_else(|| region_from_registry(&registry))
            .unwrap_or_else(|| FALLBACK_REGION.to_string());

        let static_credentials = match (
            lookup(credentials::ACCESS_KEY_ID),
            lookup(credentials::SECRET_ACCESS_KEY),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => {
                Some(Credentials::new(access_key_id, secret_access_key))
            }
            _ => None,
        };

        let max_attempts = parse_or(&lookup, "RETRY_MAX_ATTEMPTS", retry::MAX_ATTEMPTS)?;

        Ok(Config {
            registry,
            region,
            credentials_secret_name: lookup("AWS_CREDENTIALS_SECRET_NAME")
                .unwrap_or_else(|| credentials::DEFAULT_SECRET_NAME.to_string()),
            credentials_secret_namespace: lookup("AWS_CREDENTIALS_SECRET_NAMESPACE")
                .unwrap_or_else(|| credentials::DEFAULT_SECRET_NAMESPACE.to_string()),
            static_credentials,
            refresh_interval: Duration::from_secs(parse_or(
                &lookup,
                "REFRESH_INTERVAL_SECS",
                timing::REFRESH_INTERVAL_SECS,
            )?),
            token_safety_margin: Duration::from_secs(parse_or(
                &lookup,
                "TOKEN_SAFETY_MARGIN_SECS",
                timing::TOKEN_SAFETY_MARGIN_SECS,
            )?),
            api_timeout: Duration::from_secs(parse_or(
                &lookup,
                "API_TIMEOUT_SECS",
                timing::API_TIMEOUT_SECS,
            )?),
            worker_count: parse_or(&lookup, "WORKER_COUNT", timing::DEFAULT_WORKER_COUNT)?.max(1),
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_secs(retry::BASE_DELAY_SECS),
                Duration::from_secs(retry::MAX_DELAY_SECS),
            ),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {value}")),
        None => Ok(default),
    }
}
