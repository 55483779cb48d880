// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Single-flight token cache.
//!
//! Holds the latest token per registry key. Callers arriving while an exchange
//! for their key is running join that exchange instead of starting another one,
//! and all of them observe its result.

use crate::constants::timing::TOKEN_LIFETIME_SECS;
use crate::error::TokenError;
use crate::registry::exchange::{CredentialSource, TokenEndpoint};
use crate::registry::token::{RegistryKey, RegistryToken};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

type TokenResult = Result<RegistryToken, TokenError>;
type Flight = Shared<BoxFuture<'static, TokenResult>>;

#[derive(Default)]
struct Slot {
    cached: Option<RegistryToken>,
    in_flight: Option<Flight>,
}

pub struct TokenCache {
    credentials: Arc<dyn CredentialSource>,
    endpoint: Arc<dyn TokenEndpoint>,
    slots: Mutex<HashMap<RegistryKey, Slot>>,
    safety_margin: chrono::Duration,
    timeout: Duration,
}

impl TokenCache {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        endpoint: Arc<dyn TokenEndpoint>,
        safety_margin: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            endpoint,
            slots: Mutex::new(HashMap::new()),
            safety_margin: chrono::Duration::from_std(safety_margin)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            timeout,
        }
    }

    /// Return a token for the key, exchanging a new one when the cached entry
    /// is missing or inside the safety margin.
    #[instrument(skip(self), fields(registry = %key))]
    pub async fn get_token(&self, key: &RegistryKey) -> TokenResult {
        let flight = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(key.clone()).or_default();

            if let Some(token) = slot
                .cached
                .as_ref()
                .filter(|t| t.is_fresh(Utc::now(), self.safety_margin))
            {
                debug!("Serving cached token expiring at {}", token.expires_at());
                return Ok(token.clone());
            }

            match &slot.in_flight {
                Some(flight) => {
                    debug!("Joining in-flight token exchange");
                    flight.clone()
                }
                None => {
                    let flight = self.start_exchange(key.clone());
                    slot.in_flight = Some(flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        {
            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots.get_mut(key) {
                // Only the first caller to finish settles the slot
                if slot.in_flight.as_ref().is_some_and(|f| f.ptr_eq(&flight)) {
                    slot.in_flight = None;
                    match &result {
                        Ok(token) => {
                            info!("Obtained registry token expiring at {}", token.expires_at());
                            slot.cached = Some(token.clone());
                        }
                        Err(e) => warn!("Token exchange failed, keeping previous entry: {}", e),
                    }
                }
            }
        }

        let token = result?;
        if token.is_expired(Utc::now()) {
            return Err(TokenError::Transient(format!(
                "registry returned a token that expired at {}",
                token.expires_at()
            )));
        }
        Ok(token)
    }

    fn start_exchange(&self, key: RegistryKey) -> Flight {
        let credentials = Arc::clone(&self.credentials);
        let endpoint = Arc::clone(&self.endpoint);
        let timeout = self.timeout;

        async move {
            let exchange = async {
                let creds = credentials.get_credentials().await?;
                let issued_at = Utc::now();
                let exchanged = endpoint.exchange(&creds, &key.region).await?;
                let expires_at = exchanged
                    .expires_at
                    .unwrap_or_else(|| issued_at + chrono::Duration::seconds(TOKEN_LIFETIME_SECS));
                Ok::<_, TokenError>(RegistryToken::new(
                    exchanged.token,
                    key.registry.clone(),
                    issued_at,
                    expires_at,
                ))
            };

            match tokio::time::timeout(timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(TokenError::Transient(format!(
                    "token exchange timed out after {:?}",
                    timeout
                ))),
            }
        }
        .boxed()
        .shared()
    }
}
