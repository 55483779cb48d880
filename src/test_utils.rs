// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for mocking Kubernetes API responses and registry collaborators.

use crate::error::{OperatorError, Result as OperatorResult, TokenError};
use crate::registry::{CredentialSource, Credentials, ExchangedToken, RegistryToken, TokenEndpoint};
use crate::sync::pass::NamespaceTarget;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A request observed by [`MockService`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

/// A mock HTTP service that returns predefined responses based on request paths.
///
/// Several responses registered for the same method and path are served in
/// order; the last one keeps being served once the others are used up.
#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), VecDeque<(u16, String)>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the exact path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    /// Add a response for PUT requests matching the exact path
    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    /// All requests received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests received with the given method
    pub fn count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    fn next_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let mut responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(queue) = responses.get_mut(&(method.to_string(), path.to_string())) {
            return if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
        }

        // Try prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), queue) in responses.iter() {
            if m == method && path.starts_with(p.as_str()) {
                return queue.front().cloned();
            }
        }

        None
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let this = self.clone();

        Box::pin(async move {
            let method = req.method().to_string();
            let path = req.uri().path().to_string();
            let bytes = req.into_body().collect().await?.to_bytes();
            let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

            this.requests.lock().unwrap().push(RecordedRequest {
                method: method.clone(),
                path: path.clone(),
                body,
            });

            let (status, body) = this
                .next_response(&method, &path)
                .unwrap_or_else(|| (404, not_found_json("resource", &path)));

            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a mock secret JSON response
pub fn secret_json(namespace: &str, name: &str, resource_version: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": resource_version,
        },
        "type": "kubernetes.io/dockerconfigjson",
        "data": {
            ".dockerconfigjson": "e30="
        }
    })
    .to_string()
}

/// Create a mock service account JSON response
pub fn service_account_json(
    namespace: &str,
    resource_version: &str,
    pull_secrets: &[&str],
) -> String {
    let refs: Vec<_> = pull_secrets
        .iter()
        .map(|name| serde_json::json!({ "name": name }))
        .collect();

    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {
            "name": "default",
            "namespace": namespace,
            "resourceVersion": resource_version,
        },
        "imagePullSecrets": refs,
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    status_json(404, "NotFound", &format!("{} \"{}\" not found", resource, name))
}

/// Create a 409 conflict response
pub fn conflict_json(resource: &str, name: &str) -> String {
    status_json(
        409,
        "Conflict",
        &format!("Operation cannot be fulfilled on {} \"{}\"", resource, name),
    )
}

fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Credential source returning a fixed key pair, or failing when built with `missing`
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    pub fn valid() -> Self {
        Self(Some(Credentials::new("AKIAEXAMPLEKEY", "secret-key")))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn get_credentials(&self) -> OperatorResult<Credentials> {
        self.0
            .clone()
            .ok_or_else(|| OperatorError::CredentialError("no credentials configured".into()))
    }
}

/// Token endpoint that counts exchanges and hands out numbered tokens
pub struct FakeTokenEndpoint {
    calls: AtomicUsize,
    delay: Duration,
    lifetime: chrono::Duration,
    failure: Mutex<Option<TokenError>>,
    regions: Mutex<Vec<String>>,
}

impl FakeTokenEndpoint {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            lifetime: chrono::Duration::hours(12),
            failure: Mutex::new(None),
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn failing(self, error: TokenError) -> Self {
        *self.failure.lock().unwrap() = Some(error);
        self
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn regions(&self) -> Vec<String> {
        self.regions.lock().unwrap().clone()
    }

    /// Raw token value handed out by the n-th exchange (1-based)
    pub fn token_for_call(n: usize) -> String {
        STANDARD.encode(format!("AWS:password-{}", n))
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokenEndpoint {
    async fn exchange(
        &self,
        _credentials: &Credentials,
        region: &str,
    ) -> Result<ExchangedToken, TokenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.regions.lock().unwrap().push(region.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        Ok(ExchangedToken {
            token: Self::token_for_call(n),
            expires_at: Some(Utc::now() + self.lifetime),
        })
    }
}

/// Failure injected into [`RecordingTarget`]
#[derive(Debug, Clone, Copy)]
pub enum Injected {
    NamespaceMissing,
    Conflict,
}

impl Injected {
    fn into_error(self, namespace: &str) -> OperatorError {
        match self {
            Injected::NamespaceMissing => OperatorError::NamespaceNotFound(namespace.to_string()),
            Injected::Conflict => OperatorError::Conflict(format!("{}/secret", namespace)),
        }
    }
}

/// One recorded `apply_secret` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSecret {
    pub namespace: String,
    pub secret_name: String,
    pub token: String,
}

/// Namespace target that records calls and can fail on demand
#[derive(Default)]
pub struct RecordingTarget {
    applied: Mutex<Vec<AppliedSecret>>,
    bindings: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, (Injected, usize)>>,
    active: Mutex<BTreeMap<String, usize>>,
    max_active: Mutex<BTreeMap<String, usize>>,
    delay: Duration,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail `apply_secret` for the namespace the next `times` calls
    pub fn fail_namespace(&self, namespace: &str, failure: Injected, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(namespace.to_string(), (failure, times));
    }

    pub fn applied(&self) -> Vec<AppliedSecret> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_to(&self, namespace: &str) -> Vec<AppliedSecret> {
        self.applied()
            .into_iter()
            .filter(|a| a.namespace == namespace)
            .collect()
    }

    pub fn bindings(&self) -> Vec<(String, String)> {
        self.bindings.lock().unwrap().clone()
    }

    /// Highest number of overlapping `apply_secret` calls seen per secret name
    pub fn max_concurrency(&self, secret_name: &str) -> usize {
        self.max_active
            .lock()
            .unwrap()
            .get(secret_name)
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(&self, namespace: &str) -> Option<Injected> {
        let mut failures = self.failures.lock().unwrap();
        let (failure, remaining) = failures.get_mut(namespace)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(*failure)
    }
}

#[async_trait]
impl NamespaceTarget for RecordingTarget {
    async fn apply_secret(
        &self,
        namespace: &str,
        secret_name: &str,
        token: &RegistryToken,
    ) -> OperatorResult<()> {
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(secret_name.to_string()).or_default();
            *count += 1;
            let current = *count;
            let mut max = self.max_active.lock().unwrap();
            let seen = max.entry(secret_name.to_string()).or_default();
            *seen = (*seen).max(current);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(entry) = self.active.lock().unwrap().get_mut(secret_name) {
            *entry -= 1;
        }

        self.applied.lock().unwrap().push(AppliedSecret {
            namespace: namespace.to_string(),
            secret_name: secret_name.to_string(),
            token: token.token().to_string(),
        });

        match self.take_failure(namespace) {
            Some(failure) => Err(failure.into_error(namespace)),
            None => Ok(()),
        }
    }

    async fn ensure_binding(&self, namespace: &str, secret_name: &str) -> OperatorResult<()> {
        self.bindings
            .lock()
            .unwrap()
            .push((namespace.to_string(), secret_name.to_string()));
        Ok(())
    }
}
