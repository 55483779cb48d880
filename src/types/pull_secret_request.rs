// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::registry::{normalize_registry, region_from_registry, RegistryKey};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Request to keep a registry pull secret refreshed in a set of namespaces
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "alchemy.com", version = "v1alpha1", kind = "PullSecretRequest")]
#[kube(shortname = "psr")]
#[serde(rename_all = "camelCase")]
pub struct PullSecretRequestSpec {
    /// Name of the generated docker registry secret
    #[serde(default)]
    pub secret_name: String,
    /// Namespaces that receive the secret
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

impl PullSecretRequest {
    /// Target namespaces with blanks dropped and duplicates collapsed
    pub fn target_namespaces(&self) -> BTreeSet<String> {
        self.spec
            .namespaces
            .iter()
            .map(|ns| ns.trim())
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Resolve the registry this request pulls from, falling back to operator defaults
    pub fn registry_key(&self, default_registry: &str, default_region: &str) -> RegistryKey {
        let registry = self
            .spec
            .registry
            .as_deref()
            .map(normalize_registry)
            .filter(|r| !r.is_empty());

        let region = self
            .spec
            .region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| registry.as_deref().and_then(region_from_registry))
            .unwrap_or_else(|| default_region.to_string());

        RegistryKey::new(
            region,
            registry.unwrap_or_else(|| default_registry.to_string()),
        )
    }
}
