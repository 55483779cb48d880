// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry token exchange and caching.

pub mod cache;
pub mod exchange;
pub mod token;

pub use cache::TokenCache;
pub use exchange::{CredentialSource, Credentials, EcrTokenEndpoint, ExchangedToken, TokenEndpoint};
pub use token::{normalize_registry, region_from_registry, RegistryKey, RegistryToken};
