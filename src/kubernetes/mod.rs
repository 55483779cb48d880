// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery and credential lookup.

pub mod credentials;
pub mod crd;

pub use credentials::SecretCredentialSource;
pub use crd::{report_existing_requests, wait_for_request_crd};
