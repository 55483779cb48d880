// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types.

pub mod pull_secret_request;

pub use pull_secret_request::{PullSecretRequest, PullSecretRequestSpec};
