// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watchers that feed cluster changes to the sync manager.

pub mod pull_secret_request;

pub use pull_secret_request::PullSecretRequestWatcher;
