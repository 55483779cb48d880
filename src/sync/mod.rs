// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Convergence engine: desired state, passes, retries and the periodic refresh.

pub mod manager;
pub mod pass;
pub mod retry;
pub mod scheduler;
pub mod secrets;
pub mod service_accounts;
pub mod state;

pub use manager::{StatusMap, SyncEvent, SyncManager, SyncManagerHandle};
pub use pass::{ClusterTarget, NamespaceTarget};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use secrets::SecretPropagator;
pub use service_accounts::ServiceAccountPatcher;
pub use state::{DesiredEntry, DesiredStateStore, Phase, RequestStatus};
