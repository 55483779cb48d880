// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Central coordinator for keeping pull secrets converged.
//!
//! The manager is the only owner of the desired-state store and of the
//! per-request bookkeeping. Watch events, refresh ticks and retry timers all
//! arrive here; convergence passes run as separate tasks and report back.

use crate::config::Config;
use crate::constants::DEFAULT_SERVICE_ACCOUNT;
use crate::error::FailureKind;
use crate::registry::TokenCache;
use crate::sync::pass::{converge, Failure, NamespaceTarget, PassOutcome, PassScope};
use crate::sync::state::{DesiredEntry, DesiredStateStore, Phase, RequestStatus};
use crate::types::PullSecretRequest;
use futures::FutureExt;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

pub type StatusMap = BTreeMap<String, RequestStatus>;

/// Events delivered to the SyncManager
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A request was created or updated
    RequestApplied { request: PullSecretRequest },
    /// A request was removed from the cluster
    RequestDeleted { name: String },
    /// A full listing finished; tracked requests missing from it are gone
    Relisted { names: BTreeSet<String> },
    /// Periodic refresh of every known request
    RefreshTick,
}

/// Handle to send events to the SyncManager
#[derive(Clone)]
pub struct SyncManagerHandle {
    event_tx: mpsc::Sender<SyncEvent>,
    status_rx: watch::Receiver<StatusMap>,
}

impl SyncManagerHandle {
    pub async fn send(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.send(event).await {
            error!("Failed to send event to SyncManager: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }

    /// Live view of every request's status
    pub fn status(&self) -> watch::Receiver<StatusMap> {
        self.status_rx.clone()
    }

    /// Handle whose events land in the returned receiver instead of a manager
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<SyncEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (_, status_rx) = watch::channel(StatusMap::new());
        (
            Self {
                event_tx,
                status_rx,
            },
            event_rx,
        )
    }
}

#[derive(Debug)]
struct Tracked {
    phase: Phase,
    in_flight: bool,
    queued: Option<PassScope>,
    /// Bumped whenever earlier retry timers become irrelevant
    generation: u64,
    retry_attempt: u32,
    failed: BTreeSet<String>,
    last_error: Option<String>,
    completed_passes: u64,
}

impl Tracked {
    fn new(generation: u64) -> Self {
        Self {
            phase: Phase::Pending,
            in_flight: false,
            queued: None,
            generation,
            retry_attempt: 0,
            failed: BTreeSet::new(),
            last_error: None,
            completed_passes: 0,
        }
    }

    /// Back to pending; a pass already running shows as converging again
    /// once its follow-up starts
    fn restart_cycle(&mut self) {
        self.generation += 1;
        self.retry_attempt = 0;
        self.phase = Phase::Pending;
    }
}

struct PassReport {
    name: String,
    generation: u64,
    attempted: BTreeSet<String>,
    outcome: PassOutcome,
}

struct RetryDue {
    name: String,
    generation: u64,
    namespaces: BTreeSet<String>,
}

pub struct SyncManager {
    config: Config,
    cache: Arc<TokenCache>,
    target: Arc<dyn NamespaceTarget>,
    event_rx: mpsc::Receiver<SyncEvent>,
    status_tx: watch::Sender<StatusMap>,
    store: DesiredStateStore,
    tracked: BTreeMap<String, Tracked>,
    /// Highest generation of any dropped request, new entries start above it
    retired_generation: u64,
    workers: Arc<Semaphore>,
    passes: JoinSet<PassReport>,
    retries: JoinSet<RetryDue>,
    draining: bool,
}

impl SyncManager {
    pub fn new(
        config: Config,
        cache: Arc<TokenCache>,
        target: Arc<dyn NamespaceTarget>,
    ) -> (Self, SyncManagerHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (status_tx, status_rx) = watch::channel(StatusMap::new());
        let workers = Arc::new(Semaphore::new(config.worker_count.max(1)));

        let manager = Self {
            config,
            cache,
            target,
            event_rx,
            status_tx,
            store: DesiredStateStore::new(),
            tracked: BTreeMap::new(),
            retired_generation: 0,
            workers,
            passes: JoinSet::new(),
            retries: JoinSet::new(),
            draining: false,
        };

        let handle = SyncManagerHandle {
            event_tx,
            status_rx,
        };
        (manager, handle)
    }

    /// Process events until every handle is dropped, then drain in-flight passes
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "SyncManager started with {} workers",
            self.config.worker_count
        );

        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                Some(joined) = self.passes.join_next() => match joined {
                    Ok(report) => self.finish_pass(report),
                    Err(e) => error!("Convergence task failed: {}", e),
                },
                Some(joined) = self.retries.join_next() => {
                    if let Ok(due) = joined {
                        self.retry_due(due);
                    }
                },
            }
            self.publish();
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!(
            "SyncManager stopping, waiting for {} in-flight passes",
            self.passes.len()
        );
        self.draining = true;
        self.retries.abort_all();

        while let Some(joined) = self.passes.join_next().await {
            match joined {
                Ok(report) => self.finish_pass(report),
                Err(e) => error!("Convergence task failed: {}", e),
            }
        }
        self.publish();
        info!("SyncManager stopped");
    }

    fn handle_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::RequestApplied { request } => self.request_applied(&request),
            SyncEvent::RequestDeleted { name } => self.request_deleted(&name),
            SyncEvent::Relisted { names } => {
                for name in self.store.names().difference(&names) {
                    info!("Request {} disappeared while the watch was down", name);
                    self.request_deleted(name);
                }
            }
            SyncEvent::RefreshTick => self.refresh_all(),
        }
    }

    #[instrument(skip(self, request), fields(request = %request.name_any()))]
    fn request_applied(&mut self, request: &PullSecretRequest) {
        let name = request.name_any();
        let entry = DesiredEntry::from_request(request, &self.config);

        if !self.store.upsert(&name, entry.clone()) {
            debug!("Request unchanged, leaving it to the periodic refresh");
            return;
        }

        info!(
            "Request {} wants secret {} in namespaces {:?} from {}",
            name, entry.secret_name, entry.namespaces, entry.registry
        );

        let seed = self.retired_generation;
        let tracked = self
            .tracked
            .entry(name.clone())
            .or_insert_with(|| Tracked::new(seed));
        if tracked.phase == Phase::Deleted {
            // Recreated under the same name; a pass of the old one is still running
            tracked.failed.clear();
            tracked.last_error = None;
        }
        tracked.restart_cycle();
        self.trigger(&name, PassScope::All);
    }

    fn request_deleted(&mut self, name: &str) {
        let entry = self.store.remove(name);

        let in_flight = self.tracked.get(name).is_some_and(|t| t.in_flight);
        if !in_flight {
            self.forget(name);
        } else if let Some(tracked) = self.tracked.get_mut(name) {
            // The running pass drops it once it reports back
            tracked.generation += 1;
            tracked.phase = Phase::Deleted;
            tracked.queued = None;
        }

        match entry {
            Some(entry) => log_cleanup_instructions(name, &entry),
            None => debug!("Ignoring deletion of unknown request {}", name),
        }
    }

    fn refresh_all(&mut self) {
        let snapshot = self.store.snapshot();
        info!("Refreshing {} pull secret requests", snapshot.len());

        for (name, _) in snapshot {
            // A request deleted since the snapshot is no longer tracked
            let Some(tracked) = self.tracked.get_mut(&name) else {
                continue;
            };
            tracked.restart_cycle();
            self.trigger(&name, PassScope::All);
        }
    }

    fn retry_due(&mut self, due: RetryDue) {
        let current = self
            .tracked
            .get(&due.name)
            .is_some_and(|t| t.generation == due.generation && t.phase != Phase::Deleted);
        if !current {
            debug!("Dropping stale retry for {}", due.name);
            return;
        }
        info!("Retrying namespaces {:?} of request {}", due.namespaces, due.name);
        self.trigger(&due.name, PassScope::Namespaces(due.namespaces));
    }

    /// Start a pass, or fold the trigger into the follow-up of the running one
    fn trigger(&mut self, name: &str, scope: PassScope) {
        let Some(tracked) = self.tracked.get_mut(name) else {
            return;
        };

        if tracked.in_flight {
            debug!("Pass for {} already running, coalescing", name);
            tracked.queued = Some(match tracked.queued.take() {
                Some(queued) => queued.merge(scope),
                None => scope,
            });
            return;
        }

        self.start_pass(name, scope);
    }

    fn start_pass(&mut self, name: &str, scope: PassScope) {
        if self.draining {
            return;
        }
        let Some(entry) = self.store.get(name).cloned() else {
            return;
        };
        let Some(tracked) = self.tracked.get_mut(name) else {
            return;
        };

        let namespaces = scope.resolve(&entry);
        tracked.in_flight = true;
        tracked.phase = Phase::Converging;
        let generation = tracked.generation;

        let cache = Arc::clone(&self.cache);
        let target = Arc::clone(&self.target);
        let workers = Arc::clone(&self.workers);
        let name = name.to_string();

        debug!("Starting pass for {} over {:?}", name, namespaces);
        self.passes.spawn(async move {
            let _permit = workers.acquire_owned().await.ok();
            let outcome = AssertUnwindSafe(converge(&cache, target.as_ref(), &entry, &namespaces))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    PassOutcome::failed_all(
                        &namespaces,
                        Failure {
                            kind: FailureKind::Transient,
                            message: "convergence pass panicked".to_string(),
                        },
                    )
                });
            PassReport {
                name,
                generation,
                attempted: namespaces,
                outcome,
            }
        });
    }

    fn finish_pass(&mut self, report: PassReport) {
        let PassReport {
            name,
            generation,
            attempted,
            outcome,
        } = report;

        let desired = self
            .store
            .get(&name)
            .map(|e| e.namespaces.clone())
            .unwrap_or_default();
        let Some(tracked) = self.tracked.get_mut(&name) else {
            return;
        };
        tracked.in_flight = false;
        tracked.completed_passes += 1;

        if tracked.phase == Phase::Deleted {
            debug!("Discarding pass result for deleted request {}", name);
            self.forget(&name);
            return;
        }

        tracked
            .failed
            .retain(|ns| !attempted.contains(ns) && desired.contains(ns));
        tracked.failed.extend(outcome.failures.keys().cloned());

        if tracked.failed.is_empty() && outcome.request_failure.is_none() {
            tracked.phase = Phase::Converged;
            tracked.last_error = None;
            tracked.retry_attempt = 0;
            info!(
                "Request {} converged, {} namespaces up to date",
                name,
                outcome.converged.len()
            );
        } else {
            tracked.phase = Phase::Failed;
            tracked.last_error = outcome.error_message().or(tracked.last_error.take());
            error!(
                "Request {} failed in namespaces {:?}: {}",
                name,
                tracked.failed,
                tracked.last_error.as_deref().unwrap_or("unknown error")
            );
        }

        if let Some(scope) = tracked.queued.take() {
            self.start_pass(&name, scope);
            return;
        }

        if tracked.phase != Phase::Failed || tracked.generation != generation || self.draining {
            return;
        }

        let retryable = outcome.retryable_namespaces();
        if retryable.is_empty() {
            warn!(
                "Request {} has no retryable failures, waiting for the next refresh",
                name
            );
            return;
        }

        let attempt = tracked.retry_attempt + 1;
        match self.config.retry.delay_for(attempt) {
            Some(delay) => {
                tracked.retry_attempt = attempt;
                warn!(
                    "Retrying {} namespaces of request {} in {:?} (attempt {}/{})",
                    retryable.len(),
                    name,
                    delay,
                    attempt,
                    self.config.retry.max_attempts()
                );
                self.retries.spawn(async move {
                    sleep(delay).await;
                    RetryDue {
                        name,
                        generation,
                        namespaces: retryable,
                    }
                });
            }
            None => warn!(
                "Request {} still failing after {} retries, waiting for the next refresh",
                name, tracked.retry_attempt
            ),
        }
    }

    fn forget(&mut self, name: &str) {
        if let Some(tracked) = self.tracked.remove(name) {
            self.retired_generation = self.retired_generation.max(tracked.generation);
        }
    }

    fn publish(&self) {
        let statuses = self
            .tracked
            .iter()
            .map(|(name, t)| {
                let namespaces = self
                    .store
                    .get(name)
                    .map(|e| e.namespaces.clone())
                    .unwrap_or_default();
                let status = RequestStatus {
                    phase: t.phase,
                    namespaces,
                    failed_namespaces: t.failed.clone(),
                    last_error: t.last_error.clone(),
                    completed_passes: t.completed_passes,
                };
                (name.clone(), status)
            })
            .collect();
        self.status_tx.send_replace(statuses);
    }
}

fn log_cleanup_instructions(name: &str, entry: &DesiredEntry) {
    info!(
        "Request {} deleted. Secret {} is left in place in namespaces {:?}",
        name, entry.secret_name, entry.namespaces
    );
    for namespace in &entry.namespaces {
        info!(
            "To clean up {}: kubectl delete secret {} -n {} and remove it from imagePullSecrets with kubectl edit serviceaccount {} -n {}",
            namespace, entry.secret_name, namespace, DEFAULT_SERVICE_ACCOUNT, namespace
        );
    }
}
