// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic refresh trigger

use crate::sync::manager::{SyncEvent, SyncManagerHandle};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub struct Scheduler {
    interval: Duration,
    sync_handle: SyncManagerHandle,
}

impl Scheduler {
    pub fn new(interval: Duration, sync_handle: SyncManagerHandle) -> Self {
        Self {
            interval,
            sync_handle,
        }
    }

    /// Send a refresh tick every interval, the first one interval after start.
    /// Returns once the manager has stopped listening.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Refreshing pull secrets every {:?}", self.interval);

        let mut ticks = interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;
            if self.sync_handle.is_closed() {
                debug!("SyncManager gone, stopping scheduler");
                return Ok(());
            }
            debug!("Refresh tick");
            self.sync_handle.send(SyncEvent::RefreshTick).await;
        }
    }
}
