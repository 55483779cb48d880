// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! PullSecretRequest watcher - turns watch events into sync events.

use crate::sync::{SyncEvent, SyncManagerHandle};
use crate::types::PullSecretRequest;
use futures::{pin_mut, StreamExt};
use kube::{Api, Client, ResourceExt};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

pub struct PullSecretRequestWatcher {
    client: Client,
    sync_handle: SyncManagerHandle,
}

impl PullSecretRequestWatcher {
    pub fn new(client: Client, sync_handle: SyncManagerHandle) -> Self {
        Self {
            client,
            sync_handle,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let requests: Api<PullSecretRequest> = Api::all(self.client.clone());
        let stream = watcher(requests, watcher::Config::default()).default_backoff();
        pin_mut!(stream);

        let mut translator = EventTranslator::default();
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if let Some(sync_event) = translator.translate(event) {
                        self.sync_handle.send(sync_event).await;
                    }
                }
                // The backoff keeps the stream alive across errors
                Err(e) => warn!("Error watching PullSecretRequests: {}", e),
            }
        }

        warn!("PullSecretRequest watch stream ended");
        Ok(())
    }
}

/// Maps watch events onto sync events, remembering which requests a
/// (re-)list delivered so the manager can drop the ones that are gone
#[derive(Default)]
pub struct EventTranslator {
    listed: BTreeSet<String>,
}

impl EventTranslator {
    pub fn translate(&mut self, event: watcher::Event<PullSecretRequest>) -> Option<SyncEvent> {
        match event {
            watcher::Event::Init => {
                debug!("Listing PullSecretRequests");
                self.listed.clear();
                None
            }
            watcher::Event::InitApply(request) => {
                self.listed.insert(request.name_any());
                Some(SyncEvent::RequestApplied { request })
            }
            watcher::Event::InitDone => {
                let names = std::mem::take(&mut self.listed);
                info!("Watching {} PullSecretRequests", names.len());
                Some(SyncEvent::Relisted { names })
            }
            watcher::Event::Apply(request) => {
                debug!("PullSecretRequest {} applied", request.name_any());
                Some(SyncEvent::RequestApplied { request })
            }
            watcher::Event::Delete(request) => Some(SyncEvent::RequestDeleted {
                name: request.name_any(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PullSecretRequestSpec;

    fn request(name: &str) -> PullSecretRequest {
        PullSecretRequest::new(
            name,
            PullSecretRequestSpec {
                secret_name: "reg-cred".to_string(),
                namespaces: vec!["ns1".to_string()],
                region: None,
                registry: None,
            },
        )
    }

    #[test]
    fn test_initial_list_reports_seen_names() {
        let mut translator = EventTranslator::default();

        assert!(translator.translate(watcher::Event::Init).is_none());
        assert!(matches!(
            translator.translate(watcher::Event::InitApply(request("r1"))),
            Some(SyncEvent::RequestApplied { .. })
        ));
        translator.translate(watcher::Event::InitApply(request("r2")));

        match translator.translate(watcher::Event::InitDone) {
            Some(SyncEvent::Relisted { names }) => {
                assert_eq!(names, BTreeSet::from(["r1".to_string(), "r2".to_string()]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_relist_starts_from_scratch() {
        let mut translator = EventTranslator::default();
        translator.translate(watcher::Event::Init);
        translator.translate(watcher::Event::InitApply(request("r1")));
        translator.translate(watcher::Event::InitDone);

        translator.translate(watcher::Event::Init);
        translator.translate(watcher::Event::InitApply(request("r2")));

        match translator.translate(watcher::Event::InitDone) {
            Some(SyncEvent::Relisted { names }) => {
                assert_eq!(names, BTreeSet::from(["r2".to_string()]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_delete_carries_request_name() {
        let mut translator = EventTranslator::default();

        match translator.translate(watcher::Event::Delete(request("r1"))) {
            Some(SyncEvent::RequestDeleted { name }) => assert_eq!(name, "r1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
