//! Change Observer: turns host change notifications into ordered scan batches.
//!
//! Mutations are debounced and coalesced to the latest snapshot; resizes scan
//! immediately; focus changes are forwarded untouched. A batch whose id set is
//! unchanged is suppressed unless it came from a resize, since affordance
//! positioning depends on fresh geometry.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::detection::dom::DomNode;
use crate::detection::scanner::FieldScanner;
use crate::models::field::FieldDescriptor;

/// A change notification from the host environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Mutation {
        snapshot: DomNode,
        #[serde(default)]
        added: usize,
        #[serde(default)]
        removed: usize,
    },
    Resize {
        snapshot: DomNode,
    },
    Focus {
        field_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanCause {
    Mutation,
    Resize,
    Manual,
}

/// Result of one scan, stamped with its position in the scan order.
#[derive(Debug, Clone)]
pub struct ScanBatch {
    pub seq: u64,
    pub cause: ScanCause,
    pub fields: Vec<FieldDescriptor>,
}

/// Monotonic scan sequence shared by every scan source of one session.
#[derive(Debug, Default)]
pub struct ScanSequencer(AtomicU64);

impl ScanSequencer {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Owns the session's scanner and the last propagated id set.
#[derive(Debug)]
pub struct ChangeObserver {
    scanner: FieldScanner,
    previous_ids: Option<BTreeSet<String>>,
    sequencer: Arc<ScanSequencer>,
}

impl ChangeObserver {
    pub fn new(scanner: FieldScanner, sequencer: Arc<ScanSequencer>) -> Self {
        Self {
            scanner,
            previous_ids: None,
            sequencer,
        }
    }

    /// Scans `snapshot` and returns the batch to propagate, or `None` when the
    /// id set is unchanged and the cause does not demand fresh geometry.
    pub fn rescan(&mut self, snapshot: &DomNode, cause: ScanCause) -> Option<ScanBatch> {
        let fields = self.scanner.scan(snapshot);
        let ids: BTreeSet<String> = fields.iter().map(|f| f.id.clone()).collect();
        let id_set_changed = self.previous_ids.as_ref() != Some(&ids);

        let always_propagate = matches!(cause, ScanCause::Resize | ScanCause::Manual);
        if !id_set_changed && !always_propagate {
            debug!("Scan found the same {} fields; suppressed", ids.len());
            return None;
        }

        self.previous_ids = Some(ids);
        Some(ScanBatch {
            seq: self.sequencer.next(),
            cause,
            fields,
        })
    }
}

/// Receives what the observer loop produces.
#[async_trait]
pub trait ObserverSink: Send + Sync {
    async fn on_scan(&self, batch: ScanBatch);
    async fn on_focus(&self, field_id: String);
}

/// Drives a [`ChangeObserver`] from a stream of host events until the sender
/// side is dropped. A pending debounced mutation is flushed on shutdown.
pub async fn run_observer<S: ObserverSink>(
    observer: Arc<std::sync::Mutex<ChangeObserver>>,
    mut events: mpsc::Receiver<HostEvent>,
    debounce: Duration,
    sink: Arc<S>,
) {
    let mut pending: Option<DomNode> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let event = match deadline {
            Some(at) => {
                tokio::select! {
                    ev = events.recv() => ev,
                    _ = tokio::time::sleep_until(at) => {
                        deadline = None;
                        if let Some(snapshot) = pending.take() {
                            scan_and_emit(&observer, &snapshot, ScanCause::Mutation, sink.as_ref()).await;
                        }
                        continue;
                    }
                }
            }
            None => events.recv().await,
        };

        let Some(event) = event else {
            if let Some(snapshot) = pending.take() {
                scan_and_emit(&observer, &snapshot, ScanCause::Mutation, sink.as_ref()).await;
            }
            info!("Change observer stopped");
            return;
        };

        match event {
            HostEvent::Mutation {
                snapshot,
                added,
                removed,
            } => {
                if added == 0 && removed == 0 {
                    continue;
                }
                pending = Some(snapshot);
                deadline = Some(Instant::now() + debounce);
            }
            HostEvent::Resize { snapshot } => {
                // The resize snapshot is newer than anything pending.
                pending = None;
                deadline = None;
                scan_and_emit(&observer, &snapshot, ScanCause::Resize, sink.as_ref()).await;
            }
            HostEvent::Focus { field_id } => sink.on_focus(field_id).await,
        }
    }
}

async fn scan_and_emit<S: ObserverSink>(
    observer: &std::sync::Mutex<ChangeObserver>,
    snapshot: &DomNode,
    cause: ScanCause,
    sink: &S,
) {
    let batch = match observer.lock() {
        Ok(mut guard) => guard.rescan(snapshot, cause),
        Err(poisoned) => poisoned.into_inner().rescan(snapshot, cause),
    };
    if let Some(batch) = batch {
        sink.on_scan(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::field::Geometry;

    #[derive(Default)]
    struct RecordingSink {
        scans: std::sync::Mutex<Vec<ScanBatch>>,
        focus: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObserverSink for RecordingSink {
        async fn on_scan(&self, batch: ScanBatch) {
            self.scans.lock().unwrap().push(batch);
        }

        async fn on_focus(&self, field_id: String) {
            self.focus.lock().unwrap().push(field_id);
        }
    }

    fn form(ids: &[&str]) -> DomNode {
        ids.iter().fold(DomNode::element("form"), |node, id| {
            node.with_child(DomNode::element("input").with_attr("id", id))
        })
    }

    fn observer() -> Arc<std::sync::Mutex<ChangeObserver>> {
        Arc::new(std::sync::Mutex::new(ChangeObserver::new(
            FieldScanner::new(None),
            Arc::new(ScanSequencer::default()),
        )))
    }

    #[test]
    fn test_unchanged_id_set_is_suppressed() {
        let mut obs = ChangeObserver::new(FieldScanner::new(None), Arc::new(ScanSequencer::default()));
        let first = obs.rescan(&form(&["a", "b"]), ScanCause::Mutation).unwrap();
        assert_eq!(first.fields.len(), 2);
        assert!(obs.rescan(&form(&["a", "b"]), ScanCause::Mutation).is_none());
        let third = obs.rescan(&form(&["a", "b", "c"]), ScanCause::Mutation).unwrap();
        assert!(third.seq > first.seq);
    }

    #[test]
    fn test_resize_always_propagates_geometry() {
        let mut obs = ChangeObserver::new(FieldScanner::new(None), Arc::new(ScanSequencer::default()));
        let first = obs.rescan(&form(&["a"]), ScanCause::Mutation).unwrap();

        let moved = DomNode::element("form").with_child(
            DomNode::element("input").with_attr("id", "a").with_rect(Geometry {
                x: 0.0,
                y: 200.0,
                width: 100.0,
                height: 30.0,
            }),
        );
        let batch = obs.rescan(&moved, ScanCause::Resize).unwrap();
        assert_eq!(batch.fields[0].id, first.fields[0].id);
        assert_eq!(batch.fields[0].geometry.map(|g| g.y), Some(200.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_are_debounced_to_latest_snapshot() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_observer(observer(), rx, Duration::from_millis(1000), sink.clone()));

        for ids in [&["a"][..], &["a", "b"][..], &["a", "b", "c"][..]] {
            tx.send(HostEvent::Mutation {
                snapshot: form(ids),
                added: 1,
                removed: 0,
            })
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(sink.scans.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        {
            let scans = sink.scans.lock().unwrap();
            assert_eq!(scans.len(), 1);
            assert_eq!(scans[0].fields.len(), 3);
        }

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_attribute_only_mutations_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_observer(observer(), rx, Duration::from_millis(50), sink.clone()));

        tx.send(HostEvent::Mutation {
            snapshot: form(&["a"]),
            added: 0,
            removed: 0,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(tx);
        handle.await.unwrap();

        assert!(sink.scans.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_and_resize_are_forwarded() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_observer(observer(), rx, Duration::from_millis(1000), sink.clone()));

        tx.send(HostEvent::Focus {
            field_id: "a".to_string(),
        })
        .await
        .unwrap();
        tx.send(HostEvent::Resize {
            snapshot: form(&["a"]),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*sink.focus.lock().unwrap(), vec!["a".to_string()]);
        let scans = sink.scans.lock().unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].cause, ScanCause::Resize);
    }

    #[test]
    fn test_host_event_wire_format() {
        let event: HostEvent = serde_json::from_str(
            r#"{"type": "mutation", "snapshot": {"tag": "form"}, "added": 2}"#,
        )
        .unwrap();
        assert!(matches!(event, HostEvent::Mutation { added: 2, removed: 0, .. }));
    }
}
