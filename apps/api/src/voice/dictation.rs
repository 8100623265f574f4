//! Dictation Bridge: binds one live transcription session to one field.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::reconcile::engine::{ActionOutcome, ReconciliationEngine};
use crate::voice::live::{
    AudioError, AudioFrame, AudioSender, EventRelay, LiveAudioConnector, SessionCloser,
    SessionEvent, SessionPurpose, INPUT_SAMPLE_RATE,
};

#[derive(Debug, thiserror::Error)]
pub enum DictationError {
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("Cannot dictate into '{field_id}': {reason}")]
    Refused { field_id: String, reason: String },

    #[error(transparent)]
    Audio(#[from] AudioError),
}

struct ActiveDictation {
    session_id: u64,
    field_id: String,
    audio: AudioSender,
    relay: Option<EventRelay>,
    stop: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

/// Owns the single active dictation. Transcript events flow into the
/// engine; the engine decides what is committed.
pub struct DictationBridge {
    engine: Arc<Mutex<ReconciliationEngine>>,
    connector: Arc<dyn LiveAudioConnector>,
    active: Mutex<Option<ActiveDictation>>,
}

impl DictationBridge {
    pub fn new(
        engine: Arc<Mutex<ReconciliationEngine>>,
        connector: Arc<dyn LiveAudioConnector>,
    ) -> Self {
        Self {
            engine,
            connector,
            active: Mutex::new(None),
        }
    }

    /// Starts dictating into `field_id`. A dictation already running on any
    /// field is stopped and committed before the new one begins.
    pub async fn start(&self, field_id: &str) -> Result<u64, DictationError> {
        let mut active = self.active.lock().await;
        let entry = self.engine.lock().await.check_dictation_entry(field_id);
        entry.map_err(|outcome| refusal(field_id, outcome))?;

        if let Some(previous) = active.take() {
            shutdown(previous).await;
        }

        let session = self.connector.open(SessionPurpose::Dictation).await?;

        let begun = self.engine.lock().await.begin_dictation(field_id);
        let session_id = match begun {
            Ok(start) => start.session_id,
            Err(outcome) => {
                close_detached(session.closer);
                return Err(refusal(field_id, outcome));
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_events(
            self.engine.clone(),
            session_id,
            session.events,
            stop_rx,
            session.closer,
        ));

        *active = Some(ActiveDictation {
            session_id,
            field_id: field_id.to_string(),
            audio: session.audio,
            relay: session.relay,
            stop: stop_tx,
            pump,
        });
        Ok(session_id)
    }

    /// Stops the active dictation, committing any pending preview. Returns
    /// the field that was dictating.
    pub async fn stop(&self) -> Option<String> {
        let previous = self.active.lock().await.take()?;
        let field_id = previous.field_id.clone();
        shutdown(previous).await;
        Some(field_id)
    }

    /// Forwards a host-recognized transcript fragment.
    pub async fn relay_transcript(&self, text: String, is_final: bool) -> Result<(), AudioError> {
        let relay = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .and_then(|a| a.relay.clone())
                .ok_or(AudioError::NotActive)?
        };
        relay
            .push(SessionEvent::InputTranscript { text, is_final })
            .await
    }

    /// Forwards raw microphone audio. Fire-and-forget.
    pub async fn push_audio(&self, pcm: Bytes) -> Result<(), AudioError> {
        let frame = AudioFrame::from_pcm16_le(&pcm, INPUT_SAMPLE_RATE)?;
        let active = self.active.lock().await;
        let dictation = active.as_ref().ok_or(AudioError::NotActive)?;
        dictation.audio.send(frame);
        Ok(())
    }
}

fn refusal(field_id: &str, outcome: ActionOutcome) -> DictationError {
    match outcome {
        ActionOutcome::Unchanged { reason } => DictationError::Refused {
            field_id: field_id.to_string(),
            reason,
        },
        _ => DictationError::UnknownField(field_id.to_string()),
    }
}

async fn shutdown(dictation: ActiveDictation) {
    // The pump may already have exited on a remote close.
    let _ = dictation.stop.send(());
    if let Err(e) = dictation.pump.await {
        warn!("Dictation {} pump ended abnormally: {e}", dictation.session_id);
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn apply_event(
    engine: &Mutex<ReconciliationEngine>,
    session_id: u64,
    event: Option<SessionEvent>,
) -> Flow {
    match event {
        Some(SessionEvent::InputTranscript { text, is_final: false }) => {
            engine.lock().await.dictation_interim(session_id, &text);
        }
        Some(SessionEvent::InputTranscript { text, is_final: true }) => {
            engine.lock().await.dictation_final(session_id, &text);
        }
        Some(SessionEvent::Error { message }) => {
            warn!("Dictation {session_id} backend error: {message}");
            return Flow::Stop;
        }
        Some(SessionEvent::Closed) | None => {
            info!("Dictation {session_id} closed by remote");
            return Flow::Stop;
        }
        Some(_) => {}
    }
    Flow::Continue
}

/// Feeds session events into the engine until a local stop, a remote close or
/// an error. Every exit path commits the pending preview.
async fn pump_events(
    engine: Arc<Mutex<ReconciliationEngine>>,
    session_id: u64,
    mut events: mpsc::Receiver<SessionEvent>,
    mut stop: oneshot::Receiver<()>,
    closer: Arc<dyn SessionCloser>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => {
                // Events already delivered before the stop still count.
                while let Ok(event) = events.try_recv() {
                    if let Flow::Stop = apply_event(&engine, session_id, Some(event)).await {
                        break;
                    }
                }
                break;
            }
            event = events.recv() => {
                if let Flow::Stop = apply_event(&engine, session_id, event).await {
                    break;
                }
            }
        }
    }
    engine.lock().await.end_dictation(session_id);
    close_detached(closer);
}

/// Remote close runs in the background; local state is already released.
pub(crate) fn close_detached(closer: Arc<dyn SessionCloser>) {
    tokio::spawn(async move {
        if let Err(e) = closer.close().await {
            warn!("Remote session close failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::observer::{ScanBatch, ScanCause};
    use crate::models::field::{FieldDescriptor, FieldKind};
    use crate::preferences::store::PreferenceMap;
    use crate::voice::live::testing::DeniedConnector;
    use crate::voice::live::RelayConnector;

    impl DictationBridge {
        async fn active_session(&self) -> Option<u64> {
            self.active.lock().await.as_ref().map(|a| a.session_id)
        }
    }

    async fn engine_with(ids: &[&str]) -> Arc<Mutex<ReconciliationEngine>> {
        let mut engine = ReconciliationEngine::new();
        let fields = ids
            .iter()
            .map(|id| FieldDescriptor {
                id: id.to_string(),
                kind: FieldKind::Textarea,
                label: id.to_string(),
                geometry: None,
                options: vec![],
            })
            .collect();
        engine.apply_scan(
            &ScanBatch {
                seq: 1,
                cause: ScanCause::Manual,
                fields,
            },
            &PreferenceMap::new(),
        );
        Arc::new(Mutex::new(engine))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_interim_then_stop_commits_preview() {
        let engine = engine_with(&["summary"]).await;
        let bridge = DictationBridge::new(engine.clone(), Arc::new(RelayConnector));
        bridge.start("summary").await.unwrap();

        bridge.relay_transcript("I led".to_string(), false).await.unwrap();
        bridge.relay_transcript("I led the team".to_string(), false).await.unwrap();
        settle().await;
        assert_eq!(engine.lock().await.view().fields[0].display_value, "I led the team");

        assert_eq!(bridge.stop().await.as_deref(), Some("summary"));
        let engine = engine.lock().await;
        assert_eq!(engine.state("summary").unwrap().current_value, "I led the team");
        assert_eq!(engine.dictating_field(), None);
    }

    #[tokio::test]
    async fn test_final_segments_are_spaced() {
        let engine = engine_with(&["summary"]).await;
        engine.lock().await.edit("summary", "Hello");
        let bridge = DictationBridge::new(engine.clone(), Arc::new(RelayConnector));
        bridge.start("summary").await.unwrap();
        bridge.relay_transcript("world".to_string(), true).await.unwrap();
        bridge.stop().await;
        assert_eq!(engine.lock().await.state("summary").unwrap().current_value, "Hello world");
    }

    #[tokio::test]
    async fn test_starting_second_field_commits_first() {
        let engine = engine_with(&["a", "b"]).await;
        let bridge = DictationBridge::new(engine.clone(), Arc::new(RelayConnector));
        bridge.start("a").await.unwrap();
        bridge.relay_transcript("partial".to_string(), false).await.unwrap();
        settle().await;

        bridge.start("b").await.unwrap();
        let engine = engine.lock().await;
        assert_eq!(engine.state("a").unwrap().current_value, "partial");
        assert_eq!(engine.dictating_field(), Some("b"));
        assert_eq!(engine.view().fields.iter().filter(|f| f.is_dictating).count(), 1);
    }

    #[tokio::test]
    async fn test_skipped_field_refuses_and_keeps_current_session() {
        let engine = engine_with(&["a", "b"]).await;
        engine.lock().await.skip("b");
        let bridge = DictationBridge::new(engine.clone(), Arc::new(RelayConnector));
        let current = bridge.start("a").await.unwrap();

        assert!(matches!(bridge.start("b").await, Err(DictationError::Refused { .. })));
        assert_eq!(bridge.active_session().await, Some(current));
        assert_eq!(engine.lock().await.dictating_field(), Some("a"));
    }

    #[tokio::test]
    async fn test_remote_close_commits_partial() {
        let engine = engine_with(&["a"]).await;
        let bridge = DictationBridge::new(engine.clone(), Arc::new(RelayConnector));
        bridge.start("a").await.unwrap();
        let relay = bridge.active.lock().await.as_ref().and_then(|a| a.relay.clone()).unwrap();
        relay
            .push(SessionEvent::InputTranscript {
                text: "half a sentence".to_string(),
                is_final: false,
            })
            .await
            .unwrap();
        relay
            .push(SessionEvent::Error {
                message: "socket reset".to_string(),
            })
            .await
            .unwrap();
        settle().await;

        let engine = engine.lock().await;
        assert_eq!(engine.state("a").unwrap().current_value, "half a sentence");
        assert_eq!(engine.dictating_field(), None);
    }

    #[tokio::test]
    async fn test_denied_microphone_leaves_state_untouched() {
        let engine = engine_with(&["a"]).await;
        let bridge = DictationBridge::new(engine.clone(), Arc::new(DeniedConnector));
        let result = bridge.start("a").await;
        assert!(matches!(result, Err(DictationError::Audio(AudioError::Connect(_)))));
        assert_eq!(engine.lock().await.dictating_field(), None);
    }

    #[tokio::test]
    async fn test_unknown_field_and_idle_relay() {
        let engine = engine_with(&["a"]).await;
        let bridge = DictationBridge::new(engine, Arc::new(RelayConnector));
        assert!(matches!(bridge.start("zzz").await, Err(DictationError::UnknownField(_))));
        assert!(matches!(
            bridge.relay_transcript("x".to_string(), true).await,
            Err(AudioError::NotActive)
        ));
        assert!(bridge.stop().await.is_none());
    }

    #[tokio::test]
    async fn test_push_audio_requires_session() {
        let engine = engine_with(&["a"]).await;
        let bridge = DictationBridge::new(engine, Arc::new(RelayConnector));
        assert!(bridge.push_audio(Bytes::from_static(&[0, 0])).await.is_err());
        bridge.start("a").await.unwrap();
        bridge.push_audio(Bytes::from_static(&[0, 0, 1, 0])).await.unwrap();
        assert!(bridge.active_session().await.is_some());
    }
}
