//! Duplex live-audio channel.
//!
//! A `LiveSession` is three independent halves: a fire-and-forget outbound
//! frame sender, an inbound event receiver, and a closer. Nothing here holds
//! callbacks over shared audio state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Microphone capture rate.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Synthesized speech rate.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Could not open live audio session: {0}")]
    Connect(String),

    #[error("No live audio session is active")]
    NotActive,

    #[error("Live audio session already closed")]
    Closed,

    #[error("Invalid audio frame: {0}")]
    InvalidFrame(String),
}

/// Mono PCM16 audio. Relayed frames without a rate are synthesized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    #[serde(default = "output_sample_rate")]
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

fn output_sample_rate() -> u32 {
    OUTPUT_SAMPLE_RATE
}

impl AudioFrame {
    /// Decodes little-endian PCM16 bytes.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32) -> Result<Self, AudioError> {
        if bytes.len() % 2 != 0 {
            return Err(AudioError::InvalidFrame(format!(
                "odd byte length {}",
                bytes.len()
            )));
        }
        if sample_rate == 0 {
            return Err(AudioError::InvalidFrame("zero sample rate".to_string()));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            sample_rate,
            samples,
        })
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Inbound event from the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// What the user said. Interim events carry the full pending hypothesis.
    InputTranscript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    /// What the model said.
    OutputTranscript { text: String },
    OutputAudio { frame: AudioFrame },
    /// The user spoke over the model; queued output must be dropped.
    Interrupted,
    Closed,
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPurpose {
    Dictation,
    Coaching,
}

/// Outbound half. Sending never blocks and never fails from the caller's
/// point of view; frames sent after the remote end has gone are dropped.
#[derive(Debug, Clone)]
pub struct AudioSender {
    tx: mpsc::UnboundedSender<AudioFrame>,
}

impl AudioSender {
    pub fn new(tx: mpsc::UnboundedSender<AudioFrame>) -> Self {
        Self { tx }
    }

    pub fn send(&self, frame: AudioFrame) {
        if self.tx.send(frame).is_err() {
            trace!("Dropping audio frame for closed session");
        }
    }
}

/// Lets the host push events into a relayed session.
#[derive(Debug, Clone)]
pub struct EventRelay {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventRelay {
    pub async fn push(&self, event: SessionEvent) -> Result<(), AudioError> {
        self.tx.send(event).await.map_err(|_| AudioError::Closed)
    }
}

#[async_trait]
pub trait SessionCloser: Send + Sync {
    async fn close(&self) -> Result<(), AudioError>;
}

pub struct LiveSession {
    pub audio: AudioSender,
    pub events: mpsc::Receiver<SessionEvent>,
    pub closer: Arc<dyn SessionCloser>,
    /// Present when events arrive through the host rather than a remote stream.
    pub relay: Option<EventRelay>,
}

#[async_trait]
pub trait LiveAudioConnector: Send + Sync {
    async fn open(&self, purpose: SessionPurpose) -> Result<LiveSession, AudioError>;
}

// ────────────────────────────────────────────────────────────────────────────
// RelayConnector
// ────────────────────────────────────────────────────────────────────────────

/// Default connector. Recognition runs on the host, which relays transcript
/// events over HTTP. Outbound frames are accepted and discarded.
#[derive(Debug, Default, Clone)]
pub struct RelayConnector;

struct RelayCloser {
    purpose: SessionPurpose,
}

#[async_trait]
impl SessionCloser for RelayCloser {
    async fn close(&self) -> Result<(), AudioError> {
        debug!("Relayed {:?} session closed", self.purpose);
        Ok(())
    }
}

#[async_trait]
impl LiveAudioConnector for RelayConnector {
    async fn open(&self, purpose: SessionPurpose) -> Result<LiveSession, AudioError> {
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<AudioFrame>();
        tokio::spawn(async move {
            let mut discarded = 0usize;
            while audio_rx.recv().await.is_some() {
                discarded += 1;
            }
            trace!("Relay audio sink closed after {discarded} frames");
        });
        Ok(LiveSession {
            audio: AudioSender::new(audio_tx),
            events,
            closer: Arc::new(RelayCloser { purpose }),
            relay: Some(EventRelay { tx: event_tx }),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_decoding() {
        let frame = AudioFrame::from_pcm16_le(&[0x01, 0x00, 0xff, 0xff], INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(frame.samples, vec![1, -1]);
        assert!(AudioFrame::from_pcm16_le(&[0x01], INPUT_SAMPLE_RATE).is_err());
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame {
            sample_rate: OUTPUT_SAMPLE_RATE,
            samples: vec![0; 12_000],
        };
        assert_eq!(frame.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_event_wire_format() {
        let event: SessionEvent =
            serde_json::from_str(r#"{"type":"input_transcript","text":"hello"}"#).unwrap();
        assert_eq!(
            event,
            SessionEvent::InputTranscript {
                text: "hello".to_string(),
                is_final: false
            }
        );
        let event: SessionEvent = serde_json::from_str(r#"{"type":"interrupted"}"#).unwrap();
        assert_eq!(event, SessionEvent::Interrupted);
        let event: SessionEvent =
            serde_json::from_str(r#"{"type":"output_audio","frame":{"samples":[0,1]}}"#).unwrap();
        let SessionEvent::OutputAudio { frame } = event else {
            panic!("expected output audio");
        };
        assert_eq!(frame.sample_rate, OUTPUT_SAMPLE_RATE);
    }

    #[tokio::test]
    async fn test_relay_round_trip() {
        let mut session = RelayConnector.open(SessionPurpose::Dictation).await.unwrap();
        session.audio.send(AudioFrame {
            sample_rate: INPUT_SAMPLE_RATE,
            samples: vec![0; 160],
        });
        let relay = session.relay.clone().unwrap();
        relay.push(SessionEvent::Interrupted).await.unwrap();
        assert_eq!(session.events.recv().await, Some(SessionEvent::Interrupted));

        drop(session.events);
        assert!(matches!(relay.push(SessionEvent::Closed).await, Err(AudioError::Closed)));
    }
}
