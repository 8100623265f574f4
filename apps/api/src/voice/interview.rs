//! Mock-interview coaching over a live audio session.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::voice::dictation::close_detached;
use crate::voice::live::{
    AudioError, AudioFrame, AudioSender, EventRelay, LiveAudioConnector, SessionCloser,
    SessionEvent, SessionPurpose, INPUT_SAMPLE_RATE,
};

pub const USER_PREFIX: &str = "You: ";
pub const COACH_PREFIX: &str = "Coach: ";
const CONNECTED_LINE: &str = "Coach connected. Listening...";

// ────────────────────────────────────────────────────────────────────────────
// Playback queue
// ────────────────────────────────────────────────────────────────────────────

/// Schedules synthesized audio back-to-back on a cursor so consecutive
/// frames play gaplessly, and never before "now".
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    cursor: Option<Instant>,
    /// End time of each frame still waiting to finish.
    queued: VecDeque<Instant>,
}

impl PlaybackQueue {
    /// Returns when the frame starts playing.
    pub fn schedule(&mut self, frame: &AudioFrame, now: Instant) -> Instant {
        self.prune(now);
        let start = self.cursor.map_or(now, |cursor| cursor.max(now));
        let end = start + frame.duration();
        self.cursor = Some(end);
        self.queued.push_back(end);
        start
    }

    /// Drops every queued frame and resets the cursor. Returns how many
    /// frames were discarded.
    pub fn interrupt(&mut self) -> usize {
        let dropped = self.queued.len();
        self.queued.clear();
        self.cursor = None;
        dropped
    }

    /// Forgets frames that have finished playing.
    pub fn prune(&mut self, now: Instant) {
        while self.queued.front().is_some_and(|end| *end <= now) {
            self.queued.pop_front();
        }
    }

    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    pub fn drains_at(&self) -> Option<Instant> {
        self.queued.back().copied()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coach session
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CoachState {
    active: bool,
    transcript: Vec<String>,
    queue: PlaybackQueue,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoachView {
    pub active: bool,
    pub transcript: Vec<String>,
    pub queued_frames: usize,
    pub playback_remaining_ms: u64,
}

struct RunningCoach {
    audio: AudioSender,
    relay: Option<EventRelay>,
    closer: Arc<dyn SessionCloser>,
    pump: JoinHandle<()>,
}

pub struct CoachSession {
    connector: Arc<dyn LiveAudioConnector>,
    state: Arc<Mutex<CoachState>>,
    running: Mutex<Option<RunningCoach>>,
}

impl CoachSession {
    pub fn new(connector: Arc<dyn LiveAudioConnector>) -> Self {
        Self {
            connector,
            state: Arc::new(Mutex::new(CoachState::default())),
            running: Mutex::new(None),
        }
    }

    /// Opens a coaching session. Starting while one is running is a no-op.
    pub async fn start(&self) -> Result<(), AudioError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.pump.is_finished()) {
            debug!("Coaching session already running");
            return Ok(());
        }

        let session = self.connector.open(SessionPurpose::Coaching).await?;
        {
            let mut state = self.state.lock().await;
            state.active = true;
            state.queue.interrupt();
            state.transcript = vec![CONNECTED_LINE.to_string()];
        }
        let pump = tokio::spawn(pump_events(self.state.clone(), session.events));
        *running = Some(RunningCoach {
            audio: session.audio,
            relay: session.relay,
            closer: session.closer,
            pump,
        });
        info!("Coaching session started");
        Ok(())
    }

    /// Releases the microphone and playback queue immediately. The remote
    /// close is left running in the background.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        running.pump.abort();
        {
            let mut state = self.state.lock().await;
            state.active = false;
            state.queue.interrupt();
        }
        close_detached(running.closer);
        info!("Coaching session stopped");
        true
    }

    pub async fn relay(&self, event: SessionEvent) -> Result<(), AudioError> {
        let relay = self
            .running
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.relay.clone())
            .ok_or(AudioError::NotActive)?;
        relay.push(event).await
    }

    pub async fn push_audio(&self, pcm: Bytes) -> Result<(), AudioError> {
        let frame = AudioFrame::from_pcm16_le(&pcm, INPUT_SAMPLE_RATE)?;
        let running = self.running.lock().await;
        running.as_ref().ok_or(AudioError::NotActive)?.audio.send(frame);
        Ok(())
    }

    pub async fn view(&self) -> CoachView {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.queue.prune(now);
        let playback_remaining_ms = state
            .queue
            .drains_at()
            .map(|end| end.saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0);
        CoachView {
            active: state.active,
            transcript: state.transcript.clone(),
            queued_frames: state.queue.pending(),
            playback_remaining_ms,
        }
    }
}

async fn pump_events(state: Arc<Mutex<CoachState>>, mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let mut state = state.lock().await;
        match event {
            SessionEvent::InputTranscript { text, is_final } => {
                if is_final && !text.trim().is_empty() {
                    state.transcript.push(format!("{USER_PREFIX}{}", text.trim()));
                }
            }
            SessionEvent::OutputTranscript { text } => {
                if !text.trim().is_empty() {
                    state.transcript.push(format!("{COACH_PREFIX}{}", text.trim()));
                }
            }
            SessionEvent::OutputAudio { frame } => {
                state.queue.schedule(&frame, Instant::now());
            }
            SessionEvent::Interrupted => {
                let dropped = state.queue.interrupt();
                debug!("Coach interrupted, dropped {dropped} queued frames");
            }
            SessionEvent::Error { message } => {
                warn!("Coaching session error: {message}");
                state.active = false;
                state.queue.interrupt();
                return;
            }
            SessionEvent::Closed => break,
        }
    }
    let mut state = state.lock().await;
    state.active = false;
    state.queue.interrupt();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::voice::live::testing::SlowCloseConnector;
    use crate::voice::live::{RelayConnector, OUTPUT_SAMPLE_RATE};

    fn frame_ms(ms: usize) -> AudioFrame {
        AudioFrame {
            sample_rate: OUTPUT_SAMPLE_RATE,
            samples: vec![0; OUTPUT_SAMPLE_RATE as usize * ms / 1000],
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_play_back_to_back() {
        let mut queue = PlaybackQueue::default();
        let now = Instant::now();
        let first = queue.schedule(&frame_ms(200), now);
        let second = queue.schedule(&frame_ms(300), now);
        assert_eq!(first, now);
        assert_eq!(second, now + Duration::from_millis(200));
        assert_eq!(queue.drains_at(), Some(now + Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_never_schedules_in_the_past() {
        let mut queue = PlaybackQueue::default();
        let start = Instant::now();
        queue.schedule(&frame_ms(100), start);
        let later = start + Duration::from_secs(2);
        assert_eq!(queue.schedule(&frame_ms(100), later), later);
        assert_eq!(queue.pending(), 1, "finished frame pruned");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_drops_queue_and_resets_cursor() {
        let mut queue = PlaybackQueue::default();
        let now = Instant::now();
        queue.schedule(&frame_ms(500), now);
        queue.schedule(&frame_ms(500), now);
        assert_eq!(queue.interrupt(), 2);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.schedule(&frame_ms(100), now), now);
    }

    #[tokio::test]
    async fn test_transcript_log() {
        let coach = CoachSession::new(Arc::new(RelayConnector));
        coach.start().await.unwrap();
        coach
            .relay(SessionEvent::OutputTranscript {
                text: "Tell me about yourself.".to_string(),
            })
            .await
            .unwrap();
        coach
            .relay(SessionEvent::InputTranscript {
                text: "I build".to_string(),
                is_final: false,
            })
            .await
            .unwrap();
        coach
            .relay(SessionEvent::InputTranscript {
                text: "I build frontends.".to_string(),
                is_final: true,
            })
            .await
            .unwrap();
        settle().await;

        let view = coach.view().await;
        assert!(view.active);
        assert_eq!(
            view.transcript,
            vec![
                CONNECTED_LINE.to_string(),
                "Coach: Tell me about yourself.".to_string(),
                "You: I build frontends.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_interruption_clears_playback() {
        let coach = CoachSession::new(Arc::new(RelayConnector));
        coach.start().await.unwrap();
        for _ in 0..3 {
            coach
                .relay(SessionEvent::OutputAudio { frame: frame_ms(1000) })
                .await
                .unwrap();
        }
        settle().await;
        assert_eq!(coach.view().await.queued_frames, 3);

        coach.relay(SessionEvent::Interrupted).await.unwrap();
        settle().await;
        let view = coach.view().await;
        assert_eq!(view.queued_frames, 0);
        assert_eq!(view.playback_remaining_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_wait_for_remote_close() {
        let connector = Arc::new(SlowCloseConnector {
            close_delay: Duration::from_secs(30),
            ..SlowCloseConnector::default()
        });
        let coach = CoachSession::new(connector.clone());
        coach.start().await.unwrap();
        coach
            .relay(SessionEvent::OutputAudio { frame: frame_ms(1000) })
            .await
            .unwrap();
        settle().await;

        let before = Instant::now();
        assert!(coach.stop().await);
        assert_eq!(Instant::now(), before, "stop returned without advancing time");

        let view = coach.view().await;
        assert!(!view.active);
        assert_eq!(view.queued_frames, 0);
        assert!(!connector.closed.load(Ordering::SeqCst));
        assert!(matches!(coach.push_audio(Bytes::from_static(&[0, 0])).await, Err(AudioError::NotActive)));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(connector.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_remote_close_marks_inactive() {
        let coach = CoachSession::new(Arc::new(RelayConnector));
        coach.start().await.unwrap();
        coach.relay(SessionEvent::Closed).await.unwrap();
        settle().await;
        assert!(!coach.view().await.active);

        // A finished session can be restarted.
        coach.start().await.unwrap();
        assert!(coach.view().await.active);
    }
}
