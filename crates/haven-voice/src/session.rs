//! The voice session: one microphone, one playback graph, one live
//! connection, tied together by an explicit state machine.
//!
//! `Idle → Connecting → Streaming ⇄ Interrupted → Closing → Closed`, with
//! `Connecting → Closed` on any connect failure. All runtime failures reach
//! the caller through `on_error` — the capture loop has no caller to unwind
//! to — and nothing here retries on its own.

use crate::capture::{CaptureConfig, MicCapture};
use crate::error::{VoiceError, VoiceResult};
use crate::pcm::{decode_pcm16, encode_pcm16, rms, OUTPUT_SAMPLE_RATE};
use crate::playback::{spawn_playback, PlaybackHandle};
use crate::transport::{LiveSession, ServerEvent, SessionConfig};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a [`VoiceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Interrupted,
    Closing,
    Closed,
}

impl SessionState {
    /// True while the session owns live resources.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Streaming | SessionState::Interrupted
        )
    }
}

/// One server audio chunk, as observed by `on_audio_chunk`. Playback is
/// driven by the scheduler, not by this callback — it exists for status
/// displays and for archiving (see [`crate::pcm::pcm16_to_wav`]).
#[derive(Debug, Clone)]
pub struct ServerChunk {
    /// Raw 16-bit little-endian PCM at the output rate.
    pub bytes: Vec<u8>,
    pub duration: Duration,
    pub received_at: DateTime<Utc>,
}

/// Volume telemetry callback: instantaneous RMS in [0, 1], once per frame.
pub type OnVolume = Arc<dyn Fn(f32) + Send + Sync>;
/// Error callback; see [`VoiceError`] for which kinds are fatal.
pub type OnError = Arc<dyn Fn(VoiceError) + Send + Sync>;
/// Barge-in callback: playback was flushed because the user spoke.
pub type OnInterrupted = Arc<dyn Fn() + Send + Sync>;

/// Session options. All fields optional; unset callbacks are skipped.
#[derive(Clone, Default)]
pub struct VoiceOptions {
    /// Session behavior priming, sent once in the setup frame.
    pub system_instruction: Option<String>,
    /// Synthesis voice selector.
    pub voice_name: Option<String>,
    pub on_volume: Option<OnVolume>,
    pub on_error: Option<OnError>,
    pub on_interrupted: Option<OnInterrupted>,
}

fn lock_state(state: &Mutex<SessionState>) -> std::sync::MutexGuard<'_, SessionState> {
    // A poisoned lock must never make disconnect() panic.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn report(on_error: &Option<OnError>, err: VoiceError) {
    warn!("voice session: {err}");
    if let Some(cb) = on_error {
        cb(err);
    }
}

/// The single live voice interaction. Owns exactly one capture graph and
/// one playback graph for its lifetime; creating a new session while one is
/// active tears the old one down first.
pub struct VoiceSession {
    state: Arc<Mutex<SessionState>>,
    capture_stream: Option<cpal::Stream>,
    playback: Option<PlaybackHandle>,
    live: Option<Arc<LiveSession>>,
    capture_task: Option<JoinHandle<()>>,
    event_task: Option<JoinHandle<()>>,
}

impl VoiceSession {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::Idle)),
            capture_stream: None,
            playback: None,
            live: None,
            capture_task: None,
            event_task: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *lock_state(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        *lock_state(&self.state) = next;
    }

    /// Opens microphone, playback and the live connection, then starts
    /// streaming. On any failure the session ends up `Closed` holding no
    /// resources, the error goes to `on_error`, and it is also returned.
    pub async fn connect<F>(&mut self, on_audio_chunk: F, options: VoiceOptions) -> VoiceResult<()>
    where
        F: Fn(ServerChunk) + Send + Sync + 'static,
    {
        if self.state().is_active() {
            info!("active session found; tearing it down first");
            self.disconnect();
        }
        self.set_state(SessionState::Connecting);

        let outcome = self.connect_inner(on_audio_chunk, &options).await;
        if let Err(err) = &outcome {
            self.release_resources();
            self.set_state(SessionState::Closed);
            report(&options.on_error, err.clone());
        }
        outcome
    }

    async fn connect_inner<F>(&mut self, on_audio_chunk: F, options: &VoiceOptions) -> VoiceResult<()>
    where
        F: Fn(ServerChunk) + Send + Sync + 'static,
    {
        let config = SessionConfig::from_env()?;

        // Microphone permission first: fail before anything is held.
        let capture = MicCapture::new(CaptureConfig::default())?;

        let playback = spawn_playback()?;
        let queue = playback.queue();

        let (live, mut event_rx) = LiveSession::connect(
            &config,
            options.system_instruction.as_deref(),
            options.voice_name.as_deref(),
        )
        .await?;
        let live = Arc::new(live);

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let stream = capture.start(frame_tx)?;

        // Capture loop: buffer math and a network enqueue, nothing else.
        let live_up = live.clone();
        let on_volume = options.on_volume.clone();
        let capture_task = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if let Some(cb) = &on_volume {
                    cb(rms(&frame.samples));
                }
                live_up.send_audio(encode_pcm16(&frame.samples)).await;
            }
            debug!("capture loop ended");
        });

        // Server events: schedule audio, handle barge-in, surface errors.
        let state = self.state.clone();
        let on_error = options.on_error.clone();
        let on_interrupted = options.on_interrupted.clone();
        let event_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    ServerEvent::Audio(bytes) => {
                        let samples = decode_pcm16(&bytes);
                        if samples.is_empty() {
                            continue;
                        }
                        let duration = Duration::from_secs_f64(
                            samples.len() as f64 / OUTPUT_SAMPLE_RATE as f64,
                        );
                        queue.enqueue(samples);
                        on_audio_chunk(ServerChunk {
                            bytes,
                            duration,
                            received_at: Utc::now(),
                        });
                    }
                    ServerEvent::Interrupted => {
                        *lock_state(&state) = SessionState::Interrupted;
                        queue.flush();
                        if let Some(cb) = &on_interrupted {
                            cb();
                        }
                        *lock_state(&state) = SessionState::Streaming;
                    }
                    ServerEvent::BadChunk(msg) => {
                        report(&on_error, VoiceError::Decode(msg));
                    }
                    ServerEvent::Closed { reason } => {
                        let closing = {
                            let mut s = lock_state(&state);
                            let was_closing =
                                matches!(*s, SessionState::Closing | SessionState::Closed);
                            *s = SessionState::Closed;
                            was_closing
                        };
                        if !closing {
                            report(
                                &on_error,
                                VoiceError::Session(format!("session closed: {reason}")),
                            );
                        }
                        break;
                    }
                    ServerEvent::Error(msg) => {
                        *lock_state(&state) = SessionState::Closed;
                        report(&on_error, VoiceError::Session(msg));
                        break;
                    }
                }
            }
        });

        self.capture_stream = Some(stream);
        self.playback = Some(playback);
        self.live = Some(live);
        self.capture_task = Some(capture_task);
        self.event_task = Some(event_task);
        self.set_state(SessionState::Streaming);
        info!("voice session streaming");
        Ok(())
    }

    /// Tears the session down. Idempotent; safe before `connect` ever
    /// succeeded; never panics. Release order: capture graph, playback
    /// graph, network session — each independently guarded.
    pub fn disconnect(&mut self) {
        self.set_state(SessionState::Closing);
        self.release_resources();
        self.set_state(SessionState::Closed);
        debug!("voice session closed");
    }

    fn release_resources(&mut self) {
        // 1. Capture: dropping the stream stops the device callback and
        //    closes the frame channel, ending the capture task.
        if let Some(stream) = self.capture_stream.take() {
            drop(stream);
        }
        // 2. Playback: flush pending audio, then join the thread.
        if let Some(mut playback) = self.playback.take() {
            playback.flush();
            playback.close();
        }
        // 3. Network: request a clean close if a runtime is available,
        //    otherwise let the dropped handle close the channels.
        if let Some(live) = self.live.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { live.close().await });
            }
        }
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle() {
        let session = VoiceSession::new();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.state().is_active());
    }

    #[test]
    fn disconnect_before_connect_is_safe_and_idempotent() {
        let mut session = VoiceSession::new();
        session.disconnect();
        assert_eq!(session.state(), SessionState::Closed);
        session.disconnect();
        session.disconnect();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn failed_connect_leaves_no_partial_state() {
        crate::test_support::init_tracing();
        let _guard = crate::test_support::ENV_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // Point the endpoint at a dead port so no real network is touched.
        std::env::set_var("HAVEN_LIVE_URL", "ws://127.0.0.1:1/session");
        std::env::set_var("HAVEN_API_KEY", "test-key");

        let errors: Arc<Mutex<Vec<VoiceError>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        let options = VoiceOptions {
            on_error: Some(Arc::new(move |e| seen.lock().unwrap().push(e))),
            ..Default::default()
        };

        let mut session = VoiceSession::new();
        let result = tokio_test::block_on(session.connect(|_| {}, options));
        // No device in CI fails at the mic; otherwise the dead endpoint
        // fails the connect. Both must end Closed with the error reported.
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(errors.lock().unwrap().len(), 1);

        // A second disconnect after the failure must stay a no-op.
        session.disconnect();
        assert_eq!(session.state(), SessionState::Closed);

        std::env::remove_var("HAVEN_LIVE_URL");
        std::env::remove_var("HAVEN_API_KEY");
    }
}
