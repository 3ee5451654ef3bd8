//! # haven-voice — realtime voice session
//!
//! Bidirectional low-latency audio against a voice-capable endpoint:
//! microphone PCM streams up, synthesized speech streams down, and barge-in
//! flushes playback instantly.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        VoiceSession                          │
//! │  ┌────────────┐   ┌───────────┐   ┌───────────────────┐     │
//! │  │  Mic In    │ → │ PCM 16k   │ → │   LiveSession     │     │
//! │  │  (cpal)    │   │ + RMS     │   │ (websocket, b64)  │     │
//! │  └────────────┘   └───────────┘   └─────────┬─────────┘     │
//! │                                             ↓ audio / barge-in
//! │  ┌────────────┐   ┌─────────────────────────┴─────────┐     │
//! │  │ Audio Out  │ ← │  PlaybackScheduler (24k, gapless, │     │
//! │  │  (rodio)   │   │  next-start cursor, flush)        │     │
//! │  └────────────┘   └───────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod clock;
pub mod error;
pub mod pcm;
pub mod playback;
pub mod session;
pub mod transport;

pub use capture::{CaptureConfig, CaptureFrame, MicCapture};
pub use clock::{AudioClock, ManualClock, SystemClock};
pub use error::{VoiceError, VoiceResult};
pub use pcm::{
    decode_pcm16, encode_pcm16, pcm16_to_wav, rms, INPUT_MIME, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE,
};
pub use playback::{PlaybackHandle, PlaybackQueue, PlaybackScheduler, PlaybackSink, ScheduledChunk};
pub use session::{
    OnError, OnInterrupted, OnVolume, ServerChunk, SessionState, VoiceOptions, VoiceSession,
};
pub use transport::{LiveSession, ServerEvent, SessionConfig};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    /// Serializes tests that mutate process environment variables.
    pub static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Route tracing output through the test harness (`RUST_LOG` honored).
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
