//! Microphone capture via CPAL.
//!
//! The device callback only does buffer math and a channel send — frames
//! are accumulated to a fixed size and forwarded; all encoding and network
//! work happens off the audio thread.

use crate::error::{VoiceError, VoiceResult};
use crate::pcm::INPUT_SAMPLE_RATE;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz (default: 16000, the session's upstream rate).
    pub sample_rate: u32,
    /// Mono capture.
    pub channels: u16,
    /// Frame size in samples (default: 1024 ≈ 64ms at 16kHz).
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
            frame_size: 1024,
        }
    }
}

/// One fixed-size frame from the capture thread.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Samples (f32, -1.0..1.0).
    pub samples: Vec<f32>,
}

/// Microphone input graph. Owns the device selection; the stream handle
/// returned by [`start`](Self::start) must be kept alive for capture to run.
pub struct MicCapture {
    config: CaptureConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl MicCapture {
    /// Selects the default input device. No device present maps to
    /// [`VoiceError::PermissionDenied`] — the session must stay closed.
    pub fn new(config: CaptureConfig) -> VoiceResult<Self> {
        let device = cpal::default_host().default_input_device().ok_or_else(|| {
            VoiceError::PermissionDenied("no input device available".to_string())
        })?;
        info!(
            "mic capture on {} ({}Hz mono)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Starts capture; full frames are sent to `frame_tx`.
    pub fn start(self, frame_tx: mpsc::UnboundedSender<CaptureFrame>) -> VoiceResult<Stream> {
        let frame_size = self.config.frame_size;
        let mut pending = Vec::with_capacity(frame_size);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() >= frame_size {
                        let frame = CaptureFrame {
                            samples: std::mem::take(&mut pending),
                        };
                        pending.reserve(frame_size);
                        if frame_tx.send(frame).is_err() {
                            // Receiver gone: session is tearing down.
                            return;
                        }
                    }
                }
            },
            move |err| {
                warn!("capture stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(stream)
    }
}
