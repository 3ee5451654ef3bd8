//! PCM framing for the live session.
//!
//! Upstream: f32 capture frames become 16-bit little-endian PCM at
//! [`INPUT_SAMPLE_RATE`], tagged [`INPUT_MIME`]. Downstream: the endpoint
//! sends 16-bit little-endian mono PCM at [`OUTPUT_SAMPLE_RATE`]; samples
//! are scaled into f32 by full-scale division before playback.

/// Microphone frames are resampled/captured at this rate.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Server audio arrives at this rate.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// MIME tag declared on upstream media frames.
pub const INPUT_MIME: &str = "audio/pcm;rate=16000";

/// Encode f32 samples (-1.0..1.0) as 16-bit little-endian PCM bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 0x7FFF as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM bytes to f32 samples. A trailing odd
/// byte is truncated to keep the frame aligned to sample boundaries.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    let aligned = bytes.len() - (bytes.len() % 2);
    bytes[..aligned]
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect()
}

/// Instantaneous RMS amplitude of a frame, in [0, 1].
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt().clamp(0.0, 1.0)
}

/// Wrap raw 16-bit mono PCM in a 44-byte RIFF header so a received
/// utterance can be saved as a playable asset.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // subchunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
