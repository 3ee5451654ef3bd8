//! Live session transport: one persistent websocket to the voice endpoint.
//!
//! Upstream frames carry base64 PCM with the [`crate::pcm::INPUT_MIME`]
//! tag; downstream messages carry either an audio chunk, an interruption
//! signal, or a terminal close/error. The wire envelope is JSON; parsing
//! is kept in pure functions so it can be tested against fixtures.

use crate::error::{VoiceError, VoiceResult};
use crate::pcm::INPUT_MIME;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

const ENV_ENDPOINT: &str = "HAVEN_LIVE_URL";
const ENV_MODEL: &str = "HAVEN_LIVE_MODEL";
const ENV_API_KEYS: [&str; 2] = ["HAVEN_API_KEY", "GEMINI_API_KEY"];

const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Connection parameters for the live endpoint.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

impl SessionConfig {
    /// Resolves endpoint, model and credential from the environment
    /// (`.env` honored). A missing credential is a distinct error — the
    /// session must not attempt the network call without one.
    pub fn from_env() -> VoiceResult<Self> {
        dotenvy::dotenv().ok();
        let api_key = ENV_API_KEYS
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
            .ok_or(VoiceError::CredentialMissing)?;
        let endpoint =
            std::env::var(ENV_ENDPOINT).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let model = std::env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self {
            endpoint,
            api_key,
            model,
        })
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

/// Messages surfaced by the reader task.
#[derive(Debug)]
pub enum ServerEvent {
    /// Raw little-endian PCM bytes, already base64-decoded.
    Audio(Vec<u8>),
    /// Barge-in: the user spoke while agent audio was playing.
    Interrupted,
    /// Malformed audio payload; the chunk is dropped, the session lives on.
    BadChunk(String),
    /// The endpoint closed the session. The reason text is passed through
    /// so callers can filter known-benign cancellation races.
    Closed { reason: String },
    /// Network/protocol failure.
    Error(String),
}

/// Initial setup frame: model selection, audio-out modality, synthesis
/// voice, and the session-priming instruction.
fn setup_message(
    config: &SessionConfig,
    system_instruction: Option<&str>,
    voice_name: Option<&str>,
) -> serde_json::Value {
    let mut setup = json!({
        "model": config.model,
        "generationConfig": {
            "responseModalities": ["AUDIO"],
        },
    });
    if let Some(voice) = voice_name {
        setup["generationConfig"]["speechConfig"] = json!({
            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
        });
    }
    if let Some(instruction) = system_instruction {
        setup["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }
    json!({ "setup": setup })
}

/// One upstream media frame.
fn audio_message(pcm: &[u8]) -> serde_json::Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": INPUT_MIME,
                "data": BASE64.encode(pcm),
            }]
        }
    })
}

/// Translate one downstream text frame into events, in wire order: an
/// interruption signal always precedes any audio carried alongside it.
fn parse_server_message(text: &str) -> Vec<ServerEvent> {
    let Ok(msg) = serde_json::from_str::<serde_json::Value>(text) else {
        return vec![ServerEvent::BadChunk("not JSON".to_string())];
    };
    let mut events = Vec::new();
    let content = &msg["serverContent"];
    if content["interrupted"].as_bool() == Some(true) {
        events.push(ServerEvent::Interrupted);
    }
    if let Some(parts) = content["modelTurn"]["parts"].as_array() {
        for part in parts {
            let Some(data) = part["inlineData"]["data"].as_str() else {
                continue;
            };
            match BASE64.decode(data) {
                Ok(bytes) => events.push(ServerEvent::Audio(bytes)),
                Err(e) => events.push(ServerEvent::BadChunk(format!("base64: {e}"))),
            }
        }
    }
    events
}

enum OutboundFrame {
    Audio(Vec<u8>),
    Close,
}

/// Handle to an open live session. Dropping it closes the writer side.
pub struct LiveSession {
    out_tx: mpsc::Sender<OutboundFrame>,
}

impl LiveSession {
    /// Opens the websocket, sends the setup frame, and spawns the
    /// writer/reader tasks. Returns the send handle plus the stream of
    /// server events.
    pub async fn connect(
        config: &SessionConfig,
        system_instruction: Option<&str>,
        voice_name: Option<&str>,
    ) -> VoiceResult<(Self, mpsc::Receiver<ServerEvent>)> {
        let (ws, _response) = connect_async(config.url())
            .await
            .map_err(|e| VoiceError::Session(format!("connect: {e}")))?;
        info!("live session open ({})", config.model);

        let (mut ws_tx, mut ws_rx) = ws.split();

        let setup = setup_message(config, system_instruction, voice_name);
        ws_tx
            .send(tungstenite::Message::Text(setup.to_string().into()))
            .await
            .map_err(|e| VoiceError::Session(format!("setup: {e}")))?;

        let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(64);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match frame {
                    OutboundFrame::Audio(pcm) => {
                        tungstenite::Message::Text(audio_message(&pcm).to_string().into())
                    }
                    OutboundFrame::Close => {
                        let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = ws_tx.send(message).await {
                    warn!("upstream send failed: {e}");
                    break;
                }
            }
        });

        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(64);
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    // Some endpoints deliver the JSON envelope in binary
                    // frames; both carry the same payload.
                    Ok(tungstenite::Message::Text(text)) => {
                        for event in parse_server_message(&text) {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(tungstenite::Message::Binary(data)) => {
                        let events = match String::from_utf8(data) {
                            Ok(text) => parse_server_message(&text),
                            Err(_) => vec![ServerEvent::BadChunk("binary frame not UTF-8".to_string())],
                        };
                        for event in events {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(tungstenite::Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| format!("{} ({})", f.reason, f.code))
                            .unwrap_or_else(|| "closed".to_string());
                        debug!("live session closed: {reason}");
                        let _ = event_tx.send(ServerEvent::Closed { reason }).await;
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx.send(ServerEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = event_tx
                .send(ServerEvent::Closed {
                    reason: "stream ended".to_string(),
                })
                .await;
        });

        Ok((Self { out_tx }, event_rx))
    }

    /// Enqueue one encoded microphone frame for upstream transmission.
    pub async fn send_audio(&self, pcm: Vec<u8>) {
        if self.out_tx.send(OutboundFrame::Audio(pcm)).await.is_err() {
            debug!("upstream channel closed; frame dropped");
        }
    }

    /// Request a clean close of the network session.
    pub async fn close(&self) {
        let _ = self.out_tx.send(OutboundFrame::Close).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SessionConfig {
        SessionConfig {
            endpoint: "wss://example.invalid/session".to_string(),
            api_key: "k".to_string(),
            model: "models/test".to_string(),
        }
    }

    #[test]
    fn setup_frame_carries_voice_and_instruction() {
        let msg = setup_message(&test_config(), Some("be kind"), Some("Kore"));
        assert_eq!(msg["setup"]["model"], "models/test");
        assert_eq!(msg["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            msg["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(msg["setup"]["systemInstruction"]["parts"][0]["text"], "be kind");
    }

    #[test]
    fn setup_frame_omits_absent_options() {
        let msg = setup_message(&test_config(), None, None);
        assert!(msg["setup"].get("systemInstruction").is_none());
        assert!(msg["setup"]["generationConfig"].get("speechConfig").is_none());
    }

    #[test]
    fn audio_frame_is_tagged_and_encoded() {
        let msg = audio_message(&[1, 2, 3]);
        let chunk = &msg["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], INPUT_MIME);
        assert_eq!(
            BASE64.decode(chunk["data"].as_str().unwrap()).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn server_audio_is_decoded_in_order() {
        let wire = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": BASE64.encode([0u8, 64]) } },
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": BASE64.encode([0u8, 32]) } },
            ]}}
        });
        let events = parse_server_message(&wire.to_string());
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ServerEvent::Audio(b) if b == &vec![0u8, 64]));
        assert!(matches!(&events[1], ServerEvent::Audio(b) if b == &vec![0u8, 32]));
    }

    #[test]
    fn interruption_precedes_audio_in_same_frame() {
        let wire = json!({
            "serverContent": {
                "interrupted": true,
                "modelTurn": { "parts": [
                    { "inlineData": { "data": BASE64.encode([9u8, 9]) } },
                ]}
            }
        });
        let events = parse_server_message(&wire.to_string());
        assert!(matches!(events[0], ServerEvent::Interrupted));
        assert!(matches!(events[1], ServerEvent::Audio(_)));
    }

    #[test]
    fn malformed_audio_is_nonfatal() {
        let wire = json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "data": "!!not-base64!!" } },
            ]}}
        });
        let events = parse_server_message(&wire.to_string());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::BadChunk(_)));
        assert!(matches!(
            parse_server_message("garbage").as_slice(),
            [ServerEvent::BadChunk(_)]
        ));
    }

    #[test]
    fn missing_credential_is_a_distinct_error() {
        let _guard = crate::test_support::ENV_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        std::env::remove_var("HAVEN_API_KEY");
        std::env::remove_var("GEMINI_API_KEY");
        let err = SessionConfig::from_env().unwrap_err();
        assert!(matches!(err, VoiceError::CredentialMissing));
    }
}
