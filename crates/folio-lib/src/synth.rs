//! Streaming synthesis client — one duplex connection per text chunk.
//!
//! The request is carried entirely in URL query parameters; the peer streams
//! frames back and closes the socket as its only end-of-stream signal. There
//! is no retry logic here — retry policy belongs to the caller.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use folio_core::types::SynthConfig;

use crate::error::SynthError;
use crate::frame::{Frame, decode_frame, samples_from_bytes};

/// Fixed tuning parameters sent with every request.
pub const TUNE_SAMPLE_RATE: &str = "24000";
pub const TUNE_ENCODING: &str = "pcm16";

/// Best-effort stop signal sent before a local close on cancellation.
pub const STOP_MESSAGE: &str = r#"{"action":"stop"}"#;

pub type SynthStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Seam between the job runner / playback engine and the real backend, so
/// both are testable without a network.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Stream one chunk of text and resolve to its concatenated raw samples.
    ///
    /// Resolves even when the concatenation is empty — callers must treat an
    /// empty buffer as "no audio returned" and fail their own operation.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<i16>, SynthError>;
}

/// The synthesis request URL: base endpoint plus `text`, `voice`, and the two
/// fixed tuning parameters.
pub fn build_stream_url(base: &str, text: &str, voice: &str) -> Result<Url, SynthError> {
    let mut url = Url::parse(base).map_err(|e| SynthError::BadEndpoint(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("text", text)
        .append_pair("voice", voice)
        .append_pair("sample_rate", TUNE_SAMPLE_RATE)
        .append_pair("encoding", TUNE_ENCODING);
    Ok(url)
}

/// Requested voice, falling back to the configured default when unset.
pub fn pick_voice<'a>(config: &'a SynthConfig, voice: Option<&'a str>) -> &'a str {
    voice.filter(|v| !v.is_empty()).unwrap_or(&config.voice)
}

/// Open a fresh duplex connection for one chunk. Connections are never reused
/// across chunks.
pub async fn open_stream(
    config: &SynthConfig,
    text: &str,
    voice: Option<&str>,
) -> Result<SynthStream, SynthError> {
    let url = build_stream_url(&config.synth_url, text, pick_voice(config, voice))?;
    let (stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| SynthError::ConnectionFailed(e.to_string()))?;
    Ok(stream)
}

/// Cancellation: tell the peer to stop if the socket is still open, then
/// close locally without waiting for acknowledgment.
pub async fn send_stop(ws: &mut SynthStream) {
    let _ = ws.send(Message::Text(STOP_MESSAGE.into())).await;
    let _ = ws.close(None).await;
}

/// Real backend client.
pub struct SynthClient {
    config: SynthConfig,
}

impl SynthClient {
    pub fn new(config: SynthConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Synthesizer for SynthClient {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<i16>, SynthError> {
        let mut ws = open_stream(&self.config, text, voice).await?;

        let mut samples: Vec<i16> = Vec::new();
        let mut leftover: Option<u8> = None;
        let mut frames = 0usize;

        while let Some(next) = ws.next().await {
            match next {
                Ok(Message::Close(_)) => break,
                Ok(msg) => match decode_frame(&msg) {
                    Frame::Audio(bytes) => {
                        let (decoded, carry) = samples_from_bytes(&bytes, leftover.take());
                        leftover = carry;
                        samples.extend(decoded);
                        frames += 1;
                    }
                    Frame::Progress(seconds) => {
                        debug!("synthesis progress: {seconds:.1}s generated");
                    }
                    Frame::Skip => {}
                },
                Err(e) => return Err(SynthError::ConnectionFailed(e.to_string())),
            }
        }

        debug!(
            "synthesis stream closed: {} frames, {} samples",
            frames,
            samples.len()
        );
        Ok(samples)
    }
}
