//! Inbound frame normalization for the synthesis stream.
//!
//! The backend is not contractually stable about framing: audio arrives as
//! JSON text with a base64 payload under one of several field names, as raw
//! binary PCM, or occasionally as progress metadata with no audio at all.
//! Everything heterogeneous is decoded here so callers only ever see
//! [`Frame`] variants; a future backend contract change should touch this
//! module alone.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Audio payload field names, probed in priority order; the first non-empty
/// string wins.
const AUDIO_PATHS: &[&[&str]] = &[
    &["audio"],
    &["audioContent"],
    &["data", "audio"],
    &["chunk"],
];

/// One normalized inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Raw little-endian 16-bit PCM bytes.
    Audio(Vec<u8>),
    /// Backend progress report: seconds of audio generated so far.
    Progress(f64),
    /// Nothing usable — malformed, control, or unrecognized. A single corrupt
    /// frame never aborts an otherwise-good stream.
    Skip,
}

/// Extract zero or one chunk of raw audio (or a progress signal) from one
/// inbound message.
pub fn decode_frame(msg: &Message) -> Frame {
    match msg {
        Message::Binary(bytes) => Frame::Audio(bytes.to_vec()),
        Message::Text(text) => decode_text_frame(text.as_str()),
        // Ping/pong/close carry no audio.
        _ => Frame::Skip,
    }
}

fn decode_text_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            debug!("dropping non-JSON text frame ({} bytes)", text.len());
            return Frame::Skip;
        }
    };

    if let Some(seconds) = probe_progress(&value) {
        return Frame::Progress(seconds);
    }

    match probe_audio(&value) {
        Some(encoded) => match BASE64.decode(encoded) {
            Ok(bytes) => Frame::Audio(bytes),
            Err(_) => {
                debug!("dropping frame with invalid base64 payload");
                Frame::Skip
            }
        },
        None => Frame::Skip,
    }
}

/// First non-empty string under any of the candidate audio paths.
fn probe_audio(value: &Value) -> Option<&str> {
    AUDIO_PATHS.iter().find_map(|path| {
        let field = path.iter().try_fold(value, |v, key| v.get(key))?;
        field.as_str().filter(|s| !s.is_empty())
    })
}

/// Progress metadata: `{"progress": 1.5}`, `{"progress": {"seconds": 1.5}}`,
/// or `{"secondsGenerated": 1.5}`.
fn probe_progress(value: &Value) -> Option<f64> {
    match value.get("progress") {
        Some(p) if p.is_number() => return p.as_f64(),
        Some(p) => {
            if let Some(seconds) = p.get("seconds").and_then(Value::as_f64) {
                return Some(seconds);
            }
        }
        None => {}
    }
    value.get("secondsGenerated").and_then(Value::as_f64)
}

/// Pair raw PCM bytes into little-endian i16 samples.
///
/// Frames may split a sample across a message boundary; the odd trailing byte
/// is returned so the caller can carry it into the next frame.
pub fn samples_from_bytes(bytes: &[u8], leftover: Option<u8>) -> (Vec<i16>, Option<u8>) {
    let joined: Vec<u8>;
    let slice = match leftover {
        Some(carry) => {
            let mut buf = Vec::with_capacity(1 + bytes.len());
            buf.push(carry);
            buf.extend_from_slice(bytes);
            joined = buf;
            &joined[..]
        }
        None => bytes,
    };

    let samples = slice
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let remainder = if slice.len() % 2 == 1 {
        Some(slice[slice.len() - 1])
    } else {
        None
    };

    (samples, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Message {
        Message::Text(s.into())
    }

    #[test]
    fn binary_frames_pass_through() {
        let frame = decode_frame(&Message::Binary(vec![1, 0, 2, 0].into()));
        assert_eq!(frame, Frame::Audio(vec![1, 0, 2, 0]));
    }

    #[test]
    fn json_base64_audio_decodes() {
        let payload = BASE64.encode([1u8, 0, 255, 127]);
        let frame = decode_frame(&text(&format!(r#"{{"audio":"{payload}"}}"#)));
        assert_eq!(frame, Frame::Audio(vec![1, 0, 255, 127]));
    }

    #[test]
    fn audio_paths_probed_in_priority_order() {
        let a = BASE64.encode([1u8, 1]);
        let b = BASE64.encode([2u8, 2]);
        // "audio" outranks "chunk" even when both are present.
        let frame = decode_frame(&text(&format!(
            r#"{{"chunk":"{b}","audio":"{a}"}}"#
        )));
        assert_eq!(frame, Frame::Audio(vec![1, 1]));

        // Nested data.audio is found when the flat fields are absent.
        let frame = decode_frame(&text(&format!(r#"{{"data":{{"audio":"{b}"}}}}"#)));
        assert_eq!(frame, Frame::Audio(vec![2, 2]));
    }

    #[test]
    fn empty_audio_field_falls_through_to_next_candidate() {
        let b = BASE64.encode([9u8, 9]);
        let frame = decode_frame(&text(&format!(r#"{{"audio":"","chunk":"{b}"}}"#)));
        assert_eq!(frame, Frame::Audio(vec![9, 9]));
    }

    #[test]
    fn progress_metadata_is_not_audio() {
        assert_eq!(decode_frame(&text(r#"{"progress": 2.5}"#)), Frame::Progress(2.5));
        assert_eq!(
            decode_frame(&text(r#"{"progress": {"seconds": 0.5}}"#)),
            Frame::Progress(0.5)
        );
        assert_eq!(
            decode_frame(&text(r#"{"secondsGenerated": 4}"#)),
            Frame::Progress(4.0)
        );
    }

    #[test]
    fn malformed_frames_are_dropped_silently() {
        assert_eq!(decode_frame(&text("not json")), Frame::Skip);
        assert_eq!(decode_frame(&text(r#"{"audio":"@@not-base64@@"}"#)), Frame::Skip);
        assert_eq!(decode_frame(&text(r#"{"status":"warming up"}"#)), Frame::Skip);
        assert_eq!(decode_frame(&Message::Ping(vec![].into())), Frame::Skip);
    }

    #[test]
    fn malformed_frames_leave_valid_neighbors_untouched() {
        let good = BASE64.encode([7u8, 0]);
        let messages = vec![
            text(&format!(r#"{{"audio":"{good}"}}"#)),
            text("garbage"),
            Message::Binary(vec![8, 0].into()),
            text(r#"{"audio":"%%%"}"#),
            text(&format!(r#"{{"audioContent":"{good}"}}"#)),
        ];

        let mut collected = Vec::new();
        for msg in &messages {
            if let Frame::Audio(bytes) = decode_frame(msg) {
                collected.extend(bytes);
            }
        }
        assert_eq!(collected, vec![7, 0, 8, 0, 7, 0]);
    }

    #[test]
    fn sample_pairing_carries_odd_bytes() {
        let (samples, carry) = samples_from_bytes(&[0x01, 0x00, 0xFF], None);
        assert_eq!(samples, vec![1]);
        assert_eq!(carry, Some(0xFF));

        let (samples, carry) = samples_from_bytes(&[0x7F, 0x02, 0x00], Some(0xFF));
        assert_eq!(samples, vec![32767, 2]);
        assert_eq!(carry, None);
    }

    #[test]
    fn sample_pairing_empty_input() {
        let (samples, carry) = samples_from_bytes(&[], None);
        assert!(samples.is_empty());
        assert_eq!(carry, None);

        let (samples, carry) = samples_from_bytes(&[], Some(0x42));
        assert!(samples.is_empty());
        assert_eq!(carry, Some(0x42));
    }
}
