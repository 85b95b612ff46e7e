use serde::Serialize;

pub const SAMPLE_RATE: u32 = 16000; // Whisper requires 16kHz, no resampling is performed
pub const PACKET_SIZE: usize = 65536; // line-framer packet size, overridable via PACKET_SIZE_BYTES
pub const DEFAULT_MAX_SINGLE_RECV_BYTES: usize = 5 * 1024 * 1024;

/// A single timestamped word on the absolute audio timeline of a connection.
///
/// `start`/`end` are seconds since the start of the connection's audio, not
/// relative to whatever window currently holds the word.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Word {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Returns a copy of this word shifted by `offset` seconds.
    pub fn rebased(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            text: self.text.clone(),
        }
    }
}

/// Converts little-endian signed 16-bit PCM bytes into float32 samples in
/// `[-1.0, 1.0]`. Drops a trailing odd byte (logged at debug) and returns
/// `None` for empty input.
pub fn decode_pcm16le(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() {
        return None;
    }
    let usable = if bytes.len() % 2 == 1 {
        tracing::debug!(len = bytes.len(), "dropping trailing odd byte in PCM packet");
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    if usable.is_empty() {
        return None;
    }
    let samples = usable
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect();
    Some(samples)
}

/// One emitted transcript line: `{"language","start","end","text"}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TranscriptLine {
    pub language: String,
    #[serde(serialize_with = "serialize_seconds")]
    pub start: f64,
    #[serde(serialize_with = "serialize_seconds")]
    pub end: f64,
    pub text: String,
}

fn serialize_seconds<S: serde::Serializer>(value: &f64, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&format!("{value:.3}"))
}

impl TranscriptLine {
    /// Serializes this line as a single JSON object with no trailing newline.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("TranscriptLine fields are always serializable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_pcm16le_rejects_empty_input() {
        assert_eq!(decode_pcm16le(&[]), None);
    }

    #[test]
    fn decode_pcm16le_drops_trailing_odd_byte() {
        let samples = decode_pcm16le(&[0x00, 0x00, 0x01]).unwrap();
        assert_eq!(samples, vec![0.0]);
    }

    #[test]
    fn decode_pcm16le_scales_full_range() {
        let samples = decode_pcm16le(&[0xff, 0x7f, 0x00, 0x80]).unwrap();
        assert!((samples[0] - 0.999969).abs() < 1e-4);
        assert!((samples[1] - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn transcript_line_formats_seconds_to_three_digits() {
        let line = TranscriptLine {
            language: "en".into(),
            start: 0.2,
            end: 1.0,
            text: "hello".into(),
        };
        assert_eq!(
            line.to_json(),
            r#"{"language":"en","start":"0.200","end":"1.000","text":"hello"}"#
        );
    }
}
