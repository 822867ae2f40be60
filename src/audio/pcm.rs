//! PCM16 <-> f32 conversion and the base64 framing used on the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{Result, VoiceError};

/// Shorter base64 payloads are rejected before decoding.
pub const MIN_AUDIO_PAYLOAD_LEN: usize = 48;

/// One slice of synthesized speech as received from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Server-supplied id or a content fingerprint
    pub id: String,
    /// base64 of little-endian PCM16 mono
    pub payload: String,
}

impl AudioChunk {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

/// Decode a base64 PCM16 payload into normalized samples (`s / 32768`).
pub fn decode_chunk(payload: &str) -> Result<Vec<f32>> {
    if payload.len() < MIN_AUDIO_PAYLOAD_LEN {
        return Err(VoiceError::Decode(format!(
            "payload too short: {} < {}",
            payload.len(),
            MIN_AUDIO_PAYLOAD_LEN
        )));
    }
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| VoiceError::Decode(e.to_string()))?;
    if bytes.len() < 2 {
        return Err(VoiceError::Decode("no complete sample".into()));
    }
    // 奇数长度时丢弃最后一个字节
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// Convert one float sample to PCM16 with asymmetric scaling so -1.0 and 1.0 both fit.
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode float samples as base64 little-endian PCM16.
pub fn encode_frame(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&f32_to_i16(s).to_le_bytes());
    }
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_from_i16(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        BASE64.encode(bytes)
    }

    #[test]
    fn decodes_little_endian_samples() {
        let mut samples = vec![0i16; 40];
        samples[0] = 16384;
        samples[1] = -32768;
        samples[2] = 32767;
        let decoded = decode_chunk(&payload_from_i16(&samples)).unwrap();
        assert_eq!(decoded.len(), 40);
        assert_eq!(decoded[0], 0.5);
        assert_eq!(decoded[1], -1.0);
        assert!((decoded[2] - 0.99997).abs() < 1e-4);
    }

    #[test]
    fn rejects_short_payload() {
        let err = decode_chunk("AAAA").unwrap_err();
        assert!(matches!(err, VoiceError::Decode(_)));
    }

    #[test]
    fn rejects_invalid_base64() {
        let garbage = "!".repeat(MIN_AUDIO_PAYLOAD_LEN + 4);
        assert!(matches!(
            decode_chunk(&garbage),
            Err(VoiceError::Decode(_))
        ));
    }

    #[test]
    fn clamps_out_of_range_floats() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn encoded_frame_is_pcm16() {
        let encoded = encode_frame(&[0.0, 1.0, -1.0]);
        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(bytes, vec![0, 0, 0xff, 0x7f, 0x00, 0x80]);
    }
}
