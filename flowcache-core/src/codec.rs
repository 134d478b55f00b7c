//! Payload codec for the persistent tier.
//!
//! Values are serialized to canonical JSON bytes, then zstd-compressed.
//! All functions are stateless.

use crate::constants::DEFAULT_COMPRESSION_LEVEL;
use crate::error::CodecError;

/// Compress serialized bytes at the default level.
pub fn compress(serialized: &[u8]) -> Result<Vec<u8>, CodecError> {
    compress_with_level(serialized, DEFAULT_COMPRESSION_LEVEL)
}

/// Compress serialized bytes at an explicit zstd level.
pub fn compress_with_level(serialized: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    zstd::encode_all(serialized, level).map_err(|e| CodecError::Compress {
        reason: e.to_string(),
    })
}

/// Decompress bytes produced by [`compress`].
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::decode_all(compressed).map_err(|e| CodecError::Decompress {
        reason: e.to_string(),
    })
}

/// Serialize a value to the byte form that is sized, compressed and stored.
pub fn encode_value(value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Encode {
        reason: e.to_string(),
    })
}

/// Parse bytes produced by [`encode_value`].
pub fn decode_value(bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })
}

/// Decompress and parse a persisted payload in one step.
pub fn unpack(compressed: &[u8]) -> Result<serde_json::Value, CodecError> {
    let bytes = decompress(compressed)?;
    decode_value(&bytes)
}
