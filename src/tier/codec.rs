//! Value encoding for the disk tier.
//!
//! Every payload starts with a one-byte [`StorageFormat`] tag so that files written
//! with compression on stay readable after it is switched off, and vice versa.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::CompressionConfig;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("Zstd failed: {0}")]
    Zstd(#[from] std::io::Error),

    #[error("Unknown storage format tag {0:#04x}")]
    UnknownFormat(u8),

    #[error("Empty payload")]
    Empty,
}

/// Encode/decode capability required of every value stored on disk.
pub trait Codec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;
}

/// On-disk payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageFormat {
    /// Plain JSON.
    Json = 0,
    /// JSON compressed with zstd.
    JsonZstd = 1,
}

impl StorageFormat {
    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(StorageFormat::Json),
            1 => Ok(StorageFormat::JsonZstd),
            other => Err(CodecError::UnknownFormat(other)),
        }
    }
}

/// serde_json codec with optional zstd compression.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    config: CompressionConfig,
}

impl JsonCodec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// The format new payloads are written in.
    pub fn format(&self) -> StorageFormat {
        if self.config.zstd {
            StorageFormat::JsonZstd
        } else {
            StorageFormat::Json
        }
    }
}

impl<V> Codec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
        let format = self.format();

        let body = match format {
            StorageFormat::Json => json,
            StorageFormat::JsonZstd => zstd::encode_all(json.as_slice(), self.config.zstd_level)?,
        };

        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(format as u8);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        let (&tag, body) = bytes.split_first().ok_or(CodecError::Empty)?;

        match StorageFormat::from_tag(tag)? {
            StorageFormat::Json => serde_json::from_slice(body).map_err(CodecError::Deserialize),
            StorageFormat::JsonZstd => {
                let json = zstd::decode_all(body)?;
                serde_json::from_slice(&json).map_err(CodecError::Deserialize)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        tags: Vec<String>,
    }

    #[test]
    fn test_plain_json_layout() {
        let codec = JsonCodec::default();
        let bytes = Codec::<String>::encode(&codec, &"hello".to_string()).unwrap();
        assert_eq!(bytes[0], StorageFormat::Json as u8);
        assert_eq!(&bytes[1..], b"\"hello\"");
    }

    #[test]
    fn test_zstd_shrinks_repetitive_payload() {
        let codec = JsonCodec::new(CompressionConfig {
            zstd: true,
            zstd_level: 3,
        });
        let value = "a".repeat(4096);
        let bytes = Codec::<String>::encode(&codec, &value).unwrap();
        assert_eq!(bytes[0], StorageFormat::JsonZstd as u8);
        assert!(bytes.len() < value.len());

        let decoded: String = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_ignores_current_compression_setting() {
        let compressed = JsonCodec::new(CompressionConfig {
            zstd: true,
            zstd_level: 1,
        });
        let plain = JsonCodec::default();

        let record = Record {
            id: 7,
            tags: vec!["x".into(), "y".into()],
        };
        let bytes = compressed.encode(&record).unwrap();
        let decoded: Record = plain.decode(&bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_rejects_bad_payloads() {
        let codec = JsonCodec::default();
        assert!(matches!(
            Codec::<String>::decode(&codec, &[]),
            Err(CodecError::Empty)
        ));
        assert!(matches!(
            Codec::<String>::decode(&codec, &[9, b'1']),
            Err(CodecError::UnknownFormat(9))
        ));
        assert!(matches!(
            Codec::<u32>::decode(&codec, &[0, b'x']),
            Err(CodecError::Deserialize(_))
        ));
    }
}
