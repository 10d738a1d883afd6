use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ptolemies_core::{PtolemiesError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Wire format for cached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    Json,
    Binary,
    CompressedJson,
    CompressedBinary,
}

impl Default for SerializationFormat {
    fn default() -> Self {
        SerializationFormat::CompressedJson
    }
}

impl SerializationFormat {
    fn compressible(&self) -> bool {
        matches!(
            self,
            SerializationFormat::CompressedJson | SerializationFormat::CompressedBinary
        )
    }

    fn is_binary(&self) -> bool {
        matches!(
            self,
            SerializationFormat::Binary | SerializationFormat::CompressedBinary
        )
    }
}

/// Value <-> bytes codec with optional gzip compression above a threshold.
///
/// The binary format is bincode; callers storing `serde_json::Value` (or any
/// other self-describing payload) should use one of the JSON formats.
#[derive(Debug, Clone)]
pub struct CacheSerializer {
    format: SerializationFormat,
}

impl CacheSerializer {
    pub fn new(format: SerializationFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Encode `value`, compressing only when the plain encoding is larger
    /// than `compress_threshold` and the configured format allows it.
    /// Returns the bytes and whether compression fired.
    pub fn serialize<T: Serialize>(
        &self,
        value: &T,
        compress_threshold: usize,
    ) -> Result<(Vec<u8>, bool)> {
        let encoded = if self.format.is_binary() {
            bincode::serialize(value)
                .map_err(|e| PtolemiesError::Decode(format!("bincode encode failed: {e}")))?
        } else {
            serde_json::to_vec(value)?
        };

        if self.format.compressible() && encoded.len() > compress_threshold {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&encoded)
                .map_err(|e| PtolemiesError::Decode(format!("gzip encode failed: {e}")))?;
            let compressed = encoder
                .finish()
                .map_err(|e| PtolemiesError::Decode(format!("gzip encode failed: {e}")))?;
            Ok((compressed, true))
        } else {
            Ok((encoded, false))
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8], compressed: bool) -> Result<T> {
        let plain: Vec<u8> = if compressed {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| PtolemiesError::Decode(format!("gzip decode failed: {e}")))?;
            out
        } else {
            bytes.to_vec()
        };

        if self.format.is_binary() {
            bincode::deserialize(&plain)
                .map_err(|e| PtolemiesError::Decode(format!("bincode decode failed: {e}")))
        } else {
            serde_json::from_slice(&plain)
                .map_err(|e| PtolemiesError::Decode(format!("json decode failed: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        values: Vec<u64>,
        nested: BTreeMap<String, String>,
    }

    fn sample() -> Payload {
        let mut nested = BTreeMap::new();
        nested.insert("alpha".into(), "one".into());
        nested.insert("beta".into(), "two".into());
        Payload {
            name: "sample".into(),
            values: vec![1, 2, 3, 42],
            nested,
        }
    }

    #[test]
    fn json_round_trip() {
        let serializer = CacheSerializer::new(SerializationFormat::Json);
        let (bytes, compressed) = serializer.serialize(&sample(), 1024).unwrap();
        assert!(!compressed);
        let back: Payload = serializer.deserialize(&bytes, compressed).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn binary_round_trip() {
        let serializer = CacheSerializer::new(SerializationFormat::Binary);
        let (bytes, compressed) = serializer.serialize(&sample(), 1024).unwrap();
        assert!(!compressed);
        let back: Payload = serializer.deserialize(&bytes, compressed).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn compressed_json_round_trip_fires_over_threshold() {
        let serializer = CacheSerializer::new(SerializationFormat::CompressedJson);
        let big = Payload {
            name: "x".repeat(4000),
            values: vec![7; 256],
            nested: BTreeMap::new(),
        };
        let (bytes, compressed) = serializer.serialize(&big, 1000).unwrap();
        assert!(compressed);
        // Repetitive input compresses well below the plain encoding.
        assert!(bytes.len() < serde_json::to_vec(&big).unwrap().len());
        let back: Payload = serializer.deserialize(&bytes, compressed).unwrap();
        assert_eq!(back, big);
    }

    #[test]
    fn compressed_binary_round_trip() {
        let serializer = CacheSerializer::new(SerializationFormat::CompressedBinary);
        let big = Payload {
            name: "y".repeat(2000),
            values: (0..500).collect(),
            nested: BTreeMap::new(),
        };
        let (bytes, compressed) = serializer.serialize(&big, 500).unwrap();
        assert!(compressed);
        let back: Payload = serializer.deserialize(&bytes, compressed).unwrap();
        assert_eq!(back, big);
    }

    #[test]
    fn small_values_skip_compression() {
        let serializer = CacheSerializer::new(SerializationFormat::CompressedJson);
        let (_, compressed) = serializer.serialize(&sample(), 10_000).unwrap();
        assert!(!compressed);
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let serializer = CacheSerializer::new(SerializationFormat::Json);
        let err = serializer
            .deserialize::<Payload>(b"not json at all", false)
            .unwrap_err();
        assert!(matches!(err, PtolemiesError::Decode(_)));

        let gz_err = serializer
            .deserialize::<Payload>(b"definitely not gzip", true)
            .unwrap_err();
        assert!(matches!(gz_err, PtolemiesError::Decode(_)));
    }

    #[test]
    fn json_value_round_trips_through_json_formats() {
        let serializer = CacheSerializer::new(SerializationFormat::CompressedJson);
        let value = serde_json::json!({"results": [1, 2, 3], "query": "auth"});
        let (bytes, compressed) = serializer.serialize(&value, 8).unwrap();
        let back: serde_json::Value = serializer.deserialize(&bytes, compressed).unwrap();
        assert_eq!(back, value);
    }
}
