//! Metadata payload encoding
//!
//! Metadata is stored as a JSON object of string values. Decoding is lenient:
//! an empty or malformed payload reads back as absent metadata, so one bad
//! value never aborts a discovery read.

use crate::node::Metadata;
use crate::observability::{events, metrics};

/// Encode metadata as the value stored under a node key.
///
/// Absent or empty metadata encodes to an empty payload.
pub fn encode(metadata: Option<&Metadata>) -> Vec<u8> {
    match metadata {
        Some(m) if !m.is_empty() => serde_json::to_vec(m).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Decode a stored payload back into metadata
pub fn decode(payload: &[u8]) -> Option<Metadata> {
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_slice::<Metadata>(payload) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            events::metadata_decode_failed(payload.len(), &e.to_string());
            metrics::record_decode_failure();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert("addr".to_string(), "10.0.0.1:9000".to_string());
        metadata.insert("version".to_string(), "1.2.0".to_string());
        metadata.insert("zone/rack".to_string(), "a \"quoted\" ü".to_string());

        let payload = encode(Some(&metadata));
        assert!(!payload.is_empty());
        assert_eq!(decode(&payload), Some(metadata));
    }

    #[test]
    fn test_absent_and_empty_encode_to_nothing() {
        assert!(encode(None).is_empty());
        assert!(encode(Some(&Metadata::new())).is_empty());
        assert_eq!(decode(&encode(None)), None);
        assert_eq!(decode(&encode(Some(&Metadata::new()))), None);
    }

    #[test]
    fn test_malformed_payload_reads_as_absent() {
        assert_eq!(decode(b"not json"), None);
        assert_eq!(decode(b"{\"addr\":"), None);
        assert_eq!(decode(b"[1,2,3]"), None);
        assert_eq!(decode(b"{\"port\":9000}"), None);
        assert_eq!(decode(b"null"), None);
        assert_eq!(decode(&[0xff, 0xfe, 0x00]), None);
    }

    #[test]
    fn test_empty_object_decodes_to_empty_map() {
        assert_eq!(decode(b"{}"), Some(Metadata::new()));
    }
}
