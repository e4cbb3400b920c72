//! Blob codec: a single, self-describing serialization format shared by
//! every object the workspace writes to the object store — task
//! envelopes, statuses, manifests, and results.
//!
//! The format is MessagePack (`rmp-serde`), chosen over JSON for the same
//! reason the teacher reaches for binary formats at storage boundaries:
//! compact framing and native byte-string support, which a `Value::Bytes`
//! or `Value::Opaque` payload needs without base64 inflation.

mod value;

pub use value::Value;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Encode any serializable value into the blob wire format.
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a blob previously produced by [`encode`]. `decode(encode(x)) ==
/// x` for every `x` representable in `T` (property P5).
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
        tags: Vec<String>,
    }

    #[test]
    fn round_trips_structs() {
        let s = Sample {
            name: "wave".into(),
            count: 3,
            tags: vec!["a".into(), "b".into()],
        };
        let bytes = encode(&s).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn decode_garbage_errors_instead_of_panicking() {
        let err = decode::<Sample>(&[0xff, 0x00, 0x01]);
        assert!(err.is_err());
    }
}
