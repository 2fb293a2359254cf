//! Versioned, language-neutral patch container.
//!
//! A patch is a JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "block_size": 4096,
//!   "size": 10,
//!   "checksum": "<blake3 hex of the reconstructed file>",
//!   "ops": [
//!     { "op": "copy", "index": 0 },
//!     { "op": "literal", "data": "d29ybGQ=" }
//!   ]
//! }
//! ```
//!
//! `copy` refers to a block of the old file by index, `literal` carries
//! base64 bytes to append.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};

pub const PATCH_VERSION: u32 = 1;

/// One reconstruction instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Copy block `index` of the old file
    Copy { index: usize },
    /// Append literal bytes
    Literal {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

/// Instructions that rebuild a new file from an old one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub version: u32,
    pub block_size: usize,
    /// Length of the reconstructed file
    pub size: u64,
    /// Checksum of the reconstructed file
    pub checksum: String,
    pub ops: Vec<PatchOp>,
}

impl Patch {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SyncError::protocol(format!("encode patch: {}", e)))
    }

    /// Decode a patch body, rejecting versions this build does not speak.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let patch: Patch = serde_json::from_slice(body)
            .map_err(|e| SyncError::protocol(format!("malformed patch: {}", e)))?;

        if patch.version != PATCH_VERSION {
            return Err(SyncError::protocol(format!(
                "unsupported patch version {} (expected {})",
                patch.version, PATCH_VERSION
            )));
        }
        Ok(patch)
    }

    /// Total bytes carried as literals
    pub fn literal_bytes(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                PatchOp::Literal { data } => data.len(),
                PatchOp::Copy { .. } => 0,
            })
            .sum()
    }

    pub fn copy_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, PatchOp::Copy { .. }))
            .count()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Patch {
        Patch {
            version: PATCH_VERSION,
            block_size: 5,
            size: 10,
            checksum: "abc".into(),
            ops: vec![
                PatchOp::Copy { index: 0 },
                PatchOp::Literal {
                    data: b"world".to_vec(),
                },
            ],
        }
    }

    #[test]
    fn test_tagged_json_layout() {
        let json: serde_json::Value = serde_json::from_slice(&sample().to_json().unwrap()).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["ops"][0], serde_json::json!({"op": "copy", "index": 0}));
        assert_eq!(json["ops"][1], serde_json::json!({"op": "literal", "data": "d29ybGQ="}));
    }

    #[test]
    fn test_decode_encoded_patch() {
        let patch = sample();
        assert_eq!(Patch::from_json(&patch.to_json().unwrap()).unwrap(), patch);
        assert_eq!(patch.literal_bytes(), 5);
        assert_eq!(patch.copy_count(), 1);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut patch = sample();
        patch.version = 2;
        let body = serde_json::to_vec(&patch).unwrap();

        assert!(matches!(Patch::from_json(&body), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let body = br#"{"version":1,"block_size":4,"size":0,"checksum":"x","ops":[{"op":"move","index":1}]}"#;
        assert!(Patch::from_json(body).is_err());
    }
}
