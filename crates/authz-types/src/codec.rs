//! Canonical CBOR encoding and stable action digests.

use serde::{Deserialize, Serialize};
use serde_cbor::value::Value as CborValue;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::action::Action;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

/// Encodes a value as self-described CBOR with map keys in canonical order.
///
/// Routing the value through `serde_cbor::Value` sorts struct and map keys,
/// so equal values always produce identical bytes.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let canonical: CborValue = serde_cbor::value::to_value(value)?;
    let mut buf = Vec::with_capacity(128);
    let mut serializer = serde_cbor::ser::Serializer::new(&mut buf);
    serializer.self_describe()?;
    canonical.serialize(&mut serializer)?;
    Ok(buf)
}

/// SHA-256 digest of canonically encoded content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn of_batch(actions: &[Action]) -> Result<Self, CodecError> {
        Ok(Self::of_bytes(&to_canonical_cbor(&actions)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
