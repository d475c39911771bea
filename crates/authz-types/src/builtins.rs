//! Payload shapes for action kinds the kernel inspects when checking grants.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, to_canonical_cbor};
use crate::ids::Principal;

pub const SEND_TYPE: &str = "bank/send";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u64,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

/// Params carried by a `bank/send` message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendParams {
    pub to: Principal,
    pub amount: Vec<Coin>,
}

impl SendParams {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        to_canonical_cbor(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_cbor::from_slice(bytes)?)
    }
}
