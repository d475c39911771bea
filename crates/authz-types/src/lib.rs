//! Shared grant, authorization and action types for the delegated dispatch kernel.

pub mod builtins;
pub mod codec;

mod action;
mod authorization;
mod grant;
mod ids;

pub use action::{Action, DispatchRequest, Message};
pub use authorization::{
    Accept, Authorization, AuthorizationError, CountAuthorization, Decision,
    GenericAuthorization, RejectReason, SpendLimitAuthorization,
};
pub use codec::{ContentDigest, CodecError, to_canonical_cbor};
pub use grant::{Grant, GrantKey};
pub use ids::{Principal, Timestamp, TypeTag};
