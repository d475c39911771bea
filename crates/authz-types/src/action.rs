use serde::{Deserialize, Serialize};

use crate::ids::{Principal, TypeTag};

/// A unit of work submitted for dispatch.
///
/// The signer is derived from the action's own fields, never from the
/// envelope it arrives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Leaf action handed to the router; the payload is opaque here.
    Message(Message),
    /// Nested batch executed as `principal`.
    Dispatch(DispatchRequest),
}

impl Action {
    /// Type tag used by [`DispatchRequest`] for grant matching.
    pub const DISPATCH_TYPE: &'static str = "authz/exec";

    pub fn message(
        signer: impl Into<Principal>,
        type_tag: impl Into<TypeTag>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Action::Message(Message {
            signer: signer.into(),
            type_tag: type_tag.into(),
            payload: payload.into(),
        })
    }

    pub fn dispatch(principal: impl Into<Principal>, actions: Vec<Action>) -> Self {
        Action::Dispatch(DispatchRequest {
            principal: principal.into(),
            actions,
        })
    }

    pub fn signer(&self) -> &Principal {
        match self {
            Action::Message(msg) => &msg.signer,
            Action::Dispatch(req) => &req.principal,
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Action::Message(msg) => msg.type_tag.clone(),
            Action::Dispatch(_) => TypeTag::new(Self::DISPATCH_TYPE),
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Action::Message(msg) => Some(&msg.payload),
            Action::Dispatch(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub signer: Principal,
    pub type_tag: TypeTag,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// An action whose payload is itself a `(principal, batch)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub principal: Principal,
    pub actions: Vec<Action>,
}

impl Drop for DispatchRequest {
    // Unnests onto a heap stack so arbitrarily deep batches drop in constant
    // stack space.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.actions);
        while let Some(action) = pending.pop() {
            if let Action::Dispatch(mut req) = action {
                pending.append(&mut req.actions);
            }
        }
    }
}
