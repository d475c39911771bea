use authz_store::StoreError;
use authz_types::{CodecError, GrantKey, Principal, RejectReason, TypeTag};
use thiserror::Error;

use crate::router::RouterError;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("grant {0} not found")]
    GrantNotFound(GrantKey),
    #[error(
        "action {}: '{grantee}' is not authorized to run '{type_tag}' for '{granter}': {reason}",
        action_path(.path)
    )]
    Unauthorized {
        /// Position of the failing action, one index per nesting level.
        path: Vec<usize>,
        granter: Principal,
        grantee: Principal,
        type_tag: TypeTag,
        reason: RejectReason,
    },
    #[error("empty dispatch batch for '{principal}'")]
    EmptyBatch { principal: Principal },
    #[error("dispatch nesting depth {depth} exceeds limit {max}")]
    RecursionLimitExceeded { depth: u32, max: u32 },
    #[error("action {} ('{type_tag}') failed: {source}", action_path(.path))]
    Router {
        path: Vec<usize>,
        type_tag: TypeTag,
        #[source]
        source: RouterError,
    },
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),
    #[error("journal error: {0}")]
    Journal(String),
    #[error("config error: {0}")]
    Config(String),
}

impl KernelError {
    /// Re-roots an action failure raised inside the nested batch at `index`.
    pub(crate) fn within(mut self, index: usize) -> Self {
        if let KernelError::Unauthorized { path, .. } | KernelError::Router { path, .. } =
            &mut self
        {
            path.insert(0, index);
        }
        self
    }

    /// Path of the failing action from the top-level batch, if the error has one.
    pub fn action_path(&self) -> Option<&[usize]> {
        match self {
            KernelError::Unauthorized { path, .. } | KernelError::Router { path, .. } => Some(path),
            _ => None,
        }
    }
}

fn action_path(path: &[usize]) -> String {
    path.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

impl From<StoreError> for KernelError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidGrant(msg) => KernelError::InvalidGrant(msg),
            StoreError::NotFound(key) => KernelError::GrantNotFound(key),
            other => KernelError::Store(other),
        }
    }
}

impl From<crate::journal::JournalError> for KernelError {
    fn from(err: crate::journal::JournalError) -> Self {
        KernelError::Journal(err.to_string())
    }
}
