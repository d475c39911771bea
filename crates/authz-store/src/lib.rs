//! Grant storage: the store contract plus in-memory, filesystem and staged backends.

mod fs_store;
mod mem_store;
mod staged;

pub use fs_store::FsGrantStore;
pub use mem_store::MemGrantStore;
pub use staged::StagedGrantStore;

use authz_types::{Accept, Authorization, CodecError, Grant, GrantKey, Principal, Timestamp};
use std::{io, path::PathBuf};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("grant {0} not found")]
    NotFound(GrantKey),
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),
    #[error("corrupt grant record at {path:?}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Persistent mapping from `(granter, grantee, type_tag)` to a [`Grant`].
///
/// Backends implement the raw accessors; `save`, `get`, `delete` and
/// `delete_expired` are shared so every backend validates the same way.
pub trait GrantStore: Send {
    fn load(&self, key: &GrantKey) -> StoreResult<Option<Grant>>;

    /// Inserts or overwrites the grant at `grant.key()` without validation.
    fn store(&mut self, grant: Grant) -> StoreResult<()>;

    fn remove(&mut self, key: &GrantKey) -> StoreResult<Option<Grant>>;

    /// Grants issued by `granter`, ordered by key.
    fn scan_granter(&self, granter: &Principal) -> StoreResult<Vec<Grant>>;

    fn scan_all(&self) -> StoreResult<Vec<Grant>>;

    /// Up to `limit` keys whose expiration is at or before `now`, oldest first.
    fn expired(&self, now: Timestamp, limit: usize) -> StoreResult<Vec<GrantKey>>;

    fn save(
        &mut self,
        granter: &Principal,
        grantee: &Principal,
        authorization: Authorization,
        expiration: Option<Timestamp>,
        now: Timestamp,
    ) -> StoreResult<Grant> {
        if granter.is_empty() || grantee.is_empty() {
            return Err(StoreError::InvalidGrant("principal must not be empty".into()));
        }
        if granter == grantee {
            return Err(StoreError::InvalidGrant(format!(
                "granter and grantee are both '{granter}'"
            )));
        }
        if let Some(exp) = expiration {
            if exp <= now {
                return Err(StoreError::InvalidGrant(format!(
                    "expiration {exp} is not after {now}"
                )));
            }
        }
        authorization
            .validate()
            .map_err(|err| StoreError::InvalidGrant(err.to_string()))?;
        let grant = Grant {
            granter: granter.clone(),
            grantee: grantee.clone(),
            authorization,
            expiration,
        };
        self.store(grant.clone())?;
        Ok(grant)
    }

    fn get(&self, key: &GrantKey) -> StoreResult<Grant> {
        self.load(key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn delete(&mut self, key: &GrantKey) -> StoreResult<()> {
        match self.remove(key)? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    /// Deletes the grant at `key` if it expired at or before `now`.
    fn delete_expired(&mut self, key: &GrantKey, now: Timestamp) -> StoreResult<bool> {
        match self.load(key)? {
            Some(grant) if grant.is_expired(now) => {
                self.remove(key)?;
                log::debug!("garbage-collected expired grant {key}");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}
