use serde::{Deserialize, Serialize};
use std::fmt;

use crate::authorization::{Accept, Authorization};
use crate::ids::{Principal, Timestamp, TypeTag};

/// Identity of a grant. At most one grant exists per key.
///
/// Field order matters: keys sort by granter first so stores can answer
/// granter-prefix queries from an ordered map.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantKey {
    pub granter: Principal,
    pub grantee: Principal,
    pub type_tag: TypeTag,
}

impl GrantKey {
    pub fn new(
        granter: impl Into<Principal>,
        grantee: impl Into<Principal>,
        type_tag: impl Into<TypeTag>,
    ) -> Self {
        Self {
            granter: granter.into(),
            grantee: grantee.into(),
            type_tag: type_tag.into(),
        }
    }
}

impl fmt::Display for GrantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}/{}", self.granter, self.grantee, self.type_tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub granter: Principal,
    pub grantee: Principal,
    pub authorization: Authorization,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<Timestamp>,
}

impl Grant {
    pub fn key(&self) -> GrantKey {
        GrantKey {
            granter: self.granter.clone(),
            grantee: self.grantee.clone(),
            type_tag: self.authorization.type_tag(),
        }
    }

    /// A grant whose expiration is at or before `now` is treated as absent.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expiration, Some(exp) if exp <= now)
    }
}
