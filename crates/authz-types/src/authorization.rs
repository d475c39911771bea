//! Capability descriptors carried by grants and their accept logic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::action::Action;
use crate::builtins::{Coin, SEND_TYPE, SendParams};
use crate::ids::{Principal, TypeTag};

/// Outcome of asking an authorization whether it permits an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Allowed. When `updated` is present the stored authorization must be
    /// replaced with it before the action runs.
    Accepted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated: Option<Authorization>,
    },
    /// Allowed, and the grant is spent.
    AcceptedAndDeleted,
    Rejected { reason: RejectReason },
}

impl Decision {
    pub fn accept() -> Self {
        Decision::Accepted { updated: None }
    }

    pub fn reject(reason: RejectReason) -> Self {
        Decision::Rejected { reason }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, Decision::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    NoGrant,
    TypeMismatch { expected: TypeTag, found: TypeTag },
    MalformedPayload { detail: String },
    RecipientNotAllowed { recipient: Principal },
    SpendLimitExceeded { denom: String, requested: u64, remaining: u64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoGrant => f.write_str("no grant"),
            RejectReason::TypeMismatch { expected, found } => {
                write!(f, "authorization covers '{expected}', action is '{found}'")
            }
            RejectReason::MalformedPayload { detail } => write!(f, "malformed payload: {detail}"),
            RejectReason::RecipientNotAllowed { recipient } => {
                write!(f, "recipient '{recipient}' not in allow list")
            }
            RejectReason::SpendLimitExceeded {
                denom,
                requested,
                remaining,
            } => write!(
                f,
                "spend limit exceeded for {denom} ({requested} > {remaining})"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("authorization type tag must not be empty")]
    EmptyTypeTag,
    #[error("spend limit must not be empty")]
    EmptySpendLimit,
    #[error("spend limit for '{0}' must be positive")]
    ZeroSpendLimit(String),
    #[error("duplicate denomination '{0}' in spend limit")]
    DuplicateDenom(String),
    #[error("count authorization must allow at least one use")]
    ZeroCount,
}

/// Uniform capability implemented by every authorization variant.
///
/// New variants plug in here; the dispatcher only ever sees [`Decision`].
pub trait Accept {
    fn type_tag(&self) -> TypeTag;
    fn accept(&self, action: &Action) -> Decision;
    fn validate(&self) -> Result<(), AuthorizationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericAuthorization {
    pub type_tag: TypeTag,
}

impl Accept for GenericAuthorization {
    fn type_tag(&self) -> TypeTag {
        self.type_tag.clone()
    }

    fn accept(&self, _action: &Action) -> Decision {
        Decision::accept()
    }

    fn validate(&self) -> Result<(), AuthorizationError> {
        if self.type_tag.is_empty() {
            return Err(AuthorizationError::EmptyTypeTag);
        }
        Ok(())
    }
}

/// Bounded `bank/send` allowance, decremented on every accepted send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendLimitAuthorization {
    pub spend_limit: Vec<Coin>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_list: Vec<Principal>,
}

impl Accept for SpendLimitAuthorization {
    fn type_tag(&self) -> TypeTag {
        TypeTag::new(SEND_TYPE)
    }

    fn accept(&self, action: &Action) -> Decision {
        let Some(payload) = action.payload() else {
            return Decision::reject(RejectReason::TypeMismatch {
                expected: self.type_tag(),
                found: action.type_tag(),
            });
        };
        let params = match SendParams::decode(payload) {
            Ok(params) => params,
            Err(err) => {
                return Decision::reject(RejectReason::MalformedPayload {
                    detail: err.to_string(),
                });
            }
        };
        if !self.allow_list.is_empty() && !self.allow_list.contains(&params.to) {
            return Decision::reject(RejectReason::RecipientNotAllowed {
                recipient: params.to,
            });
        }

        let mut remaining = self.spend_limit.clone();
        for coin in &params.amount {
            let Some(slot) = remaining.iter_mut().find(|c| c.denom == coin.denom) else {
                return Decision::reject(RejectReason::SpendLimitExceeded {
                    denom: coin.denom.clone(),
                    requested: coin.amount,
                    remaining: 0,
                });
            };
            if coin.amount > slot.amount {
                return Decision::reject(RejectReason::SpendLimitExceeded {
                    denom: coin.denom.clone(),
                    requested: coin.amount,
                    remaining: slot.amount,
                });
            }
            slot.amount -= coin.amount;
        }
        remaining.retain(|c| c.amount > 0);

        if remaining.is_empty() {
            return Decision::AcceptedAndDeleted;
        }
        Decision::Accepted {
            updated: Some(Authorization::SpendLimit(SpendLimitAuthorization {
                spend_limit: remaining,
                allow_list: self.allow_list.clone(),
            })),
        }
    }

    fn validate(&self) -> Result<(), AuthorizationError> {
        if self.spend_limit.is_empty() {
            return Err(AuthorizationError::EmptySpendLimit);
        }
        let mut seen = BTreeSet::new();
        for coin in &self.spend_limit {
            if coin.amount == 0 {
                return Err(AuthorizationError::ZeroSpendLimit(coin.denom.clone()));
            }
            if !seen.insert(coin.denom.as_str()) {
                return Err(AuthorizationError::DuplicateDenom(coin.denom.clone()));
            }
        }
        Ok(())
    }
}

/// Allows a fixed number of actions of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAuthorization {
    pub type_tag: TypeTag,
    pub remaining: u32,
}

impl Accept for CountAuthorization {
    fn type_tag(&self) -> TypeTag {
        self.type_tag.clone()
    }

    fn accept(&self, _action: &Action) -> Decision {
        match self.remaining {
            0 | 1 => Decision::AcceptedAndDeleted,
            n => Decision::Accepted {
                updated: Some(Authorization::Count(CountAuthorization {
                    type_tag: self.type_tag.clone(),
                    remaining: n - 1,
                })),
            },
        }
    }

    fn validate(&self) -> Result<(), AuthorizationError> {
        if self.type_tag.is_empty() {
            return Err(AuthorizationError::EmptyTypeTag);
        }
        if self.remaining == 0 {
            return Err(AuthorizationError::ZeroCount);
        }
        Ok(())
    }
}

/// Tagged set of known authorization variants, as persisted in a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authorization {
    Generic(GenericAuthorization),
    SpendLimit(SpendLimitAuthorization),
    Count(CountAuthorization),
}

impl Authorization {
    pub fn generic(type_tag: impl Into<TypeTag>) -> Self {
        Authorization::Generic(GenericAuthorization {
            type_tag: type_tag.into(),
        })
    }

    pub fn spend_limit(spend_limit: Vec<Coin>) -> Self {
        Authorization::SpendLimit(SpendLimitAuthorization {
            spend_limit,
            allow_list: Vec::new(),
        })
    }

    pub fn count(type_tag: impl Into<TypeTag>, remaining: u32) -> Self {
        Authorization::Count(CountAuthorization {
            type_tag: type_tag.into(),
            remaining,
        })
    }

    fn inner(&self) -> &dyn Accept {
        match self {
            Authorization::Generic(auth) => auth,
            Authorization::SpendLimit(auth) => auth,
            Authorization::Count(auth) => auth,
        }
    }
}

impl Accept for Authorization {
    fn type_tag(&self) -> TypeTag {
        self.inner().type_tag()
    }

    fn accept(&self, action: &Action) -> Decision {
        let found = action.type_tag();
        let expected = self.type_tag();
        if found != expected {
            return Decision::reject(RejectReason::TypeMismatch { expected, found });
        }
        self.inner().accept(action)
    }

    fn validate(&self) -> Result<(), AuthorizationError> {
        self.inner().validate()
    }
}
