//! Grant lookup and authorization decisions for delegated actions.

use authz_store::GrantStore;
use authz_types::{
    Accept, Action, Authorization, Decision, GrantKey, Principal, RejectReason, Timestamp,
};

use crate::error::KernelError;

/// Grant-store side effects produced while checking and consuming grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantEvent {
    Expired { key: GrantKey },
    Updated { key: GrantKey, authorization: Authorization },
    Exhausted { key: GrantKey },
}

/// Decides whether `grantee` may run `action` on behalf of `granter`.
///
/// An expired grant is deleted and reported as [`RejectReason::NoGrant`].
/// No other state changes here; see [`apply`].
pub fn check<S: GrantStore + ?Sized>(
    store: &mut S,
    granter: &Principal,
    grantee: &Principal,
    action: &Action,
    now: Timestamp,
    events: &mut Vec<GrantEvent>,
) -> Result<Decision, KernelError> {
    let key = GrantKey {
        granter: granter.clone(),
        grantee: grantee.clone(),
        type_tag: action.type_tag(),
    };
    if store.delete_expired(&key, now)? {
        events.push(GrantEvent::Expired { key });
        return Ok(Decision::reject(RejectReason::NoGrant));
    }
    let Some(grant) = store.load(&key)? else {
        return Ok(Decision::reject(RejectReason::NoGrant));
    };
    Ok(grant.authorization.accept(action))
}

/// Writes back the outcome of an accepted decision.
pub fn apply<S: GrantStore + ?Sized>(
    store: &mut S,
    key: &GrantKey,
    decision: &Decision,
    events: &mut Vec<GrantEvent>,
) -> Result<(), KernelError> {
    match decision {
        Decision::Accepted { updated: None } => Ok(()),
        Decision::Accepted {
            updated: Some(authorization),
        } => {
            let mut grant = store.get(key)?;
            grant.authorization = authorization.clone();
            store.store(grant)?;
            events.push(GrantEvent::Updated {
                key: key.clone(),
                authorization: authorization.clone(),
            });
            Ok(())
        }
        Decision::AcceptedAndDeleted => {
            store.delete(key)?;
            events.push(GrantEvent::Exhausted { key: key.clone() });
            Ok(())
        }
        Decision::Rejected { reason } => Err(KernelError::InvalidAction(format!(
            "cannot apply rejected decision for {key}: {reason}"
        ))),
    }
}
