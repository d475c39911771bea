//! Bounded execution of (possibly nested) action batches.
//!
//! The dispatcher runs each action in order as the batch principal. An action
//! whose signer is the principal itself needs no grant; any other signer must
//! have granted the principal the action's type. Nested dispatch requests
//! recurse with an explicit depth counter that is checked before descending,
//! so nesting is bounded by configuration rather than by the host stack.
//!
//! The dispatcher never rolls back. Grant updates made for an accepted action
//! stay in the store even if a later action fails; callers that need
//! all-or-nothing semantics run it over a staged store (see
//! [`crate::Kernel::execute`]).

use authz_store::GrantStore;
use authz_types::{Action, Decision, GrantKey, Principal, Timestamp};
use serde::{Deserialize, Serialize};

use crate::checker::{self, GrantEvent};
use crate::error::KernelError;
use crate::router::ActionRouter;

/// Result of one action in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutput {
    Routed(#[serde(with = "serde_bytes")] Vec<u8>),
    Nested(Vec<ActionOutput>),
}

impl ActionOutput {
    /// Router outputs in depth-first, left-to-right order.
    pub fn leaves(outputs: &[ActionOutput]) -> Vec<&[u8]> {
        let mut leaves = Vec::new();
        let mut stack: Vec<&ActionOutput> = outputs.iter().rev().collect();
        while let Some(output) = stack.pop() {
            match output {
                ActionOutput::Routed(bytes) => leaves.push(bytes.as_slice()),
                ActionOutput::Nested(inner) => stack.extend(inner.iter().rev()),
            }
        }
        leaves
    }
}

/// Principal and nesting depth of the batch currently being dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    principal: Principal,
    depth: u32,
}

impl DispatchContext {
    pub fn root(principal: Principal) -> Self {
        Self {
            principal,
            depth: 0,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Context for a nested batch, or an error if it would exceed `max_depth`.
    pub fn descend(&self, principal: Principal, max_depth: u32) -> Result<Self, KernelError> {
        let depth = self.depth.saturating_add(1);
        if depth > max_depth {
            return Err(KernelError::RecursionLimitExceeded {
                depth,
                max: max_depth,
            });
        }
        Ok(Self { principal, depth })
    }
}

/// Rejects empty batches and over-deep nesting before anything executes.
///
/// Walks the tree with an explicit work list, so arbitrarily deep input is
/// rejected without native recursion.
pub fn validate_batch(
    principal: &Principal,
    actions: &[Action],
    max_depth: u32,
) -> Result<(), KernelError> {
    if actions.is_empty() {
        return Err(KernelError::EmptyBatch {
            principal: principal.clone(),
        });
    }
    let mut pending: Vec<(&[Action], u32)> = vec![(actions, 0)];
    while let Some((batch, depth)) = pending.pop() {
        for action in batch {
            if action.signer().is_empty() {
                return Err(KernelError::InvalidAction("action signer is empty".into()));
            }
            let Action::Dispatch(req) = action else {
                continue;
            };
            let next = depth + 1;
            if next > max_depth {
                return Err(KernelError::RecursionLimitExceeded {
                    depth: next,
                    max: max_depth,
                });
            }
            if req.actions.is_empty() {
                return Err(KernelError::EmptyBatch {
                    principal: req.principal.clone(),
                });
            }
            pending.push((&req.actions, next));
        }
    }
    Ok(())
}

pub struct Dispatcher<'a, S: GrantStore + ?Sized, R: ActionRouter + ?Sized> {
    store: &'a mut S,
    router: &'a mut R,
    max_depth: u32,
    now: Timestamp,
    events: Vec<GrantEvent>,
}

impl<'a, S: GrantStore + ?Sized, R: ActionRouter + ?Sized> Dispatcher<'a, S, R> {
    pub fn new(store: &'a mut S, router: &'a mut R, max_depth: u32, now: Timestamp) -> Self {
        Self {
            store,
            router,
            max_depth,
            now,
            events: Vec::new(),
        }
    }

    /// Validates the whole tree, then dispatches it as `principal` at depth 0.
    pub fn execute(
        &mut self,
        principal: &Principal,
        actions: &[Action],
    ) -> Result<Vec<ActionOutput>, KernelError> {
        validate_batch(principal, actions, self.max_depth)?;
        self.dispatch(DispatchContext::root(principal.clone()), actions)
    }

    pub fn dispatch(
        &mut self,
        ctx: DispatchContext,
        actions: &[Action],
    ) -> Result<Vec<ActionOutput>, KernelError> {
        if actions.is_empty() {
            return Err(KernelError::EmptyBatch {
                principal: ctx.principal,
            });
        }
        log::debug!(
            "dispatching {} action(s) as '{}' at depth {}",
            actions.len(),
            ctx.principal,
            ctx.depth
        );

        let mut outputs = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            let signer = action.signer();
            if signer != &ctx.principal {
                self.authorize(index, signer, &ctx.principal, action)?;
            }
            let output = match action {
                Action::Dispatch(req) => {
                    let inner = ctx.descend(req.principal.clone(), self.max_depth)?;
                    let nested = self
                        .dispatch(inner, &req.actions)
                        .map_err(|err| err.within(index))?;
                    ActionOutput::Nested(nested)
                }
                Action::Message(msg) => {
                    let bytes = self.router.route(signer, msg).map_err(|source| {
                        KernelError::Router {
                            path: vec![index],
                            type_tag: msg.type_tag.clone(),
                            source,
                        }
                    })?;
                    ActionOutput::Routed(bytes)
                }
            };
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Grant-store side effects accumulated so far, in the order they happened.
    pub fn events(&self) -> &[GrantEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<GrantEvent> {
        self.events
    }

    fn authorize(
        &mut self,
        index: usize,
        granter: &Principal,
        grantee: &Principal,
        action: &Action,
    ) -> Result<(), KernelError> {
        let decision = checker::check(
            &mut *self.store,
            granter,
            grantee,
            action,
            self.now,
            &mut self.events,
        )?;
        let key = GrantKey {
            granter: granter.clone(),
            grantee: grantee.clone(),
            type_tag: action.type_tag(),
        };
        if let Decision::Rejected { reason } = decision {
            log::debug!("rejected {key} at action {index}: {reason}");
            return Err(KernelError::Unauthorized {
                path: vec![index],
                granter: key.granter,
                grantee: key.grantee,
                type_tag: key.type_tag,
                reason,
            });
        }
        checker::apply(&mut *self.store, &key, &decision, &mut self.events)
    }
}
