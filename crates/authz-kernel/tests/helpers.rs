//! Shared fixtures for kernel integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! look unused from a given test file.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use authz_kernel::{HandlerRouter, Kernel, KernelBuilder, ManualClock, RouterError};
use authz_store::{GrantStore, MemGrantStore};
use authz_types::builtins::{Coin, SEND_TYPE, SendParams};
use authz_types::{Action, Message, Principal, Timestamp, TypeTag};

pub const ECHO_TYPE: &str = "test/echo";
pub const DENOM: &str = "stake";

pub fn p(name: &str) -> Principal {
    Principal::new(name)
}

/// Toy bank: balances per (account, denom) plus a log of every routed call.
#[derive(Clone, Default)]
pub struct Ledger {
    balances: Arc<Mutex<BTreeMap<(Principal, String), u64>>>,
    calls: Arc<Mutex<Vec<(Principal, TypeTag)>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, who: &str, amount: u64) {
        *self
            .balances
            .lock()
            .unwrap()
            .entry((p(who), DENOM.to_string()))
            .or_default() += amount;
    }

    pub fn balance(&self, who: &str) -> u64 {
        self.balances
            .lock()
            .unwrap()
            .get(&(p(who), DENOM.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<(Principal, TypeTag)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn router(&self) -> HandlerRouter {
        let bank = self.clone();
        let echo = self.clone();
        HandlerRouter::new()
            .with_handler(SEND_TYPE, move |signer: &Principal, msg: &Message| {
                bank.send(signer, msg)
            })
            .with_handler(ECHO_TYPE, move |signer: &Principal, msg: &Message| {
                echo.record(signer, msg);
                Ok::<_, RouterError>(msg.payload.clone())
            })
    }

    fn record(&self, signer: &Principal, msg: &Message) {
        self.calls
            .lock()
            .unwrap()
            .push((signer.clone(), msg.type_tag.clone()));
    }

    fn send(&self, signer: &Principal, msg: &Message) -> Result<Vec<u8>, RouterError> {
        self.record(signer, msg);
        let params = SendParams::decode(&msg.payload)
            .map_err(|err| RouterError::Rejected(err.to_string()))?;
        let mut balances = self.balances.lock().unwrap();
        for coin in &params.amount {
            let have = balances
                .get(&(signer.clone(), coin.denom.clone()))
                .copied()
                .unwrap_or(0);
            if have < coin.amount {
                return Err(RouterError::Rejected(format!(
                    "insufficient {}: have {have}, need {}",
                    coin.denom, coin.amount
                )));
            }
        }
        for coin in &params.amount {
            *balances
                .entry((signer.clone(), coin.denom.clone()))
                .or_default() -= coin.amount;
            *balances
                .entry((params.to.clone(), coin.denom.clone()))
                .or_default() += coin.amount;
        }
        Ok(Vec::new())
    }
}

pub fn send(from: &str, to: &str, amount: u64) -> Action {
    let payload = SendParams {
        to: p(to),
        amount: vec![Coin::new(DENOM, amount)],
    }
    .encode()
    .unwrap();
    Action::message(from, SEND_TYPE, payload)
}

pub fn echo(signer: &str, byte: u8) -> Action {
    Action::message(signer, ECHO_TYPE, vec![byte])
}

/// Wraps `leaves` in `levels` dispatch requests, all as `principal`.
pub fn nest(principal: &str, levels: u32, leaves: Vec<Action>) -> Vec<Action> {
    let mut batch = leaves;
    for _ in 0..levels {
        batch = vec![Action::dispatch(principal, batch)];
    }
    batch
}

pub fn kernel(ledger: &Ledger, clock: &ManualClock) -> Kernel<MemGrantStore, HandlerRouter> {
    kernel_with(MemGrantStore::new(), ledger, clock)
}

pub fn kernel_with<S: GrantStore>(
    store: S,
    ledger: &Ledger,
    clock: &ManualClock,
) -> Kernel<S, HandlerRouter> {
    KernelBuilder::new(store, ledger.router())
        .with_clock(clock.clone())
        .build()
        .unwrap()
}

pub fn clock_at(secs: u64) -> ManualClock {
    ManualClock::new(Timestamp::from_secs(secs))
}
