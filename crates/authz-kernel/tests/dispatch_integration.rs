//! Nested and delegated batch execution through the kernel facade.

#[path = "helpers.rs"]
mod helpers;

use anyhow::Result;
use authz_kernel::journal::JournalRecord;
use authz_kernel::{ActionOutput, KernelBuilder, KernelError};
use authz_store::{GrantStore, MemGrantStore};
use authz_types::builtins::{Coin, SEND_TYPE};
use authz_types::{Action, Authorization, GrantKey, RejectReason, TypeTag};
use helpers::{ECHO_TYPE, Ledger, clock_at, echo, kernel, nest, p, send};

#[test]
fn depth_beyond_limit_fails_before_any_routing() -> Result<()> {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    let batch = nest("bob", 17, vec![echo("bob", 1)]);

    let err = kernel.execute(&p("bob"), &batch).unwrap_err();
    assert!(matches!(
        err,
        KernelError::RecursionLimitExceeded { depth: 17, max: 16 }
    ));
    assert!(ledger.calls().is_empty());
    assert!(matches!(
        kernel.journal_records()?.last(),
        Some(JournalRecord::ExecFailed(_))
    ));
    Ok(())
}

#[test]
fn very_deep_batch_is_rejected_before_hashing() -> Result<()> {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    let batch = nest("bob", 20_000, vec![echo("bob", 1)]);

    let err = kernel.execute(&p("bob"), &batch).unwrap_err();
    assert!(matches!(
        err,
        KernelError::RecursionLimitExceeded { depth: 17, max: 16 }
    ));
    assert!(ledger.calls().is_empty());
    assert!(matches!(
        kernel.journal_records()?.last(),
        Some(JournalRecord::ExecFailed(failed)) if failed.batch_hash.is_none()
    ));
    Ok(())
}

#[test]
fn failure_in_nested_batch_reports_full_path() -> Result<()> {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    kernel.grant(
        &p("alice"),
        &p("bob"),
        Authorization::generic(Action::DISPATCH_TYPE),
        None,
    )?;
    // alice's nested batch tries to act for carol without a grant.
    let batch = vec![
        echo("bob", 1),
        Action::dispatch("alice", vec![echo("alice", 2), echo("carol", 3)]),
    ];

    let err = kernel.execute(&p("bob"), &batch).unwrap_err();
    assert_eq!(err.action_path(), Some(&[1, 1][..]));
    assert!(err.to_string().starts_with("action 1.1:"), "{err}");
    assert!(matches!(
        err,
        KernelError::Unauthorized { ref grantee, .. } if grantee == &p("alice")
    ));
    assert_eq!(ledger.calls().len(), 2);
    Ok(())
}

#[test]
fn depth_twenty_is_rejected_with_default_limit() {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    // A routable leaf at the top level must not run either.
    let mut batch = vec![echo("bob", 0)];
    batch.extend(nest("bob", 20, vec![echo("bob", 1)]));

    let err = kernel.execute(&p("bob"), &batch).unwrap_err();
    assert!(matches!(err, KernelError::RecursionLimitExceeded { .. }));
    assert!(ledger.calls().is_empty());
}

#[test]
fn depth_at_limit_routes_each_leaf_once_in_order() -> Result<()> {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    let mut batch = vec![echo("bob", 1)];
    batch.extend(nest("bob", 16, vec![echo("bob", 2), echo("bob", 3)]));
    batch.push(echo("bob", 4));

    let outputs = kernel.execute(&p("bob"), &batch)?;
    let leaves: Vec<u8> = ActionOutput::leaves(&outputs)
        .into_iter()
        .map(|bytes| bytes[0])
        .collect();
    assert_eq!(leaves, vec![1, 2, 3, 4]);
    assert_eq!(ledger.calls().len(), 4);
    assert!(matches!(
        kernel.journal_records()?.last(),
        Some(JournalRecord::ExecCompleted(done)) if done.leaves == 4 && done.actions == 3
    ));
    Ok(())
}

#[test]
fn configured_depth_limit_is_honored() -> Result<()> {
    let ledger = Ledger::new();
    let mut kernel = KernelBuilder::new(MemGrantStore::new(), ledger.router())
        .with_clock(clock_at(1))
        .with_max_dispatch_depth(2)
        .build()?;

    kernel.execute(&p("bob"), &nest("bob", 2, vec![echo("bob", 1)]))?;
    let err = kernel
        .execute(&p("bob"), &nest("bob", 3, vec![echo("bob", 1)]))
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::RecursionLimitExceeded { depth: 3, max: 2 }
    ));
    assert_eq!(ledger.calls().len(), 1);
    Ok(())
}

#[test]
fn empty_batches_are_rejected() {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));

    let err = kernel.execute(&p("bob"), &[]).unwrap_err();
    assert!(matches!(err, KernelError::EmptyBatch { .. }));

    let nested_empty = vec![echo("bob", 1), Action::dispatch("bob", vec![])];
    let err = kernel.execute(&p("bob"), &nested_empty).unwrap_err();
    assert!(matches!(err, KernelError::EmptyBatch { .. }));
    assert!(ledger.calls().is_empty());
}

#[test]
fn self_signed_send_needs_no_grant() -> Result<()> {
    let ledger = Ledger::new();
    ledger.fund("bob", 10);
    let mut kernel = kernel(&ledger, &clock_at(1));

    kernel.execute(&p("bob"), &[send("bob", "carol", 4)])?;
    assert_eq!(ledger.balance("bob"), 6);
    assert_eq!(ledger.balance("carol"), 4);
    Ok(())
}

#[test]
fn delegated_send_consumes_spend_limit() -> Result<()> {
    let ledger = Ledger::new();
    ledger.fund("alice", 100);
    let mut kernel = kernel(&ledger, &clock_at(1));
    kernel.grant(
        &p("alice"),
        &p("bob"),
        Authorization::spend_limit(vec![Coin::new("stake", 50)]),
        None,
    )?;
    let key = GrantKey::new("alice", "bob", SEND_TYPE);

    kernel.execute(&p("bob"), &[send("alice", "carol", 30)])?;
    assert_eq!(ledger.balance("alice"), 70);
    assert_eq!(ledger.balance("carol"), 30);
    assert_eq!(
        kernel.query_grant(&key)?.map(|grant| grant.authorization),
        Some(Authorization::spend_limit(vec![Coin::new("stake", 20)]))
    );

    let err = kernel
        .execute(&p("bob"), &[send("alice", "carol", 30)])
        .unwrap_err();
    match err {
        KernelError::Unauthorized {
            ref path,
            reason: RejectReason::SpendLimitExceeded {
                requested: 30,
                remaining: 20,
                ..
            },
            ..
        } => assert_eq!(path, &[0]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ledger.balance("alice"), 70);

    kernel.execute(&p("bob"), &[send("alice", "carol", 20)])?;
    assert_eq!(ledger.balance("carol"), 50);
    assert!(kernel.query_grant(&key)?.is_none());
    let records = kernel.journal_records()?;
    assert!(records.iter().any(
        |record| matches!(record, JournalRecord::GrantExhausted(exhausted) if exhausted.key == key)
    ));
    Ok(())
}

#[test]
fn generic_grant_is_reusable() -> Result<()> {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    kernel.grant(&p("alice"), &p("bob"), Authorization::generic(ECHO_TYPE), None)?;

    for byte in 0..3 {
        kernel.execute(&p("bob"), &[echo("alice", byte)])?;
    }
    assert_eq!(ledger.calls().len(), 3);
    assert!(ledger.calls().iter().all(|(signer, _)| signer == &p("alice")));
    assert_eq!(kernel.grants(&p("alice"), &p("bob"), None)?.len(), 1);
    Ok(())
}

#[test]
fn missing_grant_rejects_with_path() {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    let batch = vec![echo("bob", 1), echo("alice", 2)];

    let err = kernel.execute(&p("bob"), &batch).unwrap_err();
    match err {
        KernelError::Unauthorized {
            path,
            granter,
            grantee,
            type_tag,
            reason,
        } => {
            assert_eq!(path, vec![1]);
            assert_eq!(granter, p("alice"));
            assert_eq!(grantee, p("bob"));
            assert_eq!(type_tag, TypeTag::new(ECHO_TYPE));
            assert_eq!(reason, RejectReason::NoGrant);
        }
        other => panic!("unexpected error: {other}"),
    }
    // The first action ran; no rollback of routed effects is attempted.
    assert_eq!(ledger.calls().len(), 1);
}

#[test]
fn nested_dispatch_as_another_principal_needs_exec_grant() -> Result<()> {
    let ledger = Ledger::new();
    ledger.fund("alice", 10);
    let mut kernel = kernel(&ledger, &clock_at(1));
    let batch = vec![Action::dispatch("alice", vec![send("alice", "carol", 5)])];

    let err = kernel.execute(&p("bob"), &batch).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Unauthorized { ref type_tag, .. } if type_tag.as_str() == Action::DISPATCH_TYPE
    ));
    assert_eq!(ledger.balance("alice"), 10);

    kernel.grant(
        &p("alice"),
        &p("bob"),
        Authorization::generic(Action::DISPATCH_TYPE),
        None,
    )?;
    let outputs = kernel.execute(&p("bob"), &batch)?;
    assert!(matches!(outputs.as_slice(), [ActionOutput::Nested(inner)] if inner.len() == 1));
    assert_eq!(ledger.balance("alice"), 5);
    assert_eq!(ledger.balance("carol"), 5);
    Ok(())
}

#[test]
fn failed_batch_rolls_back_grant_consumption() -> Result<()> {
    let ledger = Ledger::new();
    let mut kernel = kernel(&ledger, &clock_at(1));
    kernel.grant(&p("alice"), &p("bob"), Authorization::count(ECHO_TYPE, 2), None)?;
    let key = GrantKey::new("alice", "bob", ECHO_TYPE);
    // bob has no funds, so the second action fails in the router.
    let batch = vec![echo("alice", 1), send("bob", "carol", 1)];

    let err = kernel.execute(&p("bob"), &batch).unwrap_err();
    assert!(matches!(err, KernelError::Router { ref path, .. } if path == &[1]));
    assert_eq!(
        kernel.store().get(&key)?.authorization,
        Authorization::count(ECHO_TYPE, 2)
    );
    let records = kernel.journal_records()?;
    assert!(
        !records
            .iter()
            .any(|record| matches!(record, JournalRecord::GrantUpdated(_)))
    );

    kernel.execute(&p("bob"), &[echo("alice", 2)])?;
    assert_eq!(
        kernel.store().get(&key)?.authorization,
        Authorization::count(ECHO_TYPE, 1)
    );
    kernel.execute(&p("bob"), &[echo("alice", 3)])?;
    assert!(kernel.store().load(&key)?.is_none());
    Ok(())
}
