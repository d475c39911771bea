use std::path::Path;

use authz_store::{GrantStore, StagedGrantStore};
use authz_types::{
    Action, Authorization, ContentDigest, Grant, GrantKey, Principal, Timestamp, TypeTag,
};

use crate::checker::GrantEvent;
use crate::clock::{Clock, SystemClock};
use crate::config::KernelConfig;
use crate::dispatch::{ActionOutput, Dispatcher, validate_batch};
use crate::error::KernelError;
use crate::journal::{
    ExecCompletedRecord, ExecFailedRecord, FsJournal, GrantKeyRecord, GrantSavedRecord,
    GrantUpdatedRecord, Journal, JournalEntry, JournalError, JournalRecord, MemJournal,
};
use crate::router::ActionRouter;

/// Grant management and transactional batch execution over a grant store.
pub struct Kernel<S: GrantStore, R: ActionRouter> {
    store: S,
    router: R,
    journal: Box<dyn Journal>,
    clock: Box<dyn Clock>,
    config: KernelConfig,
}

pub struct KernelBuilder<S: GrantStore, R: ActionRouter> {
    store: S,
    router: R,
    journal: Box<dyn Journal>,
    clock: Box<dyn Clock>,
    config: KernelConfig,
}

impl<S: GrantStore, R: ActionRouter> KernelBuilder<S, R> {
    pub fn new(store: S, router: R) -> Self {
        Self {
            store,
            router,
            journal: Box::new(MemJournal::new()),
            clock: Box::new(SystemClock),
            config: KernelConfig::default(),
        }
    }

    pub fn with_journal(mut self, journal: Box<dyn Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_fs_journal(mut self, root: impl AsRef<Path>) -> Result<Self, KernelError> {
        self.journal = Box::new(FsJournal::open(root)?);
        Ok(self)
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_dispatch_depth(mut self, depth: u32) -> Self {
        self.config.max_dispatch_depth = depth;
        self
    }

    pub fn build(self) -> Result<Kernel<S, R>, KernelError> {
        self.config.validate()?;
        Ok(Kernel {
            store: self.store,
            router: self.router,
            journal: self.journal,
            clock: self.clock,
            config: self.config,
        })
    }
}

impl<S: GrantStore, R: ActionRouter> Kernel<S, R> {
    /// Creates or replaces the grant for `(granter, grantee, authorization type)`.
    pub fn grant(
        &mut self,
        granter: &Principal,
        grantee: &Principal,
        authorization: Authorization,
        expiration: Option<Timestamp>,
    ) -> Result<Grant, KernelError> {
        let now = self.clock.now();
        let grant = self
            .store
            .save(granter, grantee, authorization, expiration, now)?;
        self.journal
            .append_record(&JournalRecord::GrantSaved(GrantSavedRecord {
                granter: grant.granter.clone(),
                grantee: grant.grantee.clone(),
                authorization: grant.authorization.clone(),
                expiration: grant.expiration,
                now,
            }))?;
        log::info!("granted {}", grant.key());
        Ok(grant)
    }

    pub fn revoke(
        &mut self,
        granter: &Principal,
        grantee: &Principal,
        type_tag: &TypeTag,
    ) -> Result<(), KernelError> {
        let key = GrantKey {
            granter: granter.clone(),
            grantee: grantee.clone(),
            type_tag: type_tag.clone(),
        };
        self.store.delete(&key)?;
        let now = self.clock.now();
        self.journal
            .append_record(&JournalRecord::GrantRevoked(GrantKeyRecord {
                key: key.clone(),
                now,
            }))?;
        log::info!("revoked {key}");
        Ok(())
    }

    /// Runs `actions` as `principal`. Grant changes are committed only if the
    /// whole batch succeeds.
    pub fn execute(
        &mut self,
        principal: &Principal,
        actions: &[Action],
    ) -> Result<Vec<ActionOutput>, KernelError> {
        let now = self.clock.now();
        // Hashing walks the tree recursively, so the shape is checked first.
        if let Err(err) = validate_batch(principal, actions, self.config.max_dispatch_depth) {
            return Err(self.fail(principal, None, Vec::new(), err, now));
        }
        let batch_hash = match ContentDigest::of_batch(actions) {
            Ok(digest) => digest.to_hex(),
            Err(err) => return Err(self.fail(principal, None, Vec::new(), err.into(), now)),
        };

        let mut staged = StagedGrantStore::new(&mut self.store);
        let mut dispatcher = Dispatcher::new(
            &mut staged,
            &mut self.router,
            self.config.max_dispatch_depth,
            now,
        );
        let result = dispatcher.execute(principal, actions);
        let events = dispatcher.into_events();

        let outputs = match result {
            Ok(outputs) => outputs,
            Err(err) => {
                drop(staged);
                return Err(self.fail(principal, Some(batch_hash), events, err, now));
            }
        };

        let leaves = ActionOutput::leaves(&outputs).len();
        let mut records: Vec<JournalRecord> = events
            .into_iter()
            .map(|event| event_record(event, now))
            .collect();
        records.push(JournalRecord::ExecCompleted(ExecCompletedRecord {
            principal: principal.clone(),
            batch_hash: batch_hash.clone(),
            actions: actions.len() as u64,
            leaves: leaves as u64,
            now,
        }));
        let encoded = match records
            .iter()
            .map(|record| Ok((record.kind(), record.encode()?)))
            .collect::<Result<Vec<_>, JournalError>>()
        {
            Ok(encoded) => encoded,
            Err(err) => {
                drop(staged);
                return Err(self.fail(principal, Some(batch_hash), Vec::new(), err.into(), now));
            }
        };

        let writes = match staged.commit() {
            Ok(writes) => writes,
            Err(err) => {
                return Err(self.fail(principal, Some(batch_hash), Vec::new(), err.into(), now));
            }
        };
        // Grant state is final from here on, so journal failures are only logged.
        for (kind, payload) in &encoded {
            if let Err(err) = self.journal.append(JournalEntry::new(*kind, payload)) {
                log::error!("failed to journal committed execute as '{principal}': {err}");
                break;
            }
        }
        log::info!(
            "executed {} action(s) as '{principal}': {leaves} routed, {writes} grant write(s)",
            actions.len()
        );
        Ok(outputs)
    }

    /// Records a failed batch and hands the error back to the caller.
    fn fail(
        &mut self,
        principal: &Principal,
        batch_hash: Option<String>,
        events: Vec<GrantEvent>,
        err: KernelError,
        now: Timestamp,
    ) -> KernelError {
        log::warn!("execute as '{principal}' failed: {err}");
        if let Err(gc_err) = self.remove_expired(events, now) {
            log::error!("failed to remove expired grants: {gc_err}");
        }
        let record = JournalRecord::ExecFailed(ExecFailedRecord {
            principal: principal.clone(),
            batch_hash,
            error: err.to_string(),
            type_tag: failed_type_tag(&err),
            now,
        });
        if let Err(journal_err) = self.journal.append_record(&record) {
            log::error!("failed to journal failed execute: {journal_err}");
        }
        err
    }

    /// Expired grants seen by a failed batch stay deleted even though the
    /// batch's other grant writes are discarded.
    fn remove_expired(
        &mut self,
        events: Vec<GrantEvent>,
        now: Timestamp,
    ) -> Result<(), KernelError> {
        for event in events {
            let GrantEvent::Expired { key } = event else {
                continue;
            };
            if self.store.delete_expired(&key, now)? {
                self.journal
                    .append_record(&JournalRecord::GrantExpired(GrantKeyRecord { key, now }))?;
            }
        }
        Ok(())
    }

    /// The live grant at `key`, if any.
    pub fn query_grant(&self, key: &GrantKey) -> Result<Option<Grant>, KernelError> {
        let now = self.clock.now();
        Ok(self.store.load(key)?.filter(|grant| !grant.is_expired(now)))
    }

    /// Live grants from `granter` to `grantee`, optionally narrowed to one type.
    pub fn grants(
        &self,
        granter: &Principal,
        grantee: &Principal,
        type_tag: Option<&TypeTag>,
    ) -> Result<Vec<Grant>, KernelError> {
        if let Some(type_tag) = type_tag {
            let key = GrantKey {
                granter: granter.clone(),
                grantee: grantee.clone(),
                type_tag: type_tag.clone(),
            };
            return Ok(self.query_grant(&key)?.into_iter().collect());
        }
        let now = self.clock.now();
        Ok(self
            .store
            .scan_granter(granter)?
            .into_iter()
            .filter(|grant| &grant.grantee == grantee && !grant.is_expired(now))
            .collect())
    }

    pub fn granter_grants(&self, granter: &Principal) -> Result<Vec<Grant>, KernelError> {
        let now = self.clock.now();
        Ok(self
            .store
            .scan_granter(granter)?
            .into_iter()
            .filter(|grant| !grant.is_expired(now))
            .collect())
    }

    pub fn grantee_grants(&self, grantee: &Principal) -> Result<Vec<Grant>, KernelError> {
        let now = self.clock.now();
        Ok(self
            .store
            .scan_all()?
            .into_iter()
            .filter(|grant| &grant.grantee == grantee && !grant.is_expired(now))
            .collect())
    }

    /// Removes up to `prune_limit` expired grants, oldest expiration first.
    pub fn prune_expired(&mut self) -> Result<usize, KernelError> {
        let now = self.clock.now();
        let mut pruned = 0;
        for key in self.store.expired(now, self.config.prune_limit)? {
            if self.store.remove(&key)?.is_none() {
                continue;
            }
            self.journal
                .append_record(&JournalRecord::GrantPruned(GrantKeyRecord { key, now }))?;
            pruned += 1;
        }
        if pruned > 0 {
            log::info!("pruned {pruned} expired grant(s)");
        }
        Ok(pruned)
    }

    pub fn journal_records(&self) -> Result<Vec<JournalRecord>, KernelError> {
        Ok(self.journal.load_records(0)?)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut R {
        &mut self.router
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

fn event_record(event: GrantEvent, now: Timestamp) -> JournalRecord {
    match event {
        GrantEvent::Expired { key } => JournalRecord::GrantExpired(GrantKeyRecord { key, now }),
        GrantEvent::Exhausted { key } => {
            JournalRecord::GrantExhausted(GrantKeyRecord { key, now })
        }
        GrantEvent::Updated { key, authorization } => {
            JournalRecord::GrantUpdated(GrantUpdatedRecord {
                key,
                authorization,
                now,
            })
        }
    }
}

fn failed_type_tag(err: &KernelError) -> Option<TypeTag> {
    match err {
        KernelError::Unauthorized { type_tag, .. } | KernelError::Router { type_tag, .. } => {
            Some(type_tag.clone())
        }
        _ => None,
    }
}
