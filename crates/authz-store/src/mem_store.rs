use crate::{GrantStore, StoreResult};
use authz_types::{Grant, GrantKey, Principal, Timestamp, TypeTag};
use std::collections::{BTreeMap, BTreeSet};

/// Ordered in-memory grant store with an expiration queue.
#[derive(Debug, Clone, Default)]
pub struct MemGrantStore {
    grants: BTreeMap<GrantKey, Grant>,
    queue: BTreeSet<(Timestamp, GrantKey)>,
}

impl MemGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub(crate) fn insert(&mut self, grant: Grant) -> Option<Grant> {
        let key = grant.key();
        if let Some(exp) = grant.expiration {
            self.queue.insert((exp, key.clone()));
        }
        let prev = self.grants.insert(key.clone(), grant);
        if let Some(old_exp) = prev.as_ref().and_then(|g| g.expiration) {
            let still_queued = self
                .grants
                .get(&key)
                .and_then(|g| g.expiration)
                .is_some_and(|exp| exp == old_exp);
            if !still_queued {
                self.queue.remove(&(old_exp, key));
            }
        }
        prev
    }

    pub(crate) fn take(&mut self, key: &GrantKey) -> Option<Grant> {
        let prev = self.grants.remove(key)?;
        if let Some(exp) = prev.expiration {
            self.queue.remove(&(exp, key.clone()));
        }
        Some(prev)
    }
}

impl GrantStore for MemGrantStore {
    fn load(&self, key: &GrantKey) -> StoreResult<Option<Grant>> {
        Ok(self.grants.get(key).cloned())
    }

    fn store(&mut self, grant: Grant) -> StoreResult<()> {
        self.insert(grant);
        Ok(())
    }

    fn remove(&mut self, key: &GrantKey) -> StoreResult<Option<Grant>> {
        Ok(self.take(key))
    }

    fn scan_granter(&self, granter: &Principal) -> StoreResult<Vec<Grant>> {
        let start = GrantKey {
            granter: granter.clone(),
            grantee: Principal::new(""),
            type_tag: TypeTag::new(""),
        };
        Ok(self
            .grants
            .range(start..)
            .take_while(|(key, _)| &key.granter == granter)
            .map(|(_, grant)| grant.clone())
            .collect())
    }

    fn scan_all(&self) -> StoreResult<Vec<Grant>> {
        Ok(self.grants.values().cloned().collect())
    }

    fn expired(&self, now: Timestamp, limit: usize) -> StoreResult<Vec<GrantKey>> {
        Ok(self
            .queue
            .iter()
            .take_while(|(exp, _)| *exp <= now)
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect())
    }
}
