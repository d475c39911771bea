use crate::{GrantStore, StoreResult};
use authz_types::{Grant, GrantKey, Principal, Timestamp};
use std::collections::BTreeMap;

/// Write-buffer overlay used as a transaction boundary around a base store.
///
/// Reads see buffered writes first. Nothing reaches the base store until
/// [`StagedGrantStore::commit`]; dropping the overlay discards the buffer.
pub struct StagedGrantStore<'a, S: GrantStore + ?Sized> {
    base: &'a mut S,
    writes: BTreeMap<GrantKey, Option<Grant>>,
}

impl<'a, S: GrantStore + ?Sized> StagedGrantStore<'a, S> {
    pub fn new(base: &'a mut S) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    pub fn commit(self) -> StoreResult<usize> {
        let applied = self.writes.len();
        for (key, write) in self.writes {
            match write {
                Some(grant) => self.base.store(grant)?,
                None => {
                    self.base.remove(&key)?;
                }
            }
        }
        Ok(applied)
    }

    fn merge(
        &self,
        mut base: BTreeMap<GrantKey, Grant>,
        filter: impl Fn(&GrantKey) -> bool,
    ) -> Vec<Grant> {
        for (key, write) in self.writes.iter().filter(|(key, _)| filter(key)) {
            match write {
                Some(grant) => {
                    base.insert(key.clone(), grant.clone());
                }
                None => {
                    base.remove(key);
                }
            }
        }
        base.into_values().collect()
    }
}

fn by_key(grants: Vec<Grant>) -> BTreeMap<GrantKey, Grant> {
    grants.into_iter().map(|g| (g.key(), g)).collect()
}

impl<S: GrantStore + ?Sized> GrantStore for StagedGrantStore<'_, S> {
    fn load(&self, key: &GrantKey) -> StoreResult<Option<Grant>> {
        match self.writes.get(key) {
            Some(write) => Ok(write.clone()),
            None => self.base.load(key),
        }
    }

    fn store(&mut self, grant: Grant) -> StoreResult<()> {
        self.writes.insert(grant.key(), Some(grant));
        Ok(())
    }

    fn remove(&mut self, key: &GrantKey) -> StoreResult<Option<Grant>> {
        let prev = self.load(key)?;
        if prev.is_some() {
            self.writes.insert(key.clone(), None);
        }
        Ok(prev)
    }

    fn scan_granter(&self, granter: &Principal) -> StoreResult<Vec<Grant>> {
        let base = by_key(self.base.scan_granter(granter)?);
        Ok(self.merge(base, |key| &key.granter == granter))
    }

    fn scan_all(&self) -> StoreResult<Vec<Grant>> {
        let base = by_key(self.base.scan_all()?);
        Ok(self.merge(base, |_| true))
    }

    fn expired(&self, now: Timestamp, limit: usize) -> StoreResult<Vec<GrantKey>> {
        let mut due: Vec<(Timestamp, GrantKey)> = self
            .scan_all()?
            .into_iter()
            .filter_map(|grant| match grant.expiration {
                Some(exp) if exp <= now => Some((exp, grant.key())),
                _ => None,
            })
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, key)| key).collect())
    }
}
