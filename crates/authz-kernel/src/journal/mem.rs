use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Journal, JournalEntry, JournalError, JournalSeq, OwnedJournalEntry};

/// In-memory journal. Clones share the same log, so a test can keep a handle
/// after moving one into a kernel.
#[derive(Debug, Default, Clone)]
pub struct MemJournal {
    entries: Arc<Mutex<Vec<OwnedJournalEntry>>>,
}

impl MemJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OwnedJournalEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OwnedJournalEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Journal for MemJournal {
    fn append(&mut self, entry: JournalEntry<'_>) -> Result<JournalSeq, JournalError> {
        let mut guard = self.lock();
        let seq = guard.len() as JournalSeq;
        guard.push(OwnedJournalEntry {
            seq,
            kind: entry.kind,
            payload: entry.payload.to_vec(),
        });
        Ok(seq)
    }

    fn load_from(&self, from: JournalSeq) -> Result<Vec<OwnedJournalEntry>, JournalError> {
        Ok(self
            .lock()
            .iter()
            .filter(|entry| entry.seq >= from)
            .cloned()
            .collect())
    }

    fn next_seq(&self) -> JournalSeq {
        self.lock().len() as JournalSeq
    }
}
