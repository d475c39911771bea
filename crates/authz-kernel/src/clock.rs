use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use authz_types::Timestamp;

/// Source of the `now` every grant check and save is evaluated against.
pub trait Clock: Send {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timestamp::ZERO.saturating_add(since_epoch)
    }
}

/// Manually advanced clock. Clones share the same instant.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    ns: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            ns: Arc::new(AtomicU64::new(start.as_nanos())),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.ns.store(at.as_nanos(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now().saturating_add(by);
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.ns.load(Ordering::SeqCst))
    }
}
