//! Delegated dispatch kernel: grant checks, bounded nested dispatch, journaling.

pub mod checker;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod journal;
pub mod kernel;
pub mod router;

pub use checker::GrantEvent;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KernelConfig;
pub use dispatch::{ActionOutput, DispatchContext, Dispatcher};
pub use error::KernelError;
pub use journal::{FsJournal, Journal, JournalRecord, MemJournal};
pub use kernel::{Kernel, KernelBuilder};
pub use router::{ActionHandler, ActionRouter, HandlerRouter, RouterError};
