pub mod clock;
pub mod document;
pub mod error;
pub mod memory;
pub mod store;
pub mod synced;
pub mod timer;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::document::{timer_doc_id, TimerDocument, TimerState};
pub use crate::error::{StoreError, TimerError};
pub use crate::memory::MemoryStore;
pub use crate::store::{DocPath, DocumentStore, SetOptions, Subscription, Transaction};
pub use crate::synced::{StartOutcome, SyncedTimer, TimerConfig, TimerView, ToggleOutcome};
pub use crate::timer::{BoundTimer, Phase, TimerAction, TimerCommit};
