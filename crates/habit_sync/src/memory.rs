use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{
    apply_write, DocPath, DocumentStore, SetOptions, Subscription, Transaction, TransactionBody,
};

pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

struct Slot {
    value: Option<Value>,
    revision: u64,
    watchers: watch::Sender<Option<Value>>,
}

impl Slot {
    fn empty() -> Self {
        let (watchers, _) = watch::channel(None);
        Self {
            value: None,
            revision: 0,
            watchers,
        }
    }

    fn write(&mut self, value: Value) {
        self.value = Some(value.clone());
        self.revision += 1;
        self.watchers.send_replace(Some(value));
    }
}

/// In-process [`DocumentStore`] with optimistic transactions.
///
/// Each document carries a revision. A transaction reads a revision, runs its
/// body, yields once (the round trip a remote store would take), and commits
/// only if the revision is unchanged; otherwise the body runs again.
pub struct MemoryStore {
    slots: Mutex<HashMap<DocPath, Slot>>,
    max_attempts: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Revision counter of `path`; bumped on every committed write.
    pub fn revision(&self, path: &DocPath) -> u64 {
        self.slots
            .lock()
            .get(path)
            .map(|slot| slot.revision)
            .unwrap_or(0)
    }

    fn read(&self, path: &DocPath) -> (Option<Value>, u64) {
        let slots = self.slots.lock();
        match slots.get(path) {
            Some(slot) => (slot.value.clone(), slot.revision),
            None => (None, 0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_doc(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        Ok(self.read(path).0)
    }

    async fn set_doc(
        &self,
        path: &DocPath,
        value: Value,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(path.clone()).or_insert_with(Slot::empty);
        let next = apply_write(slot.value.take(), value, options);
        slot.write(next);
        Ok(())
    }

    async fn run_transaction(
        &self,
        path: &DocPath,
        body: &mut TransactionBody<'_>,
    ) -> Result<(), StoreError> {
        for attempt in 1..=self.max_attempts {
            let (snapshot, revision) = self.read(path);
            let mut tx = Transaction::new(snapshot);
            body(&mut tx)?;
            tokio::task::yield_now().await;

            let mut slots = self.slots.lock();
            let slot = slots.entry(path.clone()).or_insert_with(Slot::empty);
            if slot.revision != revision {
                warn!(%path, attempt, "transaction conflict, retrying");
                continue;
            }
            if let Some((value, options)) = tx.into_write() {
                let next = apply_write(slot.value.take(), value, options);
                slot.write(next);
                debug!(%path, revision = slot.revision, "transaction committed");
            }
            return Ok(());
        }
        Err(StoreError::Contention {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }

    fn on_snapshot(&self, path: &DocPath) -> Subscription {
        let mut slots = self.slots.lock();
        let slot = slots.entry(path.clone()).or_insert_with(Slot::empty);
        Subscription::new(slot.watchers.subscribe())
    }
}
