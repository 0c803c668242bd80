//! Abstract document store: keyed JSON documents, single-document
//! transactions and realtime snapshots.

use std::fmt;

use async_trait::async_trait;
use habit_domain::BindingTarget;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::document::timer_doc_id;
use crate::error::StoreError;

/// Slash-separated document path, e.g. `users/u1/timers/habitA__2025-06-27__N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn timer(user_id: &str, target: &BindingTarget) -> Self {
        Self(format!("users/{user_id}/timers/{}", timer_doc_id(target)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge object fields into the existing document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// Read-then-write view of one document inside a transaction attempt.
///
/// The body may run more than once; it must derive its write from
/// [`Transaction::get`] alone.
#[derive(Debug)]
pub struct Transaction {
    snapshot: Option<Value>,
    pending: Option<(Value, SetOptions)>,
}

impl Transaction {
    pub fn new(snapshot: Option<Value>) -> Self {
        Self {
            snapshot,
            pending: None,
        }
    }

    pub fn get(&self) -> Option<&Value> {
        self.snapshot.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn set(&mut self, value: Value, options: SetOptions) {
        self.pending = Some((value, options));
    }

    pub fn into_write(self) -> Option<(Value, SetOptions)> {
        self.pending
    }
}

pub type TransactionBody<'a> = dyn FnMut(&mut Transaction) -> Result<(), StoreError> + Send + 'a;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_doc(&self, path: &DocPath) -> Result<Option<Value>, StoreError>;

    async fn set_doc(
        &self,
        path: &DocPath,
        value: Value,
        options: SetOptions,
    ) -> Result<(), StoreError>;

    /// Runs `body` against a consistent read of `path` and commits its write
    /// atomically, retrying the whole body when the document changed underneath.
    async fn run_transaction(
        &self,
        path: &DocPath,
        body: &mut TransactionBody<'_>,
    ) -> Result<(), StoreError>;

    /// Realtime view of `path`; the current value is available immediately.
    fn on_snapshot(&self, path: &DocPath) -> Subscription;
}

/// Receiving end of a snapshot listener. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: watch::Receiver<Option<Value>>,
}

impl Subscription {
    pub fn new(rx: watch::Receiver<Option<Value>>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }

    /// Next snapshot, or `None` once the store side is gone.
    pub async fn changed(&mut self) -> Option<Option<Value>> {
        self.rx.changed().await.ok()?;
        let value = self.rx.borrow_and_update().clone();
        Some(value)
    }
}

/// Applies a write to the previous value of a document.
///
/// With `merge`, object fields are merged recursively and every other value
/// replaces what was there.
pub fn apply_write(existing: Option<Value>, incoming: Value, options: SetOptions) -> Value {
    if !options.merge {
        return incoming;
    }
    match (existing, incoming) {
        (Some(Value::Object(current)), Value::Object(update)) => {
            Value::Object(merge_objects(current, update))
        }
        (_, incoming) => incoming,
    }
}

fn merge_objects(mut current: Map<String, Value>, update: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in update {
        let merged = match (current.remove(&key), value) {
            (Some(Value::Object(inner)), Value::Object(patch)) => {
                Value::Object(merge_objects(inner, patch))
            }
            (_, value) => value,
        };
        current.insert(key, merged);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn timer_path_encodes_binding() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 27).unwrap();
        assert_eq!(
            DocPath::timer("u1", &BindingTarget::daily("habitA", date)).as_str(),
            "users/u1/timers/habitA__2025-06-27__N"
        );
        assert_eq!(
            DocPath::timer("u1", &BindingTarget::tiered("pushupLv", date, 2)).as_str(),
            "users/u1/timers/pushupLv__2025-06-27__L2"
        );
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let existing = json!({"state": "running", "accumulatedSec": 12, "meta": {"a": 1, "b": 2}});
        let merged = apply_write(
            Some(existing),
            json!({"state": "paused", "meta": {"b": 3}}),
            SetOptions::merge(),
        );
        assert_eq!(
            merged,
            json!({"state": "paused", "accumulatedSec": 12, "meta": {"a": 1, "b": 3}})
        );
    }

    #[test]
    fn plain_set_replaces() {
        let replaced = apply_write(
            Some(json!({"state": "running", "accumulatedSec": 12})),
            json!({"state": "idle"}),
            SetOptions::default(),
        );
        assert_eq!(replaced, json!({"state": "idle"}));
    }
}
