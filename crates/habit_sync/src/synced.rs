//! Timer shared across devices through a [`DocumentStore`].
//!
//! Every device that selects the same binding target mirrors one timer
//! document. Starting runs a local countdown and then claims the document in
//! a transaction; a device that finds it already running backs off. Pause and
//! stop are transactional too, so elapsed time is folded exactly once.
//!
//! Attaching only selects; the binding is taken on start and dropped once the
//! shared document is idle again, whichever device stopped it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use habit_domain::{BindingTarget, HabitService};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::document::{TimerDocument, TimerState};
use crate::error::{StoreError, TimerError};
use crate::memory::DEFAULT_MAX_ATTEMPTS;
use crate::store::{DocPath, DocumentStore, SetOptions, Subscription, Transaction};
use crate::timer::TimerCommit;

pub const DEFAULT_COUNTDOWN_SECONDS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerConfig {
    pub user_id: String,
    pub countdown_seconds: u32,
    pub max_transaction_attempts: usize,
}

impl TimerConfig {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            max_transaction_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Local mirror of the shared document plus the device-only countdown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerView {
    pub state: TimerState,
    pub accumulated_sec: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub countdown: u32,
}

impl TimerView {
    pub fn is_timing(&self) -> bool {
        self.state == TimerState::Running || self.countdown > 0
    }

    /// Accumulated time plus the live running period.
    pub fn display_seconds(&self, now: DateTime<Utc>) -> f64 {
        let doc = TimerDocument {
            state: self.state,
            accumulated_sec: self.accumulated_sec,
            started_at: self.started_at,
            ..TimerDocument::default()
        };
        doc.total_seconds(now)
    }

    fn mirror(&mut self, doc: &TimerDocument) {
        self.state = doc.state;
        self.accumulated_sec = doc.accumulated_sec;
        self.started_at = doc.started_at;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// This device claimed the running state.
    Started,
    /// Another countdown on this device is in flight.
    CountdownInProgress,
    /// The shared timer is already running (possibly on another device).
    AlreadyRunning,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Start(StartOutcome),
    Cancelled,
    Stopped(f64),
}

/// Clears the countdown flag unless a cancel already handed it on.
struct CountdownGuard<'a> {
    running: &'a AtomicBool,
    abort: Arc<AtomicBool>,
}

impl Drop for CountdownGuard<'_> {
    fn drop(&mut self) {
        if !self.abort.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

pub struct SyncedTimer {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
    target: Mutex<Option<BindingTarget>>,
    selection: Mutex<Option<BindingTarget>>,
    pending: Mutex<Option<TimerCommit>>,
    view: Mutex<TimerView>,
    countdown_running: AtomicBool,
    abort: Mutex<Arc<AtomicBool>>,
}

impl SyncedTimer {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: TimerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            target: Mutex::new(None),
            selection: Mutex::new(None),
            pending: Mutex::new(None),
            view: Mutex::new(TimerView::default()),
            countdown_running: AtomicBool::new(false),
            abort: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn bound_target(&self) -> Option<BindingTarget> {
        self.target.lock().clone()
    }

    /// Seconds timed by a stop whose commit failed; retried by the next stop.
    pub fn pending_commit(&self) -> Option<TimerCommit> {
        self.pending.lock().clone()
    }

    pub fn view(&self) -> TimerView {
        self.view.lock().clone()
    }

    pub fn display_seconds(&self) -> f64 {
        self.view.lock().display_seconds(self.clock.now())
    }

    pub fn doc_path(&self, target: &BindingTarget) -> DocPath {
        DocPath::timer(&self.config.user_id, target)
    }

    /// Binds `selection` unless a session (running, paused or awaiting a
    /// commit retry) still holds an earlier binding.
    fn bind(&self, selection: BindingTarget) -> BindingTarget {
        let view = self.view.lock();
        let mut target = self.target.lock();
        let held = view.state != TimerState::Idle || self.pending.lock().is_some();
        match target.as_ref() {
            Some(bound) if held => bound.clone(),
            _ => {
                *target = Some(selection.clone());
                selection
            }
        }
    }

    /// The binding if one is held, otherwise the attached selection.
    fn resolve_target(&self) -> Option<BindingTarget> {
        self.bound_target()
            .or_else(|| self.selection.lock().clone())
    }

    /// Subscribes to the bound target's document, or to `selection`'s when
    /// unbound, and mirrors its current value. Attaching never binds.
    pub fn attach(&self, selection: BindingTarget) -> Subscription {
        let target = self.bound_target().unwrap_or_else(|| selection.clone());
        *self.selection.lock() = Some(selection);
        let subscription = self.store.on_snapshot(&self.doc_path(&target));
        self.mirror(subscription.current().as_ref());
        subscription
    }

    /// Copies a snapshot into the local view. A missing document reads as
    /// idle, and an idle document releases the binding unless a countdown or
    /// a commit retry still needs it.
    pub fn mirror(&self, snapshot: Option<&serde_json::Value>) {
        let doc = TimerDocument::from_snapshot(snapshot).unwrap_or_default();
        let mut view = self.view.lock();
        view.mirror(&doc);
        if doc.state == TimerState::Idle
            && view.countdown == 0
            && !self.countdown_running.load(Ordering::SeqCst)
            && self.pending.lock().is_none()
        {
            if let Some(released) = self.target.lock().take() {
                debug!(target = %released, "binding released by idle timer");
            }
        }
    }

    /// Mirrors every snapshot from `subscription` until the store goes away.
    pub fn follow(self: Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(snapshot) = subscription.changed().await {
                self.mirror(snapshot.as_ref());
            }
        })
    }

    async fn ensure_doc_exists(&self, path: &DocPath) -> Result<(), StoreError> {
        let now = self.clock.now();
        let idle = serde_json::to_value(TimerDocument::idle(now))?;
        self.store
            .run_transaction(path, &mut |tx: &mut Transaction| {
                if !tx.exists() {
                    tx.set(idle.clone(), SetOptions::default());
                }
                Ok(())
            })
            .await
    }

    #[instrument(skip(self), fields(user = %self.config.user_id))]
    pub async fn start(&self, selection: BindingTarget) -> Result<StartOutcome, TimerError> {
        if self.view.lock().state == TimerState::Running {
            return Ok(StartOutcome::AlreadyRunning);
        }
        if self
            .countdown_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(StartOutcome::CountdownInProgress);
        }
        let abort = Arc::new(AtomicBool::new(false));
        *self.abort.lock() = abort.clone();
        let _guard = CountdownGuard {
            running: &self.countdown_running,
            abort: abort.clone(),
        };

        let target = self.bind(selection);
        let path = self.doc_path(&target);
        self.ensure_doc_exists(&path).await?;

        let current = TimerDocument::from_snapshot(self.store.get_doc(&path).await?.as_ref())
            .unwrap_or_default();
        if current.state == TimerState::Running {
            self.view.lock().mirror(&current);
            debug!(%path, "timer already running elsewhere");
            return Ok(StartOutcome::AlreadyRunning);
        }

        for remaining in (0..self.config.countdown_seconds).rev() {
            self.view.lock().countdown = remaining + 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
            if abort.load(Ordering::SeqCst) {
                debug!(%path, "countdown cancelled");
                return Ok(StartOutcome::Cancelled);
            }
        }
        self.view.lock().countdown = 0;

        let clock = self.clock.clone();
        let mut claimed: Option<TimerDocument> = None;
        self.store
            .run_transaction(&path, &mut |tx: &mut Transaction| {
                claimed = None;
                let doc = TimerDocument::from_snapshot(tx.get()).unwrap_or_default();
                if let Some(next) = doc.claim_running(clock.now()) {
                    tx.set(serde_json::to_value(&next)?, SetOptions::merge());
                    claimed = Some(next);
                }
                Ok(())
            })
            .await?;

        match claimed {
            Some(doc) => {
                self.view.lock().mirror(&doc);
                info!(%path, version = doc.version, "timer running");
                Ok(StartOutcome::Started)
            }
            None => {
                debug!(%path, "lost the race to claim the timer");
                Ok(StartOutcome::AlreadyRunning)
            }
        }
    }

    /// Aborts this device's countdown, if any.
    pub fn cancel(&self) {
        self.abort.lock().store(true, Ordering::SeqCst);
        self.countdown_running.store(false, Ordering::SeqCst);
        let mut view = self.view.lock();
        view.countdown = 0;
        if view.state == TimerState::Idle && self.pending.lock().is_none() {
            self.target.lock().take();
        }
    }

    /// Returns false when the shared timer was not running.
    #[instrument(skip(self), fields(user = %self.config.user_id))]
    pub async fn pause(&self) -> Result<bool, TimerError> {
        let Some(target) = self.resolve_target() else {
            return Ok(false);
        };
        let path = self.doc_path(&target);
        let clock = self.clock.clone();
        let mut paused: Option<TimerDocument> = None;
        self.store
            .run_transaction(&path, &mut |tx: &mut Transaction| {
                paused = None;
                let Some(doc) = TimerDocument::from_snapshot(tx.get()) else {
                    return Ok(());
                };
                if let Some(next) = doc.paused(clock.now()) {
                    tx.set(serde_json::to_value(&next)?, SetOptions::merge());
                    paused = Some(next);
                }
                Ok(())
            })
            .await?;
        Ok(match paused {
            Some(doc) => {
                self.view.lock().mirror(&doc);
                true
            }
            None => false,
        })
    }

    /// Resets the shared document and adds the timed seconds at the bound
    /// target (or the attached selection when unbound). Returns the seconds
    /// committed; zero commits nothing.
    ///
    /// When the item write fails the seconds are kept as a pending commit on
    /// the same binding, returned inside the error and retried by the next stop.
    #[instrument(skip(self, service), fields(user = %self.config.user_id))]
    pub async fn stop_and_commit(&self, service: &HabitService) -> Result<f64, TimerError> {
        let Some(target) = self.resolve_target() else {
            return Ok(0.0);
        };
        let path = self.doc_path(&target);
        let clock = self.clock.clone();
        let mut total = 0.0;
        self.store
            .run_transaction(&path, &mut |tx: &mut Transaction| {
                total = 0.0;
                let Some(doc) = TimerDocument::from_snapshot(tx.get()) else {
                    return Ok(());
                };
                let (next, timed) = doc.reset(clock.now());
                tx.set(serde_json::to_value(&next)?, SetOptions::merge());
                total = timed;
                Ok(())
            })
            .await?;

        *self.view.lock() = TimerView::default();
        let carried = self
            .pending
            .lock()
            .take()
            .map(|commit| commit.seconds)
            .unwrap_or(0.0);
        let seconds = total + carried;

        if seconds > 0.0 {
            let commit = TimerCommit {
                target: target.clone(),
                seconds,
            };
            if let Err(err) = commit.apply(service) {
                warn!(%path, seconds, "timed seconds not committed: {err}");
                *self.target.lock() = Some(target);
                *self.pending.lock() = Some(commit);
                return Err(err);
            }
            info!(%path, seconds, "timer committed");
        }
        self.target.lock().take();
        Ok(seconds)
    }

    /// Single-button control: start when idle or paused, cancel a countdown,
    /// stop when running.
    pub async fn toggle(
        &self,
        selection: BindingTarget,
        service: &HabitService,
    ) -> Result<ToggleOutcome, TimerError> {
        let view = self.view();
        if view.countdown > 0 {
            self.cancel();
            return Ok(ToggleOutcome::Cancelled);
        }
        if view.state == TimerState::Running {
            return Ok(ToggleOutcome::Stopped(self.stop_and_commit(service).await?));
        }
        Ok(ToggleOutcome::Start(self.start(selection).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use chrono::{NaiveDate, TimeZone};
    use habit_domain::{Habit, Item};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 27, 8, 0, 0).unwrap()
    }

    fn target() -> BindingTarget {
        BindingTarget::daily("habitA", NaiveDate::from_ymd_opt(2025, 6, 27).unwrap())
    }

    fn service() -> HabitService {
        HabitService::builder()
            .with_items([Item::habit("habitA", "Stretch", Habit::new("minutes", 10.0))])
            .build()
    }

    fn timer(countdown: u32) -> (Arc<MemoryStore>, Arc<ManualClock>, SyncedTimer) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let config = TimerConfig {
            countdown_seconds: countdown,
            ..TimerConfig::for_user("u1")
        };
        let timer = SyncedTimer::new(store.clone(), clock.clone(), config);
        (store, clock, timer)
    }

    #[tokio::test(start_paused = true)]
    async fn pause_resume_stop_commits_total() {
        let (_store, clock, timer) = timer(0);
        let service = service();

        assert_eq!(timer.start(target()).await.unwrap(), StartOutcome::Started);
        clock.advance(chrono::Duration::seconds(30));
        assert!(timer.pause().await.unwrap());
        assert!(!timer.pause().await.unwrap());
        assert_eq!(timer.view().accumulated_sec, 30.0);

        clock.advance(chrono::Duration::seconds(100));
        assert_eq!(timer.start(target()).await.unwrap(), StartOutcome::Started);
        clock.advance(chrono::Duration::seconds(15));
        assert_eq!(timer.display_seconds(), 45.0);

        assert_eq!(timer.stop_and_commit(&service).await.unwrap(), 45.0);
        assert_eq!(service.raw_value_at(&target()), 45.0);
        assert_eq!(timer.bound_target(), None);
        assert_eq!(timer.view(), TimerView::default());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_document_commits_nothing() {
        let (store, _clock, timer) = timer(0);
        let service = service();
        let _sub = timer.attach(target());
        assert_eq!(timer.stop_and_commit(&service).await.unwrap(), 0.0);
        assert_eq!(service.raw_value_at(&target()), 0.0);
        assert_eq!(store.get_doc(&timer.doc_path(&target())).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_countdown() {
        let (store, _clock, timer) = timer(5);
        let timer = Arc::new(timer);
        let task = tokio::spawn({
            let timer = timer.clone();
            async move { timer.start(target()).await }
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(timer.view().countdown > 0);
        timer.cancel();

        assert_eq!(task.await.unwrap().unwrap(), StartOutcome::Cancelled);
        assert_eq!(timer.view().countdown, 0);
        assert_eq!(timer.bound_target(), None);
        let doc = TimerDocument::from_snapshot(
            store
                .get_doc(&timer.doc_path(&target()))
                .await
                .unwrap()
                .as_ref(),
        )
        .unwrap();
        assert_eq!(doc.state, TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_during_countdown_is_ignored() {
        let (_store, _clock, timer) = timer(3);
        let timer = Arc::new(timer);
        let first = tokio::spawn({
            let timer = timer.clone();
            async move { timer.start(target()).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            timer.start(target()).await.unwrap(),
            StartOutcome::CountdownInProgress
        );
        assert_eq!(first.await.unwrap().unwrap(), StartOutcome::Started);
        assert_eq!(timer.view().state, TimerState::Running);
    }
}
