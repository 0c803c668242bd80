use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use habit_domain::{BindingTarget, HabitService, Habit, Item, ItemSink};
use habit_sync::{
    DocumentStore, ManualClock, MemoryStore, StartOutcome, SyncedTimer, TimerConfig,
    TimerDocument, TimerError, TimerState, ToggleOutcome,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 27, 8, 0, 0).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

fn service() -> HabitService {
    HabitService::builder()
        .with_items([Item::habit("habitA", "Meditate", Habit::new("minutes", 20.0))])
        .build()
}

fn device(store: &Arc<MemoryStore>, clock: &Arc<ManualClock>) -> Arc<SyncedTimer> {
    Arc::new(SyncedTimer::new(
        store.clone(),
        clock.clone(),
        TimerConfig::for_user("u1"),
    ))
}

async fn stored_doc(store: &MemoryStore, timer: &SyncedTimer, target: &BindingTarget) -> TimerDocument {
    let value = store.get_doc(&timer.doc_path(target)).await.unwrap();
    TimerDocument::from_snapshot(value.as_ref()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn running_owner_wins_and_other_device_stops_it() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = service();
    let target = BindingTarget::daily("habitA", day(27));

    let a = device(&store, &clock);
    let b = device(&store, &clock);
    let follower = b.clone().follow(b.attach(target.clone()));

    let start_a = tokio::spawn({
        let a = a.clone();
        let target = target.clone();
        async move { a.start(target).await }
    });
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(a.view().countdown > 0);
    assert_eq!(b.view().state, TimerState::Idle);

    assert_eq!(start_a.await.unwrap().unwrap(), StartOutcome::Started);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(b.view().state, TimerState::Running);

    // B sees the mirrored running state and never starts its own countdown.
    assert_eq!(b.start(target.clone()).await.unwrap(), StartOutcome::AlreadyRunning);
    assert_eq!(b.view().countdown, 0);

    clock.advance(chrono::Duration::seconds(10));
    assert_eq!(b.display_seconds(), 10.0);
    assert_eq!(b.stop_and_commit(&service).await.unwrap(), 10.0);
    assert_eq!(service.raw_value_at(&target), 10.0);

    let doc = stored_doc(&store, &a, &target).await;
    assert_eq!(doc.state, TimerState::Idle);
    assert_eq!(doc.accumulated_sec, 0.0);
    assert_eq!(doc.version, 2);

    // A stopping afterwards finds nothing left to commit.
    assert_eq!(a.stop_and_commit(&service).await.unwrap(), 0.0);
    assert_eq!(service.raw_value_at(&target), 10.0);
    follower.abort();
}

#[tokio::test(start_paused = true)]
async fn simultaneous_countdowns_claim_once() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let target = BindingTarget::daily("habitA", day(27));
    let a = device(&store, &clock);
    let b = device(&store, &clock);

    let (first, second) = tokio::join!(a.start(target.clone()), b.start(target.clone()));
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|outcome| *outcome == StartOutcome::Started);
    assert_eq!(
        outcomes,
        vec![StartOutcome::AlreadyRunning, StartOutcome::Started]
    );

    let doc = stored_doc(&store, &a, &target).await;
    assert_eq!(doc.state, TimerState::Running);
    assert_eq!(doc.version, 1);
}

#[tokio::test(start_paused = true)]
async fn commit_lands_on_bound_date_after_selection_moves() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = service();
    let timer = device(&store, &clock);
    let bound = BindingTarget::daily("habitA", day(27));
    let moved = BindingTarget::daily("habitA", day(28));

    let outcome = timer.toggle(bound.clone(), &service).await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Start(StartOutcome::Started));
    assert_eq!(timer.bound_target(), Some(bound.clone()));

    clock.advance(chrono::Duration::seconds(10));
    let outcome = timer.toggle(moved.clone(), &service).await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Stopped(10.0));
    assert_eq!(service.raw_value_at(&bound), 10.0);
    assert_eq!(service.raw_value_at(&moved), 0.0);
}

#[tokio::test(start_paused = true)]
async fn leveled_habit_timer_writes_to_bound_tier() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = HabitService::builder()
        .with_items([Item::habit(
            "plank",
            "Plank",
            Habit::new("minutes", 2.0).with_levels(10.0, 2.0, ["Plank", "Side Plank"]),
        )])
        .build();
    let timer = device(&store, &clock);
    let item = service.get_item("plank").unwrap();
    let target = BindingTarget::for_item(&item, day(27)).unwrap();
    assert_eq!(target.main_level_index, Some(0));
    assert!(timer.doc_path(&target).as_str().ends_with("plank__2025-06-27__L0"));

    timer.start(target.clone()).await.unwrap();
    service.upgrade_main_level("plank").unwrap();
    clock.advance(chrono::Duration::seconds(90));
    timer.stop_and_commit(&service).await.unwrap();

    assert_eq!(service.raw_value_at(&target), 90.0);
    assert_eq!(
        service.raw_value_at(&BindingTarget::tiered("plank", day(27), 1)),
        0.0
    );
}

#[tokio::test(start_paused = true)]
async fn remote_stop_releases_the_binding() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = service();
    let first = BindingTarget::daily("habitA", day(27));
    let second = BindingTarget::daily("habitA", day(28));

    let a = device(&store, &clock);
    let b = device(&store, &clock);
    let follow_a = a.clone().follow(a.attach(first.clone()));
    let follow_b = b.clone().follow(b.attach(first.clone()));

    assert_eq!(a.start(first.clone()).await.unwrap(), StartOutcome::Started);
    clock.set(t0() + chrono::Duration::seconds(10));
    assert_eq!(b.stop_and_commit(&service).await.unwrap(), 10.0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(a.view().state, TimerState::Idle);
    assert_eq!(a.bound_target(), None);

    assert_eq!(a.start(second.clone()).await.unwrap(), StartOutcome::Started);
    assert_eq!(a.bound_target(), Some(second.clone()));
    clock.advance(chrono::Duration::seconds(20));
    assert_eq!(a.stop_and_commit(&service).await.unwrap(), 20.0);

    assert_eq!(service.raw_value_at(&first), 10.0);
    assert_eq!(service.raw_value_at(&second), 20.0);
    follow_a.abort();
    follow_b.abort();
}

#[tokio::test(start_paused = true)]
async fn attaching_follows_selection_without_binding() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = service();
    let timer = device(&store, &clock);
    let first = BindingTarget::daily("habitA", day(27));
    let second = BindingTarget::daily("habitA", day(28));

    let _first_sub = timer.attach(first.clone());
    let _second_sub = timer.attach(second.clone());
    assert_eq!(timer.bound_target(), None);

    timer.start(second.clone()).await.unwrap();
    assert_eq!(timer.bound_target(), Some(second.clone()));
    clock.advance(chrono::Duration::seconds(5));
    assert_eq!(timer.stop_and_commit(&service).await.unwrap(), 5.0);
    assert_eq!(service.raw_value_at(&second), 5.0);
    assert_eq!(service.raw_value_at(&first), 0.0);
}

struct FlakySink {
    offline: Arc<AtomicBool>,
}

impl ItemSink for FlakySink {
    fn update_item(&self, _item: &Item) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("offline");
        }
        Ok(())
    }

    fn delete_item(&self, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn failed_commit_is_kept_for_retry() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let offline = Arc::new(AtomicBool::new(true));
    let service = HabitService::builder()
        .with_items([Item::habit("habitA", "Meditate", Habit::new("minutes", 20.0))])
        .with_sink(Box::new(FlakySink {
            offline: offline.clone(),
        }))
        .build();
    let timer = device(&store, &clock);
    let target = BindingTarget::daily("habitA", day(27));

    timer.start(target.clone()).await.unwrap();
    clock.advance(chrono::Duration::seconds(600));
    let err = timer.stop_and_commit(&service).await.unwrap_err();
    let TimerError::Commit { commit, .. } = err else {
        panic!("expected a commit error");
    };
    assert_eq!(commit.target, target);
    assert_eq!(commit.seconds, 600.0);
    assert_eq!(timer.bound_target(), Some(target.clone()));
    assert_eq!(timer.pending_commit(), Some(commit));
    assert_eq!(service.raw_value_at(&target), 0.0);

    offline.store(false, Ordering::SeqCst);
    assert_eq!(timer.stop_and_commit(&service).await.unwrap(), 600.0);
    assert_eq!(service.raw_value_at(&target), 600.0);
    assert_eq!(timer.pending_commit(), None);
    assert_eq!(timer.bound_target(), None);
}
