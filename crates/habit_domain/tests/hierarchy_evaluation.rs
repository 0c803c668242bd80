use chrono::NaiveDate;
use habit_domain::evaluate::LevelLadder;
use habit_domain::{
    evaluate, BindingTarget, DomainError, Group, HabitService, HierarchyViolation, Item,
    LevelStrategy,
};
use proptest::prelude::*;
use serde_json::json;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 27).unwrap()
}

fn workout_items() -> Vec<Item> {
    let raw = json!([
        {
            "id": "workout", "type": "group", "name": "workout",
            "children": ["pull_up", "pushupGroup"], "targetCount": 2,
            "levelEnabled": true, "levelStrategy": "avg"
        },
        {
            "id": "pull_up", "type": "habit", "name": "pull_up", "unit": "reps",
            "dailyGoal": 8, "startDate": "2024-01-01", "endDate": null,
            "levelEnabled": false, "progressByDate": { "2025-06-27": 7 }
        },
        {
            "id": "pushupGroup", "type": "group", "name": "Push-Up Training",
            "children": ["pushupLv", "pushup"], "targetCount": 1,
            "levelEnabled": true, "levelStrategy": "max"
        },
        {
            "id": "pushupLv", "type": "habit", "name": "Push-Up", "unit": "reps",
            "dailyGoal": 50, "levelEnabled": true, "levelThreshold": 100,
            "currentMainLevel": 0,
            "mainLevels": ["Push-Up", "Elevation push-ups", "One Hand Push-Up"],
            "progressByMainLevel": { "0": { "2025-06-27": 130 }, "1": { "2025-06-27": 5 } }
        },
        {
            "id": "pushup", "type": "habit", "name": "Elevation push-ups", "unit": "reps",
            "dailyGoal": 50, "levelEnabled": true, "levelThreshold": 100,
            "currentMainLevel": 0, "mainLevels": ["Push-Up"],
            "progressByMainLevel": { "0": { "2025-06-27": 180 } }
        }
    ]);
    serde_json::from_value(raw).unwrap()
}

fn service() -> HabitService {
    HabitService::builder().with_items(workout_items()).build()
}

#[test]
fn nested_groups_fold_child_levels() {
    let service = service();

    let pushup_lv = service.evaluate("pushupLv", day());
    assert!(pushup_lv.completed);
    assert_eq!(pushup_lv.level, Some(1));
    assert_eq!(pushup_lv.next_level_total, Some(400.0));

    let pushups = service.evaluate("pushupGroup", day());
    assert!(pushups.completed);
    assert_eq!(pushups.level, Some(1));
    assert_eq!(pushups.total_count, Some(45.0));
    assert_eq!(pushups.count, Some(2));

    let workout = service.evaluate("workout", day());
    assert!(!workout.completed);
    assert_eq!(workout.count, Some(1));
    assert_eq!(workout.total_children, Some(2));
    assert_eq!(workout.level, Some(0));
}

#[test]
fn logging_the_missing_rep_completes_the_root() {
    let service = service();
    let target = BindingTarget::daily("pull_up", day());
    assert_eq!(service.add_display_value(&target, 1.0).unwrap(), 8.0);
    assert!(service.evaluate("workout", day()).completed);
    assert_eq!(service.top_level_ids(), vec!["workout".to_string()]);
}

#[test]
fn editing_a_group_into_a_cycle_is_refused() {
    let service = service();
    let mut pushups = service.get_item("pushupGroup").unwrap();
    pushups.as_group_mut().unwrap().children.push("workout".into());
    let err = service.upsert_item(pushups).unwrap_err();
    assert!(matches!(
        err,
        DomainError::InvalidHierarchy(HierarchyViolation::Cycle { .. })
    ));
    assert_eq!(service.get_item("pushupGroup").unwrap().children().len(), 2);
}

#[test]
fn evaluation_survives_cycles_written_by_other_clients() {
    let service = service();
    let mut remote = workout_items();
    remote.retain(|item| item.id != "pushupGroup");
    remote.push(Item::group(
        "pushupGroup",
        "Push-Up Training",
        Group::new(["pushupLv", "workout"], 1).leveled(LevelStrategy::Max),
    ));
    service.apply_remote_items(remote);
    let items = service.items();
    let workout = evaluate(&items, "workout", day());
    assert_eq!(workout.total_children, Some(2));
    let pushups = evaluate(&items, "pushupGroup", day());
    assert!(pushups.completed);
}

#[test]
fn ladder_thresholds_grow_geometrically() {
    let ladder = LevelLadder::new(100.0, 3.0);
    assert_eq!(ladder.level_for(99.0), (0, 100.0));
    assert_eq!(ladder.level_for(100.0), (1, 400.0));
    assert_eq!(ladder.level_for(399.0), (1, 400.0));
    assert_eq!(ladder.level_for(400.0), (2, 1300.0));
    assert_eq!(ladder.level_for(1300.0), (3, 4000.0));
}

proptest! {
    #[test]
    fn level_never_drops_as_total_grows(a in 0.0f64..1e6, b in 0.0f64..1e6, m in 1.0f64..6.0) {
        let ladder = LevelLadder::new(100.0, m);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let (low_level, low_next) = ladder.level_for(low);
        let (high_level, _) = ladder.level_for(high);
        prop_assert!(low_level <= high_level);
        prop_assert!(low < low_next);
    }
}
