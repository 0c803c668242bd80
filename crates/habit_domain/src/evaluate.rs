//! Completion, level and level-progress for any node of the item tree.
//!
//! Evaluation is a pure read over the item arena. Each node resolves to one of
//! four rules (simple habit, leveled habit, simple group, leveled group); the
//! ancestor path is threaded through the recursion so malformed graphs with
//! cycles or dangling children still terminate with a neutral result.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::item::{Group, Habit, Item, ItemKind, Items, LevelStrategy, DEFAULT_LEVEL_THRESHOLD};

/// Leveled groups report progress on a fixed 0..=100 scale.
pub const GROUP_LEVEL_SCALE: f64 = 100.0;

/// Iteration bound for geometric ladders whose multiplier is barely above 1.
/// Flat ladders (multiplier exactly 1) are solved directly and never hit it.
pub const MAX_LEVEL: u32 = 100_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_level_index: Option<usize>,
    /// Raw units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    /// Display units for habits, child count for groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_target: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_children: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_level_total: Option<f64>,
}

impl EvaluationResult {
    fn missing() -> Self {
        Self {
            completed: false,
            count: Some(0),
            total_count: Some(0.0),
            ..Self::default()
        }
    }

    fn cycle_guard(item: &Item) -> Self {
        Self {
            completed: false,
            count: Some(0),
            total_count: Some(0.0),
            total_children: item.as_group().map(|group| group.children.len()),
            ..Self::default()
        }
    }

    /// Share of the way to the next level, as seen by a parent group.
    pub fn progress_ratio(&self) -> f64 {
        match self.next_level_total {
            Some(next) if next > 0.0 => self.total_count.unwrap_or(0.0) / next,
            _ => {
                if self.completed {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Geometric staircase of cumulative level thresholds, in raw units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelLadder {
    threshold: f64,
    multiplier: f64,
}

impl LevelLadder {
    pub fn new(threshold: f64, multiplier: f64) -> Self {
        let threshold = if threshold.is_finite() && threshold > 0.0 {
            threshold
        } else {
            DEFAULT_LEVEL_THRESHOLD
        };
        let multiplier = if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 };
        Self {
            threshold,
            multiplier,
        }
    }

    pub fn for_habit(habit: &Habit) -> Self {
        let adapter = habit.adapter();
        Self::new(
            adapter.target_to_raw(habit.effective_threshold()),
            habit.effective_multiplier(),
        )
    }

    /// Level reached by `total` and the cumulative total needed for the next one.
    pub fn level_for(&self, total: f64) -> (u32, f64) {
        if self.multiplier == 1.0 {
            let level = (total / self.threshold)
                .floor()
                .clamp(0.0, f64::from(u32::MAX - 1)) as u32;
            return (level, self.threshold * (f64::from(level) + 1.0));
        }
        let mut level = 0;
        let mut step = self.threshold;
        let mut required = self.threshold;
        while total >= required && level < MAX_LEVEL {
            level += 1;
            step *= self.multiplier;
            required += step;
        }
        (level, required)
    }
}

/// Evaluates `id` on `date`. Never panics and never recurses unboundedly.
pub fn evaluate(items: &Items, id: &str, date: NaiveDate) -> EvaluationResult {
    let mut path = HashSet::new();
    evaluate_with(items, id, date, &mut path)
}

fn evaluate_with<'a>(
    items: &'a Items,
    id: &'a str,
    date: NaiveDate,
    path: &mut HashSet<&'a str>,
) -> EvaluationResult {
    let Some(item) = items.get(id) else {
        return EvaluationResult::missing();
    };
    if path.contains(id) {
        tracing::debug!(item_id = id, "cycle reached during evaluation");
        return EvaluationResult::cycle_guard(item);
    }

    match &item.kind {
        ItemKind::Habit(habit) if habit.level_enabled => evaluate_leveled_habit(habit, date),
        ItemKind::Habit(habit) => evaluate_simple_habit(habit, date),
        ItemKind::Group(group) => {
            path.insert(id);
            let children: Vec<EvaluationResult> = group
                .children
                .iter()
                .map(|child| evaluate_with(items, child, date, path))
                .collect();
            path.remove(id);
            if group.level_enabled {
                evaluate_leveled_group(group, &children)
            } else {
                evaluate_simple_group(group, &children)
            }
        }
        ItemKind::Unknown => EvaluationResult::default(),
    }
}

fn evaluate_simple_habit(habit: &Habit, date: NaiveDate) -> EvaluationResult {
    let current = habit.raw_value_at(date, None);
    let target = habit.adapter().target_to_raw(habit.daily_goal);
    EvaluationResult {
        completed: current >= target,
        current_value: Some(current),
        required_target: Some(habit.daily_goal),
        ..EvaluationResult::default()
    }
}

fn evaluate_leveled_habit(habit: &Habit, date: NaiveDate) -> EvaluationResult {
    let tier = habit.current_main_level;
    let (current, total) = match habit.tier_progress(tier) {
        Some(progress) => (
            progress.get(&date).copied().unwrap_or(0.0),
            progress.values().sum::<f64>(),
        ),
        None => (0.0, 0.0),
    };
    let (level, next_level_total) = LevelLadder::for_habit(habit).level_for(total);
    let target = habit.adapter().target_to_raw(habit.daily_goal);

    EvaluationResult {
        completed: current >= target,
        level: Some(level),
        main_level_index: Some(tier),
        current_value: Some(current),
        required_target: Some(habit.daily_goal),
        count: Some(0),
        total_count: Some(total),
        next_level_total: Some(next_level_total),
        ..EvaluationResult::default()
    }
}

/// `target_count == 0` means every child must be complete.
fn group_completed(count: usize, total_children: usize, target_count: usize) -> bool {
    if target_count == 0 {
        count >= total_children
    } else {
        count >= target_count
    }
}

fn evaluate_simple_group(group: &Group, children: &[EvaluationResult]) -> EvaluationResult {
    let count = children.iter().filter(|child| child.completed).count();
    EvaluationResult {
        completed: group_completed(count, children.len(), group.target_count),
        count: Some(count),
        required_target: Some(group.target_count as f64),
        total_children: Some(children.len()),
        ..EvaluationResult::default()
    }
}

fn evaluate_leveled_group(group: &Group, children: &[EvaluationResult]) -> EvaluationResult {
    let (ratio, level) = aggregate(group.level_strategy, children);
    EvaluationResult {
        level: Some(level),
        total_count: Some((ratio.clamp(0.0, 1.0) * GROUP_LEVEL_SCALE).round()),
        next_level_total: Some(GROUP_LEVEL_SCALE),
        ..evaluate_simple_group(group, children)
    }
}

fn aggregate(strategy: LevelStrategy, children: &[EvaluationResult]) -> (f64, u32) {
    if children.is_empty() {
        return (0.0, 0);
    }
    let ratios: Vec<f64> = children.iter().map(EvaluationResult::progress_ratio).collect();
    let levels: Vec<u32> = children.iter().map(|child| child.level.unwrap_or(0)).collect();
    let mean_ratio = ratios.iter().sum::<f64>() / ratios.len() as f64;
    let min_level = levels.iter().copied().min().unwrap_or(0);

    match strategy {
        LevelStrategy::Max => (
            ratios.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            levels.iter().copied().max().unwrap_or(0),
        ),
        LevelStrategy::Avg => {
            let mean_level = levels.iter().map(|&l| f64::from(l)).sum::<f64>() / levels.len() as f64;
            (mean_ratio, mean_level.floor() as u32)
        }
        LevelStrategy::Sum => {
            let total: f64 = children.iter().filter_map(|child| child.total_count).sum();
            let next: f64 = children.iter().filter_map(|child| child.next_level_total).sum();
            // Conservative: a summed group only levels up when its weakest child does.
            let ratio = if next > 0.0 { total / next } else { mean_ratio };
            (ratio, min_level)
        }
        LevelStrategy::Min => (
            ratios.iter().copied().fold(f64::INFINITY, f64::min),
            min_level,
        ),
    }
}
