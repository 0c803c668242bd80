use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::evaluate::evaluate;
use crate::item::{Item, ItemId, ItemKind, Items};

/// Items that no group lists as a child, ordered by name then id.
pub fn top_level_items(items: &Items) -> Vec<&Item> {
    let mut roots: Vec<&Item> = items
        .values()
        .filter(|candidate| {
            !items
                .values()
                .any(|group| group.children().iter().any(|id| id == &candidate.id))
        })
        .collect();
    roots.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    roots
}

/// Sunday on or before `date`.
pub fn week_start_for(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayCell {
    pub date: NaiveDate,
    pub completed: bool,
    /// False outside a habit's start/end window.
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WeekRow {
    pub item_id: ItemId,
    pub name: String,
    pub depth: usize,
    pub days: Vec<DayCell>,
}

/// Seven-day completion grid: each top-level item followed by its direct children.
pub fn week_completion(items: &Items, week_start: NaiveDate) -> Vec<WeekRow> {
    let dates: Vec<NaiveDate> = (0..7).map(|offset| week_start + Duration::days(offset)).collect();
    let row = |item: &Item, depth: usize| WeekRow {
        item_id: item.id.clone(),
        name: item.name.clone(),
        depth,
        days: dates
            .iter()
            .map(|&date| DayCell {
                date,
                completed: evaluate(items, &item.id, date).completed,
                active: match &item.kind {
                    ItemKind::Habit(habit) => habit.is_active_on(date),
                    _ => true,
                },
            })
            .collect(),
    };

    let mut rows = Vec::new();
    for root in top_level_items(items) {
        rows.push(row(root, 0));
        for child_id in root.children() {
            if let Some(child) = items.get(child_id) {
                rows.push(row(child, 1));
            }
        }
    }
    rows
}
