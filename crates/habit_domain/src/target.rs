use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::item::{Item, ItemId};

/// The item/date/tier a value edit or timer session lands on.
///
/// Captured once and carried by value; later changes to the selected item or
/// date never move an existing binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingTarget {
    pub item_id: ItemId,
    pub date: NaiveDate,
    /// `Some(tier)` for leveled habits.
    pub main_level_index: Option<usize>,
}

impl BindingTarget {
    pub fn daily(item_id: impl Into<ItemId>, date: NaiveDate) -> Self {
        Self {
            item_id: item_id.into(),
            date,
            main_level_index: None,
        }
    }

    pub fn tiered(item_id: impl Into<ItemId>, date: NaiveDate, tier: usize) -> Self {
        Self {
            item_id: item_id.into(),
            date,
            main_level_index: Some(tier),
        }
    }

    /// Snapshot of where `item`'s value for `date` lives right now.
    pub fn for_item(item: &Item, date: NaiveDate) -> Option<Self> {
        let habit = item.as_habit()?;
        Some(if habit.level_enabled {
            Self::tiered(item.id.clone(), date, habit.current_main_level)
        } else {
            Self::daily(item.id.clone(), date)
        })
    }

    pub fn is_level_habit(&self) -> bool {
        self.main_level_index.is_some()
    }
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.main_level_index {
            Some(tier) => write!(f, "{}@{}#{}", self.item_id, self.date, tier),
            None => write!(f, "{}@{}", self.item_id, self.date),
        }
    }
}
