use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::lenient;
use crate::value::ValueAdapter;

pub type ItemId = String;

/// Arena of every item keyed by id. Children refer to entries by id only.
pub type Items = HashMap<ItemId, Item>;

/// Raw stored value per calendar date.
pub type ProgressMap = BTreeMap<NaiveDate, f64>;

/// Per-tier cumulative progress for leveled habits.
pub type TierProgress = BTreeMap<usize, ProgressMap>;

pub const DEFAULT_LEVEL_THRESHOLD: f64 = 100.0;
pub const DEFAULT_LEVEL_MULTIPLIER: f64 = 3.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemKind {
    Habit(Habit),
    Group(Group),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    #[serde(default)]
    pub unit: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub daily_goal: f64,
    #[serde(
        default,
        deserialize_with = "lenient::date",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "lenient::date",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient::progress")]
    pub progress_by_date: ProgressMap,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub level_enabled: bool,
    #[serde(default, deserialize_with = "lenient::number")]
    pub level_threshold: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub level_multiplier: f64,
    #[serde(default)]
    pub main_levels: Vec<String>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub current_main_level: usize,
    #[serde(default, deserialize_with = "lenient::tiers")]
    pub progress_by_main_level: TierProgress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default, deserialize_with = "lenient::ids")]
    pub children: Vec<ItemId>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub target_count: usize,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub level_enabled: bool,
    #[serde(default, deserialize_with = "lenient::strategy")]
    pub level_strategy: LevelStrategy,
}

/// How a leveled group folds its children's progress ratios and levels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LevelStrategy {
    #[default]
    Min,
    Max,
    Avg,
    Sum,
}

impl LevelStrategy {
    /// Unrecognized names fall back to `Min`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "max" => Self::Max,
            "avg" => Self::Avg,
            "sum" => Self::Sum,
            _ => Self::Min,
        }
    }
}

impl Item {
    pub fn habit(id: impl Into<ItemId>, name: impl Into<String>, habit: Habit) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::Habit(habit),
        }
    }

    pub fn group(id: impl Into<ItemId>, name: impl Into<String>, group: Group) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::Group(group),
        }
    }

    pub fn as_habit(&self) -> Option<&Habit> {
        match &self.kind {
            ItemKind::Habit(habit) => Some(habit),
            _ => None,
        }
    }

    pub fn as_habit_mut(&mut self) -> Option<&mut Habit> {
        match &mut self.kind {
            ItemKind::Habit(habit) => Some(habit),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match &self.kind {
            ItemKind::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut Group> {
        match &mut self.kind {
            ItemKind::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ItemKind::Group(_))
    }

    /// Child ids for groups, empty for every other variant.
    pub fn children(&self) -> &[ItemId] {
        match &self.kind {
            ItemKind::Group(group) => &group.children,
            _ => &[],
        }
    }
}

impl Habit {
    pub fn new(unit: impl Into<String>, daily_goal: f64) -> Self {
        Self {
            unit: unit.into(),
            daily_goal,
            ..Self::default()
        }
    }

    pub fn with_levels(
        mut self,
        threshold: f64,
        multiplier: f64,
        tiers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.level_enabled = true;
        self.level_threshold = threshold;
        self.level_multiplier = multiplier;
        self.main_levels = tiers.into_iter().map(Into::into).collect();
        self.progress_by_main_level.entry(0).or_default();
        self
    }

    pub fn with_window(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn is_minute_unit(&self) -> bool {
        self.unit.trim().eq_ignore_ascii_case("minutes")
    }

    pub fn adapter(&self) -> ValueAdapter {
        ValueAdapter::new(self.is_minute_unit())
    }

    /// Inclusive validity window; an open bound accepts every date on that side.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date.map_or(true, |start| date >= start)
            && self.end_date.map_or(true, |end| date <= end)
    }

    /// Threshold in display units, defaulting when unset or non-positive.
    pub fn effective_threshold(&self) -> f64 {
        if self.level_threshold.is_finite() && self.level_threshold > 0.0 {
            self.level_threshold
        } else {
            DEFAULT_LEVEL_THRESHOLD
        }
    }

    /// Growth factor per level, never below 1 so the level ladder always climbs.
    pub fn effective_multiplier(&self) -> f64 {
        let m = self.level_multiplier;
        if !m.is_finite() || m == 0.0 {
            DEFAULT_LEVEL_MULTIPLIER
        } else {
            m.max(1.0)
        }
    }

    pub fn tier_progress(&self, tier: usize) -> Option<&ProgressMap> {
        self.progress_by_main_level.get(&tier)
    }

    /// Raw value stored for `date`, either on the plain map or on a tier map.
    pub fn raw_value_at(&self, date: NaiveDate, tier: Option<usize>) -> f64 {
        let map = match tier {
            Some(tier) => self.progress_by_main_level.get(&tier),
            None => Some(&self.progress_by_date),
        };
        map.and_then(|m| m.get(&date)).copied().unwrap_or(0.0)
    }

    pub fn set_raw_value_at(&mut self, date: NaiveDate, tier: Option<usize>, value: f64) {
        let map = match tier {
            Some(tier) => self.progress_by_main_level.entry(tier).or_default(),
            None => &mut self.progress_by_date,
        };
        map.insert(date, value);
    }
}

impl Group {
    pub fn new(children: impl IntoIterator<Item = impl Into<ItemId>>, target_count: usize) -> Self {
        Self {
            children: children.into_iter().map(Into::into).collect(),
            target_count,
            ..Self::default()
        }
    }

    pub fn leveled(mut self, strategy: LevelStrategy) -> Self {
        self.level_enabled = true;
        self.level_strategy = strategy;
        self
    }
}
