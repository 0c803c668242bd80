use std::collections::HashMap;

use chrono::NaiveDate;
use parking_lot::RwLock;
use tracing::instrument;

use crate::{
    error::{DomainError, Result},
    evaluate::{evaluate, EvaluationResult},
    hierarchy::{self, ChildOption, HierarchyPolicy},
    item::{Habit, Item, ItemId, ItemKind, Items},
    overview,
    target::BindingTarget,
};

/// The external store's item write path. Implementations persist whole items.
pub trait ItemSink: Send + Sync {
    fn update_item(&self, item: &Item) -> anyhow::Result<()>;
    fn delete_item(&self, id: &str) -> anyhow::Result<()>;
}

/// Local view of a user's items plus the write path back to the store.
pub struct HabitService {
    items: RwLock<Items>,
    sink: Option<Box<dyn ItemSink>>,
    policy: HierarchyPolicy,
}

pub struct HabitServiceBuilder {
    items: Items,
    sink: Option<Box<dyn ItemSink>>,
    policy: HierarchyPolicy,
}

impl HabitServiceBuilder {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            sink: None,
            policy: HierarchyPolicy::default(),
        }
    }

    pub fn with_items(mut self, items: impl IntoIterator<Item = Item>) -> Self {
        self.items
            .extend(items.into_iter().map(|item| (item.id.clone(), item)));
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn ItemSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_policy(mut self, policy: HierarchyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> HabitService {
        HabitService {
            items: RwLock::new(self.items),
            sink: self.sink,
            policy: self.policy,
        }
    }
}

impl Default for HabitServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HabitService {
    pub fn builder() -> HabitServiceBuilder {
        HabitServiceBuilder::new()
    }

    pub fn policy(&self) -> HierarchyPolicy {
        self.policy
    }

    pub fn items(&self) -> Items {
        self.items.read().clone()
    }

    pub fn get_item(&self, id: &str) -> Option<Item> {
        self.items.read().get(id).cloned()
    }

    pub fn evaluate(&self, id: &str, date: NaiveDate) -> EvaluationResult {
        evaluate(&self.items.read(), id, date)
    }

    pub fn top_level_ids(&self) -> Vec<ItemId> {
        let items = self.items.read();
        overview::top_level_items(&items)
            .into_iter()
            .map(|item| item.id.clone())
            .collect()
    }

    pub fn selectable_children(&self, group_id: &str) -> Vec<ChildOption> {
        hierarchy::selectable_children(&self.items.read(), group_id, self.policy)
    }

    /// Replaces the local items with a snapshot pushed by the store.
    pub fn apply_remote_items(&self, items: impl IntoIterator<Item = Item>) {
        let fresh: Items = items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        tracing::debug!(count = fresh.len(), "applying remote item snapshot");
        *self.items.write() = fresh;
    }

    /// Validates and writes a complete item. Groups have their children
    /// sanitized; a fresh leveled habit gets its first tier map.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub fn upsert_item(&self, mut item: Item) -> Result<Item> {
        let mut items = self.items.write();
        match &mut item.kind {
            ItemKind::Group(group) => {
                let sanitized =
                    hierarchy::validate_children(&items, &item.id, &group.children, self.policy)
                        .map_err(|violation| {
                            tracing::warn!(%violation, "rejected hierarchy edit");
                            DomainError::from(violation)
                        })?;
                group.children = sanitized;
            }
            ItemKind::Habit(habit) => {
                if habit.level_enabled {
                    habit.progress_by_main_level.entry(0).or_default();
                }
            }
            ItemKind::Unknown => {}
        }
        self.write_item(&mut items, item.clone())?;
        Ok(item)
    }

    /// Removes `id` and strips it from every group that listed it.
    #[instrument(skip(self))]
    pub fn delete_item(&self, id: &str) -> Result<()> {
        let mut items = self.items.write();
        if !items.contains_key(id) {
            return Err(DomainError::ItemNotFound(id.to_string()));
        }
        let parents: Vec<Item> = items
            .values()
            .filter(|item| item.children().iter().any(|child| child == id))
            .cloned()
            .collect();
        for mut parent in parents {
            if let Some(group) = parent.as_group_mut() {
                group.children.retain(|child| child != id);
            }
            self.write_item(&mut items, parent)?;
        }
        if let Some(sink) = &self.sink {
            sink.delete_item(id)?;
        }
        items.remove(id);
        Ok(())
    }

    pub fn raw_value_at(&self, target: &BindingTarget) -> f64 {
        self.items
            .read()
            .get(&target.item_id)
            .and_then(Item::as_habit)
            .map(|habit| habit.raw_value_at(target.date, target.main_level_index))
            .unwrap_or(0.0)
    }

    #[instrument(skip(self), fields(target = %target))]
    pub fn set_raw_value_at(&self, target: &BindingTarget, value: f64) -> Result<()> {
        let mut items = self.items.write();
        self.store_raw(&mut items, target, value)
    }

    /// Adds `delta` to the stored value, clamping at zero. Returns the new value.
    #[instrument(skip(self), fields(target = %target))]
    pub fn add_raw_value_at(&self, target: &BindingTarget, delta: f64) -> Result<f64> {
        let mut items = self.items.write();
        let current = Self::habit_at(&items, target)?
            .raw_value_at(target.date, target.main_level_index);
        let next = (current + delta).max(0.0);
        self.store_raw(&mut items, target, next)?;
        Ok(next)
    }

    /// Parses user input in display units. Invalid input writes nothing and
    /// returns `Ok(None)`.
    pub fn set_display_value(&self, target: &BindingTarget, input: &str) -> Result<Option<f64>> {
        let mut items = self.items.write();
        let adapter = Self::habit_at(&items, target)?.adapter();
        let Some(raw) = adapter.parse_input(input) else {
            tracing::debug!(input, "ignoring unparsable display value");
            return Ok(None);
        };
        self.store_raw(&mut items, target, raw)?;
        Ok(Some(raw))
    }

    pub fn add_display_value(&self, target: &BindingTarget, delta: f64) -> Result<f64> {
        let adapter = {
            let items = self.items.read();
            Self::habit_at(&items, target)?.adapter()
        };
        let raw_delta = adapter.delta_to_raw(delta);
        if raw_delta == 0.0 {
            return Ok(self.raw_value_at(target));
        }
        self.add_raw_value_at(target, raw_delta)
    }

    pub fn upgrade_main_level(&self, id: &str) -> Result<usize> {
        self.shift_main_level(id, 1)
    }

    pub fn downgrade_main_level(&self, id: &str) -> Result<usize> {
        self.shift_main_level(id, -1)
    }
}

impl HabitService {
    fn habit_at<'a>(items: &'a Items, target: &BindingTarget) -> Result<&'a Habit> {
        let item = items
            .get(&target.item_id)
            .ok_or_else(|| DomainError::ItemNotFound(target.item_id.clone()))?;
        item.as_habit()
            .ok_or_else(|| DomainError::NotAHabit(target.item_id.clone()))
    }

    fn store_raw(&self, items: &mut Items, target: &BindingTarget, value: f64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(DomainError::InvalidValue {
                item_id: target.item_id.clone(),
                value,
            });
        }
        let mut item = items
            .get(&target.item_id)
            .cloned()
            .ok_or_else(|| DomainError::ItemNotFound(target.item_id.clone()))?;
        let habit = item
            .as_habit_mut()
            .ok_or_else(|| DomainError::NotAHabit(target.item_id.clone()))?;
        habit.set_raw_value_at(target.date, target.main_level_index, value);
        self.write_item(items, item)
    }

    fn shift_main_level(&self, id: &str, step: isize) -> Result<usize> {
        let mut items = self.items.write();
        let mut item = items
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::ItemNotFound(id.to_string()))?;
        let habit = item
            .as_habit_mut()
            .ok_or_else(|| DomainError::NotAHabit(id.to_string()))?;
        let current = habit.current_main_level;
        let last = habit.main_levels.len().saturating_sub(1);
        if !habit.level_enabled || habit.main_levels.is_empty() {
            return Ok(current);
        }
        let next = current.saturating_add_signed(step).min(last);
        if next == current {
            return Ok(current);
        }
        habit.current_main_level = next;
        habit.progress_by_main_level.entry(next).or_default();
        tracing::debug!(item_id = id, from = current, to = next, "switched main level");
        self.write_item(&mut items, item)?;
        Ok(next)
    }

    /// Sink first, then the local map, so a failed write leaves both untouched.
    fn write_item(&self, items: &mut Items, item: Item) -> Result<()> {
        if let Some(sink) = &self.sink {
            sink.update_item(&item)?;
        }
        items.insert(item.id.clone(), item);
        Ok(())
    }
}
