//! Edit-time checks for group membership.
//!
//! # Invariants
//! - A group never reaches itself through its descendants.
//! - Under [`HierarchyPolicy::enforce_single_parent`], an item sits in at most one group.
//!
//! The evaluator does not rely on either invariant; it guards cycles itself.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::HierarchyViolation;
use crate::item::{Item, ItemId, ItemKind, Items};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HierarchyPolicy {
    pub enforce_single_parent: bool,
}

impl Default for HierarchyPolicy {
    fn default() -> Self {
        Self {
            enforce_single_parent: true,
        }
    }
}

/// Depth-first walk from `proposed_children` through group children; true as
/// soon as `parent_id` is reachable.
pub fn would_create_cycle(items: &Items, parent_id: &str, proposed_children: &[ItemId]) -> bool {
    let mut stack: Vec<&str> = proposed_children.iter().map(String::as_str).collect();
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(current) = stack.pop() {
        if current.is_empty() {
            continue;
        }
        if current == parent_id {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(Item {
            kind: ItemKind::Group(group),
            ..
        }) = items.get(current)
        {
            stack.extend(group.children.iter().map(String::as_str));
        }
    }
    false
}

/// Any group other than `excluding_group_id` that already lists `child_id`.
pub fn find_other_parent_group<'a>(
    items: &'a Items,
    child_id: &str,
    excluding_group_id: &str,
) -> Option<&'a Item> {
    items
        .values()
        .filter(|item| item.id != excluding_group_id)
        .filter(|item| item.children().iter().any(|id| id == child_id))
        .min_by(|a, b| a.id.cmp(&b.id))
}

/// Dedupes `children` (first occurrence wins, blanks dropped) and rejects
/// self-reference, cycles and, under policy, a second parent.
pub fn validate_children(
    items: &Items,
    group_id: &str,
    children: &[ItemId],
    policy: HierarchyPolicy,
) -> Result<Vec<ItemId>, HierarchyViolation> {
    let mut seen = HashSet::new();
    let mut sanitized = Vec::with_capacity(children.len());
    for child in children {
        if child.is_empty() || !seen.insert(child.as_str()) {
            continue;
        }
        if child == group_id {
            return Err(HierarchyViolation::SelfReference(group_id.to_string()));
        }
        sanitized.push(child.clone());
    }

    if would_create_cycle(items, group_id, &sanitized) {
        let child = sanitized
            .iter()
            .find(|child| would_create_cycle(items, group_id, std::slice::from_ref(*child)))
            .cloned()
            .unwrap_or_default();
        return Err(HierarchyViolation::Cycle {
            parent: group_id.to_string(),
            child,
        });
    }

    if policy.enforce_single_parent {
        for child in &sanitized {
            if let Some(other) = find_other_parent_group(items, child, group_id) {
                return Err(HierarchyViolation::MultipleParents {
                    child: child.clone(),
                    other_parent: other.id.clone(),
                });
            }
        }
    }

    Ok(sanitized)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    Cycle,
    AlreadyInGroup { group_id: ItemId, group_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOption {
    pub id: ItemId,
    pub name: String,
    pub disabled: Option<DisabledReason>,
}

/// Every item except the group itself, with the reason it cannot be picked.
pub fn selectable_children(
    items: &Items,
    group_id: &str,
    policy: HierarchyPolicy,
) -> Vec<ChildOption> {
    let mut options: Vec<ChildOption> = items
        .values()
        .filter(|item| item.id != group_id)
        .map(|item| {
            let cycle = item.is_group()
                && would_create_cycle(items, group_id, std::slice::from_ref(&item.id));
            let disabled = if cycle {
                Some(DisabledReason::Cycle)
            } else if policy.enforce_single_parent {
                find_other_parent_group(items, &item.id, group_id).map(|other| {
                    DisabledReason::AlreadyInGroup {
                        group_id: other.id.clone(),
                        group_name: other.name.clone(),
                    }
                })
            } else {
                None
            };
            ChildOption {
                id: item.id.clone(),
                name: item.name.clone(),
                disabled,
            }
        })
        .collect();
    options.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    options
}
