use thiserror::Error;

use crate::item::ItemId;

/// Why a hierarchy edit was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyViolation {
    #[error("group `{0}` cannot contain itself")]
    SelfReference(ItemId),
    #[error("adding `{child}` to `{parent}` would create a circular group reference")]
    Cycle { parent: ItemId, child: ItemId },
    #[error("`{child}` is already in group `{other_parent}`")]
    MultipleParents { child: ItemId, other_parent: ItemId },
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(#[from] HierarchyViolation),
    #[error("item `{0}` not found")]
    ItemNotFound(ItemId),
    #[error("item `{0}` is not a habit")]
    NotAHabit(ItemId),
    #[error("invalid value {value} for `{item_id}`")]
    InvalidValue { item_id: ItemId, value: f64 },
    #[error(transparent)]
    Sink(#[from] anyhow::Error),
}

pub type Result<T, E = DomainError> = std::result::Result<T, E>;
