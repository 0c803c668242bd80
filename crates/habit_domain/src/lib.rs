pub mod error;
pub mod evaluate;
pub mod hierarchy;
pub mod item;
pub mod lenient;
pub mod overview;
pub mod service;
pub mod target;
pub mod value;

pub use crate::error::{DomainError, HierarchyViolation};
pub use crate::evaluate::{evaluate, EvaluationResult};
pub use crate::hierarchy::HierarchyPolicy;
pub use crate::item::{Group, Habit, Item, ItemId, ItemKind, Items, LevelStrategy};
pub use crate::service::{HabitService, HabitServiceBuilder, ItemSink};
pub use crate::target::BindingTarget;
pub use crate::value::ValueAdapter;
