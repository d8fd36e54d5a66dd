//! Core domain types: identifiers, policies, tasks, and morsels.

pub mod ids;
pub mod morsel;
pub mod policy;
pub mod task;

pub use ids::{AccountId, ContentId, SpaceId, StoreId};
pub use morsel::{Morsel, MorselIdentity};
pub use policy::{PolicyLoadError, PolicySnapshot, StorePolicy, TenantPolicy};
pub use task::{DuplicationTask, Task, TaskParseError, TaskType};
