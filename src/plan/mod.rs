//! Plan and story type definitions.
//!
//! Core domain types for the durable execution plan:
//! - `Plan`: Ordered list of stories plus run-level flags
//! - `Story`: One discrete unit of work with lifecycle flags
//! - `PlanStore`: Exclusive-access persistence layer for the plan document

pub(crate) mod lock;
mod store;
mod types;

pub use lock::{LockInfo, PlanLock, PlanLockGuard};
pub use store::PlanStore;
pub use types::{ClaimedStory, Plan, Progress, Story};
