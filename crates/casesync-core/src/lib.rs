//! casesync Core Domain Types
//!
//! This crate contains the pure half of the task synchronization engine:
//! - Task and snapshot types
//! - The task repository and its id-set diff
//! - The adaptive backoff policy
//! - Form, message and case-closing payloads
//!
//! Nothing here touches the network or a runtime; every type can be driven
//! directly from unit tests.

pub mod backoff;
pub mod error;
pub mod form;
pub mod ids;
pub mod repository;
pub mod snapshot;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use backoff::{BackoffConfig, BackoffPolicy};
pub use error::CoreError;
pub use form::{CaseResolution, FormData, FormLayout, RedirectTarget, StartMessage};
pub use ids::{ActionId, CaseId, TaskId};
pub use repository::{TaskDiff, TaskRepository};
pub use snapshot::TaskSnapshot;
pub use status::{PollerState, PollingStatus};
pub use task::{Assignee, Task};
