//! Timeline synchronization and turn grouping.
//!
//! Two session feeds (messages and tool calls) are reconciled into one
//! chronologically ordered list of `TimelineItem`s. Per-token updates go
//! through the incremental `sync` path; the expensive `grouping` pass runs
//! only when the scheduler says a generation has finished.

pub mod actor;
pub mod grouping;
pub mod index;
pub mod scheduler;
pub mod scroll;
pub mod state;
pub mod summary;
pub mod sync;
pub mod transcript;
pub mod types;

pub use actor::{TimelineHandle, TimelineView};
pub use types::TimelineItem;
