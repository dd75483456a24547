//! groundwork-state
//!
//! Persistence for apply history and last-known resource state: an
//! append-only log of execution records plus a materialized snapshot,
//! both keyed by document identity.

pub mod error;
pub mod record;
pub mod snapshot;
pub mod store;

pub use crate::error::StateError;
pub use crate::record::{ApplyAction, ExecutionRecord, Outcome};
pub use crate::snapshot::{ResourceState, ResourceStatus, StateSnapshot, SNAPSHOT_VERSION};
pub use crate::store::StateStore;
