//! Conflict resolution for paused merges.
//!
//! Conflicts are detected by the sync controller from a fresh status query;
//! this module only applies a resolution once the host asks for one.

pub mod resolver;

pub use resolver::{ConflictResolver, ResolutionReport, ResolutionStrategy};
