//! Contains common, primitive types shared across the telemetry agent.
//!
//! This module defines the key types used to identify scheduled tasks and
//! pipeline nodes. Both are `slotmap` keys, so a stale handle can never alias
//! a newer entry.

use slotmap::new_key_type;

new_key_type! {
    /// Uniquely identifies a periodic task registered with the `Scheduler`.
    ///
    /// Returned by `Scheduler::register`. Tasks are never removed in normal
    /// operation, so the id stays valid for the lifetime of the process.
    pub struct TaskId;

    /// Uniquely identifies a node in the pipeline arena.
    pub struct NodeId;
}
