//! Instance selection (the cold path)
//!
//! [`select_best`] runs every candidate instance once with timing enabled
//! and records the fastest supported one. The result is meant to be cached
//! by the caller and replayed through [`crate::dispatch::dispatch`] without
//! re-searching.
//!
//! The scan is linear and synchronous: one timed launch per candidate, no
//! parallelism across candidates. Unsupported candidates are skipped
//! silently — shape- and alignment-specialized instances are expected to
//! reject most problems.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::instance::{ArgumentHandle, InstanceId, KernelInstance, Operation, StreamConfig};
use crate::memory::DeviceAllocator;
use crate::registry::InstanceRegistry;

/// The recorded outcome of a selection pass
///
/// The index alone is not trusted at dispatch time; the identity token is
/// re-validated against a fresh enumeration first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Index of the winning instance in the enumeration it was measured in
    pub index: usize,
    /// Identity token of the winning instance
    pub id: InstanceId,
    /// Measured elapsed time in milliseconds
    pub elapsed_ms: f32,
}

/// Caller-owned cache slot for a selection
///
/// Defines the cache's shape and invalidation rule only: in-memory,
/// per-run, not thread-safe. Concurrent use of one slot requires external
/// synchronization, and persistence across runs is a collaborator's policy
/// layered on top (both `Selection` and [`InstanceId`] serialize).
#[derive(Debug, Default)]
pub struct SelectionCache {
    slot: Option<Selection>,
}

impl SelectionCache {
    /// Create an empty cache slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a selection
    pub fn store(&mut self, selection: Selection) {
        self.slot = Some(selection);
    }

    /// The cached selection, if any
    #[must_use]
    pub fn get(&self) -> Option<&Selection> {
        self.slot.as_ref()
    }

    /// Clear the slot after a stale dispatch; forces re-profiling
    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// Whether the slot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

/// Profile all candidates and record the fastest supported one
///
/// Runs each enumerated instance once with timing forced on, in
/// enumeration order. Ties keep the earliest index (strict `<` minimum).
/// Returns `Ok(None)` when no instance supports the problem — a valid
/// terminal outcome, not an error.
///
/// Workspace memory is acquired per attempt and released before the next
/// candidate runs, whatever the exit path.
///
/// # Errors
///
/// Returns [`crate::ElegirError::Allocation`] if a workspace cannot be
/// acquired and [`crate::ElegirError::Launch`] if a supported candidate
/// fails to run. Both abort the scan: a backend that cannot execute a
/// supported argument is broken, not slow.
pub fn select_best<Op, R, A>(
    registry: &R,
    problem: &Op::Problem,
    buffers: &Op::Buffers,
    allocator: &A,
) -> Result<Option<Selection>>
where
    Op: Operation,
    R: InstanceRegistry<Op> + ?Sized,
    A: DeviceAllocator + ?Sized,
{
    let stream = StreamConfig::timed();
    let mut best: Option<Selection> = None;

    for (index, instance) in registry.enumerate().iter().enumerate() {
        let mut argument = instance.bind_argument(problem, buffers);
        if !instance.is_supported(&argument) {
            continue;
        }

        let elapsed_ms = run_with_workspace(instance.as_ref(), &mut argument, allocator, &stream)?;

        if best.as_ref().is_none_or(|b| elapsed_ms < b.elapsed_ms) {
            best = Some(Selection {
                index,
                id: instance.instance_id(),
                elapsed_ms,
            });
        }
    }

    Ok(best)
}

/// Provision workspace, run once, release workspace
///
/// The workspace buffer is scoped to this call: it drops (and frees) on
/// every exit path, including allocation and launch failures.
pub(crate) fn run_with_workspace<Op, A>(
    instance: &dyn KernelInstance<Op>,
    argument: &mut ArgumentHandle,
    allocator: &A,
    stream: &StreamConfig,
) -> Result<f32>
where
    Op: Operation,
    A: DeviceAllocator + ?Sized,
{
    let workspace_bytes = instance.workspace_size(argument);
    let workspace = if workspace_bytes > 0 {
        Some(allocator.allocate(workspace_bytes)?)
    } else {
        None
    };
    if let Some(workspace) = &workspace {
        instance.bind_workspace(argument, workspace);
    }
    instance.run(argument, stream)
}
