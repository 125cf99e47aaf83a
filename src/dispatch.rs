//! Cached-selection dispatch (the hot path)
//!
//! [`dispatch`] replays a previously recorded [`Selection`] without
//! re-profiling. The correctness-critical step is the identity re-check:
//! registry enumeration order is not stable across runs or library
//! versions, so the instance found at the cached index must present the
//! same identity token that was measured. A mismatch is reported as
//! [`crate::ElegirError::StaleSelection`] rather than silently running
//! whatever kernel now sits at that index.

use serde::{Deserialize, Serialize};

use crate::error::{ElegirError, Result};
use crate::instance::{Operation, StreamConfig};
use crate::memory::DeviceAllocator;
use crate::profile::{run_with_workspace, Selection};
use crate::registry::InstanceRegistry;

/// Timing and throughput of one dispatched invocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Elapsed kernel time in milliseconds; `None` when timing was off
    pub elapsed_ms: Option<f32>,
    /// Bytes moved by the invocation, from the operation's data model
    pub bytes_moved: u64,
}

impl DispatchReport {
    /// Effective data transfer bandwidth in GB/s, when timed
    #[must_use]
    pub fn gb_per_sec(&self) -> Option<f32> {
        let elapsed_ms = self.elapsed_ms.filter(|ms| *ms > 0.0)?;
        Some(self.bytes_moved as f32 / 1.0e6 / elapsed_ms)
    }
}

/// Re-resolve a cached selection and run the matching instance
///
/// Fails fast if the cached index no longer resolves to an instance with
/// the cached identity. On success the instance's support for the bound
/// argument is re-confirmed, workspace is provisioned for the single run,
/// and a timing/throughput report is returned.
///
/// # Errors
///
/// - [`ElegirError::StaleSelection`]: index out of range or identity
///   mismatch; recover by invalidating the cache and re-running
///   [`crate::profile::select_best`]
/// - [`ElegirError::UnsupportedArgument`]: the resolved instance rejected
///   the argument (the problem no longer matches what was profiled)
/// - [`ElegirError::Allocation`] / [`ElegirError::Launch`]: propagated
///   from workspace provisioning and the launch itself
pub fn dispatch<Op, R, A>(
    registry: &R,
    selection: &Selection,
    problem: &Op::Problem,
    buffers: &Op::Buffers,
    allocator: &A,
    stream: &StreamConfig,
) -> Result<DispatchReport>
where
    Op: Operation,
    R: InstanceRegistry<Op> + ?Sized,
    A: DeviceAllocator + ?Sized,
{
    let instances = registry.enumerate();
    let instance = instances
        .get(selection.index)
        .ok_or_else(|| ElegirError::StaleSelection {
            index: selection.index,
            expected: selection.id.clone(),
            found: None,
        })?;

    let id = instance.instance_id();
    if id != selection.id {
        return Err(ElegirError::StaleSelection {
            index: selection.index,
            expected: selection.id.clone(),
            found: Some(id),
        });
    }

    let mut argument = instance.bind_argument(problem, buffers);
    if !instance.is_supported(&argument) {
        return Err(ElegirError::UnsupportedArgument { id });
    }

    let elapsed_ms = run_with_workspace(instance.as_ref(), &mut argument, allocator, stream)?;

    Ok(DispatchReport {
        elapsed_ms: stream.time_kernel.then_some(elapsed_ms),
        bytes_moved: Op::bytes_moved(problem),
    })
}
