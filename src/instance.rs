//! Kernel instance capability contract
//!
//! A kernel *instance* is one concrete, pre-built implementation of a tensor
//! operation. Many functionally-equivalent instances exist for one
//! operation signature (tile shapes, vector widths, layout specializations);
//! the selection pass times them and the dispatch path replays the winner.
//!
//! The contract is deliberately flat: bind an argument, ask whether it is
//! supported, provision workspace, run. No hierarchy beyond
//! [`KernelInstance`] is needed — per-instance polymorphism is a trait
//! object per operation signature.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::DeviceBuffer;

/// Element data types supported by operation signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// IEEE 754 half precision
    F16,
    /// bfloat16
    BF16,
    /// IEEE 754 single precision
    F32,
}

impl DataType {
    /// Size of one element in bytes
    #[must_use]
    pub fn size_of(self) -> usize {
        match self {
            Self::F16 => std::mem::size_of::<half::f16>(),
            Self::BF16 => std::mem::size_of::<half::bf16>(),
            Self::F32 => std::mem::size_of::<f32>(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F16 => write!(f, "f16"),
            Self::BF16 => write!(f, "bf16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for half::f16 {}
    impl Sealed for half::bf16 {}
}

/// Element types an operation can be instantiated with
///
/// Conversions through `f32` let reference instances compute in single
/// precision while honoring the signature's storage precision.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    /// Runtime tag for this element type
    const DATA_TYPE: DataType;

    /// Convert from single precision (rounding as the type requires)
    fn from_f32(v: f32) -> Self;

    /// Widen to single precision
    fn to_f32(self) -> f32;
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn from_f32(v: f32) -> Self {
        v
    }

    fn to_f32(self) -> f32 {
        self
    }
}

impl Element for half::f16 {
    const DATA_TYPE: DataType = DataType::F16;

    fn from_f32(v: f32) -> Self {
        half::f16::from_f32(v)
    }

    fn to_f32(self) -> f32 {
        self.to_f32()
    }
}

impl Element for half::bf16 {
    const DATA_TYPE: DataType = DataType::BF16;

    fn from_f32(v: f32) -> Self {
        half::bf16::from_f32(v)
    }

    fn to_f32(self) -> f32 {
        self.to_f32()
    }
}

/// Runtime descriptor of an operation signature
///
/// Identifies a family of interchangeable instances: element type, tensor
/// rank, number of reduction dimensions and operation kind. Immutable once
/// chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationSignature {
    /// Operation kind, e.g. `"gemm"` or `"batchnorm_fwd"`
    pub kind: String,
    /// Element data type
    pub element: DataType,
    /// Tensor rank
    pub rank: u32,
    /// Number of reduction dimensions
    pub num_reduce_dims: u32,
}

impl fmt::Display for OperationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{} (rank {}, {} reduce dims)",
            self.kind, self.element, self.rank, self.num_reduce_dims
        )
    }
}

/// A tensor operation with a compile-time-fixed signature
///
/// The problem and buffer types are opaque to the selection/dispatch core;
/// only instances interpret them.
pub trait Operation: 'static {
    /// Shapes, strides and scalar parameters of one invocation
    type Problem: Clone + Send + Sync;
    /// Device buffer bindings of one invocation
    type Buffers: Send + Sync;

    /// Signature identifying the family of interchangeable instances
    fn signature() -> OperationSignature;

    /// Bytes moved by one invocation, for throughput reporting
    fn bytes_moved(problem: &Self::Problem) -> u64;
}

/// Opaque identity token distinguishing one instance from another
///
/// Used to validate a cached selection against a freshly enumerated
/// registry: instance ordering is not contractually stable, the token is.
/// Serializable so a perf-database collaborator can persist it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create an identity token from a unique instance name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The token as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

/// A bound, instance-specific argument record
///
/// Created per invocation attempt from problem and buffers; each concrete
/// instance downcasts to its own record type. Destroyed after the attempt.
pub struct ArgumentHandle {
    inner: Box<dyn Any + Send>,
}

impl ArgumentHandle {
    /// Box an instance-specific argument record
    pub fn new<T: Any + Send>(record: T) -> Self {
        Self {
            inner: Box::new(record),
        }
    }

    /// Borrow the record as a concrete type
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    /// Mutably borrow the record as a concrete type
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.downcast_mut()
    }
}

impl fmt::Debug for ArgumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentHandle").finish_non_exhaustive()
    }
}

/// Execution stream configuration
///
/// One type covers both synchronization modes: timed profiling runs always
/// block, while a production dispatch may opt out of blocking via the flag
/// rather than a separate code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Measure and report kernel time (forces a blocking run)
    pub time_kernel: bool,
    /// Block until the launch completes
    pub blocking: bool,
}

impl StreamConfig {
    /// Timed, blocking configuration used by the profiling pass
    #[must_use]
    pub fn timed() -> Self {
        Self {
            time_kernel: true,
            blocking: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            time_kernel: false,
            blocking: true,
        }
    }
}

/// One concrete kernel implementation of an operation signature
///
/// All candidates satisfying the same [`Operation`] are interchangeable in
/// result; they differ in which problems they support and how fast they run.
pub trait KernelInstance<Op: Operation>: Send + Sync {
    /// Build an instance-specific argument record from problem and buffers
    fn bind_argument(&self, problem: &Op::Problem, buffers: &Op::Buffers) -> ArgumentHandle;

    /// Whether this instance can execute the bound argument
    ///
    /// Returning `false` is expected for shape- or alignment-specialized
    /// instances and causes a silent skip during profiling.
    fn is_supported(&self, argument: &ArgumentHandle) -> bool;

    /// Scratch workspace required beyond the declared buffers, in bytes
    fn workspace_size(&self, argument: &ArgumentHandle) -> usize {
        let _ = argument;
        0
    }

    /// Attach an allocated workspace to the argument record
    ///
    /// Called only when [`Self::workspace_size`] returned non-zero. The
    /// workspace outlives the subsequent [`Self::run`] call but not the
    /// invocation attempt.
    fn bind_workspace(&self, argument: &mut ArgumentHandle, workspace: &DeviceBuffer) {
        let _ = (argument, workspace);
    }

    /// Execute the bound argument, returning elapsed milliseconds
    ///
    /// Returns `0.0` when `stream.time_kernel` is false.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ElegirError::Launch`] if the launch fails.
    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32>;

    /// Identity token for cache validation
    fn instance_id(&self) -> InstanceId;
}
