//! # Elegir
//!
//! Elegir (Spanish: "to choose") selects, among many functionally
//! equivalent pre-compiled kernel instances for a tensor operation, the one
//! that runs fastest on the current hardware — then caches that choice and
//! replays it without re-searching.
//!
//! ## Two-phase protocol
//!
//! - **Cold path** ([`select_best`]): enumerate every candidate instance
//!   for an operation signature, skip the ones that reject the problem,
//!   time the rest, record the winner's index and identity token.
//! - **Hot path** ([`dispatch`]): re-resolve the cached index against a
//!   fresh enumeration, re-check the identity token (registry ordering is
//!   not stable), and run. A mismatch is a stale selection, never a silent
//!   wrong-kernel launch.
//!
//! Alongside the protocol lives the tile-partitioning arithmetic
//! ([`tile`]) that maps output tile coordinates onto 1-D or 2-D execution
//! grids.
//!
//! ## Example
//!
//! ```rust
//! use elegir::host::{gemm_instances, host_buffer, HostAllocator};
//! use elegir::ops::GemmProblem;
//! use elegir::ops::gemm::GemmBuffers;
//! use elegir::{dispatch, select_best, StreamConfig};
//!
//! let problem = GemmProblem::new(32, 32, 16);
//! let buffers = GemmBuffers {
//!     a: host_buffer(vec![1.0; 32 * 16]),
//!     b: host_buffer(vec![1.0; 16 * 32]),
//!     c: host_buffer(vec![0.0; 32 * 32]),
//! };
//! let registry = gemm_instances::<f32>();
//! let allocator = HostAllocator::new();
//!
//! let selection = select_best(&registry, &problem, &buffers, &allocator)
//!     .unwrap()
//!     .expect("at least one instance supports a packed problem");
//! let report = dispatch(
//!     &registry,
//!     &selection,
//!     &problem,
//!     &buffers,
//!     &allocator,
//!     &StreamConfig::timed(),
//! )
//! .unwrap();
//! assert!(report.elapsed_ms.is_some());
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // byte counts -> f32 for GB/s is fine
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::float_cmp)] // exact comparisons are intentional in tests

pub mod dispatch;
pub mod error;
pub mod host;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod profile;
pub mod registry;
pub mod tile;

pub use dispatch::{dispatch, DispatchReport};
pub use error::{ElegirError, Result};
pub use instance::{
    ArgumentHandle, DataType, Element, InstanceId, KernelInstance, Operation, OperationSignature,
    StreamConfig,
};
pub use memory::{DeviceAllocator, DeviceBuffer};
pub use profile::{select_best, Selection, SelectionCache};
pub use registry::{InstanceRegistry, StaticRegistry};
pub use tile::{
    BlockTileShape, FlatTileIndex, GridShape, OffsetTilePartitioner, Tile1dPartitioner,
    Tile2dPartitioner, TileCoordinate,
};
