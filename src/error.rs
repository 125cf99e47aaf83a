//! Error types for selection and dispatch
//!
//! The taxonomy keeps the four failure classes distinct so callers can
//! decide whether to re-profile, abort, or fall back to a reference path:
//!
//! - `StaleSelection`: a cached selection no longer resolves to the
//!   instance it was measured against (recover by re-running selection)
//! - `UnsupportedArgument`: an instance rejected the bound argument at
//!   dispatch time (during profiling the same condition is a silent skip)
//! - `Allocation`: workspace memory could not be acquired (fatal to the
//!   current invocation, never retried automatically)
//! - `Launch`: a kernel launch failed outright
//!
//! "No supported instance found" is deliberately NOT an error: it is the
//! `Ok(None)` outcome of [`crate::profile::select_best`].

use thiserror::Error;

use crate::instance::InstanceId;

/// Error type for selection and dispatch operations
#[derive(Debug, Error)]
pub enum ElegirError {
    /// Cached selection no longer resolves to the measured instance
    #[error(
        "stale selection at index {index}: expected instance '{expected}', \
         registry now has {}",
        found.as_ref().map_or_else(|| "fewer instances".to_string(), |id| format!("'{id}'"))
    )]
    StaleSelection {
        /// Index recorded at selection time
        index: usize,
        /// Identity token recorded at selection time
        expected: InstanceId,
        /// Identity found at that index now, `None` if out of range
        found: Option<InstanceId>,
    },

    /// Instance rejected the bound argument at dispatch time
    #[error("instance '{id}' no longer supports the bound argument")]
    UnsupportedArgument {
        /// Identity of the rejecting instance
        id: InstanceId,
    },

    /// Workspace or buffer allocation failed
    #[error("allocation of {requested} bytes failed: {reason}")]
    Allocation {
        /// Requested size in bytes
        requested: usize,
        /// Allocator-provided failure reason
        reason: String,
    },

    /// Kernel launch failed
    #[error("launch of instance '{id}' failed: {reason}")]
    Launch {
        /// Identity of the failing instance
        id: InstanceId,
        /// Backend-provided failure reason
        reason: String,
    },

    /// Block tile extents must all be non-zero
    #[error(
        "invalid block tile shape {m_per_block}x{n_per_block}x{k_per_block}: \
         all extents must be > 0"
    )]
    InvalidTileShape {
        /// Output tile rows per block
        m_per_block: u32,
        /// Output tile columns per block
        n_per_block: u32,
        /// Reduction extent per loop iteration
        k_per_block: u32,
    },
}

/// Result type alias for selection and dispatch operations
pub type Result<T> = std::result::Result<T, ElegirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_selection_display_out_of_range() {
        let err = ElegirError::StaleSelection {
            index: 7,
            expected: InstanceId::new("blocked_gemm_f32_128x128x32"),
            found: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("index 7"));
        assert!(msg.contains("blocked_gemm_f32_128x128x32"));
        assert!(msg.contains("fewer instances"));
    }

    #[test]
    fn test_stale_selection_display_mismatch() {
        let err = ElegirError::StaleSelection {
            index: 0,
            expected: InstanceId::new("a"),
            found: Some(InstanceId::new("b")),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a'"));
        assert!(msg.contains("'b'"));
    }

    #[test]
    fn test_allocation_display() {
        let err = ElegirError::Allocation {
            requested: 4096,
            reason: "limit exceeded".to_string(),
        };
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_invalid_tile_shape_display() {
        let err = ElegirError::InvalidTileShape {
            m_per_block: 128,
            n_per_block: 0,
            k_per_block: 32,
        };
        assert!(err.to_string().contains("128x0x32"));
    }
}
