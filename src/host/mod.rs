//! Host (CPU) reference backend
//!
//! A complete instance provider running in system memory, so selection and
//! dispatch can be exercised end-to-end without an accelerator. Buffers
//! are f32 word arrays behind [`HostChunk`]; elements of narrower types
//! are stored widened and rounded through the element type on store.

pub mod batchnorm;
pub mod gemm;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ElegirError, Result};
use crate::memory::{DeviceAllocator, DeviceBuffer};

pub use batchnorm::batchnorm_instances;
pub use gemm::gemm_instances;

/// Backing store for host "device" memory, in f32 words
#[derive(Debug, Clone)]
pub struct HostChunk {
    words: Arc<Mutex<Vec<f32>>>,
}

impl HostChunk {
    /// Zero-initialized chunk of `words` f32 values
    #[must_use]
    pub fn zeroed(words: usize) -> Self {
        Self::from_vec(vec![0.0; words])
    }

    /// Wrap existing host data
    #[must_use]
    pub fn from_vec(words: Vec<f32>) -> Self {
        Self {
            words: Arc::new(Mutex::new(words)),
        }
    }

    /// Number of f32 words in the chunk
    #[must_use]
    pub fn len_words(&self) -> usize {
        self.lock().len()
    }

    /// Lock the backing words for access
    pub fn lock(&self) -> MutexGuard<'_, Vec<f32>> {
        self.words.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the backing words out
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.lock().clone()
    }
}

/// Wrap host data as an opaque device buffer
#[must_use]
pub fn host_buffer(words: Vec<f32>) -> DeviceBuffer {
    let bytes = words.len() * std::mem::size_of::<f32>();
    DeviceBuffer::new(HostChunk::from_vec(words), bytes)
}

/// Read a host-backed buffer's contents
///
/// Returns `None` for buffers allocated by a different backend.
#[must_use]
pub fn read_back(buffer: &DeviceBuffer) -> Option<Vec<f32>> {
    buffer.downcast_ref::<HostChunk>().map(HostChunk::to_vec)
}

/// System-memory allocator backing the reference instances
///
/// An optional byte limit lets tests exercise allocation-failure
/// propagation.
#[derive(Debug, Default)]
pub struct HostAllocator {
    limit: Option<usize>,
}

impl HostAllocator {
    /// Unlimited host allocator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that rejects requests above `bytes`
    #[must_use]
    pub fn with_limit(bytes: usize) -> Self {
        Self { limit: Some(bytes) }
    }
}

impl DeviceAllocator for HostAllocator {
    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer> {
        if let Some(limit) = self.limit {
            if bytes > limit {
                return Err(ElegirError::Allocation {
                    requested: bytes,
                    reason: format!("exceeds host allocator limit of {limit} bytes"),
                });
            }
        }
        let words = bytes.div_ceil(std::mem::size_of::<f32>());
        Ok(DeviceBuffer::new(HostChunk::zeroed(words), bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_rounds_up_to_words() {
        let allocator = HostAllocator::new();
        let buf = allocator.allocate(10).unwrap();
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.downcast_ref::<HostChunk>().unwrap().len_words(), 3);
    }

    #[test]
    fn test_limit_rejects_oversized_request() {
        let allocator = HostAllocator::with_limit(64);
        assert!(allocator.allocate(64).is_ok());
        let err = allocator.allocate(65).unwrap_err();
        assert!(matches!(err, ElegirError::Allocation { requested: 65, .. }));
    }

    #[test]
    fn test_host_buffer_roundtrip() {
        let buf = host_buffer(vec![1.0, 2.0, 3.0]);
        assert_eq!(buf.len(), 12);
        assert_eq!(read_back(&buf).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_read_back_foreign_buffer() {
        let foreign = DeviceBuffer::new(vec![0u8; 4], 4);
        assert!(read_back(&foreign).is_none());
    }

    #[test]
    fn test_chunk_shares_backing_storage() {
        let chunk = HostChunk::zeroed(4);
        let alias = chunk.clone();
        chunk.lock()[2] = 7.0;
        assert_eq!(alias.to_vec()[2], 7.0);
    }
}
