//! Device memory capability
//!
//! Selection and dispatch only touch device memory in one place: scratch
//! workspace acquired immediately before a run and released on every exit
//! path. [`DeviceBuffer`] carries its backing storage as an opaque box so
//! the same protocol works against any backend; storage is freed when the
//! buffer drops, which gives the scoped-workspace discipline for free.

use std::any::Any;

use crate::error::Result;

/// Allocates device memory for workspaces and buffers
///
/// Implementations must release backing storage when the returned
/// [`DeviceBuffer`] is dropped. Workspace sizes vary per instance, so a
/// buffer must never be reused across candidates during profiling.
pub trait DeviceAllocator: Send + Sync {
    /// Allocate `bytes` of device memory
    ///
    /// # Errors
    ///
    /// Returns [`crate::ElegirError::Allocation`] if the backing store
    /// cannot satisfy the request.
    fn allocate(&self, bytes: usize) -> Result<DeviceBuffer>;
}

/// An owned region of device memory
///
/// The storage is opaque to the selection/dispatch core; kernel instances
/// downcast it to their backend's concrete type. Dropping the buffer frees
/// the storage.
pub struct DeviceBuffer {
    storage: Box<dyn Any + Send + Sync>,
    len: usize,
}

impl DeviceBuffer {
    /// Wrap backend storage as an opaque buffer of `len` bytes
    pub fn new<T: Any + Send + Sync>(storage: T, len: usize) -> Self {
        Self {
            storage: Box::new(storage),
            len,
        }
    }

    /// Size of the buffer in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is zero-sized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the backing storage as a concrete backend type
    ///
    /// Returns `None` when the buffer was allocated by a different backend.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.storage.downcast_ref()
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_len_and_downcast() {
        let buf = DeviceBuffer::new(vec![0u8; 32], 32);
        assert_eq!(buf.len(), 32);
        assert!(!buf.is_empty());
        assert!(buf.downcast_ref::<Vec<u8>>().is_some());
        assert!(buf.downcast_ref::<Vec<f32>>().is_none());
    }

    #[test]
    fn test_zero_sized_buffer() {
        let buf = DeviceBuffer::new((), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_debug_does_not_expose_storage() {
        let buf = DeviceBuffer::new(vec![1u8, 2, 3], 3);
        let s = format!("{buf:?}");
        assert!(s.contains("len: 3"));
    }
}
