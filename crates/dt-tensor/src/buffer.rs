//! The narrow byte-store capability the tensor core depends on.
//!
//! Backends implement [`DeviceBuffer`] and [`BufferAllocator`]; the core
//! performs all storage I/O through these traits and never names a platform
//! API, so backend choice is runtime injection rather than source
//! branching. [`HostBuffer`] is the in-memory reference implementation.

use crate::error::{Result, TensorError};
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

/// An opaque, sized byte store with offset reads and writes.
///
/// A buffer is owned by exactly one tensor. After `release`, reads and
/// writes fail with [`TensorError::BufferReleased`] and `size` reports
/// zero; `release` itself is idempotent.
pub trait DeviceBuffer: Debug + Send + Sync {
    /// Buffer length in bytes.
    fn size(&self) -> usize;

    /// Copies `src` into the buffer starting at `offset`.
    ///
    /// Fails with `BufferOverflow` if `offset + src.len()` exceeds the
    /// buffer size. A zero-length write is a successful no-op.
    fn write_at(&self, offset: usize, src: &[u8]) -> Result<()>;

    /// Fills `dst` from the buffer starting at `offset`.
    ///
    /// Fails with `BufferOverflow` if `offset + dst.len()` exceeds the
    /// buffer size. A zero-length read is a successful no-op.
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Releases the underlying storage. Safe to call more than once.
    fn release(&self);

    /// Copies `src` into the buffer starting at offset zero.
    fn write(&self, src: &[u8]) -> Result<()> {
        self.write_at(0, src)
    }

    /// Reads `len` bytes starting at `offset` into a fresh vector.
    fn read_n(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut dst = vec![0u8; len];
        self.read_at(offset, &mut dst)?;
        Ok(dst)
    }
}

/// Allocates device buffers.
///
/// Injected into tensor constructors so the core compiles once and backend
/// selection happens at startup.
pub trait BufferAllocator: Debug {
    /// Allocates a buffer of `size` bytes.
    ///
    /// Fails with `InvalidBufferSize` for a zero size; any other failure is
    /// the backend's allocation error, passed through unchanged.
    fn allocate(&self, size: usize) -> Result<Arc<dyn DeviceBuffer>>;
}

/// In-memory buffer, zero-filled on allocation.
///
/// Serves as the test backend and as a reference for device
/// implementations.
#[derive(Debug)]
pub struct HostBuffer {
    data: RwLock<Option<Vec<u8>>>,
}

impl HostBuffer {
    pub fn new(size: usize) -> Self {
        HostBuffer {
            data: RwLock::new(Some(vec![0u8; size])),
        }
    }
}

impl DeviceBuffer for HostBuffer {
    fn size(&self) -> usize {
        let guard = self.data.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map_or(0, Vec::len)
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        let data = guard.as_mut().ok_or(TensorError::BufferReleased)?;
        if offset + src.len() > data.len() {
            return Err(TensorError::BufferOverflow {
                offset,
                len: src.len(),
                size: data.len(),
            });
        }
        if src.is_empty() {
            return Ok(());
        }
        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let guard = self.data.read().unwrap_or_else(|e| e.into_inner());
        let data = guard.as_ref().ok_or(TensorError::BufferReleased)?;
        if offset + dst.len() > data.len() {
            return Err(TensorError::BufferOverflow {
                offset,
                len: dst.len(),
                size: data.len(),
            });
        }
        if dst.is_empty() {
            return Ok(());
        }
        dst.copy_from_slice(&data[offset..offset + dst.len()]);
        Ok(())
    }

    fn release(&self) {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        if let Some(data) = guard.take() {
            log::trace!("released host buffer of {} bytes", data.len());
        }
    }
}

/// Allocates zero-filled [`HostBuffer`]s.
#[derive(Debug, Clone, Default)]
pub struct HostAllocator;

impl HostAllocator {
    pub fn new() -> Self {
        HostAllocator
    }
}

impl BufferAllocator for HostAllocator {
    fn allocate(&self, size: usize) -> Result<Arc<dyn DeviceBuffer>> {
        if size == 0 {
            return Err(TensorError::InvalidBufferSize(size));
        }
        log::trace!("allocating host buffer of {} bytes", size);
        Ok(Arc::new(HostBuffer::new(size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let buf = HostBuffer::new(8);
        buf.write_at(2, &[1, 2, 3]).unwrap();
        assert_eq!(buf.read_n(0, 8).unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
        assert_eq!(buf.read_n(2, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_overflow() {
        let buf = HostBuffer::new(4);
        assert!(matches!(
            buf.write_at(2, &[0; 3]),
            Err(TensorError::BufferOverflow { .. })
        ));
        assert!(matches!(
            buf.read_n(4, 1),
            Err(TensorError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_zero_length_is_noop() {
        let buf = HostBuffer::new(4);
        buf.write_at(4, &[]).unwrap();
        assert_eq!(buf.read_n(4, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_release_is_idempotent() {
        let buf = HostBuffer::new(4);
        buf.release();
        buf.release();
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn test_access_after_release() {
        let buf = HostBuffer::new(4);
        buf.release();
        assert!(matches!(
            buf.read_n(0, 1),
            Err(TensorError::BufferReleased)
        ));
        assert!(matches!(
            buf.write(&[1]),
            Err(TensorError::BufferReleased)
        ));
    }

    #[test]
    fn test_allocator_rejects_zero_size() {
        let alloc = HostAllocator::new();
        assert!(matches!(
            alloc.allocate(0),
            Err(TensorError::InvalidBufferSize(0))
        ));
        let buf = alloc.allocate(16).unwrap();
        assert_eq!(buf.size(), 16);
    }
}
