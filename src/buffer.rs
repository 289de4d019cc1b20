//! Bounded body accumulation
//!
//! [`BoundedBuffer`] collects response body chunks up to a hard ceiling. It
//! allocates lazily on the first write, grows by doubling, and never holds
//! more than `max_size` bytes of capacity.
//!
//! Invariant: `len() <= capacity() <= max_size()` at all times.

use bytes::Bytes;
use thiserror::Error;

use crate::error::ErrorCategory;

/// Capacity allocated by the first write (64 KiB)
pub const INITIAL_CAPACITY: usize = 64 * 1024;

/// Largest pre-allocation accepted from a size hint (16 MiB)
///
/// Hints usually come from an upstream Content-Length, which is untrusted.
pub const RESERVE_CEILING: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Appending would take the buffer past its ceiling
    #[error("buffer limit exceeded: {size} + {requested} > {max_size}")]
    CapacityExceeded {
        size: usize,
        requested: usize,
        max_size: usize,
    },
    /// The allocator refused to grow the backing store
    #[error("failed to allocate {0} bytes")]
    AllocationFailed(usize),
}

impl BufferError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BufferError::CapacityExceeded { .. } => ErrorCategory::ResourceLimit,
            BufferError::AllocationFailed(_) => ErrorCategory::System,
        }
    }
}

/// Growable byte accumulator with a fixed ceiling
#[derive(Debug)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    /// Logical capacity; the allocation is sized exactly to it
    capacity: usize,
    max_size: usize,
}

impl BoundedBuffer {
    /// Create an empty, unallocated buffer
    pub fn new(max_size: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity: 0,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append bytes, failing without any change if the ceiling would be crossed
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let size = self.data.len();
        if size > self.max_size || bytes.len() > self.max_size - size {
            return Err(BufferError::CapacityExceeded {
                size,
                requested: bytes.len(),
                max_size: self.max_size,
            });
        }

        self.ensure_capacity(size + bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Pre-allocate for an expected total size
    ///
    /// The hint is clamped to `max_size` and to [`RESERVE_CEILING`]. A zero
    /// hint does nothing.
    pub fn reserve(&mut self, hint: usize) -> Result<(), BufferError> {
        if hint == 0 {
            return Ok(());
        }
        let capacity = hint.min(self.max_size).min(RESERVE_CEILING);
        self.ensure_capacity(capacity)
    }

    /// Free the backing store
    ///
    /// Safe to call any number of times, including on a buffer that never
    /// allocated.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.capacity = 0;
    }

    /// Move the accumulated bytes out, leaving the buffer released
    pub fn take_bytes(&mut self) -> Bytes {
        let data = std::mem::take(&mut self.data);
        self.capacity = 0;
        Bytes::from(data)
    }

    fn next_capacity(&self, required: usize) -> usize {
        if self.capacity == 0 {
            return INITIAL_CAPACITY.min(self.max_size).max(required);
        }

        let mut capacity = self.capacity;
        while capacity < required {
            if capacity > self.max_size / 2 {
                capacity = self.max_size;
                break;
            }
            capacity *= 2;
        }
        capacity
    }

    fn ensure_capacity(&mut self, required: usize) -> Result<(), BufferError> {
        if required <= self.capacity {
            return Ok(());
        }
        if required > self.max_size {
            return Err(BufferError::CapacityExceeded {
                size: self.data.len(),
                requested: required - self.data.len(),
                max_size: self.max_size,
            });
        }

        let new_capacity = self.next_capacity(required);
        // Vec::reserve_exact counts from len, not from the current allocation
        self.data
            .try_reserve_exact(new_capacity - self.data.len())
            .map_err(|_| BufferError::AllocationFailed(new_capacity))?;
        self.capacity = new_capacity;
        Ok(())
    }
}
