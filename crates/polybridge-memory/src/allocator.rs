//! Pluggable allocation seam.
//!
//! Every byte of region storage flows through a [`SharedAllocator`] supplied
//! by the embedding context. The bridge never calls the platform allocator
//! directly, so a quota-aware or pooled allocator can be swapped in without
//! touching the ownership logic.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use polybridge_core::{FfiError, FfiResult};

/// Process-wide allocate/free pair used for all region storage.
pub trait SharedAllocator: Send + Sync {
    /// Allocate `size` bytes with the given alignment. The returned memory is
    /// zeroed.
    fn allocate(&self, size: usize, align: usize) -> FfiResult<NonNull<u8>>;

    /// Free a block previously returned by [`SharedAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `allocate` on this same allocator with the
    /// same `size` and `align`, and must not be freed twice.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// The default allocator, backed by the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl SharedAllocator for SystemAllocator {
    fn allocate(&self, size: usize, align: usize) -> FfiResult<NonNull<u8>> {
        if size == 0 {
            return Err(FfiError::InvalidParameters(
                "zero-size allocation".to_string(),
            ));
        }
        let layout = Layout::from_size_align(size, align.max(1))
            .map_err(|_| FfiError::InvalidParameters(format!("bad alignment {align}")))?;
        // Zeroed so freshly shared regions never leak prior contents.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(FfiError::OutOfMemory { size })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe {
            let layout = Layout::from_size_align_unchecked(size, align.max(1));
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free() {
        let a = SystemAllocator;
        let ptr = a.allocate(64, 8).unwrap();
        unsafe {
            // Zeroed on allocation.
            assert_eq!(*ptr.as_ptr(), 0);
            a.deallocate(ptr, 64, 8);
        }
    }

    #[test]
    fn zero_size_rejected() {
        let err = SystemAllocator.allocate(0, 1).unwrap_err();
        assert!(matches!(err, FfiError::InvalidParameters(_)));
    }
}
