//! Region descriptors and their permission/sharing metadata.

use std::ptr::NonNull;

use bitflags::bitflags;

bitflags! {
    /// Access rights on a tracked region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionPermissions: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl RegionPermissions {
    /// The default for freshly allocated shared regions.
    pub fn read_write() -> Self {
        RegionPermissions::READ | RegionPermissions::WRITE
    }
}

bitflags! {
    /// Sharing and lifecycle flags on a tracked region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegionFlags: u32 {
        /// The region was shared read-only; WRITE has been cleared.
        const READ_ONLY_SHARE = 1 << 0;
        /// Short-lived region; callers should not retain handles.
        const TEMPORARY = 1 << 1;
        /// Long-lived region that survives snapshot restores of other owners.
        const PERSISTENT = 1 << 2;
        /// Free the underlying allocation when the reference count hits zero.
        const AUTO_FREE = 1 << 3;
        /// The owner's collector is currently running over this region.
        const IN_GC = 1 << 4;
    }
}

/// How a region is shared with another language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// Allocate a new independent region for the target and copy the bytes;
    /// the source is untouched.
    Copy,
    /// Move ownership to the target in place; no reference-count change.
    Transfer,
    /// The target holds an additional reference; ownership is unchanged.
    Reference,
    /// Like `Reference`, but the region's write permission is cleared.
    ReadOnly,
}

/// Declared intent of an [`acquire`](crate::MemoryManager::acquire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    Write,
}

/// Internal descriptor of one tracked region.
///
/// The storage pointer is exclusively owned by this descriptor; the manager
/// frees it through the configured allocator when the region is retired.
#[derive(Debug)]
pub(crate) struct RegionDescriptor {
    pub storage: NonNull<u8>,
    pub size: usize,
    pub align: usize,
    pub owner: String,
    pub ref_count: u32,
    pub permissions: RegionPermissions,
    pub flags: RegionFlags,
}

// The descriptor is the sole owner of its storage and only ever accessed
// under the manager's lock.
unsafe impl Send for RegionDescriptor {}

impl RegionDescriptor {
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr(), self.size) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.storage.as_ptr(), self.size) }
    }
}

/// Caller-visible snapshot of a region descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionInfo {
    /// Size of the region in bytes.
    pub size: usize,
    /// The language that currently owns the region.
    pub owner: String,
    /// Current reference count.
    pub ref_count: u32,
    /// Access rights.
    pub permissions: RegionPermissions,
    /// Sharing and lifecycle flags.
    pub flags: RegionFlags,
}
