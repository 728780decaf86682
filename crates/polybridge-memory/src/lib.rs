//! Cross-language memory ownership bridge.
//!
//! Tracks who may read, write, transfer, and free every shared memory region:
//! region descriptors in a generational arena, reference counting, strict
//! ownership with a pluggable compatibility predicate, GC notification, and
//! whole-registry snapshot/restore. All storage is drawn from a pluggable
//! [`SharedAllocator`] so the embedding context can pool or quota allocations.

pub mod allocator;
pub mod manager;
pub mod region;

pub use allocator::{SharedAllocator, SystemAllocator};
pub use manager::{CompatibilityPredicate, GcCallback, MemoryManager, SnapshotId};
pub use region::{AccessIntent, RegionFlags, RegionInfo, RegionPermissions, ShareMode};
