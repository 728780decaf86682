//! The memory ownership bridge.
//!
//! [`MemoryManager`] is the single source of truth for who may read, write,
//! or free a shared memory region, independent of any garbage collector.
//! Regions live in a generational arena: handles are index+generation pairs,
//! so a stale handle (freed region, or a registry rebuilt by a snapshot
//! restore) is detected instead of dereferencing a dangling pointer.
//!
//! Every logical operation is one critical section on the arena lock:
//! "find region, then act" never splits into separate lookup and mutate
//! steps. The lock is always dropped before a GC callback runs, so callbacks
//! may re-enter the bridge.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use polybridge_core::{FfiError, FfiResult, RegionHandle};

use crate::allocator::{SharedAllocator, SystemAllocator};
use crate::region::{
    AccessIntent, RegionDescriptor, RegionFlags, RegionInfo, RegionPermissions, ShareMode,
};

/// Callback invoked when a language's collector runs.
pub type GcCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Predicate deciding whether `requester` may access regions owned by
/// `owner` under strict-ownership mode.
pub type CompatibilityPredicate = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Opaque identifier of a point-in-time snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(u64);

struct SavedRegion {
    owner: String,
    ref_count: u32,
    permissions: RegionPermissions,
    flags: RegionFlags,
    align: usize,
    bytes: Vec<u8>,
}

struct Snapshot {
    creator: String,
    regions: Vec<SavedRegion>,
}

struct Slot {
    generation: u32,
    descriptor: Option<RegionDescriptor>,
}

struct GcCallbackEntry {
    /// When set, only notifications for this language fire the callback.
    filter: Option<String>,
    callback: GcCallback,
}

#[derive(Default)]
struct Registry {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    snapshots: FxHashMap<u64, Snapshot>,
    next_snapshot_id: u64,
    strict_ownership: bool,
    compatibility: Option<CompatibilityPredicate>,
}

impl Registry {
    fn get(&self, handle: RegionHandle) -> FfiResult<&RegionDescriptor> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.descriptor.as_ref())
            .ok_or(FfiError::InvalidMemoryRegion)
    }

    fn get_mut(&mut self, handle: RegionHandle) -> FfiResult<&mut RegionDescriptor> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.descriptor.as_mut())
            .ok_or(FfiError::InvalidMemoryRegion)
    }

    fn insert(&mut self, descriptor: RegionDescriptor) -> RegionHandle {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.descriptor = Some(descriptor);
            RegionHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                descriptor: Some(descriptor),
            });
            RegionHandle::new(index, 0)
        }
    }

    /// Free the region's storage and retire its slot.
    fn retire(&mut self, handle: RegionHandle, allocator: &dyn SharedAllocator) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.generation == handle.generation {
                if let Some(descriptor) = slot.descriptor.take() {
                    unsafe {
                        allocator.deallocate(descriptor.storage, descriptor.size, descriptor.align);
                    }
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free_list.push(handle.index);
                }
            }
        }
    }

    /// Strict-ownership gate for a cross-language access.
    fn check_compatible(&self, descriptor: &RegionDescriptor, lang: &str) -> FfiResult<()> {
        if !self.strict_ownership || descriptor.owner == lang {
            return Ok(());
        }
        let allowed = self
            .compatibility
            .as_ref()
            .map(|pred| pred(&descriptor.owner, lang))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(FfiError::IncompatibleLanguage {
                owner: descriptor.owner.clone(),
                requester: lang.to_string(),
            })
        }
    }
}

/// The cross-language memory ownership bridge.
pub struct MemoryManager {
    allocator: Arc<dyn SharedAllocator>,
    registry: Mutex<Registry>,
    gc_callbacks: Mutex<Vec<GcCallbackEntry>>,
}

impl MemoryManager {
    /// Create a bridge backed by the system allocator.
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(SystemAllocator))
    }

    /// Create a bridge backed by a caller-supplied allocator.
    pub fn with_allocator(allocator: Arc<dyn SharedAllocator>) -> Self {
        MemoryManager {
            allocator,
            registry: Mutex::new(Registry::default()),
            gc_callbacks: Mutex::new(Vec::new()),
        }
    }

    // ==========================================================================
    // Configuration
    // ==========================================================================

    /// Enable or disable strict-ownership mode.
    pub fn set_strict_ownership(&self, strict: bool) {
        self.registry.lock().unwrap().strict_ownership = strict;
    }

    /// Install the compatibility predicate consulted under strict mode.
    pub fn set_compatibility_predicate(&self, predicate: Option<CompatibilityPredicate>) {
        self.registry.lock().unwrap().compatibility = predicate;
    }

    // ==========================================================================
    // Region lifecycle: UNTRACKED -> TRACKED(ref=1) -> TRACKED(ref=n) -> FREED
    // ==========================================================================

    /// Allocate a fresh shared region owned by `lang`.
    ///
    /// The region starts with read/write permissions, one reference, and the
    /// auto-free flag set.
    pub fn alloc_shared(&self, size: usize, lang: &str) -> FfiResult<RegionHandle> {
        self.alloc_shared_with(
            size,
            lang,
            RegionPermissions::read_write(),
            RegionFlags::AUTO_FREE,
        )
    }

    /// Allocate a shared region with explicit permissions and flags.
    pub fn alloc_shared_with(
        &self,
        size: usize,
        lang: &str,
        permissions: RegionPermissions,
        flags: RegionFlags,
    ) -> FfiResult<RegionHandle> {
        if lang.is_empty() {
            return Err(FfiError::InvalidParameters(
                "empty owner language".to_string(),
            ));
        }
        let storage = self.allocator.allocate(size, 1)?;
        let descriptor = RegionDescriptor {
            storage,
            size,
            align: 1,
            owner: lang.to_string(),
            ref_count: 1,
            permissions,
            flags,
        };
        Ok(self.registry.lock().unwrap().insert(descriptor))
    }

    /// Adopt an externally produced buffer into the tracked state.
    ///
    /// The bytes are copied into bridge-owned storage; the caller keeps its
    /// original buffer.
    pub fn track_region(
        &self,
        bytes: &[u8],
        lang: &str,
        permissions: RegionPermissions,
        flags: RegionFlags,
    ) -> FfiResult<RegionHandle> {
        let handle = self.alloc_shared_with(bytes.len(), lang, permissions, flags)?;
        let mut registry = self.registry.lock().unwrap();
        let descriptor = registry.get_mut(handle)?;
        descriptor.bytes_mut().copy_from_slice(bytes);
        Ok(handle)
    }

    /// Share a region with another language.
    ///
    /// Returns the handle the target language should use: a fresh handle for
    /// [`ShareMode::Copy`], the original handle otherwise.
    pub fn share(
        &self,
        handle: RegionHandle,
        from: &str,
        to: &str,
        mode: ShareMode,
    ) -> FfiResult<RegionHandle> {
        let mut registry = self.registry.lock().unwrap();
        match mode {
            ShareMode::Copy => {
                let (bytes, permissions, flags, align) = {
                    let descriptor = registry.get(handle)?;
                    (
                        descriptor.bytes().to_vec(),
                        descriptor.permissions,
                        descriptor.flags,
                        descriptor.align,
                    )
                };
                let storage = self.allocator.allocate(bytes.len(), align)?;
                let mut copy = RegionDescriptor {
                    storage,
                    size: bytes.len(),
                    align,
                    owner: to.to_string(),
                    ref_count: 1,
                    permissions,
                    flags,
                };
                copy.bytes_mut().copy_from_slice(&bytes);
                Ok(registry.insert(copy))
            }
            ShareMode::Transfer => {
                let descriptor = registry.get_mut(handle)?;
                if descriptor.owner != from {
                    return Err(FfiError::PermissionDenied(format!(
                        "'{from}' is not the owner of the region"
                    )));
                }
                descriptor.owner = to.to_string();
                Ok(handle)
            }
            ShareMode::Reference => {
                let descriptor = registry.get_mut(handle)?;
                descriptor.ref_count += 1;
                Ok(handle)
            }
            ShareMode::ReadOnly => {
                let descriptor = registry.get_mut(handle)?;
                descriptor.ref_count += 1;
                descriptor.permissions.remove(RegionPermissions::WRITE);
                descriptor.flags.insert(RegionFlags::READ_ONLY_SHARE);
                Ok(handle)
            }
        }
    }

    /// Take a reference on a region for the given access intent.
    pub fn acquire(
        &self,
        handle: RegionHandle,
        lang: &str,
        intent: AccessIntent,
    ) -> FfiResult<()> {
        let mut registry = self.registry.lock().unwrap();
        {
            let descriptor = registry.get(handle)?;
            if intent == AccessIntent::Write
                && !descriptor.permissions.contains(RegionPermissions::WRITE)
            {
                return Err(FfiError::PermissionDenied(
                    "region is not writable".to_string(),
                ));
            }
            registry.check_compatible(descriptor, lang)?;
        }
        registry.get_mut(handle)?.ref_count += 1;
        Ok(())
    }

    /// Drop one reference.
    ///
    /// The decrement that would reach zero is owner-only; the underlying
    /// allocation is released only at zero with the auto-free flag set.
    pub fn release(&self, handle: RegionHandle, lang: &str) -> FfiResult<()> {
        let mut registry = self.registry.lock().unwrap();
        let descriptor = registry.get_mut(handle)?;
        if descriptor.ref_count == 0 {
            return Err(FfiError::InvalidParameters(
                "reference count is already zero".to_string(),
            ));
        }
        if descriptor.ref_count == 1 && descriptor.owner != lang {
            // Rejected up front: only the owner may take the count to zero.
            return Err(FfiError::PermissionDenied(format!(
                "'{lang}' may not release the last reference of a region owned by '{}'",
                descriptor.owner
            )));
        }
        descriptor.ref_count -= 1;
        if descriptor.ref_count == 0 && descriptor.flags.contains(RegionFlags::AUTO_FREE) {
            registry.retire(handle, self.allocator.as_ref());
        }
        Ok(())
    }

    /// Owner-only release of the owner's reference.
    ///
    /// While other references remain the region survives; the final owner
    /// release frees it (with auto-free set).
    pub fn free_shared(&self, handle: RegionHandle, lang: &str) -> FfiResult<()> {
        {
            let registry = self.registry.lock().unwrap();
            let descriptor = registry.get(handle)?;
            if descriptor.owner != lang {
                return Err(FfiError::PermissionDenied(format!(
                    "'{lang}' is not the owner of the region"
                )));
            }
        }
        self.release(handle, lang)
    }

    /// Inspect a region.
    pub fn get_region_info(&self, handle: RegionHandle) -> FfiResult<RegionInfo> {
        let registry = self.registry.lock().unwrap();
        let descriptor = registry.get(handle)?;
        Ok(RegionInfo {
            size: descriptor.size,
            owner: descriptor.owner.clone(),
            ref_count: descriptor.ref_count,
            permissions: descriptor.permissions,
            flags: descriptor.flags,
        })
    }

    /// Number of live regions.
    pub fn region_count(&self) -> usize {
        let registry = self.registry.lock().unwrap();
        registry
            .slots
            .iter()
            .filter(|slot| slot.descriptor.is_some())
            .count()
    }

    /// Handles of all live regions.
    pub fn region_handles(&self) -> Vec<RegionHandle> {
        let registry = self.registry.lock().unwrap();
        registry
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.descriptor.is_some())
            .map(|(index, slot)| RegionHandle::new(index as u32, slot.generation))
            .collect()
    }

    // ==========================================================================
    // Data access windows
    // ==========================================================================

    /// Read the full contents of a region.
    pub fn read(&self, handle: RegionHandle, _lang: &str) -> FfiResult<Vec<u8>> {
        let registry = self.registry.lock().unwrap();
        let descriptor = registry.get(handle)?;
        if !descriptor.permissions.contains(RegionPermissions::READ) {
            return Err(FfiError::PermissionDenied(
                "region is not readable".to_string(),
            ));
        }
        Ok(descriptor.bytes().to_vec())
    }

    /// Write bytes at the start of a region.
    ///
    /// Mutation is gated on the write permission and, under strict mode, on
    /// ownership or the compatibility predicate.
    pub fn write(&self, handle: RegionHandle, lang: &str, bytes: &[u8]) -> FfiResult<()> {
        let mut registry = self.registry.lock().unwrap();
        {
            let descriptor = registry.get(handle)?;
            if !descriptor.permissions.contains(RegionPermissions::WRITE) {
                return Err(FfiError::PermissionDenied(
                    "region is not writable".to_string(),
                ));
            }
            registry.check_compatible(descriptor, lang)?;
            if bytes.len() > descriptor.size {
                return Err(FfiError::InvalidParameters(format!(
                    "write of {} bytes exceeds region size {}",
                    bytes.len(),
                    descriptor.size
                )));
            }
        }
        let descriptor = registry.get_mut(handle)?;
        descriptor.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Replace the full contents of a region.
    pub fn synchronize(&self, handle: RegionHandle, lang: &str, bytes: &[u8]) -> FfiResult<()> {
        {
            let registry = self.registry.lock().unwrap();
            let descriptor = registry.get(handle)?;
            if bytes.len() != descriptor.size {
                return Err(FfiError::InvalidParameters(format!(
                    "synchronize of {} bytes against region size {}",
                    bytes.len(),
                    descriptor.size
                )));
            }
        }
        self.write(handle, lang, bytes)
    }

    // ==========================================================================
    // GC coordination
    // ==========================================================================

    /// Register a callback fired on [`MemoryManager::notify_gc`].
    ///
    /// A `filter` of `None` fires on every notification; otherwise only when
    /// the notified language matches.
    pub fn register_gc_callback(&self, filter: Option<String>, callback: GcCallback) {
        self.gc_callbacks
            .lock()
            .unwrap()
            .push(GcCallbackEntry { filter, callback });
    }

    /// Mark every region owned by `lang` as in-GC and fire matching callbacks.
    ///
    /// Callbacks run after both locks are dropped so they may re-enter the
    /// bridge. Returns the number of callbacks invoked.
    pub fn notify_gc(&self, lang: &str) -> usize {
        {
            let mut registry = self.registry.lock().unwrap();
            for slot in &mut registry.slots {
                if let Some(descriptor) = slot.descriptor.as_mut() {
                    if descriptor.owner == lang {
                        descriptor.flags.insert(RegionFlags::IN_GC);
                    }
                }
            }
        }
        let matching: Vec<GcCallback> = {
            let callbacks = self.gc_callbacks.lock().unwrap();
            callbacks
                .iter()
                .filter(|entry| entry.filter.as_deref().map_or(true, |f| f == lang))
                .map(|entry| Arc::clone(&entry.callback))
                .collect()
        };
        for callback in &matching {
            callback(lang);
        }
        matching.len()
    }

    /// Clear the in-GC flag on every region owned by `lang`.
    pub fn clear_gc(&self, lang: &str) {
        let mut registry = self.registry.lock().unwrap();
        for slot in &mut registry.slots {
            if let Some(descriptor) = slot.descriptor.as_mut() {
                if descriptor.owner == lang {
                    descriptor.flags.remove(RegionFlags::IN_GC);
                }
            }
        }
    }

    // ==========================================================================
    // Snapshot / restore
    // ==========================================================================

    /// Deep-copy every live region into an immutable snapshot.
    pub fn create_snapshot(&self, lang: &str) -> FfiResult<SnapshotId> {
        let mut registry = self.registry.lock().unwrap();
        let regions: Vec<SavedRegion> = registry
            .slots
            .iter()
            .filter_map(|slot| slot.descriptor.as_ref())
            .map(|descriptor| SavedRegion {
                owner: descriptor.owner.clone(),
                ref_count: descriptor.ref_count,
                permissions: descriptor.permissions,
                flags: descriptor.flags,
                align: descriptor.align,
                bytes: descriptor.bytes().to_vec(),
            })
            .collect();
        let id = registry.next_snapshot_id;
        registry.next_snapshot_id += 1;
        registry.snapshots.insert(
            id,
            Snapshot {
                creator: lang.to_string(),
                regions,
            },
        );
        Ok(SnapshotId(id))
    }

    /// Replace the live registry with a snapshot's contents.
    ///
    /// Creator-only; the snapshot is consumed. This is a full-registry
    /// replace, not a merge; all prior handles go stale. Every replacement
    /// region is allocated and filled before any live region is freed or the
    /// snapshot removed, so a failed allocation leaves the registry and the
    /// snapshot exactly as they were and the restore can be retried.
    pub fn restore_snapshot(&self, id: SnapshotId, lang: &str) -> FfiResult<Vec<RegionHandle>> {
        let mut registry = self.registry.lock().unwrap();
        let snapshot = match registry.snapshots.get(&id.0) {
            None => {
                return Err(FfiError::NotFound {
                    kind: "snapshot",
                    name: id.0.to_string(),
                })
            }
            Some(snapshot) if snapshot.creator != lang => {
                return Err(FfiError::PermissionDenied(format!(
                    "snapshot was created by '{}'",
                    snapshot.creator
                )));
            }
            Some(snapshot) => snapshot,
        };

        // Stage every replacement region up front.
        let mut staged: Vec<RegionDescriptor> = Vec::with_capacity(snapshot.regions.len());
        for saved in &snapshot.regions {
            let storage = match self.allocator.allocate(saved.bytes.len(), saved.align) {
                Ok(storage) => storage,
                Err(err) => {
                    for descriptor in staged {
                        unsafe {
                            self.allocator.deallocate(
                                descriptor.storage,
                                descriptor.size,
                                descriptor.align,
                            );
                        }
                    }
                    return Err(err);
                }
            };
            let mut descriptor = RegionDescriptor {
                storage,
                size: saved.bytes.len(),
                align: saved.align,
                owner: saved.owner.clone(),
                ref_count: saved.ref_count,
                permissions: saved.permissions,
                flags: saved.flags,
            };
            descriptor.bytes_mut().copy_from_slice(&saved.bytes);
            staged.push(descriptor);
        }
        registry.snapshots.remove(&id.0);

        // Free every live region.
        let live: Vec<RegionHandle> = registry
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.descriptor.is_some())
            .map(|(index, slot)| RegionHandle::new(index as u32, slot.generation))
            .collect();
        for handle in live {
            registry.retire(handle, self.allocator.as_ref());
        }

        Ok(staged
            .into_iter()
            .map(|descriptor| registry.insert(descriptor))
            .collect())
    }

    /// Discard a snapshot without restoring it.
    pub fn discard_snapshot(&self, id: SnapshotId, lang: &str) -> FfiResult<()> {
        let mut registry = self.registry.lock().unwrap();
        match registry.snapshots.get(&id.0) {
            None => Err(FfiError::NotFound {
                kind: "snapshot",
                name: id.0.to_string(),
            }),
            Some(snapshot) if snapshot.creator != lang => Err(FfiError::PermissionDenied(format!(
                "snapshot was created by '{}'",
                snapshot.creator
            ))),
            Some(_) => {
                registry.snapshots.remove(&id.0);
                Ok(())
            }
        }
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap();
        for slot in &mut registry.slots {
            if let Some(descriptor) = slot.descriptor.take() {
                unsafe {
                    self.allocator.deallocate(
                        descriptor.storage,
                        descriptor.size,
                        descriptor.align,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn alloc_then_free() {
        let mgr = MemoryManager::new();
        let handle = mgr.alloc_shared(32, "c").unwrap();
        assert_eq!(mgr.region_count(), 1);
        mgr.free_shared(handle, "c").unwrap();
        assert_eq!(mgr.region_count(), 0);
        assert_eq!(
            mgr.get_region_info(handle).unwrap_err(),
            FfiError::InvalidMemoryRegion
        );
    }

    #[test]
    fn reference_share_and_release() {
        let mgr = MemoryManager::new();
        let handle = mgr.alloc_shared(16, "a").unwrap();
        mgr.share(handle, "a", "b", ShareMode::Reference).unwrap();
        assert_eq!(mgr.get_region_info(handle).unwrap().ref_count, 2);

        // The owner attempting free while another reference is live does not
        // free the region.
        mgr.free_shared(handle, "a").unwrap();
        let info = mgr.get_region_info(handle).unwrap();
        assert_eq!(info.ref_count, 1);

        // The final decrement by a non-owner is rejected up front.
        let err = mgr.release(handle, "b").unwrap_err();
        assert!(matches!(err, FfiError::PermissionDenied(_)));
        assert_eq!(mgr.get_region_info(handle).unwrap().ref_count, 1);
    }

    #[test]
    fn copy_share_is_independent() {
        let mgr = MemoryManager::new();
        let handle = mgr.alloc_shared(4, "a").unwrap();
        mgr.write(handle, "a", &[1, 2, 3, 4]).unwrap();

        let copy = mgr.share(handle, "a", "b", ShareMode::Copy).unwrap();
        assert_ne!(copy, handle);
        assert_eq!(mgr.get_region_info(copy).unwrap().owner, "b");
        assert_eq!(mgr.get_region_info(handle).unwrap().ref_count, 1);

        mgr.write(copy, "b", &[9, 9, 9, 9]).unwrap();
        assert_eq!(mgr.read(handle, "a").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mgr.read(copy, "b").unwrap(), vec![9, 9, 9, 9]);
    }

    #[test]
    fn transfer_changes_owner_in_place() {
        let mgr = MemoryManager::new();
        let handle = mgr.alloc_shared(8, "a").unwrap();
        let err = mgr.share(handle, "b", "c", ShareMode::Transfer).unwrap_err();
        assert!(matches!(err, FfiError::PermissionDenied(_)));

        let same = mgr.share(handle, "a", "b", ShareMode::Transfer).unwrap();
        assert_eq!(same, handle);
        let info = mgr.get_region_info(handle).unwrap();
        assert_eq!(info.owner, "b");
        assert_eq!(info.ref_count, 1);
    }

    #[test]
    fn read_only_share_blocks_writes() {
        let mgr = MemoryManager::new();
        let handle = mgr.alloc_shared(8, "a").unwrap();
        mgr.share(handle, "a", "b", ShareMode::ReadOnly).unwrap();

        let info = mgr.get_region_info(handle).unwrap();
        assert!(info.flags.contains(RegionFlags::READ_ONLY_SHARE));
        assert!(!info.permissions.contains(RegionPermissions::WRITE));

        let err = mgr.write(handle, "a", &[1]).unwrap_err();
        assert!(matches!(err, FfiError::PermissionDenied(_)));
        let err = mgr.acquire(handle, "b", AccessIntent::Write).unwrap_err();
        assert!(matches!(err, FfiError::PermissionDenied(_)));
    }

    #[test]
    fn strict_ownership_and_predicate() {
        let mgr = MemoryManager::new();
        mgr.set_strict_ownership(true);
        let handle = mgr.alloc_shared(8, "a").unwrap();

        let err = mgr.acquire(handle, "b", AccessIntent::Write).unwrap_err();
        assert!(matches!(err, FfiError::IncompatibleLanguage { .. }));

        mgr.set_compatibility_predicate(Some(Arc::new(|owner, requester| {
            owner == "a" && requester == "b"
        })));
        mgr.acquire(handle, "b", AccessIntent::Write).unwrap();
        assert_eq!(mgr.get_region_info(handle).unwrap().ref_count, 2);

        // The predicate does not cover language "c".
        let err = mgr.acquire(handle, "c", AccessIntent::Read).unwrap_err();
        assert!(matches!(err, FfiError::IncompatibleLanguage { .. }));
    }

    #[test]
    fn stale_handle_detected() {
        let mgr = MemoryManager::new();
        let handle = mgr.alloc_shared(8, "a").unwrap();
        mgr.free_shared(handle, "a").unwrap();

        // The slot is reused but the generation differs.
        let fresh = mgr.alloc_shared(8, "a").unwrap();
        assert_eq!(fresh.index, handle.index);
        assert_ne!(fresh.generation, handle.generation);
        assert_eq!(
            mgr.read(handle, "a").unwrap_err(),
            FfiError::InvalidMemoryRegion
        );
    }

    #[test]
    fn gc_notification_marks_and_fires() {
        let mgr = MemoryManager::new();
        let owned = mgr.alloc_shared(8, "a").unwrap();
        let other = mgr.alloc_shared(8, "b").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        mgr.register_gc_callback(
            Some("a".to_string()),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = Arc::clone(&fired);
        mgr.register_gc_callback(
            Some("b".to_string()),
            Arc::new(move |_| {
                counter.fetch_add(100, Ordering::SeqCst);
            }),
        );
        let counter = Arc::clone(&fired);
        mgr.register_gc_callback(
            None,
            Arc::new(move |_| {
                counter.fetch_add(10, Ordering::SeqCst);
            }),
        );

        let invoked = mgr.notify_gc("a");
        assert_eq!(invoked, 2);
        assert_eq!(fired.load(Ordering::SeqCst), 11);
        assert!(mgr
            .get_region_info(owned)
            .unwrap()
            .flags
            .contains(RegionFlags::IN_GC));
        assert!(!mgr
            .get_region_info(other)
            .unwrap()
            .flags
            .contains(RegionFlags::IN_GC));

        mgr.clear_gc("a");
        assert!(!mgr
            .get_region_info(owned)
            .unwrap()
            .flags
            .contains(RegionFlags::IN_GC));
    }

    #[test]
    fn gc_callback_may_reenter() {
        let mgr = Arc::new(MemoryManager::new());
        mgr.alloc_shared(8, "a").unwrap();
        let inner = Arc::clone(&mgr);
        mgr.register_gc_callback(
            None,
            Arc::new(move |_| {
                // Re-entering the bridge must not deadlock.
                inner.alloc_shared(4, "callback").unwrap();
            }),
        );
        mgr.notify_gc("a");
        assert_eq!(mgr.region_count(), 2);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mgr = MemoryManager::new();
        let first = mgr.alloc_shared(4, "a").unwrap();
        mgr.write(first, "a", &[1, 2, 3, 4]).unwrap();
        let second = mgr.alloc_shared(2, "b").unwrap();
        mgr.write(second, "b", &[5, 6]).unwrap();

        let snapshot = mgr.create_snapshot("a").unwrap();

        // Mutate the registry: free one region, allocate another.
        mgr.free_shared(second, "b").unwrap();
        let extra = mgr.alloc_shared(16, "c").unwrap();
        mgr.write(extra, "c", &[0xFF; 16]).unwrap();

        // Wrong creator is rejected.
        let err = mgr.restore_snapshot(snapshot, "b").unwrap_err();
        assert!(matches!(err, FfiError::PermissionDenied(_)));

        let handles = mgr.restore_snapshot(snapshot, "a").unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(mgr.region_count(), 2);
        let mut contents: Vec<Vec<u8>> = handles
            .iter()
            .map(|&h| mgr.read(h, "a").unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec![vec![1, 2, 3, 4], vec![5, 6]]);

        // The snapshot was consumed.
        let err = mgr.restore_snapshot(snapshot, "a").unwrap_err();
        assert!(matches!(err, FfiError::NotFound { .. }));
    }

    /// Allocator with a settable allowance of remaining allocations.
    struct QuotaAllocator {
        inner: SystemAllocator,
        remaining: AtomicUsize,
    }

    impl QuotaAllocator {
        fn new(remaining: usize) -> Self {
            QuotaAllocator {
                inner: SystemAllocator,
                remaining: AtomicUsize::new(remaining),
            }
        }
    }

    impl SharedAllocator for QuotaAllocator {
        fn allocate(&self, size: usize, align: usize) -> FfiResult<std::ptr::NonNull<u8>> {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return Err(FfiError::OutOfMemory { size });
            }
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            self.inner.allocate(size, align)
        }

        unsafe fn deallocate(&self, ptr: std::ptr::NonNull<u8>, size: usize, align: usize) {
            unsafe { self.inner.deallocate(ptr, size, align) }
        }
    }

    #[test]
    fn failed_restore_leaves_registry_and_snapshot_intact() {
        let allocator = Arc::new(QuotaAllocator::new(3));
        let mgr = MemoryManager::with_allocator(allocator.clone());
        let first = mgr.alloc_shared(4, "a").unwrap();
        mgr.write(first, "a", &[1, 2, 3, 4]).unwrap();
        let second = mgr.alloc_shared(2, "a").unwrap();
        mgr.write(second, "a", &[5, 6]).unwrap();
        let snapshot = mgr.create_snapshot("a").unwrap();

        // One allocation of quota left; the restore needs two and must fail
        // without touching the live registry or consuming the snapshot.
        let err = mgr.restore_snapshot(snapshot, "a").unwrap_err();
        assert!(matches!(err, FfiError::OutOfMemory { .. }));
        assert_eq!(mgr.region_count(), 2);
        assert_eq!(mgr.read(first, "a").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mgr.read(second, "a").unwrap(), vec![5, 6]);

        // With quota available again the same snapshot restores.
        allocator.remaining.store(2, Ordering::SeqCst);
        let handles = mgr.restore_snapshot(snapshot, "a").unwrap();
        assert_eq!(handles.len(), 2);
        let mut contents: Vec<Vec<u8>> = handles
            .iter()
            .map(|&h| mgr.read(h, "a").unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec![vec![1, 2, 3, 4], vec![5, 6]]);
    }

    #[test]
    fn synchronize_requires_exact_size() {
        let mgr = MemoryManager::new();
        let handle = mgr.alloc_shared(4, "a").unwrap();
        let err = mgr.synchronize(handle, "a", &[1, 2]).unwrap_err();
        assert!(matches!(err, FfiError::InvalidParameters(_)));
        mgr.synchronize(handle, "a", &[1, 2, 3, 4]).unwrap();
        assert_eq!(mgr.read(handle, "a").unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn track_region_copies_bytes() {
        let mgr = MemoryManager::new();
        let buffer = [7u8, 8, 9];
        let handle = mgr
            .track_region(
                &buffer,
                "cobol",
                RegionPermissions::read_write(),
                RegionFlags::AUTO_FREE,
            )
            .unwrap();
        assert_eq!(mgr.read(handle, "cobol").unwrap(), vec![7, 8, 9]);
        assert_eq!(mgr.get_region_info(handle).unwrap().owner, "cobol");
    }
}
