//! The allocator facade (spec §4.1): a thin, pluggable pass-through over
//! whatever raw allocator backs a [`crate::runtime::Runtime`], plus the
//! `{malloc_count, malloc_size, malloc_limit}` counters every allocation
//! and free keeps in sync.
//!
//! The registry's cells themselves live in a typed arena (`registry.rs`)
//! rather than behind individual raw allocations — there is no `malloc`
//! call per `JS_OBJECT`. This facade exists for the allocations the GC
//! still needs to account for directly: property-slot arrays, shape
//! tables, bytecode buffers, and anything an embedder's own allocator
//! wrapper wants tracked through the same counters the spec describes.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{GcError, GcResult};

/// A pluggable raw allocator: `alloc`/`free`/`realloc`/`usable_size`.
///
/// The default implementation forwards to the global allocator via
/// [`std::alloc`]; an embedder can supply anything else that satisfies
/// this seam (an arena, a pooling allocator, a fuzzing allocator that
/// injects failures).
pub trait RawAllocator {
    /// Allocate `size` bytes, or `None` on failure.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;
    /// Free a block previously returned by `alloc`/`realloc`.
    ///
    /// # Safety
    /// `ptr` must have been returned by this same allocator with the same `size`.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);
    /// Resize a block in place or move it, preserving the overlapping prefix.
    ///
    /// # Safety
    /// `ptr` must have been returned by this same allocator with `old_size`.
    unsafe fn realloc(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>>;
    /// The actual usable size of a block of the given requested size — may
    /// be larger than requested if the allocator rounds up internally.
    fn usable_size(&self, size: usize) -> usize {
        size
    }
}

/// Forwards straight to the global Rust allocator.
#[derive(Debug, Default)]
pub struct SystemAllocator;

fn layout_for(size: usize) -> Layout {
    Layout::from_size_align(size.max(1), std::mem::align_of::<usize>())
        .expect("allocation size overflowed isize::MAX")
}

impl RawAllocator for SystemAllocator {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: `layout_for` always returns a non-zero-sized layout.
        let ptr = unsafe { alloc::alloc(layout_for(size)) };
        NonNull::new(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded precondition from the trait.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout_for(size)) }
    }

    unsafe fn realloc(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Option<NonNull<u8>> {
        // SAFETY: forwarded precondition from the trait.
        let raw = unsafe { alloc::realloc(ptr.as_ptr(), layout_for(old_size), new_size.max(1)) };
        NonNull::new(raw)
    }
}

/// Running totals of outstanding allocator-tracked memory, maintained on
/// every `alloc`/`free`/`realloc` that goes through an [`AllocatorFacade`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MallocCounters {
    /// Number of currently outstanding allocations.
    pub malloc_count: u64,
    /// Total bytes currently outstanding across those allocations.
    pub malloc_size: u64,
    /// Hard cap on `malloc_size`, or `None` for no cap. Exceeding it turns
    /// a would-be-successful allocation into [`GcError::OutOfMemory`].
    pub malloc_limit: Option<u64>,
}

/// The pass-through facade every context-scoped allocation goes through.
///
/// Wraps a [`RawAllocator`] and keeps [`MallocCounters`] in sync with every
/// successful `alloc`/`free`/`realloc`.
pub struct AllocatorFacade {
    raw: Box<dyn RawAllocator>,
    counters: MallocCounters,
}

impl std::fmt::Debug for AllocatorFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorFacade")
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl Default for AllocatorFacade {
    fn default() -> Self {
        Self::new(Box::new(SystemAllocator))
    }
}

impl AllocatorFacade {
    /// Build a facade over a caller-supplied raw allocator.
    pub fn new(raw: Box<dyn RawAllocator>) -> Self {
        Self {
            raw,
            counters: MallocCounters::default(),
        }
    }

    /// Current counter snapshot.
    pub fn counters(&self) -> MallocCounters {
        self.counters
    }

    /// Set or clear the hard memory limit.
    pub fn set_limit(&mut self, bytes: Option<u64>) {
        self.counters.malloc_limit = bytes;
    }

    fn would_exceed_limit(&self, additional: u64) -> bool {
        match self.counters.malloc_limit {
            Some(limit) => self.counters.malloc_size + additional > limit,
            None => false,
        }
    }

    /// `alloc(n)`: allocate `size` bytes, tracking the result in the
    /// counters. Raises [`GcError::OutOfMemory`] rather than returning null,
    /// matching the "context-scoped variant throws an out-of-memory
    /// condition on failure" requirement.
    pub fn alloc(&mut self, size: usize) -> GcResult<NonNull<u8>> {
        if self.would_exceed_limit(size as u64) {
            return Err(GcError::OutOfMemory { requested: size });
        }
        let ptr = self
            .raw
            .alloc(size)
            .ok_or(GcError::OutOfMemory { requested: size })?;
        let usable = self.raw.usable_size(size);
        self.counters.malloc_count += 1;
        self.counters.malloc_size += usable as u64;
        Ok(ptr)
    }

    /// `free(ptr)`: release a block previously returned by `alloc`/`realloc`.
    ///
    /// # Safety
    /// `ptr` must have been returned by this facade with this `size`.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        let usable = self.raw.usable_size(size);
        // SAFETY: forwarded precondition.
        unsafe { self.raw.free(ptr, size) };
        self.counters.malloc_count = self.counters.malloc_count.saturating_sub(1);
        self.counters.malloc_size = self.counters.malloc_size.saturating_sub(usable as u64);
    }

    /// `realloc(ptr, n)`: resize a block, adjusting the size counter by the
    /// delta between old and new usable sizes. The count is unchanged — a
    /// realloc neither creates nor destroys an allocation.
    ///
    /// # Safety
    /// `ptr` must have been returned by this facade with `old_size`.
    pub unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> GcResult<NonNull<u8>> {
        let old_usable = self.raw.usable_size(old_size) as u64;
        let new_usable_guess = self.raw.usable_size(new_size) as u64;
        if new_usable_guess > old_usable && self.would_exceed_limit(new_usable_guess - old_usable) {
            return Err(GcError::OutOfMemory { requested: new_size });
        }
        // SAFETY: forwarded precondition.
        let raw = unsafe { self.raw.realloc(ptr, old_size, new_size) }
            .ok_or(GcError::OutOfMemory { requested: new_size })?;
        let new_usable = self.raw.usable_size(new_size) as u64;
        self.counters.malloc_size = self.counters.malloc_size - old_usable + new_usable;
        Ok(raw)
    }

    /// `usable_size(ptr)`: the actual capacity a block of `size` would
    /// have been rounded up to.
    pub fn usable_size(&self, size: usize) -> usize {
        self.raw.usable_size(size)
    }

    /// Record bookkeeping for memory the facade didn't itself allocate
    /// (e.g. a `Vec`'s backing store managed by ordinary Rust allocation,
    /// whose size we still want reflected in `malloc_size`/`malloc_count`).
    /// Used by dynamic-array-owning cells that grow via `Vec::with_capacity`
    /// rather than calling through `alloc` directly.
    pub fn track_external_alloc(&mut self, size: u64) -> GcResult<()> {
        if self.would_exceed_limit(size) {
            return Err(GcError::OutOfMemory {
                requested: size as usize,
            });
        }
        self.counters.malloc_count += 1;
        self.counters.malloc_size += size;
        Ok(())
    }

    /// The external-allocation counterpart to [`Self::track_external_alloc`].
    pub fn track_external_free(&mut self, size: u64) {
        self.counters.malloc_count = self.counters.malloc_count.saturating_sub(1);
        self.counters.malloc_size = self.counters.malloc_size.saturating_sub(size);
    }
}

/// Grow a dynamic array's capacity for a request that no longer fits.
///
/// Doubles by `1.5×`, clamped to never shrink below what was actually
/// requested: `max(requested, cap * 3 / 2)`. Any `usable_size` slack the
/// allocator reports back is folded into the returned capacity so callers
/// don't leave easy headroom unused.
pub fn grow_array_capacity(
    requested: usize,
    current_cap: usize,
    usable_size: impl Fn(usize) -> usize,
) -> usize {
    let grown = current_cap.saturating_mul(3) / 2;
    let target = requested.max(grown);
    usable_size(target).max(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip_counters() {
        let mut facade = AllocatorFacade::default();
        let ptr = facade.alloc(64).unwrap();
        assert_eq!(facade.counters().malloc_count, 1);
        assert!(facade.counters().malloc_size >= 64);
        unsafe { facade.free(ptr, 64) };
        assert_eq!(facade.counters().malloc_count, 0);
        assert_eq!(facade.counters().malloc_size, 0);
    }

    #[test]
    fn alloc_beyond_limit_is_out_of_memory() {
        let mut facade = AllocatorFacade::default();
        facade.set_limit(Some(32));
        let err = facade.alloc(64).unwrap_err();
        assert!(matches!(err, GcError::OutOfMemory { requested: 64 }));
    }

    #[test]
    fn realloc_adjusts_size_without_changing_count() {
        let mut facade = AllocatorFacade::default();
        let ptr = facade.alloc(16).unwrap();
        assert_eq!(facade.counters().malloc_count, 1);
        let ptr = unsafe { facade.realloc(ptr, 16, 256).unwrap() };
        assert_eq!(facade.counters().malloc_count, 1);
        assert!(facade.counters().malloc_size >= 256);
        unsafe { facade.free(ptr, 256) };
    }

    #[test]
    fn grow_array_capacity_clamps_to_one_point_five_x() {
        assert_eq!(grow_array_capacity(10, 100, |n| n), 150);
        // A request larger than 1.5x current capacity wins outright.
        assert_eq!(grow_array_capacity(1000, 100, |n| n), 1000);
    }

    #[test]
    fn grow_array_capacity_folds_in_usable_size_slack() {
        // Allocator rounds every request up to the next multiple of 16.
        let round_up_16 = |n: usize| n.div_ceil(16) * 16;
        assert_eq!(grow_array_capacity(10, 10, round_up_16), 16);
    }

    #[test]
    fn external_tracking_respects_limit() {
        let mut facade = AllocatorFacade::default();
        facade.set_limit(Some(100));
        facade.track_external_alloc(50).unwrap();
        assert!(facade.track_external_alloc(100).is_err());
        facade.track_external_free(50);
        assert_eq!(facade.counters().malloc_size, 0);
    }
}
