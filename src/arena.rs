//! Bump-allocated arena with optional growth.
//!
//! The arena owns one contiguous byte region and hands out aligned spans of
//! it by advancing a cursor. There is no per-object free: the whole region is
//! reused via [Arena::clear] or released when the arena is dropped. This
//! trades deallocation granularity for near-zero per-allocation overhead,
//! which suits many short-lived, same-lifetime objects (parsing scratch
//! space and the like).

use std::alloc::{alloc, dealloc, realloc, Layout};
use std::cmp;
use std::ptr::{self, NonNull};

/// The backing region could not be allocated or resized.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("arena allocation of {size} bytes failed")]
pub struct ArenaAllocError {
    pub size: usize,
}

/// A contiguous memory region with a monotonic allocation cursor.
///
/// Pointers returned by [Arena::alloc] borrow from the backing region and
/// are invalidated by any later call that grows the arena, since growth may
/// relocate the region. Callers must not cache region pointers across
/// allocating calls; the offset accounting is stable, the addresses are not.
pub struct Arena {
    region: NonNull<u8>,
    capacity: usize,
    offset: usize,
    dynamic: bool,
}

impl Arena {
    /// Create an arena with `capacity` bytes of backing storage.
    ///
    /// A `dynamic` arena grows transparently when an allocation would not
    /// fit; a fixed arena fails that allocation instead. `capacity` must be
    /// nonzero.
    pub fn new(capacity: usize, dynamic: bool) -> Result<Arena, ArenaAllocError> {
        if capacity == 0 {
            return Err(ArenaAllocError { size: 0 });
        }

        let layout =
            Layout::from_size_align(capacity, 1).map_err(|_| ArenaAllocError { size: capacity })?;

        let region = NonNull::new(unsafe { alloc(layout) })
            .ok_or(ArenaAllocError { size: capacity })?;

        Ok(Arena {
            region,
            capacity,
            offset: 0,
            dynamic,
        })
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// `align` must be a power of two; this is the caller's responsibility
    /// and is only checked in debug builds. Returns `None` when the request
    /// does not fit a fixed arena, or when growing a dynamic one fails. In
    /// the failure case neither `offset` nor `capacity` is mutated.
    pub fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());

        let offset = align_up(self.offset, align);
        let end = offset.checked_add(size)?;

        if end > self.capacity {
            if !self.dynamic {
                return None;
            }

            let target = cmp::max(self.capacity.checked_mul(2)?, end);
            self.grow_safe(target).ok()?;
        }

        // Growth may have relocated the region, so the pointer is derived
        // only after the capacity check has settled.
        let ptr = unsafe { NonNull::new_unchecked(self.region.as_ptr().add(offset)) };
        self.offset = end;

        Some(ptr)
    }

    /// Grow the backing region in place to `new_size` bytes.
    ///
    /// A no-op when `new_size` does not exceed the current capacity. This is
    /// the fast path: it resizes via `realloc` and makes no promise about
    /// the region's contents if the resize fails. Use [Arena::grow_safe]
    /// when the live prefix must survive a failed grow.
    pub fn grow(&mut self, new_size: usize) -> Result<(), ArenaAllocError> {
        if new_size <= self.capacity {
            return Ok(());
        }

        let layout = unsafe { Layout::from_size_align_unchecked(self.capacity, 1) };
        let region = NonNull::new(unsafe { realloc(self.region.as_ptr(), layout, new_size) })
            .ok_or(ArenaAllocError { size: new_size })?;

        self.region = region;
        self.capacity = new_size;

        Ok(())
    }

    /// Grow the backing region to `new_size` bytes, copying the live prefix.
    ///
    /// A no-op when `new_size` does not exceed the current capacity.
    /// Allocates the new region first and copies `offset` bytes into it
    /// before releasing the old one, so a failed grow leaves the arena
    /// exactly as it was. [Arena::alloc] uses this path for automatic
    /// growth.
    pub fn grow_safe(&mut self, new_size: usize) -> Result<(), ArenaAllocError> {
        if new_size <= self.capacity {
            return Ok(());
        }

        let layout =
            Layout::from_size_align(new_size, 1).map_err(|_| ArenaAllocError { size: new_size })?;
        let region = NonNull::new(unsafe { alloc(layout) })
            .ok_or(ArenaAllocError { size: new_size })?;

        tracing::trace!(
            old_capacity = self.capacity,
            new_capacity = new_size,
            live = self.offset,
            "arena region relocated"
        );

        unsafe {
            ptr::copy_nonoverlapping(self.region.as_ptr(), region.as_ptr(), self.offset);
            dealloc(
                self.region.as_ptr(),
                Layout::from_size_align_unchecked(self.capacity, 1),
            );
        }

        self.region = region;
        self.capacity = new_size;

        Ok(())
    }

    /// Reset the cursor to zero, logically freeing every prior allocation.
    ///
    /// The region is neither zeroed nor shrunk; all previously returned
    /// pointers are invalidated.
    pub fn clear(&mut self) {
        self.offset = 0;
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline(always)]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            dealloc(
                self.region.as_ptr(),
                Layout::from_size_align_unchecked(self.capacity, 1),
            );
        }
    }
}

#[inline(always)]
fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_properties() {
        for align in [1usize, 2, 4, 8, 16, 64, 4096] {
            for offset in [0usize, 1, 2, 3, 7, 8, 9, 63, 64, 100, 4095, 4097] {
                let aligned = align_up(offset, align);
                assert!(aligned >= offset);
                assert_eq!(aligned % align, 0);
                assert!(aligned < offset + align);
            }
        }
    }

    #[test]
    fn fixed_arena_rejects_overflow_without_mutation() {
        let mut arena = Arena::new(16, false).unwrap();
        assert!(arena.alloc(8, 1).is_some());
        assert_eq!(arena.offset(), 8);

        assert!(arena.alloc(16, 1).is_none());
        assert_eq!(arena.offset(), 8);
        assert_eq!(arena.capacity(), 16);

        assert!(arena.alloc(8, 1).is_some());
        assert_eq!(arena.offset(), 16);
    }

    #[test]
    fn dynamic_arena_grows_to_fit() {
        let mut arena = Arena::new(8, true).unwrap();
        assert!(arena.alloc(4, 1).is_some());

        // Far beyond doubling; growth must fit the request exactly.
        assert!(arena.alloc(100_000, 1).is_some());
        assert!(arena.capacity() >= 100_004);
        assert_eq!(arena.offset(), 100_004);
    }

    #[test]
    fn alloc_respects_alignment() {
        let mut arena = Arena::new(64, false).unwrap();
        arena.alloc(3, 1).unwrap();

        let ptr = arena.alloc(8, 8).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
        assert_eq!(arena.offset(), 16);
    }

    #[test]
    fn clear_frees_logical_capacity() {
        let mut arena = Arena::new(32, false).unwrap();
        assert!(arena.alloc(32, 1).is_some());
        assert!(arena.alloc(1, 1).is_none());

        arena.clear();
        assert_eq!(arena.offset(), 0);
        assert!(arena.alloc(32, 1).is_some());
    }

    #[test]
    fn grow_safe_preserves_live_prefix() {
        let mut arena = Arena::new(16, true).unwrap();
        let ptr = arena.alloc(16, 1).unwrap();
        unsafe {
            for i in 0..16u8 {
                ptr.as_ptr().add(i as usize).write(i);
            }
        }

        arena.grow_safe(1024).unwrap();
        assert_eq!(arena.capacity(), 1024);
        assert_eq!(arena.offset(), 16);

        let grown = arena.alloc(1, 1).unwrap();
        let base = unsafe { grown.as_ptr().sub(16) };
        for i in 0..16u8 {
            assert_eq!(unsafe { base.add(i as usize).read() }, i);
        }
    }

    #[test]
    fn grow_below_capacity_is_noop() {
        let mut arena = Arena::new(64, true).unwrap();
        arena.grow(32).unwrap();
        assert_eq!(arena.capacity(), 64);
        arena.grow_safe(64).unwrap();
        assert_eq!(arena.capacity(), 64);
    }
}
