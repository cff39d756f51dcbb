//! Trampoline memory allocation
//!
//! Allocates executable memory within ±2GB of target addresses so rel32
//! jumps always reach, both for the patch at the entry point and for the
//! relocated prologue's jump back.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ptr::NonNull;

/// Page size (4KB on most systems)
const PAGE_SIZE: usize = 4096;

/// Maximum search range for near allocation (2GB)
const MAX_RANGE: usize = 0x7FFF_0000;

/// Global trampoline allocator
static ALLOCATOR: Mutex<NearAllocator> = Mutex::new(NearAllocator::new());

/// Allocator for executable trampoline blocks
struct NearAllocator {
    /// Pages allocated, keyed by base address
    pages: BTreeMap<usize, PageInfo>,
}

struct PageInfo {
    base: *mut u8,
    size: usize,
    used: usize,
}

// SAFETY: The allocator is protected by a mutex and pages are only accessed through it
unsafe impl Send for PageInfo {}

impl NearAllocator {
    const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Allocate a block near the target address
    fn alloc_near(&mut self, target: usize, size: usize) -> Option<NonNull<u8>> {
        // First, try to find an existing page within range
        for (&base, page) in &mut self.pages {
            let offset = base.abs_diff(target);

            if offset < MAX_RANGE && page.used + size <= page.size {
                let ptr = unsafe { page.base.add(page.used) };
                page.used += size;
                return NonNull::new(ptr);
            }
        }

        // Allocate a new page near the target
        let new_page = self.alloc_page_near(target)?;
        let page = self.pages.get_mut(&(new_page as usize))?;

        page.used = size;
        NonNull::new(new_page)
    }

    #[cfg(unix)]
    fn alloc_page_near(&mut self, target: usize) -> Option<*mut u8> {
        use nix::sys::mman::{mmap_anonymous, MapFlags, ProtFlags};
        use std::num::NonZeroUsize;

        let search_start = target.saturating_sub(MAX_RANGE);
        let search_end = target.saturating_add(MAX_RANGE);

        // Try allocating at hint addresses within range
        for hint in (search_start..search_end).step_by(PAGE_SIZE * 64) {
            // Skip invalid addresses
            if hint == 0 {
                continue;
            }

            let result = unsafe {
                mmap_anonymous(
                    NonZeroUsize::new(hint),
                    NonZeroUsize::new_unchecked(PAGE_SIZE),
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                    MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                )
            };

            if let Ok(ptr) = result {
                let base = ptr.as_ptr() as *mut u8;
                let actual_addr = base as usize;

                // Verify the allocation is within range
                if actual_addr.abs_diff(target) < MAX_RANGE {
                    self.pages.insert(
                        actual_addr,
                        PageInfo {
                            base,
                            size: PAGE_SIZE,
                            used: 0,
                        },
                    );
                    return Some(base);
                } else {
                    // Allocation was too far, unmap it
                    unsafe {
                        let _ = nix::sys::mman::munmap(ptr, PAGE_SIZE);
                    }
                }
            }
        }

        // Try without hint as a fallback
        let result = unsafe {
            mmap_anonymous(
                None,
                NonZeroUsize::new_unchecked(PAGE_SIZE),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            )
        };

        if let Ok(ptr) = result {
            let base = ptr.as_ptr() as *mut u8;
            let actual_addr = base as usize;
            self.pages.insert(
                actual_addr,
                PageInfo {
                    base,
                    size: PAGE_SIZE,
                    used: 0,
                },
            );
            tracing::warn!(
                "Trampoline allocation fallback: allocated at {:x} for target {:x}",
                actual_addr,
                target
            );
            return Some(base);
        }

        tracing::error!("Failed to allocate page near {:x}", target);
        None
    }

    #[cfg(not(unix))]
    fn alloc_page_near(&mut self, _target: usize) -> Option<*mut u8> {
        None
    }
}

/// Allocate an executable block of `size` bytes near the target address
pub fn alloc_executable(target: *const u8, size: usize) -> Option<NonNull<u8>> {
    ALLOCATOR.lock().alloc_near(target as usize, size)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_near_allocation() {
        let target = 0x7FFF_0000_0000usize as *const u8;
        let block = alloc_executable(target, 64);
        assert!(block.is_some(), "Should allocate near block");
    }

    #[test]
    fn test_multiple_allocations_are_distinct() {
        let target = 0x7FFF_0000_1000usize as *const u8;

        let b1 = alloc_executable(target, 64).unwrap();
        let b2 = alloc_executable(target, 64).unwrap();
        let b3 = alloc_executable(target, 64).unwrap();

        assert_ne!(b1.as_ptr(), b2.as_ptr());
        assert_ne!(b2.as_ptr(), b3.as_ptr());
        assert_ne!(b1.as_ptr(), b3.as_ptr());
    }

    #[test]
    fn test_allocation_is_writable_and_in_range() {
        let anchor = test_allocation_is_writable_and_in_range as *const u8;
        let block = alloc_executable(anchor, 16).unwrap();

        unsafe {
            block.as_ptr().write(0xC3);
            assert_eq!(*block.as_ptr(), 0xC3);
        }

        let distance = (block.as_ptr() as usize).abs_diff(anchor as usize);
        assert!(distance < 0x8000_0000, "block should be rel32-reachable");
    }
}
