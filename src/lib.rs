//! A segregated-fit dynamic memory allocator over a simulated,
//! monotonically growable heap. The classic four-operation surface
//! (`malloc`, `free`, `realloc`, `calloc`) plus an explicit `init` and a
//! debug-only heap consistency checker.
//!
//! All state is thread-local: the backing heap bytes and the allocator
//! instance. Pointers are plain `u64` offsets into the simulated heap;
//! null is `Option::None`.

use crate::mem::allocator::SegAllocator;
use std::cell::RefCell;

pub mod mem;
pub mod utils;

pub use crate::mem::allocator::CHUNK_SIZE;
pub use crate::mem::block::{ALIGNMENT, MIN_BLOCK_SIZE};
pub use crate::mem::{read_bytes, write_bytes, HeapPtr};
pub use crate::utils::mem_context::{heap, OutOfHeap};
pub use crate::utils::HeapMetrics;

thread_local! {
    static SEG_ALLOCATOR: RefCell<Option<SegAllocator>> = RefCell::new(None);
}

/// (Re)initializes the allocator: the simulated heap is truncated, the
/// sentinels are laid out and one chunk-sized free block is created. A
/// second call fully resets state. Returns `false` when the backing heap
/// refuses the initial extension.
pub fn init() -> bool {
    SEG_ALLOCATOR.with(|it| match SegAllocator::init() {
        Ok(allocator) => {
            *it.borrow_mut() = Some(allocator);
            true
        }
        Err(_) => {
            *it.borrow_mut() = None;
            false
        }
    })
}

/// Allocates `size` payload bytes; the returned pointer is 16-byte
/// aligned. Zero-sized requests and out-of-heap both yield `None`.
pub fn malloc(size: usize) -> Option<HeapPtr> {
    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &mut *it.borrow_mut() {
            allocator.malloc(size)
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

/// Releases an allocation. `None` is a no-op.
pub fn free(ptr: Option<HeapPtr>) {
    let ptr = match ptr {
        Some(ptr) => ptr,
        None => return,
    };

    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &mut *it.borrow_mut() {
            allocator.free(ptr)
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

/// Resizes an allocation, preserving the common payload prefix.
/// `realloc(None, n)` behaves as `malloc(n)`; `realloc(p, 0)` frees `p`
/// and returns `None`.
pub fn realloc(ptr: Option<HeapPtr>, size: usize) -> Option<HeapPtr> {
    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &mut *it.borrow_mut() {
            allocator.realloc(ptr, size)
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

/// Allocates a zero-filled payload of `n * size` bytes; `None` on
/// overflow or a zero-sized product.
pub fn calloc(n: usize, size: usize) -> Option<HeapPtr> {
    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &mut *it.borrow_mut() {
            allocator.calloc(n, size)
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

/// Validates every heap invariant in debug builds, reporting violations
/// through `log::error!` with the caller-supplied line. Release builds
/// compile the check away and always return `true`.
pub fn checkheap(line: u32) -> bool {
    if !cfg!(debug_assertions) {
        return true;
    }

    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &*it.borrow() {
            allocator.check_heap(line)
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

/// Caps the total simulated heap size so harnesses can force the
/// out-of-heap path; `None` removes the cap.
pub fn set_heap_limit(limit: Option<u64>) {
    heap::set_limit(limit);
}

pub fn get_allocated_size() -> u64 {
    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &*it.borrow() {
            allocator.get_allocated_size()
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

pub fn get_free_size() -> u64 {
    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &*it.borrow() {
            allocator.get_free_size()
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

pub fn get_heap_size() -> u64 {
    heap::size_bytes()
}

pub fn get_heap_metrics() -> HeapMetrics {
    SEG_ALLOCATOR.with(|it| {
        if let Some(allocator) = &*it.borrow() {
            allocator.get_metrics()
        } else {
            unreachable!("SegAllocator is not initialized");
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        calloc, checkheap, free, get_allocated_size, get_free_size, get_heap_metrics,
        get_heap_size, init, malloc, read_bytes, realloc, set_heap_limit, write_bytes, CHUNK_SIZE,
    };

    #[test]
    fn basic_flow_works_fine() {
        set_heap_limit(None);
        assert!(init());

        let a = malloc(100).unwrap();
        write_bytes(a, &[0xAB; 100]);

        let b = realloc(Some(a), 200).unwrap();
        let mut data = [0u8; 100];
        read_bytes(b, &mut data);
        assert_eq!(data, [0xAB; 100]);

        free(Some(b));
        assert_eq!(get_allocated_size(), 0);
        assert!(get_free_size() > 0);

        let m = get_heap_metrics();
        assert_eq!(m.available, get_heap_size());
        assert_eq!(m.allocated, 0);

        assert!(checkheap(line!()));
    }

    #[test]
    fn second_init_resets_state() {
        set_heap_limit(None);
        assert!(init());

        for _ in 0..64 {
            malloc(1000).unwrap();
        }
        assert!(get_heap_size() > CHUNK_SIZE as u64);

        assert!(init());
        assert_eq!(get_allocated_size(), 0);
        assert_eq!(get_heap_size(), (CHUNK_SIZE + 16) as u64);
        assert!(checkheap(line!()));
    }

    #[test]
    fn null_arguments_work_fine() {
        set_heap_limit(None);
        assert!(init());

        assert_eq!(malloc(0), None);
        free(None);

        let p = realloc(None, 48).unwrap();
        assert_eq!(realloc(Some(p), 0), None);
        assert_eq!(get_allocated_size(), 0);

        assert_eq!(calloc(0, 16), None);
        assert_eq!(calloc(16, 0), None);
        assert_eq!(calloc(usize::MAX, 2), None);

        assert!(checkheap(line!()));
    }

    #[test]
    fn calloc_zero_fills_work_fine() {
        set_heap_limit(None);
        assert!(init());

        let p = malloc(64).unwrap();
        write_bytes(p, &[0xFF; 64]);
        free(Some(p));

        // reuses the dirty block, so the zero-fill is observable
        let q = calloc(8, 8).unwrap();
        let mut data = [0xEEu8; 64];
        read_bytes(q, &mut data);
        assert_eq!(data, [0u8; 64]);
    }

    #[test]
    fn out_of_heap_yields_null() {
        set_heap_limit(None);
        assert!(init());
        set_heap_limit(Some(get_heap_size()));

        // one chunk minus sentinels is available; more must fail
        assert_eq!(malloc(2 * CHUNK_SIZE), None);
        assert!(checkheap(line!()));

        let p = malloc(1000);
        assert!(p.is_some());

        set_heap_limit(None);
    }
}
