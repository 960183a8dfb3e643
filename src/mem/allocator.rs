use crate::mem::block::{Block, ALIGNMENT, MIN_BLOCK_SIZE};
use crate::mem::free_list::{seg_class_of, SegList, MIN_CLASS, SEG_CLASS_COUNT};
use crate::mem::word::{extract_alloc, extract_size, pack, WORD_SIZE};
use crate::mem::{read_bytes, read_word, write_bytes, write_word, EMPTY_PTR, HeapPtr};
use crate::utils::mem_context::{heap, OutOfHeap};
use crate::utils::HeapMetrics;

/// Bytes requested from the backing heap whenever it has to grow.
pub const CHUNK_SIZE: usize = 4096;

/// Classes searched first-fit; higher classes use bounded better-fit.
const FIRST_FIT_CLASS_COUNT: usize = 5;

/// Candidates examined within a class after an acceptable block has been
/// found, before the better-fit search settles for the best seen so far.
const BETTER_FIT_MAX_TRIES: usize = 5;

/// Segregated-fit allocator over the simulated heap. One instance owns
/// the whole heap; create it with [`SegAllocator::init`].
#[derive(Debug)]
pub struct SegAllocator {
    seg_list: SegList,
    heap_start: HeapPtr,
    free_size: u64,
    allocated_size: u64,
}

impl SegAllocator {
    /// Resets the backing heap and lays out prologue, epilogue and one
    /// chunk-sized free block.
    pub fn init() -> Result<Self, OutOfHeap> {
        heap::reset();
        heap::extend((2 * WORD_SIZE) as u64)?;

        // prologue footer, then the epilogue header right after it
        write_word(heap::lo(), pack(0, true, false, false));
        write_word(heap::lo() + WORD_SIZE as u64, pack(0, true, true, false));

        let mut allocator = Self {
            seg_list: SegList::new(),
            heap_start: heap::lo() + WORD_SIZE as u64,
            free_size: 0,
            allocated_size: 0,
        };

        allocator.extend_heap(CHUNK_SIZE)?;
        debug_assert!(allocator.check_heap(line!()));

        Ok(allocator)
    }

    /// Allocates `size` payload bytes and returns the payload pointer.
    /// Returns `None` for zero-sized requests and when the heap refuses
    /// to grow; the heap is left consistent either way.
    pub fn malloc(&mut self, size: usize) -> Option<HeapPtr> {
        debug_assert!(self.check_heap(line!()));

        if size == 0 {
            return None;
        }

        let asize = adjust_size(size)?;

        let block = match self.find_fit(asize) {
            Some(block) => block,
            None => self.extend_heap(asize.max(CHUNK_SIZE)).ok()?,
        };
        debug_assert!(!block.is_allocated());

        let block_size = block.size();
        block.write(block_size, true);
        self.remove_free(block);
        self.split(block, asize);

        self.allocated_size += block.size() as u64;

        debug_assert!(self.check_heap(line!()));
        Some(block.payload_ptr())
    }

    /// Releases the allocation at payload pointer `ptr`. Freeing a
    /// pointer this allocator did not return is undefined behavior.
    pub fn free(&mut self, ptr: HeapPtr) {
        debug_assert!(self.check_heap(line!()));

        let block = Block::from_payload(ptr);
        debug_assert!(block.is_allocated());

        let size = block.size();
        self.allocated_size -= size as u64;

        block.write(size, false);
        self.coalesce(block);

        debug_assert!(self.check_heap(line!()));
    }

    /// Moves the allocation at `ptr` to a block of at least `size`
    /// payload bytes, preserving the common prefix of the payload.
    pub fn realloc(&mut self, ptr: Option<HeapPtr>, size: usize) -> Option<HeapPtr> {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return self.malloc(size),
        };

        if size == 0 {
            self.free(ptr);
            return None;
        }

        // TODO: grow in place when the next physical block is free and
        // covers the requested size
        let new_ptr = self.malloc(size)?;

        let old_block = Block::from_payload(ptr);
        let copy_len = size.min(old_block.payload_size());
        let mut data = vec![0u8; copy_len];
        read_bytes(ptr, &mut data);
        write_bytes(new_ptr, &data);

        self.free(ptr);

        Some(new_ptr)
    }

    /// Allocates `n * size` payload bytes, zero-filled. Returns `None`
    /// when the product overflows or is zero.
    pub fn calloc(&mut self, n: usize, size: usize) -> Option<HeapPtr> {
        let total = n.checked_mul(size)?;
        if total == 0 {
            return None;
        }

        let ptr = self.malloc(total)?;
        write_bytes(ptr, &vec![0u8; total]);

        Some(ptr)
    }

    pub fn get_free_size(&self) -> u64 {
        self.free_size
    }

    pub fn get_allocated_size(&self) -> u64 {
        self.allocated_size
    }

    pub fn get_metrics(&self) -> HeapMetrics {
        HeapMetrics {
            available: heap::size_bytes(),
            free: self.free_size,
            allocated: self.allocated_size,
        }
    }

    fn insert_free(&mut self, block: Block) {
        self.seg_list.insert(block);
        self.free_size += block.size() as u64;
    }

    fn remove_free(&mut self, block: Block) {
        self.seg_list.remove(block);
        self.free_size -= block.size() as u64;
    }

    /// Grows the heap and returns the (coalesced) free block covering
    /// the new region. The epilogue is relocated to the new heap end.
    fn extend_heap(&mut self, size: usize) -> Result<Block, OutOfHeap> {
        let size = round_up(size, ALIGNMENT);

        let old_end = match heap::extend(size as u64) {
            Ok(it) => it,
            Err(e) => {
                log::warn!("heap extension of {} bytes failed", size);
                return Err(e);
            }
        };
        log::debug!("heap extended by {} bytes to {}", size, heap::hi());

        // the new block swallows the old epilogue header
        let block = Block::at(old_end - WORD_SIZE as u64);
        block.write(size, false);
        block.next().write_epilogue();

        Ok(self.coalesce(block))
    }

    /// Merges a free block with whichever physical neighbors are free
    /// and files the result on the index. The predecessor's state comes
    /// from this block's `prev_alloc` bit; an allocated predecessor is
    /// never walked to.
    fn coalesce(&mut self, block: Block) -> Block {
        debug_assert!(!block.is_allocated());

        let next = block.next();
        let prev_alloc = block.prev_allocated();
        let next_alloc = next.is_allocated();

        let merged = match (prev_alloc, next_alloc) {
            (true, true) => block,
            (true, false) => {
                self.remove_free(next);
                block.write(block.size() + next.size(), false);
                block
            }
            (false, true) => {
                let prev = block.prev();
                self.remove_free(prev);
                prev.write(prev.size() + block.size(), false);
                prev
            }
            (false, false) => {
                let prev = block.prev();
                self.remove_free(prev);
                self.remove_free(next);
                prev.write(prev.size() + block.size() + next.size(), false);
                prev
            }
        };

        self.insert_free(merged);
        merged
    }

    /// Searches the index for a free block of at least `asize` bytes.
    fn find_fit(&self, asize: usize) -> Option<Block> {
        let class = seg_class_of(asize);

        // small classes: take the first block that fits
        if class < FIRST_FIT_CLASS_COUNT {
            for i in class..FIRST_FIT_CLASS_COUNT {
                let mut curr = self.seg_list.head_ptr(i);
                while curr != EMPTY_PTR {
                    let block = Block::at(curr);
                    if block.size() >= asize {
                        return Some(block);
                    }
                    curr = block.next_free();
                }
            }
        }

        // higher classes: better-fit, bounded once a candidate is known
        let mut best: Option<Block> = None;
        let mut best_size = usize::MAX;

        for i in class.max(FIRST_FIT_CLASS_COUNT)..SEG_CLASS_COUNT {
            let mut tries = 0;
            let mut curr = self.seg_list.head_ptr(i);

            while curr != EMPTY_PTR {
                let block = Block::at(curr);
                let size = block.size();

                if size == asize {
                    return Some(block);
                }
                if size > asize && size < best_size {
                    best = Some(block);
                    best_size = size;
                }

                if best.is_some() {
                    tries += 1;
                    if tries >= BETTER_FIT_MAX_TRIES {
                        break;
                    }
                }

                curr = block.next_free();
            }

            if best.is_some() {
                return best;
            }
        }

        None
    }

    /// Carves a free residue off the tail of `block` when the leftover
    /// is at least one minimum block; otherwise the block keeps its full
    /// size. `block` must already be marked allocated.
    fn split(&mut self, block: Block, asize: usize) {
        debug_assert!(block.is_allocated());
        debug_assert!(block.size() >= asize);

        let block_size = block.size();
        if block_size - asize >= MIN_BLOCK_SIZE {
            block.write(asize, true);

            let residue = block.next();
            residue.write(block_size - asize, false);
            self.insert_free(residue);
        }
    }

    /// Validates the whole heap against the block-layout and free-list
    /// invariants, reporting the first violation via `log::error!`.
    pub fn check_heap(&self, line: u32) -> bool {
        if !self.check_sentinels(line) {
            return false;
        }

        let walked_free = match self.check_block_walk(line) {
            Some(n) => n,
            None => return false,
        };
        let listed_free = match self.check_seg_list(line) {
            Some(n) => n,
            None => return false,
        };

        if walked_free != listed_free {
            log::error!(
                "checkheap (line {}): {} free blocks on the heap, {} on the index",
                line,
                walked_free,
                listed_free
            );
            return false;
        }

        let accounted = self.free_size + self.allocated_size + (2 * WORD_SIZE) as u64;
        if accounted != heap::size_bytes() {
            log::error!(
                "checkheap (line {}): counters cover {} of {} heap bytes",
                line,
                accounted,
                heap::size_bytes()
            );
            return false;
        }

        true
    }

    fn check_sentinels(&self, line: u32) -> bool {
        let prologue = read_word(heap::lo());
        if extract_size(prologue) != 0 || !extract_alloc(prologue) {
            log::error!("checkheap (line {}): bad prologue", line);
            return false;
        }

        let epilogue = read_word(heap::hi() - WORD_SIZE as u64);
        if extract_size(epilogue) != 0 || !extract_alloc(epilogue) {
            log::error!("checkheap (line {}): bad epilogue", line);
            return false;
        }

        if self.heap_start != heap::lo() + WORD_SIZE as u64 {
            log::error!("checkheap (line {}): heap_start moved", line);
            return false;
        }

        true
    }

    /// Walks every physical block in address order; returns the number
    /// of free blocks seen, or `None` on the first violation.
    fn check_block_walk(&self, line: u32) -> Option<usize> {
        let epilogue_ptr = heap::hi() - WORD_SIZE as u64;

        let mut free_count = 0;
        let mut prev_alloc = true; // prologue counts as allocated
        let mut prev_min = false;
        let mut prev_free = false;
        let mut curr = self.heap_start;

        while curr < epilogue_ptr {
            let block = Block::at(curr);
            let size = block.size();

            if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 {
                log::error!(
                    "checkheap (line {}): block {} has illegal size {}",
                    line,
                    curr,
                    size
                );
                return None;
            }
            if block.payload_ptr() % ALIGNMENT as u64 != 0 {
                log::error!(
                    "checkheap (line {}): block {} payload is misaligned",
                    line,
                    curr
                );
                return None;
            }
            if curr + size as u64 > epilogue_ptr {
                log::error!(
                    "checkheap (line {}): block {} runs past the heap end",
                    line,
                    curr
                );
                return None;
            }
            if block.prev_allocated() != prev_alloc || block.prev_is_min() != prev_min {
                log::error!(
                    "checkheap (line {}): block {} carries stale predecessor bits",
                    line,
                    curr
                );
                return None;
            }

            let alloc = block.is_allocated();
            if !alloc {
                if prev_free {
                    log::error!(
                        "checkheap (line {}): adjacent free blocks at {}",
                        line,
                        curr
                    );
                    return None;
                }

                free_count += 1;

                if size > MIN_BLOCK_SIZE && block.header() != block.footer() {
                    log::error!(
                        "checkheap (line {}): header/footer mismatch at {}",
                        line,
                        curr
                    );
                    return None;
                }
            }

            prev_free = !alloc;
            prev_alloc = alloc;
            prev_min = size == MIN_BLOCK_SIZE;
            curr += size as u64;
        }

        let epilogue = Block::at(epilogue_ptr);
        if epilogue.prev_allocated() != prev_alloc || epilogue.prev_is_min() != prev_min {
            log::error!(
                "checkheap (line {}): epilogue carries stale predecessor bits",
                line
            );
            return None;
        }

        Some(free_count)
    }

    /// Walks every class list; returns the total node count, or `None`
    /// on the first violation.
    fn check_seg_list(&self, line: u32) -> Option<usize> {
        let mut total = 0;

        for class in 0..SEG_CLASS_COUNT {
            if self.class_has_cycle(class) {
                log::error!("checkheap (line {}): class {} list is cyclic", line, class);
                return None;
            }

            let mut prev = EMPTY_PTR;
            let mut curr = self.seg_list.head_ptr(class);

            while curr != EMPTY_PTR {
                if curr < self.heap_start || curr + WORD_SIZE as u64 > heap::hi() {
                    log::error!(
                        "checkheap (line {}): class {} links to {} outside the heap",
                        line,
                        class,
                        curr
                    );
                    return None;
                }

                let block = Block::at(curr);
                if block.is_allocated() {
                    log::error!(
                        "checkheap (line {}): allocated block {} on the free index",
                        line,
                        curr
                    );
                    return None;
                }
                if block.size() < MIN_BLOCK_SIZE || block.size() % ALIGNMENT != 0 {
                    log::error!(
                        "checkheap (line {}): free-list block {} has illegal size {}",
                        line,
                        curr,
                        block.size()
                    );
                    return None;
                }
                if seg_class_of(block.size()) != class {
                    log::error!(
                        "checkheap (line {}): block {} of size {} filed under class {}",
                        line,
                        curr,
                        block.size(),
                        class
                    );
                    return None;
                }
                if class != MIN_CLASS && block.prev_free() != prev {
                    log::error!(
                        "checkheap (line {}): back-pointer of {} is inconsistent",
                        line,
                        curr
                    );
                    return None;
                }

                total += 1;
                prev = curr;
                curr = block.next_free();
            }
        }

        Some(total)
    }

    /// Tortoise-and-hare over one class list.
    fn class_has_cycle(&self, class: usize) -> bool {
        let advance = |ptr: HeapPtr| Block::at(ptr).next_free();

        let mut slow = self.seg_list.head_ptr(class);
        let mut fast = slow;

        loop {
            if fast == EMPTY_PTR {
                return false;
            }
            fast = advance(fast);
            if fast == EMPTY_PTR {
                return false;
            }
            fast = advance(fast);
            slow = advance(slow);

            if slow == fast && slow != EMPTY_PTR {
                return true;
            }
        }
    }
}

/// Rounds a payload request up to a legal block size: one header word of
/// overhead, 16-byte aligned, at least the minimum block. `None` when
/// the request is so large the arithmetic overflows.
fn adjust_size(size: usize) -> Option<usize> {
    let total = size.checked_add(WORD_SIZE)?;
    let rounded = total.checked_add(ALIGNMENT - 1)? / ALIGNMENT * ALIGNMENT;

    Some(rounded.max(MIN_BLOCK_SIZE))
}

fn round_up(size: usize, n: usize) -> usize {
    n * ((size + n - 1) / n)
}
