use crate::mem::word::{
    extract_alloc, extract_prev_alloc, extract_prev_min, extract_size, pack, Word, WORD_SIZE,
};
use crate::mem::{read_word, write_word, HeapPtr};

/// Payload alignment; block sizes are multiples of this.
pub const ALIGNMENT: usize = 16;

/// Smallest legal block: one header word plus one payload word. Free
/// blocks of this size hold a single `next` link and no footer.
pub const MIN_BLOCK_SIZE: usize = 16;

/// A view over one heap block, identified by the offset of its header.
/// All metadata lives on the heap; the view itself is just the offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Block(HeapPtr);

impl Block {
    #[inline]
    pub fn at(ptr: HeapPtr) -> Self {
        Self(ptr)
    }

    /// Recovers the block from a payload pointer handed out by malloc.
    #[inline]
    pub fn from_payload(payload: HeapPtr) -> Self {
        Self(payload - WORD_SIZE as u64)
    }

    #[inline]
    pub fn ptr(&self) -> HeapPtr {
        self.0
    }

    #[inline]
    pub fn payload_ptr(&self) -> HeapPtr {
        self.0 + WORD_SIZE as u64
    }

    #[inline]
    pub fn header(&self) -> Word {
        read_word(self.0)
    }

    #[inline]
    pub fn size(&self) -> usize {
        extract_size(self.header())
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        extract_alloc(self.header())
    }

    #[inline]
    pub fn prev_allocated(&self) -> bool {
        extract_prev_alloc(self.header())
    }

    #[inline]
    pub fn prev_is_min(&self) -> bool {
        extract_prev_min(self.header())
    }

    /// Bytes usable by the caller of malloc.
    pub fn payload_size(&self) -> usize {
        debug_assert!(self.is_allocated());

        self.size() - WORD_SIZE
    }

    pub(crate) fn footer_ptr(&self) -> HeapPtr {
        self.0 + (self.size() - WORD_SIZE) as u64
    }

    pub(crate) fn footer(&self) -> Word {
        read_word(self.footer_ptr())
    }

    /// Writes this block's header (and footer, for free blocks above
    /// minimum size), then mirrors the new state into the successor's
    /// `prev_alloc`/`prev_min` bits. The prev bits of this block's own
    /// header are owned by the predecessor and are carried over as-is.
    pub fn write(&self, size: usize, alloc: bool) {
        debug_assert!(size >= MIN_BLOCK_SIZE && size % ALIGNMENT == 0);

        let header = self.header();
        let word = pack(
            size,
            alloc,
            extract_prev_alloc(header),
            extract_prev_min(header),
        );
        write_word(self.0, word);

        if !alloc && size > MIN_BLOCK_SIZE {
            write_word(self.0 + (size - WORD_SIZE) as u64, word);
        }

        let next = Block::at(self.0 + size as u64);
        let next_header = next.header();
        write_word(
            next.0,
            pack(
                extract_size(next_header),
                extract_alloc(next_header),
                alloc,
                size == MIN_BLOCK_SIZE,
            ),
        );
    }

    /// Writes the zero-sized allocated sentinel that terminates the heap.
    /// Keeps whatever prev bits are already present; does not propagate.
    pub fn write_epilogue(&self) {
        let header = self.header();
        write_word(
            self.0,
            pack(
                0,
                true,
                extract_prev_alloc(header),
                extract_prev_min(header),
            ),
        );
    }

    /// The physically following block. Must not be called on the epilogue.
    pub fn next(&self) -> Block {
        debug_assert_ne!(self.size(), 0, "called next() on the epilogue");

        Block::at(self.0 + self.size() as u64)
    }

    /// The physically preceding block. Only callable when the predecessor
    /// is free: an allocated predecessor has no footer, so its boundary
    /// cannot be recovered (coalescing checks `prev_allocated` first).
    pub fn prev(&self) -> Block {
        debug_assert!(
            !self.prev_allocated(),
            "predecessor is allocated, its boundary is unreachable"
        );

        if self.prev_is_min() {
            return Block::at(self.0 - MIN_BLOCK_SIZE as u64);
        }

        let prev_footer = read_word(self.0 - WORD_SIZE as u64);
        Block::at(self.0 - extract_size(prev_footer) as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::mem::block::{Block, MIN_BLOCK_SIZE};
    use crate::mem::word::{pack, WORD_SIZE};
    use crate::mem::write_word;
    use crate::utils::mem_context::heap;

    fn setup(total: u64) {
        heap::reset();
        heap::extend(total).unwrap();

        // prologue footer at 0, first header at 8
        write_word(0, pack(0, true, false, false));
        write_word(WORD_SIZE as u64, pack(0, true, true, false));
    }

    #[test]
    fn write_and_walk_work_fine() {
        setup(4096);

        let a = Block::at(WORD_SIZE as u64);
        a.write(64, true);
        let b = a.next();
        b.write(32, false);
        let c = b.next();
        c.write(MIN_BLOCK_SIZE, true);
        c.next().write_epilogue();

        assert_eq!(a.size(), 64);
        assert!(a.is_allocated());
        assert!(a.prev_allocated()); // prologue

        assert_eq!(b.ptr(), 8 + 64);
        assert!(!b.is_allocated());
        assert!(b.prev_allocated());
        assert_eq!(b.header(), b.footer());

        assert!(!c.prev_allocated());
        assert!(!c.prev_is_min());
        assert_eq!(c.prev(), b);

        let epilogue = c.next();
        assert_eq!(epilogue.size(), 0);
        assert!(epilogue.is_allocated());
        assert!(epilogue.prev_allocated());
        assert!(epilogue.prev_is_min());
    }

    #[test]
    fn prev_of_min_sized_block_works_fine() {
        setup(4096);

        let a = Block::at(WORD_SIZE as u64);
        a.write(MIN_BLOCK_SIZE, false);
        let b = a.next();
        b.write(48, true);
        b.next().write_epilogue();

        // a is free and minimum-sized: b finds it via the prev_min tag,
        // no footer involved
        assert!(!b.prev_allocated());
        assert!(b.prev_is_min());
        assert_eq!(b.prev(), a);
    }

    #[test]
    fn payload_addressing_works_fine() {
        setup(4096);

        let a = Block::at(WORD_SIZE as u64);
        a.write(32, true);

        assert_eq!(a.payload_ptr() % 16, 0);
        assert_eq!(a.payload_size(), 32 - WORD_SIZE);
        assert_eq!(Block::from_payload(a.payload_ptr()), a);
    }
}
