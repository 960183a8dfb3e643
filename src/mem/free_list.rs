use crate::mem::block::{Block, ALIGNMENT, MIN_BLOCK_SIZE};
use crate::mem::word::WORD_SIZE;
use crate::mem::{read_word, write_word, EMPTY_PTR, HeapPtr};
use crate::utils::math::fast_log2;

/// Number of size classes in the segregated index.
pub const SEG_CLASS_COUNT: usize = 15;

/// Classes 0..7 hold exactly one size each: 16, 32, .., 128 bytes.
const EXACT_CLASS_COUNT: usize = 8;

/// The minimum-size class; its list is singly-linked because a 16-byte
/// free block has room for one link word only.
pub const MIN_CLASS: usize = 0;

/// Maps a legal block size to its class. Total over all legal sizes.
pub fn seg_class_of(size: usize) -> usize {
    debug_assert!(size >= MIN_BLOCK_SIZE && size % ALIGNMENT == 0);

    if size <= EXACT_CLASS_COUNT * ALIGNMENT {
        size / ALIGNMENT - 1
    } else {
        (EXACT_CLASS_COUNT + fast_log2(size) as usize - 7).min(SEG_CLASS_COUNT - 1)
    }
}

// Free-list links live in the payload: `next` in the first payload word
// (the only one a minimum-size block has), `prev` in the second.
impl Block {
    pub(crate) fn next_free(&self) -> HeapPtr {
        read_word(self.ptr() + WORD_SIZE as u64)
    }

    pub(crate) fn set_next_free(&self, ptr: HeapPtr) {
        write_word(self.ptr() + WORD_SIZE as u64, ptr);
    }

    pub(crate) fn prev_free(&self) -> HeapPtr {
        read_word(self.ptr() + (WORD_SIZE * 2) as u64)
    }

    pub(crate) fn set_prev_free(&self, ptr: HeapPtr) {
        write_word(self.ptr() + (WORD_SIZE * 2) as u64, ptr);
    }
}

/// The segregated free-list index: one head pointer per size class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegList {
    heads: [HeapPtr; SEG_CLASS_COUNT],
}

impl SegList {
    pub fn new() -> Self {
        Self {
            heads: [EMPTY_PTR; SEG_CLASS_COUNT],
        }
    }

    pub fn head(&self, class: usize) -> Option<Block> {
        match self.heads[class] {
            EMPTY_PTR => None,
            ptr => Some(Block::at(ptr)),
        }
    }

    pub(crate) fn head_ptr(&self, class: usize) -> HeapPtr {
        self.heads[class]
    }

    /// LIFO insertion into the block's class.
    pub fn insert(&mut self, block: Block) {
        debug_assert!(!block.is_allocated());

        let class = seg_class_of(block.size());
        let head = self.heads[class];

        block.set_next_free(head);
        if class != MIN_CLASS {
            block.set_prev_free(EMPTY_PTR);
            if head != EMPTY_PTR {
                Block::at(head).set_prev_free(block.ptr());
            }
        }

        self.heads[class] = block.ptr();
    }

    /// Unlinks the block from its class and clears its link words so the
    /// checker catches any stale reference.
    pub fn remove(&mut self, block: Block) {
        let class = seg_class_of(block.size());

        if class == MIN_CLASS {
            // singly-linked: scan from the head
            if self.heads[class] == block.ptr() {
                self.heads[class] = block.next_free();
            } else {
                let mut curr = self.heads[class];
                while curr != EMPTY_PTR {
                    let node = Block::at(curr);
                    if node.next_free() == block.ptr() {
                        node.set_next_free(block.next_free());
                        break;
                    }
                    curr = node.next_free();
                }
            }

            block.set_next_free(EMPTY_PTR);
            return;
        }

        let prev = block.prev_free();
        let next = block.next_free();

        if prev == EMPTY_PTR {
            self.heads[class] = next;
        } else {
            Block::at(prev).set_next_free(next);
        }
        if next != EMPTY_PTR {
            Block::at(next).set_prev_free(prev);
        }

        block.set_next_free(EMPTY_PTR);
        block.set_prev_free(EMPTY_PTR);
    }
}

impl Default for SegList {
    fn default() -> Self {
        Self::new()
    }
}
