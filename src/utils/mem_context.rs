use thiserror::Error;

/// Granularity of every heap extension, in bytes.
pub const EXTEND_ALIGN: u64 = 16;

/// The backing heap refused to grow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("out of heap memory")]
pub struct OutOfHeap;

pub(crate) trait MemContext {
    fn size_bytes(&self) -> u64;
    fn extend(&mut self, bytes: u64) -> Result<u64, OutOfHeap>;
    fn read(&self, offset: u64, buf: &mut [u8]);
    fn write(&mut self, offset: u64, buf: &[u8]);
}

/// In-process heap simulation. Grows monotonically; never shrinks while
/// operations run. `limit` caps the total heap size so harnesses can
/// exercise the out-of-heap path.
#[derive(Default)]
pub(crate) struct SimMemContext {
    data: Vec<u8>,
    limit: Option<u64>,
}

impl MemContext for SimMemContext {
    fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn extend(&mut self, bytes: u64) -> Result<u64, OutOfHeap> {
        debug_assert!(bytes > 0 && bytes % EXTEND_ALIGN == 0);

        let prev_size = self.size_bytes();
        if let Some(limit) = self.limit {
            if prev_size + bytes > limit {
                return Err(OutOfHeap);
            }
        }

        self.data.resize((prev_size + bytes) as usize, 0);

        Ok(prev_size)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) {
        let offset = offset as usize;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: u64, buf: &[u8]) {
        let offset = offset as usize;
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
    }
}

pub mod heap {
    use super::{MemContext, OutOfHeap, SimMemContext};
    use std::cell::RefCell;

    thread_local! {
        static CONTEXT: RefCell<SimMemContext> = RefCell::new(SimMemContext::default());
    }

    /// Truncates the heap to zero bytes. The configured growth limit is
    /// left in place.
    pub fn reset() {
        CONTEXT.with(|it| it.borrow_mut().data.clear());
    }

    /// Caps the total heap size; `None` removes the cap.
    pub fn set_limit(limit: Option<u64>) {
        CONTEXT.with(|it| it.borrow_mut().limit = limit);
    }

    /// Acquires `bytes` fresh zeroed bytes at the heap end and returns
    /// the previous heap end.
    pub fn extend(bytes: u64) -> Result<u64, OutOfHeap> {
        CONTEXT.with(|it| it.borrow_mut().extend(bytes))
    }

    pub fn size_bytes() -> u64 {
        CONTEXT.with(|it| it.borrow().size_bytes())
    }

    /// Lowest valid heap address.
    pub fn lo() -> u64 {
        0
    }

    /// One past the highest valid heap address.
    pub fn hi() -> u64 {
        size_bytes()
    }

    pub fn read(offset: u64, buf: &mut [u8]) {
        CONTEXT.with(|it| it.borrow().read(offset, buf))
    }

    pub fn write(offset: u64, buf: &[u8]) {
        CONTEXT.with(|it| it.borrow_mut().write(offset, buf))
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::mem_context::{heap, OutOfHeap};

    #[test]
    fn extend_read_write_work_fine() {
        heap::set_limit(None);
        heap::reset();

        assert_eq!(heap::size_bytes(), 0);
        assert_eq!(heap::extend(64), Ok(0));
        assert_eq!(heap::extend(16), Ok(64));
        assert_eq!(heap::hi(), 80);

        heap::write(10, &[1, 2, 3]);
        let mut buf = [0u8; 3];
        heap::read(10, &mut buf);
        assert_eq!(buf, [1, 2, 3]);

        // fresh bytes come back zeroed
        let mut buf = [0xFFu8; 4];
        heap::read(64, &mut buf);
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn limit_works_fine() {
        heap::reset();
        heap::set_limit(Some(32));

        assert_eq!(heap::extend(32), Ok(0));
        assert_eq!(heap::extend(16), Err(OutOfHeap));
        assert_eq!(heap::size_bytes(), 32);

        heap::set_limit(None);
        assert!(heap::extend(16).is_ok());
    }
}
