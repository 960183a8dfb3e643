pub mod math;
pub mod mem_context;
pub mod test;

/// Point-in-time view of heap occupancy, in bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapMetrics {
    pub available: u64,
    pub free: u64,
    pub allocated: u64,
}
