use crate::mem::{read_bytes, write_bytes, HeapPtr};

/// Fills a payload with a position-dependent pattern so later reads can
/// detect any byte that moved or got clobbered.
pub fn fill_data(ptr: HeapPtr, len: usize) {
    let data: Vec<u8> = (0..len).map(|i| (i as u8).reverse_bits()).collect();
    write_bytes(ptr, &data);
}

/// Checks the pattern written by [`fill_data`] over the first `len` bytes.
pub fn verify_data(ptr: HeapPtr, len: usize) {
    let mut data = vec![0u8; len];
    read_bytes(ptr, &mut data);

    for (i, byte) in data.iter().enumerate() {
        assert_eq!(*byte, (i as u8).reverse_bits(), "payload corrupted at byte {}", i);
    }
}
