use std::slice;

/// Build a mutable slice over a mapped segment's buffer. `rvm::Rvm::map`
/// documents that the returned pointer is valid for exactly `[0, len)` bytes
/// until the matching `unmap`; this is the unsafe boundary every test
/// crosses to poke at that buffer the way a host application would.
pub unsafe fn segment_slice<'a>(base: *mut u8, len: usize) -> &'a mut [u8] {
    slice::from_raw_parts_mut(base, len)
}
