//! Debugging shim that catches writes past the end of node storage and writes to freed nodes.
//!
//! Each block is surrounded by redzones; the leading one also records the size requested from
//! the underlying allocator. Freed blocks are poisoned and held back in a FIFO quarantine
//! until the quarantine outgrows its budget, so a dangling write lands in poisoned memory that
//! can be checked later instead of in a recycled node.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;

use rcmark_common::alloc::{ByteAllocator, BLOCK_ALIGN};

use crate::error::FatalPolicy;

/// Bytes of redzone on each side of a block.
pub const REDZONE_SIZE: usize = 16;
const REDZONE_BYTE: u8 = 0xfa;
const FREED_BYTE: u8 = 0xfd;

static_assertions::const_assert!(REDZONE_SIZE >= mem::size_of::<usize>());
static_assertions::const_assert_eq!(REDZONE_SIZE % BLOCK_ALIGN, 0);

pub struct QuarantineAllocator<A: ByteAllocator> {
    inner: A,
    /// (allocation, allocation size) of freed blocks, oldest first
    quarantine: VecDeque<(NonNull<u8>, usize)>,
    quarantine_bytes: usize,
    max_quarantine_bytes: usize,
    /// bytes requested by callers and not yet freed
    live_bytes: usize,
    fatal_policy: FatalPolicy,
}

impl<A: ByteAllocator> QuarantineAllocator<A> {
    pub fn new(inner: A, max_quarantine_bytes: usize, fatal_policy: FatalPolicy) -> Self {
        Self {
            inner,
            quarantine: VecDeque::new(),
            quarantine_bytes: 0,
            max_quarantine_bytes,
            live_bytes: 0,
            fatal_policy,
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn quarantined_blocks(&self) -> usize {
        self.quarantine.len()
    }

    pub fn quarantined_bytes(&self) -> usize {
        self.quarantine_bytes
    }

    fn allocation_of(storage: NonNull<u8>) -> NonNull<u8> {
        // storage always sits REDZONE_SIZE bytes into a non-null allocation
        unsafe { NonNull::new_unchecked(storage.as_ptr().sub(REDZONE_SIZE)) }
    }

    fn storage_of(allocation: NonNull<u8>) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(allocation.as_ptr().add(REDZONE_SIZE)) }
    }

    unsafe fn redzones_intact(allocation: NonNull<u8>, bytes: usize) -> bool {
        let base = allocation.as_ptr();
        let size_word = mem::size_of::<usize>();
        let leading = slice::from_raw_parts(base.add(size_word), REDZONE_SIZE - size_word);
        let trailing = slice::from_raw_parts(base.add(REDZONE_SIZE + bytes), REDZONE_SIZE);
        leading.iter().chain(trailing).all(|&b| b == REDZONE_BYTE)
    }

    fn release_oldest(&mut self) {
        while self.quarantine_bytes > self.max_quarantine_bytes {
            let Some((allocation, size)) = self.quarantine.pop_front() else {
                break;
            };
            self.quarantine_bytes -= size;
            unsafe { self.inner.free(allocation, size) };
        }
    }
}

impl<A: ByteAllocator> ByteAllocator for QuarantineAllocator<A> {
    fn alloc(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let allocation_size = bytes.checked_add(2 * REDZONE_SIZE)?;
        let allocation = self.inner.alloc(allocation_size)?;
        unsafe {
            let base = allocation.as_ptr();
            ptr::write_bytes(base, REDZONE_BYTE, REDZONE_SIZE);
            base.cast::<usize>().write(allocation_size);
            ptr::write_bytes(base.add(REDZONE_SIZE + bytes), REDZONE_BYTE, REDZONE_SIZE);
        }
        self.live_bytes += bytes;
        Some(Self::storage_of(allocation))
    }

    unsafe fn free(&mut self, storage: NonNull<u8>, bytes: usize) {
        let allocation = Self::allocation_of(storage);
        let allocation_size = allocation.as_ptr().cast::<usize>().read();
        if allocation_size != bytes + 2 * REDZONE_SIZE || !Self::redzones_intact(allocation, bytes)
        {
            fatal!(
                self.fatal_policy,
                "redzone damaged around {} byte block at {:p}: something wrote out of bounds",
                bytes,
                storage
            );
        }
        ptr::write_bytes(allocation.as_ptr(), FREED_BYTE, allocation_size);
        self.live_bytes -= bytes;
        self.quarantine.push_back((allocation, allocation_size));
        self.quarantine_bytes += allocation_size;
        self.release_oldest();
    }

    fn base_of(&self, ptr: *const u8) -> Option<NonNull<u8>> {
        self.inner.base_of(ptr).map(Self::storage_of)
    }

    fn set_mark(&mut self, storage: NonNull<u8>) {
        self.inner.set_mark(Self::allocation_of(storage))
    }

    fn clear_mark(&mut self, storage: NonNull<u8>) {
        self.inner.clear_mark(Self::allocation_of(storage))
    }

    fn is_marked(&self, storage: NonNull<u8>) -> bool {
        self.inner.is_marked(Self::allocation_of(storage))
    }

    fn bytes_allocated(&self) -> usize {
        self.live_bytes
    }

    fn configure_assist_only(&mut self) {
        self.inner.configure_assist_only()
    }

    fn corrupted_freed_blocks(&self) -> usize {
        self.quarantine
            .iter()
            .filter(|&&(allocation, size)| {
                let bytes = unsafe { slice::from_raw_parts(allocation.as_ptr(), size) };
                bytes.iter().any(|&b| b != FREED_BYTE)
            })
            .count()
    }
}

impl<A: ByteAllocator> Drop for QuarantineAllocator<A> {
    fn drop(&mut self) {
        for (allocation, size) in mem::take(&mut self.quarantine) {
            unsafe { self.inner.free(allocation, size) };
        }
    }
}

impl<A: ByteAllocator + fmt::Debug> fmt::Debug for QuarantineAllocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuarantineAllocator")
            .field("inner", &self.inner)
            .field("live_bytes", &self.live_bytes)
            .field(
                "quarantine",
                &format!(
                    "[{} blocks, {} of {} bytes]",
                    self.quarantine.len(),
                    self.quarantine_bytes,
                    self.max_quarantine_bytes
                ),
            )
            .finish()
    }
}
