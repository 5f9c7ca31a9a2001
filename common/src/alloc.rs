//! The narrow contract the collector needs from the byte allocator underneath
//! it, plus [`BlockAllocator`], a std-backed implementation of that contract.
//!
//! The collector never asks the allocator to collect anything. All it needs is
//! raw blocks, a running byte count, and one "allocated" bit per block so that
//! an arbitrary word can be tested for being the address of a live node.

use std::alloc::{self as sys, Layout};
use std::collections::BTreeMap;
use std::fmt;
use std::ptr::NonNull;

/// Every block handed out by an allocator is aligned to this many bytes.
pub const BLOCK_ALIGN: usize = 16;

static_assertions::const_assert!(BLOCK_ALIGN.is_power_of_two());
static_assertions::const_assert!(BLOCK_ALIGN >= std::mem::align_of::<usize>());

/// Raw block allocator consumed by the collector.
///
/// Implementations are used from one thread only and are never asked to
/// reclaim memory on their own.
pub trait ByteAllocator {
    /// Allocate a block of at least `bytes` bytes aligned to [`BLOCK_ALIGN`].
    /// Returns `None` when the request cannot be satisfied.
    fn alloc(&mut self, bytes: usize) -> Option<NonNull<u8>>;

    /// Return a block to the allocator.
    ///
    /// # Safety
    ///
    /// `block` must have been returned by [`alloc`](Self::alloc) on this
    /// allocator with the same `bytes`, and must not be used afterwards.
    unsafe fn free(&mut self, block: NonNull<u8>, bytes: usize);

    /// Base address of the block containing `ptr`, or `None` when `ptr` is
    /// not inside any block (including anything outside the plausible heap
    /// range).
    fn base_of(&self, ptr: *const u8) -> Option<NonNull<u8>>;

    fn set_mark(&mut self, block: NonNull<u8>);

    fn clear_mark(&mut self, block: NonNull<u8>);

    fn is_marked(&self, block: NonNull<u8>) -> bool;

    /// Bytes currently outstanding.
    fn bytes_allocated(&self) -> usize;

    /// Put the allocator into assist-only mode: it hands out and takes back
    /// memory but never starts a collection of its own.
    fn configure_assist_only(&mut self) {}

    /// Freed blocks found modified since they were freed. Only allocators that
    /// hold freed blocks back can tell; the rest report zero.
    fn corrupted_freed_blocks(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    size: usize,
    allocated: bool,
}

/// Allocator backed by the global Rust allocator.
///
/// Blocks are indexed by address so that interior pointers can be resolved
/// to their block with one ordered lookup.
pub struct BlockAllocator {
    blocks: BTreeMap<usize, Block>,
    bytes_allocated: usize,
    limit: Option<usize>,
    least_addr: usize,
    greatest_addr: usize,
    assist_only: bool,
}

impl fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("blocks", &format!("[{} blocks]", self.blocks.len()))
            .field("bytes_allocated", &self.bytes_allocated)
            .field("limit", &self.limit)
            .field("assist_only", &self.assist_only)
            .finish()
    }
}

impl Default for BlockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            bytes_allocated: 0,
            limit: None,
            least_addr: usize::MAX,
            greatest_addr: 0,
            assist_only: false,
        }
    }

    /// An allocator that refuses requests which would take the outstanding
    /// byte count above `limit`.
    pub fn with_limit(limit: usize) -> Self {
        let mut allocator = Self::new();
        allocator.limit = Some(limit);
        allocator
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_assist_only(&self) -> bool {
        self.assist_only
    }

    /// Lowest and highest byte address ever handed out, if any.
    pub fn plausible_range(&self) -> Option<(usize, usize)> {
        (self.least_addr <= self.greatest_addr).then_some((self.least_addr, self.greatest_addr))
    }
}

impl ByteAllocator for BlockAllocator {
    fn alloc(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        let size = bytes.max(1);
        if let Some(limit) = self.limit {
            if self.bytes_allocated.saturating_add(size) > limit {
                debug!(
                    "refusing {} byte block: {} of {} bytes in use",
                    size, self.bytes_allocated, limit
                );
                return None;
            }
        }
        let layout = Layout::from_size_align(size, BLOCK_ALIGN).ok()?;
        let block = NonNull::new(unsafe { sys::alloc(layout) })?;
        let addr = block.as_ptr() as usize;
        self.least_addr = self.least_addr.min(addr);
        self.greatest_addr = self.greatest_addr.max(addr + size - 1);
        self.blocks.insert(
            addr,
            Block {
                size,
                allocated: false,
            },
        );
        self.bytes_allocated += size;
        Some(block)
    }

    unsafe fn free(&mut self, block: NonNull<u8>, bytes: usize) {
        let addr = block.as_ptr() as usize;
        match self.blocks.remove(&addr) {
            Some(info) => {
                debug_assert_eq!(info.size, bytes.max(1));
                self.bytes_allocated -= info.size;
                sys::dealloc(
                    block.as_ptr(),
                    Layout::from_size_align_unchecked(info.size, BLOCK_ALIGN),
                );
            }
            None => error!("free of unknown block {:#x} ({} bytes)", addr, bytes),
        }
    }

    fn base_of(&self, ptr: *const u8) -> Option<NonNull<u8>> {
        let addr = ptr as usize;
        if addr < self.least_addr || addr > self.greatest_addr {
            return None;
        }
        let (&base, block) = self.blocks.range(..=addr).next_back()?;
        if addr < base + block.size {
            NonNull::new(base as *mut u8)
        } else {
            None
        }
    }

    fn set_mark(&mut self, block: NonNull<u8>) {
        match self.blocks.get_mut(&(block.as_ptr() as usize)) {
            Some(info) => info.allocated = true,
            None => warn!("set_mark on unknown block {:?}", block),
        }
    }

    fn clear_mark(&mut self, block: NonNull<u8>) {
        if let Some(info) = self.blocks.get_mut(&(block.as_ptr() as usize)) {
            info.allocated = false;
        }
    }

    fn is_marked(&self, block: NonNull<u8>) -> bool {
        self.blocks
            .get(&(block.as_ptr() as usize))
            .map_or(false, |info| info.allocated)
    }

    fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    fn configure_assist_only(&mut self) {
        self.assist_only = true;
    }
}

impl Drop for BlockAllocator {
    fn drop(&mut self) {
        for (addr, info) in std::mem::take(&mut self.blocks) {
            unsafe {
                sys::dealloc(
                    addr as *mut u8,
                    Layout::from_size_align_unchecked(info.size, BLOCK_ALIGN),
                );
            }
        }
    }
}
