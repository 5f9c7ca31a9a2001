mod quarantine;

pub use quarantine::{QuarantineAllocator, REDZONE_SIZE};
pub use rcmark_common::alloc::{BlockAllocator, ByteAllocator, BLOCK_ALIGN};
