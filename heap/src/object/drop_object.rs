//! Reclaiming a node happens in two steps that may be far apart:
//! 1. `drop_only`: run the payload's destructor, releasing the edges it holds
//! 2. `Collector::deallocate`: give the storage back to the allocator
//!
//! A sweep runs only the first step, the lite sweep runs the second once the count is zero.

use std::ptr::{self, NonNull};

use super::core::GcBox;
use super::header::GcHeader;
use super::trace::{Trace, TracerFn};

/// run `trace` of the payload behind a type erased header
pub(super) unsafe fn trace_obj<T: Trace>(node: NonNull<GcHeader>, tracer_fn: &mut TracerFn) {
    let obj = &*node.cast::<GcBox<T>>().as_ptr();
    obj.value.trace(tracer_fn);
}

/// drop only (doesn't deallocate)
/// NOTE: `header` is not dropped so the node stays linked and countable
pub(super) unsafe fn drop_only_obj<T>(node: NonNull<GcHeader>) {
    let obj = node.cast::<GcBox<T>>().as_ptr();
    ptr::drop_in_place(ptr::addr_of_mut!((*obj).value).cast::<T>());
}
