mod core;
mod drop_object;
mod header;
pub(crate) mod list;
mod trace;

use std::ptr::NonNull;

pub use self::core::{AnyEdge, AsNode, Gc, GcEdge, NodeVTable};
pub(crate) use self::core::GcBox;
pub use header::{Decrement, GcHeader, Increment, Status, StatusFlags, Underflow, REFCOUNT_MAX};
pub use list::NodeList;
pub use trace::{Trace, TracerFn};

/// A type erased pointer to a node, pointing at its header.
pub type NodePtr = NonNull<GcHeader>;
