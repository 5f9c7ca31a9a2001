//! Everything the mark phase starts from.
//!
//! Explicit roots hold a count. Stack roots, the protect stack, the node stack and registered
//! sources don't, so the lite sweep pins whatever they designate for the duration of a sweep.

mod node_stack;
mod protect;
mod root;
mod stack_root;
mod weak;

use std::cell::RefCell;

use crate::error::FatalPolicy;
use crate::object::{NodePtr, TracerFn};

pub use node_stack::NodeStack;
pub use protect::ProtectStack;
pub use root::{Root, RootTable};
pub use stack_root::{StackRoot, StackRootStack};
pub use weak::{WeakRef, WeakTable};
pub(crate) use weak::Expired;

/// A provider of roots the collector doesn't own, e.g. an interpreter's frame stack.
pub trait RootSource {
    /// Call `visitor` with every node this source designates.
    fn visit_roots(&self, visitor: &mut TracerFn);

    /// Whether the designated nodes must be pinned during a lite sweep, true unless every one
    /// of them is already held by a counted edge.
    fn needs_pinning(&self) -> bool {
        true
    }
}

/// Handle for unregistering a source added with
/// [`Collector::register_root_source`](crate::gc::Collector::register_root_source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSourceId(usize);

/// Depths of the LIFO root registries, for unwinding after a non-local exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSnapshot {
    stack_roots: usize,
    protect: usize,
    node_stack: usize,
}

#[derive(Default)]
pub(crate) struct Roots {
    pub(crate) explicit: RefCell<RootTable>,
    pub(crate) stack: RefCell<StackRootStack>,
    pub(crate) protect: RefCell<ProtectStack>,
    pub(crate) node_stack: RefCell<NodeStack>,
    pub(crate) weak: RefCell<WeakTable>,
    external: RefCell<Vec<Option<Box<dyn RootSource>>>>,
}

impl Roots {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn sources(&self) -> [&RefCell<dyn RootSource>; 4] {
        [
            &self.explicit as &RefCell<dyn RootSource>,
            &self.stack,
            &self.protect,
            &self.node_stack,
        ]
    }

    /// Visit every root, counted or not.
    pub(crate) fn visit_all(&self, visitor: &mut TracerFn) {
        for source in self.sources() {
            source.borrow().visit_roots(visitor);
        }
        for source in self.external.borrow().iter().flatten() {
            source.visit_roots(visitor);
        }
    }

    /// Nodes designated by uncounted roots.
    pub(crate) fn pinnable(&self) -> Vec<NodePtr> {
        let mut pinned = Vec::new();
        let mut collect = |header: &crate::object::GcHeader| pinned.push(header.as_node());
        for source in self.sources() {
            let source = source.borrow();
            if source.needs_pinning() {
                source.visit_roots(&mut collect);
            }
        }
        for source in self.external.borrow().iter().flatten() {
            if source.needs_pinning() {
                source.visit_roots(&mut collect);
            }
        }
        pinned
    }

    pub(crate) fn register(&self, source: Box<dyn RootSource>) -> RootSourceId {
        let mut external = self.external.borrow_mut();
        match external.iter().position(Option::is_none) {
            Some(slot) => {
                external[slot] = Some(source);
                RootSourceId(slot)
            }
            None => {
                external.push(Some(source));
                RootSourceId(external.len() - 1)
            }
        }
    }

    pub(crate) fn unregister(&self, id: RootSourceId) -> Option<Box<dyn RootSource>> {
        self.external.borrow_mut().get_mut(id.0)?.take()
    }

    pub(crate) fn snapshot(&self) -> RootSnapshot {
        RootSnapshot {
            stack_roots: self.stack.borrow().len(),
            protect: self.protect.borrow().len(),
            node_stack: self.node_stack.borrow().len(),
        }
    }

    /// Unwind every LIFO registry to the depth recorded in `snapshot`.
    pub(crate) fn restore(&self, snapshot: RootSnapshot, policy: FatalPolicy) {
        let current = self.snapshot();
        if current.stack_roots < snapshot.stack_roots
            || current.protect < snapshot.protect
            || current.node_stack < snapshot.node_stack
        {
            fatal!(
                policy,
                "cannot restore roots to {:?}, registries are shallower ({:?})",
                snapshot,
                current
            );
        }
        self.stack.borrow_mut().truncate(snapshot.stack_roots);
        self.protect.borrow_mut().truncate(snapshot.protect);
        self.node_stack.borrow_mut().truncate(snapshot.node_stack);
    }

    pub(crate) fn counts(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("explicit roots", self.explicit.borrow().len()),
            ("stack roots", self.stack.borrow().len()),
            ("protect stack", self.protect.borrow().len()),
            ("node stack", self.node_stack.borrow().len()),
            ("weak entries", self.weak.borrow().len()),
            (
                "external sources",
                self.external.borrow().iter().flatten().count(),
            ),
        ]
    }
}
