//! Node layout and the handles that point at nodes.
//!
//! [`Gc`] is an uncounted pointer, [`GcEdge`] and [`AnyEdge`] are counted edges. Counted edges
//! keep the storage alive, while the payload behind them stays alive only as long as the node
//! is reachable from a root when a full collection runs.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::NonNull;

use super::drop_object::{drop_only_obj, trace_obj};
use super::header::GcHeader;
use super::trace::{Trace, TracerFn};
use super::NodePtr;

/// Per type operations, shared by every node of a payload type.
pub struct NodeVTable {
    pub(crate) trace: unsafe fn(NodePtr, &mut TracerFn),
    pub(crate) drop_only: unsafe fn(NodePtr),
    pub(crate) size: usize,
    pub(crate) type_name: fn() -> &'static str,
    pub(crate) type_id: fn() -> TypeId,
}

impl NodeVTable {
    pub fn of<T: Trace + 'static>() -> &'static Self {
        struct Helper<T: Trace + 'static>(PhantomData<T>);
        trait VtableHelper {
            const VTABLE: NodeVTable;
        }
        impl<T: Trace + 'static> VtableHelper for Helper<T> {
            const VTABLE: NodeVTable = NodeVTable {
                trace: trace_obj::<T>,
                drop_only: drop_only_obj::<T>,
                size: mem::size_of::<GcBox<T>>(),
                type_name: std::any::type_name::<T>,
                type_id: TypeId::of::<T>,
            };
        }
        &Helper::<T>::VTABLE
    }

    /// bytes of storage taken by one node of this type
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for NodeVTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeVTable")
            .field("type", &(self.type_name)())
            .field("size", &self.size)
            .finish()
    }
}

/// What the allocator hands out: header first, payload after.
#[repr(C)]
pub(crate) struct GcBox<T> {
    pub(crate) header: GcHeader,
    pub(crate) value: ManuallyDrop<T>,
}

/// Anything that designates a node.
pub trait AsNode {
    fn as_node(&self) -> NodePtr;
}

impl AsNode for NodePtr {
    fn as_node(&self) -> NodePtr {
        *self
    }
}

impl AsNode for GcHeader {
    fn as_node(&self) -> NodePtr {
        GcHeader::as_node(self)
    }
}

/// An uncounted pointer to a node. Holding one does not keep anything alive.
pub struct Gc<T> {
    ptr: NonNull<GcBox<T>>,
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for Gc<T> {}

impl<T: Trace + 'static> Gc<T> {
    pub(crate) unsafe fn from_raw(ptr: NonNull<GcBox<T>>) -> Self {
        Self { ptr }
    }

    /// # Safety
    /// `node` must be a live node whose payload is a `T`.
    pub unsafe fn from_node(node: NodePtr) -> Self {
        Self { ptr: node.cast() }
    }

    /// `None` if the payload of `node` is not a `T`.
    ///
    /// # Safety
    /// `node` must be a live node.
    pub unsafe fn downcast(node: NodePtr) -> Option<Self> {
        ((node.as_ref().vtable().type_id)() == TypeId::of::<T>()).then(|| Self::from_node(node))
    }

    #[inline]
    pub fn as_node(self) -> NodePtr {
        self.ptr.cast()
    }

    /// # Safety
    /// The node must not have been reclaimed.
    #[inline]
    pub unsafe fn header<'a>(self) -> &'a GcHeader {
        &(*self.ptr.as_ptr()).header
    }

    /// Fatal error if a sweep already dropped the payload.
    ///
    /// # Safety
    /// The node must not have been reclaimed, and must stay so for `'a`.
    #[inline]
    pub unsafe fn get<'a>(self) -> &'a T {
        self.header().assert_attached();
        &*(*self.ptr.as_ptr()).value
    }

    pub fn ptr_eq(a: Self, b: Self) -> bool {
        a == b
    }
}

impl<T: Trace + 'static> AsNode for Gc<T> {
    fn as_node(&self) -> NodePtr {
        Gc::as_node(*self)
    }
}

impl<T> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gc<{}>({:p})", std::any::type_name::<T>(), self.ptr)
    }
}

/// A counted edge to a node whose payload is a `T`.
pub struct GcEdge<T: Trace + 'static> {
    gc: Gc<T>,
}

impl<T: Trace + 'static> GcEdge<T> {
    /// Count a new edge to the node behind `gc`.
    ///
    /// # Safety
    /// The node must not have been reclaimed.
    pub unsafe fn new(gc: Gc<T>) -> Self {
        gc.header().collector().increment(gc.as_node());
        Self { gc }
    }

    #[inline]
    pub fn gc(&self) -> Gc<T> {
        self.gc
    }

    #[inline]
    pub fn header(&self) -> &GcHeader {
        unsafe { self.gc.header() }
    }

    pub fn refcount(&self) -> u32 {
        self.header().refcount()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.gc == other.gc
    }

    /// Erase the payload type, keeping the count.
    pub fn into_any(self) -> AnyEdge {
        let node = self.gc.as_node();
        mem::forget(self);
        AnyEdge { node }
    }
}

impl<T: Trace + 'static> Clone for GcEdge<T> {
    fn clone(&self) -> Self {
        unsafe { Self::new(self.gc) }
    }
}

impl<T: Trace + 'static> Drop for GcEdge<T> {
    fn drop(&mut self) {
        let header = self.header();
        header.collector().decrement(header.as_node());
    }
}

impl<T: Trace + 'static> Deref for GcEdge<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.gc.get() }
    }
}

impl<T: Trace + 'static> AsNode for GcEdge<T> {
    fn as_node(&self) -> NodePtr {
        self.gc.as_node()
    }
}

impl<T: Trace + 'static> fmt::Debug for GcEdge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcEdge")
            .field("ptr", &self.gc.as_node())
            .field("header", self.header())
            .finish()
    }
}

/// A counted edge whose payload type is only known at run time.
pub struct AnyEdge {
    node: NodePtr,
}

impl AnyEdge {
    /// # Safety
    /// `node` must be a live node.
    pub unsafe fn new(node: NodePtr) -> Self {
        node.as_ref().collector().increment(node);
        Self { node }
    }

    #[inline]
    pub fn header(&self) -> &GcHeader {
        unsafe { self.node.as_ref() }
    }

    pub fn is<T: Trace + 'static>(&self) -> bool {
        (self.header().vtable().type_id)() == TypeId::of::<T>()
    }

    /// A typed edge to the same node, if the payload is a `T`.
    pub fn downcast<T: Trace + 'static>(&self) -> Option<GcEdge<T>> {
        unsafe { Gc::<T>::downcast(self.node).map(|gc| GcEdge::new(gc)) }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Clone for AnyEdge {
    fn clone(&self) -> Self {
        unsafe { Self::new(self.node) }
    }
}

impl Drop for AnyEdge {
    fn drop(&mut self) {
        self.header().collector().decrement(self.node);
    }
}

impl AsNode for AnyEdge {
    fn as_node(&self) -> NodePtr {
        self.node
    }
}

impl<T: Trace + 'static> From<GcEdge<T>> for AnyEdge {
    fn from(edge: GcEdge<T>) -> Self {
        edge.into_any()
    }
}

impl fmt::Debug for AnyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyEdge")
            .field("ptr", &self.node)
            .field("header", self.header())
            .finish()
    }
}
