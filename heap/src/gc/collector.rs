use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::mem;
use std::ptr::NonNull;

use itertools::Itertools;
use rcmark_common::alloc::{BlockAllocator, ByteAllocator, BLOCK_ALIGN};

use super::inhibitor::GcInhibitor;
use super::manager::GcManager;
use super::marker::Marker;
use super::utils::{GcPhase, GcResult, GcStats};
use crate::alloc::QuarantineAllocator;
use crate::config::{GcConfig, GcMode};
use crate::error::GcError;
use crate::object::list::Link;
use crate::object::{
    AnyEdge, AsNode, Decrement, Gc, GcBox, GcEdge, GcHeader, Increment, NodeList, NodePtr,
    NodeVTable, StatusFlags, Trace,
};
use crate::roots::{
    Expired, Root, RootSnapshot, RootSource, RootSourceId, Roots, StackRoot, WeakRef,
};

/// Owner of every node allocated through it, and of the lists and registries that describe them.
///
/// A collector lives for the rest of the process once created: nodes point back at it.
pub struct Collector {
    config: GcConfig,
    allocator: RefCell<Box<dyn ByteAllocator>>,
    /// every attached node outside a collection
    live: NodeList,
    /// nodes marked so far during a collection
    reachable: NodeList,
    /// nodes whose count dropped to zero, most recent last
    moribund: RefCell<Vec<NodePtr>>,
    num_nodes: Cell<usize>,
    inhibitor_count: Cell<usize>,
    mark_cycle: Cell<bool>,
    gclite_threshold: Cell<usize>,
    phase: Cell<GcPhase>,
    roots: Roots,
    manager: GcManager,
}

impl Collector {
    /// Create a collector over a fresh [`BlockAllocator`], behind the quarantine shim if
    /// `config.quarantine` asks for it.
    pub fn new(config: GcConfig) -> &'static Self {
        let allocator: Box<dyn ByteAllocator> = match config.quarantine {
            Some(budget) => Box::new(QuarantineAllocator::new(
                BlockAllocator::new(),
                budget,
                config.fatal_policy,
            )),
            None => Box::new(BlockAllocator::new()),
        };
        Self::with_allocator(config, allocator)
    }

    pub fn with_allocator(config: GcConfig, mut allocator: Box<dyn ByteAllocator>) -> &'static Self {
        allocator.configure_assist_only();
        debug!("Creating collector with {:?}", config);
        let collector = Self {
            allocator: RefCell::new(allocator),
            live: NodeList::new(),
            reachable: NodeList::new(),
            moribund: RefCell::new(Vec::new()),
            num_nodes: Cell::new(0),
            inhibitor_count: Cell::new(0),
            mark_cycle: Cell::new(false),
            gclite_threshold: Cell::new(config.gclite_margin),
            phase: Cell::new(GcPhase::Idle),
            roots: Roots::new(),
            manager: GcManager::new(&config),
            config,
        };
        Box::leak(Box::new(collector))
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn manager(&self) -> &GcManager {
        &self.manager
    }

    pub fn stats(&self) -> GcStats {
        self.manager.stats()
    }

    pub(crate) fn roots(&self) -> &Roots {
        &self.roots
    }

    pub(crate) fn reachable(&self) -> &NodeList {
        &self.reachable
    }

    pub(crate) fn live(&self) -> &NodeList {
        &self.live
    }

    pub(crate) fn moribund(&self) -> Ref<'_, Vec<NodePtr>> {
        self.moribund.borrow()
    }

    /// Number of nodes that have been allocated and not yet reclaimed.
    pub fn node_count(&self) -> usize {
        self.num_nodes.get()
    }

    pub fn moribund_count(&self) -> usize {
        self.moribund.borrow().len()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.allocator.borrow().bytes_allocated()
    }

    pub fn phase(&self) -> GcPhase {
        self.phase.get()
    }

    /// Hold off every collection until the returned guard is dropped.
    pub fn inhibit(&self) -> GcInhibitor<'_> {
        GcInhibitor::new(&self.inhibitor_count)
    }

    pub fn is_inhibited(&self) -> bool {
        self.inhibitor_count.get() != 0
    }

    /// Freed node storage found written to after it was freed. Always zero unless the
    /// quarantine shim is enabled.
    pub fn corrupted_freed_blocks(&self) -> usize {
        self.allocator.borrow().corrupted_freed_blocks()
    }

    /// Allocate a node holding `value`. The node starts with a count of zero and is on no
    /// moribund list, so it must be rooted or stored in a counted edge before the next
    /// collection can run.
    pub fn allocate<T: Trace + 'static>(&'static self, value: T) -> Result<Gc<T>, GcError> {
        self.maybe_collect();
        if mem::align_of::<GcBox<T>>() > BLOCK_ALIGN {
            fatal!(
                self.config.fatal_policy,
                "{} needs {}-byte alignment, the allocator only guarantees {}",
                std::any::type_name::<T>(),
                mem::align_of::<GcBox<T>>(),
                BLOCK_ALIGN
            );
        }
        let size = mem::size_of::<GcBox<T>>();
        let block = self
            .allocator
            .borrow_mut()
            .alloc(size)
            .ok_or(GcError::OutOfMemory { bytes: size })?;
        let ptr = block.cast::<GcBox<T>>();
        unsafe {
            ptr.as_ptr().write(GcBox {
                header: GcHeader::new(NodeVTable::of::<T>(), self, self.mark_cycle.get()),
                value: mem::ManuallyDrop::new(value),
            });
            let node: NodePtr = ptr.cast();
            Link::init(node.cast());
            self.live.push_back(node);
        }
        self.num_nodes.set(self.num_nodes.get() + 1);
        // only a fully initialised header may be recognised as a node
        self.allocator.borrow_mut().set_mark(block);
        Ok(unsafe { Gc::from_raw(ptr) })
    }

    /// Allocate a node and hold it with an explicit root.
    pub fn alloc_root<T: Trace + 'static>(&'static self, value: T) -> Result<Root<T>, GcError> {
        let gc = self.allocate(value)?;
        Ok(unsafe { Root::new(gc) })
    }

    /// Allocate a node and hold it with a stack root.
    pub fn alloc_stack_root<T: Trace + 'static>(
        &'static self,
        value: T,
    ) -> Result<StackRoot<T>, GcError> {
        let gc = self.allocate(value)?;
        Ok(unsafe { StackRoot::new(gc) })
    }

    /// Allocate a node and return a counted edge to it. Dropping the edge without storing it
    /// anywhere leaves the node moribund.
    pub fn alloc_edge<T: Trace + 'static>(&'static self, value: T) -> Result<GcEdge<T>, GcError> {
        let gc = self.allocate(value)?;
        Ok(unsafe { GcEdge::new(gc) })
    }

    fn maybe_collect(&self) {
        if self.is_inhibited() {
            return;
        }
        let lite_due = match self.config.mode {
            GcMode::Normal => self.bytes_allocated() > self.gclite_threshold.get(),
            GcMode::Aggressive => true,
            GcMode::Rare => self.bytes_allocated() > self.manager.trigger_level(),
        };
        if lite_due {
            self.gclite();
        }
        if self.manager.is_enabled() && self.bytes_allocated() > self.manager.trigger_level() {
            self.manager.collect(self);
        }
    }

    /// Return the storage of a reclaimed node.
    ///
    /// # Safety
    /// `block` must have come from this collector's allocator with the same `size`, must not
    /// hold a node that is still on a list, and no pointer into it may be used afterwards.
    pub unsafe fn deallocate(&self, block: NonNull<u8>, size: usize) {
        let mut allocator = self.allocator.borrow_mut();
        allocator.clear_mark(block);
        allocator.free(block, size);
    }

    pub(crate) fn increment(&self, node: NodePtr) {
        let header = unsafe { node.as_ref() };
        let (status, outcome) = header.status().incremented();
        header.set_status(status);
        if outcome == Increment::Revived {
            self.remove_moribund(node);
        }
    }

    pub(crate) fn decrement(&self, node: NodePtr) {
        let header = unsafe { node.as_ref() };
        match header.status().decremented() {
            Ok((status, outcome)) => {
                header.set_status(status);
                if outcome == Decrement::Orphaned {
                    self.moribund.borrow_mut().push(node);
                }
            }
            Err(_) => fatal!(
                self.config.fatal_policy,
                "refcount underflow on {} node at {:p}",
                header.type_name(),
                node
            ),
        }
    }

    /// Queue `node` for the next lite sweep. Idempotent.
    pub fn make_moribund(&self, node: &impl AsNode) {
        let node = node.as_node();
        let header = unsafe { node.as_ref() };
        let status = header.status();
        if status.contains(StatusFlags::MORIBUND) {
            return;
        }
        header.set_status(status.with(StatusFlags::MORIBUND));
        self.moribund.borrow_mut().push(node);
    }

    fn remove_moribund(&self, node: NodePtr) {
        let mut moribund = self.moribund.borrow_mut();
        match moribund.iter().rposition(|&n| n == node) {
            Some(pos) => {
                moribund.remove(pos);
            }
            None => fatal!(
                self.config.fatal_policy,
                "{} node at {:p} has its moribund bit set but is not on the moribund list",
                unsafe { node.as_ref() }.type_name(),
                node
            ),
        }
    }

    /// Reclaim every moribund node whose count is still zero, without tracing anything.
    /// Returns the number of nodes reclaimed; zero while collection is inhibited.
    pub(crate) fn gclite(&self) -> usize {
        if self.is_inhibited() {
            return 0;
        }
        let _inhibitor = self.inhibit();
        let pinned = self.roots.pinnable();
        for &node in &pinned {
            self.increment(node);
        }
        let reclaimed = self.drain_moribund();
        for &node in pinned.iter().rev() {
            self.decrement(node);
        }
        self.gclite_threshold
            .set(self.bytes_allocated().saturating_add(self.config.gclite_margin));
        self.manager.note_lite_sweep(reclaimed);
        trace!("Lite sweep reclaimed {} nodes", reclaimed);
        reclaimed
    }

    fn drain_moribund(&self) -> usize {
        let mut reclaimed = 0;
        loop {
            // the borrow must end before `destroy` drops payloads that release more edges
            let next = self.moribund.borrow_mut().pop();
            let Some(node) = next else { break };
            let header = unsafe { node.as_ref() };
            header.set_status(header.status().without(StatusFlags::MORIBUND));
            if header.refcount() == 0 {
                unsafe { self.destroy(node) };
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Run the payload destructor if a sweep hasn't already, then free the storage.
    ///
    /// # Safety
    /// `node` must be a node of this collector with a count of zero.
    unsafe fn destroy(&self, node: NodePtr) {
        let header = node.as_ref();
        debug_assert_eq!(header.refcount(), 0);
        if header.is_moribund() {
            self.remove_moribund(node);
            header.set_status(header.status().without(StatusFlags::MORIBUND));
        }
        Link::unlink(node.cast());
        let status = header.status();
        if status.contains(StatusFlags::WEAK_KEY) {
            let expired = self.roots.weak.borrow_mut().forget(node);
            self.settle_expired(expired);
        }
        if !status.contains(StatusFlags::DETACHED) {
            header.set_status(status.with(StatusFlags::DETACHED));
            (header.vtable().drop_only)(node);
        }
        self.num_nodes.set(self.num_nodes.get() - 1);
        let size = header.vtable().size;
        self.deallocate(node.cast(), size);
    }

    /// Drop the values of expired weak entries and queue their finalizers.
    fn settle_expired(&self, expired: Vec<Expired>) {
        for Expired { value, finalizer } in expired {
            drop(value);
            if let Some(finalizer) = finalizer {
                self.manager.queue_finalizer(finalizer);
            }
        }
    }

    /// Mark from every root, drop the payload of every unmarked node, then reclaim with a lite
    /// sweep whatever no longer has a count.
    pub(crate) fn mark_sweep(&self) -> GcResult {
        if self.is_inhibited() {
            fatal!(
                self.config.fatal_policy,
                "a full collection must not be requested while collection is inhibited"
            );
        }
        let (marked, detached) = {
            let _inhibitor = self.inhibit();
            self.phase.set(GcPhase::Marking);
            let marked = self.mark();
            self.phase.set(GcPhase::Sweeping);
            let detached = self.sweep();
            (marked, detached)
        };
        let reclaimed = self.gclite();
        self.phase.set(GcPhase::Idle);
        debug!(
            "Full collection: {} marked, {} detached, {} reclaimed",
            marked, detached, reclaimed
        );
        GcResult {
            marked,
            detached,
            reclaimed,
        }
    }

    fn mark(&self) -> usize {
        let cycle = !self.mark_cycle.get();
        self.mark_cycle.set(cycle);
        let mut marker = Marker::new(self, cycle);
        self.roots.visit_all(&mut |header| {
            marker.mark(header);
            marker.drain();
        });
        let expired = self.roots.weak.borrow_mut().mark_thru(&mut marker);
        if !expired.is_empty() {
            debug!("{} weak references expired", expired.len());
        }
        self.settle_expired(expired);
        marker.marks_applied()
    }

    /// Detach everything left on the live list, then make the reachable list the live list.
    fn sweep(&self) -> usize {
        let mut detached = 0;
        while let Some(node) = self.live.front() {
            unsafe {
                Link::unlink(node.cast());
                self.detach_referents(node);
            }
            if unsafe { node.as_ref() }.refcount() == 0 {
                self.make_moribund(&node);
            }
            detached += 1;
        }
        self.live.splice_back(&self.reachable);
        detached
    }

    /// Drop the payload of `node`, releasing every edge it holds. The storage stays valid.
    unsafe fn detach_referents(&self, node: NodePtr) {
        let header = node.as_ref();
        let status = header.status();
        if status.contains(StatusFlags::DETACHED) {
            return;
        }
        header.set_status(status.with(StatusFlags::DETACHED));
        (header.vtable().drop_only)(node);
    }

    /// Run a lite sweep now and any finalizers it left behind.
    pub fn run_lite_sweep(&self) -> usize {
        let reclaimed = self.gclite();
        self.manager.run_pending_finalizers();
        reclaimed
    }

    /// Run a full collection now, whether or not automatic collection is enabled, then any
    /// finalizers it left behind.
    pub fn force_full_collection(&self) -> GcResult {
        let result = self.manager.collect(self);
        self.manager.run_pending_finalizers();
        result
    }

    pub fn run_pending_finalizers(&self) -> usize {
        self.manager.run_pending_finalizers()
    }

    /// The node whose storage contains `addr`, if `addr` points into the storage of a live,
    /// fully constructed node whose payload no sweep has dropped.
    pub fn pointer_looks_like_node(&self, addr: *const u8) -> Option<NodePtr> {
        let allocator = self.allocator.borrow();
        let block = allocator.base_of(addr)?;
        allocator
            .is_marked(block)
            .then(|| block.cast::<GcHeader>())
            .filter(|node| !unsafe { node.as_ref() }.is_detached())
    }

    /// Push `node` on the protect stack, returning its index.
    pub fn protect(&self, node: &impl AsNode) -> usize {
        self.roots.protect.borrow_mut().push(node.as_node())
    }

    /// Pop the `count` most recent protect stack entries.
    pub fn unprotect(&self, count: usize) {
        if let Err(depth) = self.roots.protect.borrow_mut().pop(count) {
            fatal!(
                self.config.fatal_policy,
                "unprotect({}) with only {} protected nodes",
                count,
                depth
            );
        }
    }

    /// Replace the protect stack entry at `index`.
    pub fn reprotect(&self, node: &impl AsNode, index: usize) {
        if let Err(depth) = self.roots.protect.borrow_mut().replace(index, node.as_node()) {
            fatal!(
                self.config.fatal_policy,
                "reprotect at index {} with only {} protected nodes",
                index,
                depth
            );
        }
    }

    pub fn protected(&self, index: usize) -> Option<NodePtr> {
        self.roots.protect.borrow().get(index)
    }

    pub fn protect_size(&self) -> usize {
        self.roots.protect.borrow().len()
    }

    pub fn restore_protect_size(&self, size: usize) {
        if size > self.protect_size() {
            fatal!(
                self.config.fatal_policy,
                "cannot grow the protect stack from {} to {} entries",
                self.protect_size(),
                size
            );
        }
        self.roots.protect.borrow_mut().truncate(size);
    }

    pub fn node_stack_push(&self, node: &impl AsNode) {
        self.roots.node_stack.borrow_mut().push(node.as_node());
    }

    pub fn node_stack_pop(&self) -> Option<NodePtr> {
        self.roots.node_stack.borrow_mut().pop()
    }

    pub fn node_stack_top(&self) -> Option<NodePtr> {
        self.roots.node_stack.borrow().top()
    }

    pub fn node_stack_size(&self) -> usize {
        self.roots.node_stack.borrow().len()
    }

    pub fn restore_node_stack_size(&self, size: usize) {
        if size > self.node_stack_size() {
            fatal!(
                self.config.fatal_policy,
                "cannot grow the node stack from {} to {} entries",
                self.node_stack_size(),
                size
            );
        }
        self.roots.node_stack.borrow_mut().truncate(size);
    }

    pub fn register_root_source(&self, source: Box<dyn RootSource>) -> RootSourceId {
        self.roots.register(source)
    }

    pub fn unregister_root_source(&self, id: RootSourceId) -> Option<Box<dyn RootSource>> {
        self.roots.unregister(id)
    }

    /// Depths of the LIFO root registries, to unwind to after a non-local exit.
    pub fn snapshot_roots(&self) -> RootSnapshot {
        self.roots.snapshot()
    }

    pub fn restore_roots(&self, snapshot: RootSnapshot) {
        self.roots.restore(snapshot, self.config.fatal_policy);
    }

    /// Hold `key` weakly. `value` stays alive as long as `key` does; once `key` is found
    /// unreachable the value is released and `finalizer` runs after that collection.
    pub fn weak_ref(
        &'static self,
        key: &impl AsNode,
        value: Option<AnyEdge>,
        finalizer: Option<Box<dyn FnOnce()>>,
    ) -> WeakRef {
        WeakRef::new(self, key.as_node(), value, finalizer)
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roots = self
            .roots
            .counts()
            .into_iter()
            .map(|(name, count)| format!("{name}: {count}"))
            .join(", ");
        f.debug_struct("Collector")
            .field("nodes", &self.num_nodes.get())
            .field("moribund", &self.moribund_count())
            .field("bytes", &self.bytes_allocated())
            .field("phase", &self.phase.get())
            .field("roots", &format!("[{roots}]"))
            .field("manager", &self.manager)
            .finish()
    }
}
