//! Circular doubly linked lists threaded through node headers.
//!
//! Every list owns a heap allocated sentinel so that list heads can move freely while nodes
//! still point at them. A link pointing at itself is on no list.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;

use super::NodePtr;

pub struct Link {
    prev: Cell<NonNull<Link>>,
    next: Cell<NonNull<Link>>,
}

impl Link {
    pub(crate) fn dangling() -> Self {
        Self {
            prev: Cell::new(NonNull::dangling()),
            next: Cell::new(NonNull::dangling()),
        }
    }

    /// # Safety
    /// `link` must point to a live `Link`.
    pub(crate) unsafe fn init(link: NonNull<Link>) {
        let l = link.as_ref();
        l.prev.set(link);
        l.next.set(link);
    }

    #[cfg(test)]
    pub(crate) unsafe fn is_linked(link: NonNull<Link>) -> bool {
        link.as_ref().next.get() != link
    }

    /// Take `link` off whatever list it is on. A no-op for an unlinked link.
    pub(crate) unsafe fn unlink(link: NonNull<Link>) {
        let l = link.as_ref();
        let prev = l.prev.get();
        let next = l.next.get();
        prev.as_ref().next.set(next);
        next.as_ref().prev.set(prev);
        Self::init(link);
    }

    unsafe fn insert_before(link: NonNull<Link>, anchor: NonNull<Link>) {
        let prev = anchor.as_ref().prev.get();
        let l = link.as_ref();
        l.prev.set(prev);
        l.next.set(anchor);
        prev.as_ref().next.set(link);
        anchor.as_ref().prev.set(link);
    }

    /// Both neighbours point back at `link`.
    pub(crate) unsafe fn is_consistent(link: NonNull<Link>) -> bool {
        let l = link.as_ref();
        l.next.get().as_ref().prev.get() == link && l.prev.get().as_ref().next.get() == link
    }

    #[cfg(test)]
    pub(crate) unsafe fn set_next(link: NonNull<Link>, next: NonNull<Link>) {
        link.as_ref().next.set(next);
    }
}

pub struct NodeList {
    sentinel: NonNull<Link>,
}

impl NodeList {
    pub fn new() -> Self {
        let sentinel = NonNull::from(Box::leak(Box::new(Link::dangling())));
        unsafe { Link::init(sentinel) };
        Self { sentinel }
    }

    pub fn is_empty(&self) -> bool {
        unsafe { self.sentinel.as_ref().next.get() == self.sentinel }
    }

    pub fn front(&self) -> Option<NodePtr> {
        if self.is_empty() {
            None
        } else {
            Some(unsafe { self.sentinel.as_ref().next.get() }.cast())
        }
    }

    /// Move `node` to the back of this list, taking it off any list it is on.
    ///
    /// # Safety
    /// `node` must be a live node whose link has been initialised.
    pub unsafe fn push_back(&self, node: NodePtr) {
        let link = node.cast::<Link>();
        Link::unlink(link);
        Link::insert_before(link, self.sentinel);
    }

    /// Move every node of `other` to the back of this list, leaving `other` empty.
    pub fn splice_back(&self, other: &NodeList) {
        if other.is_empty() {
            return;
        }
        unsafe {
            let anchor = self.sentinel.as_ref();
            let theirs = other.sentinel.as_ref();
            let first = theirs.next.get();
            let last = theirs.prev.get();
            let tail = anchor.prev.get();
            tail.as_ref().next.set(first);
            first.as_ref().prev.set(tail);
            last.as_ref().next.set(self.sentinel);
            anchor.prev.set(last);
            Link::init(other.sentinel);
        }
    }

    /// The list must not be modified while iterating.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            anchor: self.sentinel,
            cursor: unsafe { self.sentinel.as_ref().next.get() },
            _list: PhantomData,
        }
    }
}

impl Default for NodeList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NodeList {
    fn drop(&mut self) {
        unsafe {
            // orphan whatever is left so no node points at a freed sentinel
            while let Some(node) = self.front() {
                Link::unlink(node.cast());
            }
            drop(Box::from_raw(self.sentinel.as_ptr()));
        }
    }
}

pub struct Iter<'a> {
    anchor: NonNull<Link>,
    cursor: NonNull<Link>,
    _list: PhantomData<&'a NodeList>,
}

impl Iterator for Iter<'_> {
    type Item = NodePtr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == self.anchor {
            return None;
        }
        let current = self.cursor;
        self.cursor = unsafe { current.as_ref().next.get() };
        Some(current.cast())
    }
}
