use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;

use bitflags::bitflags;

use super::core::NodeVTable;
use super::list::Link;
use super::trace::TracerFn;
use super::NodePtr;
use crate::gc::Collector;

bitflags! {
    /// Low byte of the status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// compared against the collector's mark cycle, so flipping the cycle unmarks every node
        const MARK = 1 << 0;
        /// the node sits on the moribund list
        const MORIBUND = 1 << 1;
        /// the refcount has been nonzero at least once
        const REFERENCED = 1 << 2;
        /// the payload has been dropped by a sweep, only the storage remains
        const DETACHED = 1 << 3;
        /// the node keys at least one weak table entry
        const WEAK_KEY = 1 << 4;
    }
}

const REFCOUNT_SHIFT: u32 = 8;
const FLAGS_MASK: u32 = (1 << REFCOUNT_SHIFT) - 1;
const REFCOUNT_ONE: u32 = 1 << REFCOUNT_SHIFT;
/// A count that reaches this value sticks there and the node is never reclaimed by refcounting.
pub const REFCOUNT_MAX: u32 = u32::MAX >> REFCOUNT_SHIFT;

static_assertions::const_assert!(StatusFlags::all().bits() <= FLAGS_MASK);

/// Refcount and flags of a node packed in one word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Status(u32);

/// What the collector must do after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    Held,
    /// the node went from zero to one while on the moribund list and must be taken off it
    Revived,
}

/// What the collector must do after a decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    Held,
    /// the count reached zero on a node not already queued; the moribund bit is now set and
    /// the node must be queued
    Orphaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underflow;

impl Status {
    pub const fn new(mark: bool) -> Self {
        if mark {
            Self(StatusFlags::MARK.bits())
        } else {
            Self(0)
        }
    }

    #[inline]
    pub fn refcount(self) -> u32 {
        self.0 >> REFCOUNT_SHIFT
    }

    #[inline]
    pub fn flags(self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    #[inline]
    pub fn contains(self, flag: StatusFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline]
    pub fn is_saturated(self) -> bool {
        self.refcount() == REFCOUNT_MAX
    }

    #[must_use]
    pub fn with(self, flag: StatusFlags) -> Self {
        Self(self.0 | flag.bits())
    }

    #[must_use]
    pub fn without(self, flag: StatusFlags) -> Self {
        Self(self.0 & !flag.bits())
    }

    /// Count one more counted reference. The mark bit is left alone.
    pub fn incremented(self) -> (Self, Increment) {
        if self.is_saturated() {
            return (self, Increment::Held);
        }
        let revived = self.contains(StatusFlags::MORIBUND);
        let next = Self(self.0 + REFCOUNT_ONE)
            .with(StatusFlags::REFERENCED)
            .without(StatusFlags::MORIBUND);
        if revived {
            (next, Increment::Revived)
        } else {
            (next, Increment::Held)
        }
    }

    /// Count one counted reference fewer. The mark bit is left alone.
    pub fn decremented(self) -> Result<(Self, Decrement), Underflow> {
        if self.is_saturated() {
            return Ok((self, Decrement::Held));
        }
        if self.refcount() == 0 {
            return Err(Underflow);
        }
        let next = Self(self.0 - REFCOUNT_ONE);
        if next.refcount() == 0 && !next.contains(StatusFlags::MORIBUND) {
            Ok((next.with(StatusFlags::MORIBUND), Decrement::Orphaned))
        } else {
            Ok((next, Decrement::Held))
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("refcount", &self.refcount())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Bookkeeping in front of every payload, using repr(C) so that `link` stays at offset zero
/// and a node pointer can be used as a list link.
#[repr(C)]
pub struct GcHeader {
    pub(crate) link: Link,
    status: Cell<Status>,
    vtable: &'static NodeVTable,
    collector: &'static Collector,
}

impl GcHeader {
    pub(crate) fn new(vtable: &'static NodeVTable, collector: &'static Collector, mark: bool) -> Self {
        Self {
            link: Link::dangling(),
            status: Cell::new(Status::new(mark)),
            vtable,
            collector,
        }
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.status.get()
    }

    #[inline]
    pub(crate) fn set_status(&self, status: Status) {
        self.status.set(status)
    }

    pub fn refcount(&self) -> u32 {
        self.status().refcount()
    }

    pub fn is_moribund(&self) -> bool {
        self.status().contains(StatusFlags::MORIBUND)
    }

    pub fn is_detached(&self) -> bool {
        self.status().contains(StatusFlags::DETACHED)
    }

    /// A virgin node has never had a counted reference.
    pub fn is_virgin(&self) -> bool {
        !self.status().contains(StatusFlags::REFERENCED)
    }

    #[inline]
    pub(crate) fn is_marked(&self, cycle: bool) -> bool {
        self.status().contains(StatusFlags::MARK) == cycle
    }

    #[inline]
    pub(crate) fn set_mark(&self, cycle: bool) {
        let status = self.status();
        self.set_status(if cycle {
            status.with(StatusFlags::MARK)
        } else {
            status.without(StatusFlags::MARK)
        });
    }

    pub fn collector(&self) -> &'static Collector {
        self.collector
    }

    pub(crate) fn vtable(&self) -> &'static NodeVTable {
        self.vtable
    }

    pub fn type_name(&self) -> &'static str {
        (self.vtable.type_name)()
    }

    pub fn as_node(&self) -> NodePtr {
        NonNull::from(self)
    }

    /// Call `tracer_fn` on every counted edge held by the payload. Detached payloads have none.
    pub fn trace(&self, tracer_fn: &mut TracerFn) {
        if self.is_detached() {
            warn!(
                "Tracing a detached {} node at {:p}, skipped",
                self.type_name(),
                self
            );
            return;
        }
        unsafe { (self.vtable.trace)(self.as_node(), tracer_fn) }
    }

    /// Fatal error if the payload has already been dropped by a sweep.
    pub(crate) fn assert_attached(&self) {
        if self.is_detached() {
            fatal!(
                self.collector.config().fatal_policy,
                "use of {} node at {:p} after a sweep detached it; it was reachable only through an unrooted edge",
                self.type_name(),
                self
            );
        }
    }
}

impl fmt::Debug for GcHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcHeader")
            .field("type", &self.type_name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_from_zero() {
        let (status, outcome) = Status::new(false).incremented();
        assert_eq!(outcome, Increment::Held);
        assert_eq!(status.refcount(), 1);
        assert!(status.contains(StatusFlags::REFERENCED));
    }

    #[test]
    fn test_decrement_to_zero_sets_moribund() {
        let (one, _) = Status::new(true).incremented();
        let (zero, outcome) = one.decremented().unwrap();
        assert_eq!(outcome, Decrement::Orphaned);
        assert_eq!(zero.refcount(), 0);
        assert!(zero.contains(StatusFlags::MORIBUND));
        // the mark bit survives refcount traffic
        assert!(zero.contains(StatusFlags::MARK));

        let (revived, outcome) = zero.incremented();
        assert_eq!(outcome, Increment::Revived);
        assert!(!revived.contains(StatusFlags::MORIBUND));
        assert!(revived.contains(StatusFlags::MARK));
    }

    #[test]
    fn test_decrement_above_one() {
        let (one, _) = Status::new(false).incremented();
        let (two, _) = one.incremented();
        let (back, outcome) = two.decremented().unwrap();
        assert_eq!(outcome, Decrement::Held);
        assert_eq!(back, one);
    }

    #[test]
    fn test_decrement_to_zero_when_already_queued() {
        let (one, _) = Status::new(false).incremented();
        let queued = one.with(StatusFlags::MORIBUND);
        let (zero, outcome) = queued.decremented().unwrap();
        assert_eq!(outcome, Decrement::Held);
        assert_eq!(zero.refcount(), 0);
        assert!(zero.contains(StatusFlags::MORIBUND));
    }

    #[test]
    fn test_underflow() {
        assert_eq!(Status::new(false).decremented(), Err(Underflow));
    }

    #[test]
    fn test_saturated_count_sticks() {
        let saturated = Status(REFCOUNT_MAX << REFCOUNT_SHIFT);
        assert!(saturated.is_saturated());
        assert_eq!(saturated.incremented(), (saturated, Increment::Held));
        assert_eq!(saturated.decremented(), Ok((saturated, Decrement::Held)));
    }
}
