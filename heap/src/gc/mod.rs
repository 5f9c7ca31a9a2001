//! This is a hybrid collector: reference counting reclaims most garbage promptly, and a
//! tracing mark-sweep collects what counting can't, i.e. cycles.
//!
//! Every node carries a count of the counted edges ([`GcEdge`](crate::GcEdge),
//! [`AnyEdge`](crate::AnyEdge), [`Root`](crate::Root)) pointing at it. When the count drops to
//! zero the node is pushed on the moribund list instead of being freed right away, since an
//! uncounted root (a stack root, a protect stack or node stack slot) may still designate it.
//!
//! The *lite sweep* drains the moribund list: it first pins every node designated by an
//! uncounted root by bumping its count, reclaims each queued node whose count is still zero,
//! then unpins. It runs whenever allocation has gone some margin past the last sweep.
//!
//! A *full collection* runs once the heap grows past the trigger level:
//! 1. flip the mark cycle, so every node reads as unmarked
//! 2. mark from every root, moving marked nodes from the live list to the reachable list
//! 3. resolve weak references: values of entries with a marked key get marked, the rest expire
//! 4. detach every node left on the live list by dropping its payload, which releases the
//!    edges it holds and breaks any cycle it was part of
//! 5. splice the reachable list back as the live list, then run a lite sweep that frees the
//!    storage of every detached node whose count reached zero
//!
//! Nothing runs while an inhibitor is held, and none of this is thread safe: a collector and
//! its nodes belong to one thread.

mod check;
mod collector;
mod inhibitor;
mod manager;
mod marker;
mod mem_balance;
mod utils;

pub use collector::Collector;
pub use inhibitor::GcInhibitor;
pub use manager::GcManager;
pub(crate) use marker::Marker;
pub use mem_balance::MemBalancer;
pub use utils::{CheckReport, GcPhase, GcResult, GcStats};
