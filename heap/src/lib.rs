//! Memory manager for the nodes of a language runtime: reference counting backed by a
//! mark-sweep collector that breaks cycles.
//!
//! ```
//! use std::cell::RefCell;
//! use rcmark_heap::{Collector, GcConfig, GcEdge, Trace};
//!
//! #[derive(Trace)]
//! struct Cons {
//!     head: RefCell<Option<GcEdge<Cons>>>,
//!     #[notrace]
//!     value: i64,
//! }
//!
//! let heap = Collector::new(GcConfig::default());
//! let list = heap.alloc_root(Cons { head: RefCell::new(None), value: 1 }).unwrap();
//! let tail = heap.alloc_edge(Cons { head: RefCell::new(None), value: 2 }).unwrap();
//! list.head.replace(Some(tail));
//! heap.force_full_collection();
//! assert_eq!(heap.node_count(), 2);
//! ```

#[macro_use]
extern crate log;
extern crate self as rcmark_heap;

#[macro_use]
pub mod error;
pub mod alloc;
pub mod config;
pub mod gc;
pub mod object;
pub mod roots;

use once_cell::unsync::OnceCell;

pub use config::{GcConfig, GcMode};
pub use error::{ConfigError, FatalPolicy, GcError, InvariantViolation};
pub use gc::{CheckReport, Collector, GcInhibitor, GcManager, GcPhase, GcResult, GcStats};
pub use object::{AnyEdge, AsNode, Gc, GcEdge, GcHeader, NodePtr, Trace, TracerFn};
pub use rcmark_derive::Trace;
pub use roots::{Root, RootSnapshot, RootSource, RootSourceId, StackRoot, WeakRef};

thread_local! {
    /// collector of this thread, set once by `initialize`
    static GLOBAL_COLLECTOR: OnceCell<&'static Collector> = OnceCell::new();
}

/// Create this thread's collector, or return the existing one, in which case `config` is
/// ignored.
pub fn initialize(config: GcConfig) -> &'static Collector {
    GLOBAL_COLLECTOR.with(|cell| {
        if cell.get().is_some() {
            warn!("Collector already initialized, ignoring new configuration");
        }
        *cell.get_or_init(|| Collector::new(config))
    })
}

pub fn try_global() -> Option<&'static Collector> {
    GLOBAL_COLLECTOR.with(|cell| cell.get().copied())
}

/// This thread's collector. Fatal if [`initialize`] hasn't run.
pub fn global() -> &'static Collector {
    match try_global() {
        Some(collector) => collector,
        None => fatal!(
            FatalPolicy::default(),
            "collector used before rcmark_heap::initialize"
        ),
    }
}
