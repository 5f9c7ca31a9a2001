//! Policy around full collections: when they are due, whether they are allowed, what they
//! report, and which finalizers they leave behind.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::mem_balance::MemBalancer;
use super::utils::{GcResult, GcStats};
use super::Collector;
use crate::config::GcConfig;

type Finalizer = Box<dyn FnOnce()>;

/// Finalizers queued by a collection that allocation started wait here until the next
/// `force_full_collection`, `run_lite_sweep` or `run_pending_finalizers`. A program that only
/// allocates never drains the queue.
pub struct GcManager {
    trigger_level: Cell<usize>,
    min_trigger_level: usize,
    adaptive: bool,
    enabled: Cell<bool>,
    verbose: Cell<bool>,
    collecting: Cell<bool>,
    balancer: RefCell<MemBalancer>,
    stats: RefCell<GcStats>,
    pending_finalizers: RefCell<VecDeque<Finalizer>>,
}

/// Clears the recursion flag even if a collection unwinds.
struct CollectingGuard<'a>(&'a Cell<bool>);

impl Drop for CollectingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl GcManager {
    pub(crate) fn new(config: &GcConfig) -> Self {
        Self {
            trigger_level: Cell::new(config.trigger_level.max(config.min_trigger_level)),
            min_trigger_level: config.min_trigger_level,
            adaptive: config.adaptive_trigger,
            enabled: Cell::new(true),
            verbose: Cell::new(config.verbose),
            collecting: Cell::new(false),
            balancer: RefCell::new(MemBalancer::new(config.min_trigger_level as u64)),
            stats: RefCell::new(GcStats::default()),
            pending_finalizers: RefCell::new(VecDeque::new()),
        }
    }

    /// Heap size above which allocation requests a full collection.
    pub fn trigger_level(&self) -> usize {
        self.trigger_level.get()
    }

    /// Clamped to the configured minimum.
    pub fn set_trigger_level(&self, bytes: usize) {
        self.trigger_level.set(bytes.max(self.min_trigger_level));
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Enable or disable collections triggered by allocation. Explicit requests always run.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.get()
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.set(verbose);
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            trigger_level: self.trigger_level.get(),
            ..self.stats.borrow().clone()
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.get()
    }

    /// Run a full collection unless one is already running, then retune the trigger.
    pub(crate) fn collect(&self, collector: &Collector) -> GcResult {
        if self.collecting.get() {
            debug!("Full collection requested while one is running, ignored");
            return GcResult::default();
        }
        self.collecting.set(true);
        let _guard = CollectingGuard(&self.collecting);

        let before = collector.bytes_allocated();
        self.balancer.borrow_mut().mark_start_gc(before as u64);
        let start = Instant::now();
        let result = collector.mark_sweep();
        let elapsed = start.elapsed();
        let after = collector.bytes_allocated();

        self.retune(before, after);
        self.record(&result, after, elapsed);
        if self.verbose.get() {
            let stats = self.stats.borrow();
            info!(
                "Garbage collection {} = {} marked, {} detached, {} reclaimed ({} -> {} bytes, trigger {} bytes, {:?}, {} finalizers pending)",
                stats.full_collections,
                result.marked,
                result.detached,
                result.reclaimed,
                before,
                after,
                self.trigger_level.get(),
                elapsed,
                self.pending_finalizers.borrow().len()
            );
        }
        result
    }

    fn retune(&self, before: usize, after: usize) {
        if self.adaptive {
            let limit = self
                .balancer
                .borrow_mut()
                .mark_end_gc(before.saturating_sub(after) as u64, after as u64);
            self.set_trigger_level(usize::try_from(limit).unwrap_or(usize::MAX));
        } else if after >= self.trigger_level.get() {
            // a fixed trigger below the live size would collect on every allocation
            let raised = after.saturating_mul(2);
            warn!(
                "Live heap ({} bytes) exceeds the fixed trigger level, raising it to {} bytes",
                after, raised
            );
            self.set_trigger_level(raised);
        }
    }

    fn record(&self, result: &GcResult, after: usize, elapsed: Duration) {
        let mut stats = self.stats.borrow_mut();
        stats.full_collections += 1;
        stats.last_marked = result.marked;
        stats.total_marked += result.marked;
        stats.total_detached += result.detached;
        stats.bytes_after_last_collection = after;
        stats.last_collection_time = elapsed;
        stats.total_collection_time += elapsed;
    }

    pub(crate) fn note_lite_sweep(&self, reclaimed: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.lite_sweeps += 1;
        stats.total_reclaimed += reclaimed;
    }

    pub(crate) fn queue_finalizer(&self, finalizer: Finalizer) {
        self.pending_finalizers.borrow_mut().push_back(finalizer);
    }

    pub fn pending_finalizers(&self) -> usize {
        self.pending_finalizers.borrow().len()
    }

    /// Run queued finalizers in the order their keys died, including any they queue themselves.
    pub fn run_pending_finalizers(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.pending_finalizers.borrow_mut().pop_front();
            match next {
                Some(finalizer) => {
                    finalizer();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            debug!("Ran {} finalizers", ran);
        }
        ran
    }
}

impl std::fmt::Debug for GcManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcManager")
            .field("trigger_level", &self.trigger_level.get())
            .field("enabled", &self.enabled.get())
            .field("collecting", &self.collecting.get())
            .field(
                "pending_finalizers",
                &format!("[{} finalizers queued]", self.pending_finalizers()),
            )
            .finish()
    }
}
