//! Adaptive trigger level: the heap may grow past the live size by
//! `E = sqrt(L * g / s)`, where `L` is the live size, `g` the allocation rate and `s` the
//! collection speed, each smoothed over past cycles.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct MemBalancer {
    gced_bytes: u64,
    gc_time: Duration,
    live: u64,
    mem_delta: u64,
    beat_period: Duration,
    // support vars
    /// heap size at the last heartbeat
    last_mem: u64,
    /// last time a heartbeat happened
    last_beat: Instant,
    gc_start_time: Instant,
    e_min: u64,
    heap_limit: u64,
}

impl MemBalancer {
    const TUNING_PARAM: u64 = 2;
    const GC_FACTOR: f32 = 0.5;
    const ALLOC_FACTOR: f32 = 0.95;
    /// a cycle that freed less than this still counts as having freed this much
    const MIN_GCED_BYTES: u64 = 1024;

    /// `e_min` is the least headroom granted above the live size.
    pub fn new(e_min: u64) -> Self {
        Self {
            gced_bytes: 0,
            gc_time: Duration::ZERO,
            live: 0,
            mem_delta: 0,
            beat_period: Duration::ZERO,
            last_mem: 0,
            last_beat: Instant::now(),
            gc_start_time: Instant::now(),
            e_min,
            heap_limit: e_min,
        }
    }

    pub fn heap_limit(&self) -> u64 {
        self.heap_limit
    }

    /// Record the heap size at the start of a cycle and the growth since the previous one.
    pub fn mark_start_gc(&mut self, heap_bytes: u64) {
        let delta = heap_bytes.saturating_sub(self.last_mem);
        let period = self.last_beat.elapsed();
        self.on_heartbeat(delta, period);
        self.gc_start_time = Instant::now();
    }

    /// Record the outcome of a cycle and return the new heap limit.
    pub fn mark_end_gc(&mut self, gced_bytes: u64, live: u64) -> u64 {
        // to prevent extremely large E
        let gced_bytes = gced_bytes.max(Self::MIN_GCED_BYTES);
        self.on_gc(gced_bytes, self.gc_start_time.elapsed(), live);
        self.last_mem = live;
        self.last_beat = Instant::now();
        self.compute_heap_limit()
    }

    fn on_gc(&mut self, gced_bytes: u64, gc_time: Duration, live: u64) {
        self.gced_bytes = (self.gced_bytes as f32 * Self::GC_FACTOR
            + gced_bytes as f32 * (1.0 - Self::GC_FACTOR)) as u64;
        self.gc_time =
            self.gc_time.mul_f32(Self::GC_FACTOR) + gc_time.mul_f32(1.0 - Self::GC_FACTOR);
        self.live = live;
    }

    fn on_heartbeat(&mut self, mem_delta: u64, hb_period: Duration) {
        self.mem_delta = (Self::ALLOC_FACTOR * self.mem_delta as f32
            + (1.0 - Self::ALLOC_FACTOR) * mem_delta as f32) as u64;
        self.beat_period = self.beat_period.mul_f32(Self::ALLOC_FACTOR)
            + hb_period.mul_f32(1.0 - Self::ALLOC_FACTOR);
    }

    fn compute_heap_limit(&mut self) -> u64 {
        let l_c = (self.live / Self::TUNING_PARAM) as f32;
        let g = self.mem_delta as f32 / self.beat_period.as_secs_f32();
        let s = self.gced_bytes as f32 / self.gc_time.as_secs_f32();
        let e = (l_c * g / s).sqrt();
        // a zero period or a zero collection time yields inf or NaN
        let e = if e.is_finite() { e as u64 } else { 0 };
        self.heap_limit = self.live + e.max(self.e_min);
        debug!(
            "New heap limit = {} bytes, live = {} bytes, E = {}",
            self.heap_limit, self.live, e
        );
        self.heap_limit
    }
}
