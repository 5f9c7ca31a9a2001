use std::fmt;

use crate::gc::GcPhase;

/// What to do once the collector has detected a broken invariant it cannot recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// log the error, then abort the process
    #[default]
    Abort,
    /// log the error, then panic, so test harnesses can observe it
    Panic,
}

/// Recoverable failures surfaced to callers of the allocation interface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GcError {
    #[error("allocator could not satisfy a request for {bytes} bytes")]
    OutOfMemory { bytes: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("minimum trigger level ({min} bytes) exceeds trigger level ({trigger} bytes)")]
    TriggerBelowMinimum { min: usize, trigger: usize },
}

/// A structural inconsistency found by [`Collector::check`](crate::gc::Collector::check).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error(
        "recorded number of nodes ({recorded}) inconsistent with nodes found on the live list ({found})"
    )]
    NodeCountMismatch { recorded: usize, found: usize },
    #[error("live list linkage broken at node {0:#x}")]
    BrokenLink(usize),
    #[error("node {0:#x} is on the moribund list without its moribund bit set")]
    MoribundBitClear(usize),
    #[error("node {0:#x} appears more than once on the moribund list")]
    DuplicateMoribund(usize),
    #[error("{flagged} live nodes carry the moribund bit but the moribund list holds {listed}")]
    MoribundCountMismatch { flagged: usize, listed: usize },
    #[error("reachable list is not empty outside a collection")]
    ReachableNotEmpty,
    #[error("invariants cannot be checked while the collector is {0:?}")]
    CollectionInProgress(GcPhase),
}

/// Report an unrecoverable inconsistency and terminate according to `policy`.
#[cold]
#[inline(never)]
pub fn fatal_error(policy: FatalPolicy, args: fmt::Arguments<'_>) -> ! {
    error!("{}", args);
    match policy {
        FatalPolicy::Abort => std::process::abort(),
        FatalPolicy::Panic => panic!("{}", args),
    }
}

macro_rules! fatal {
    ($policy:expr, $($arg:tt)+) => {
        $crate::error::fatal_error($policy, format_args!($($arg)+))
    };
}
