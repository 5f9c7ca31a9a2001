use std::collections::HashSet;

use super::utils::{CheckReport, GcPhase};
use super::Collector;
use crate::error::InvariantViolation;
use crate::object::list::Link;
use crate::object::StatusFlags;

impl Collector {
    /// Walk the live and moribund lists and verify they agree with each other and with the
    /// node count. Nodes that have never been referenced are reported but don't fail the check.
    pub fn check(&self) -> Result<CheckReport, InvariantViolation> {
        if self.phase() != GcPhase::Idle {
            return Err(InvariantViolation::CollectionInProgress(self.phase()));
        }
        if !self.reachable().is_empty() {
            return Err(InvariantViolation::ReachableNotEmpty);
        }

        let recorded = self.node_count();
        let mut report = CheckReport::default();
        let mut flagged = 0;
        for node in self.live().iter() {
            report.live += 1;
            // a corrupted list may never get back to its sentinel
            if report.live > recorded {
                return Err(InvariantViolation::NodeCountMismatch {
                    recorded,
                    found: report.live,
                });
            }
            if !unsafe { Link::is_consistent(node.cast()) } {
                return Err(InvariantViolation::BrokenLink(node.as_ptr() as usize));
            }
            let header = unsafe { node.as_ref() };
            if header.is_virgin() {
                report.virgins += 1;
            }
            if header.status().contains(StatusFlags::MORIBUND) {
                flagged += 1;
            }
        }

        let moribund = self.moribund();
        let mut seen = HashSet::with_capacity(moribund.len());
        for &node in moribund.iter() {
            if !unsafe { node.as_ref() }.is_moribund() {
                return Err(InvariantViolation::MoribundBitClear(node.as_ptr() as usize));
            }
            if !seen.insert(node) {
                return Err(InvariantViolation::DuplicateMoribund(node.as_ptr() as usize));
            }
        }
        report.moribund = moribund.len();
        if flagged != report.moribund {
            return Err(InvariantViolation::MoribundCountMismatch {
                flagged,
                listed: report.moribund,
            });
        }
        if report.live != recorded {
            return Err(InvariantViolation::NodeCountMismatch {
                recorded,
                found: report.live,
            });
        }
        if report.virgins > 0 {
            warn!(
                "{} nodes have never been referenced; they will only be reclaimed by a full collection",
                report.virgins
            );
        }
        Ok(report)
    }

    /// [`check`](Self::check), logging the violation if there is one.
    pub fn check_invariants(&self) -> bool {
        match self.check() {
            Ok(report) => {
                debug!("Heap check passed: {:?}", report);
                true
            }
            Err(violation) => {
                error!("Heap check failed: {}", violation);
                false
            }
        }
    }
}
