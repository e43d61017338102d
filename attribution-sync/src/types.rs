//! Result shapes returned by a synchroniser pass.

/// Return shape of Phase 1 (`SyncContainersFromAudit`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Phase1Summary {
    pub attributed: usize,
    pub skipped_because_no_created_ts: usize,
    pub skipped_because_no_audit_match: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub containers_attributed_from_audit: usize,
    pub containers_skipped_no_created_ts: usize,
    pub containers_skipped_no_audit_match: usize,
    pub containers_attributed_from_events: usize,
    pub images_attributed_from_events: usize,
    pub images_backfilled_with_layers: usize,
    /// Number of the three phases that errored out this pass (logged, not retried).
    pub phase_failures: usize,
}

impl SyncSummary {
    pub fn total(&self) -> usize {
        self.containers_attributed_from_audit
            + self.containers_attributed_from_events
            + self.images_attributed_from_events
            + self.images_backfilled_with_layers
    }
}
