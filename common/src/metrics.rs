//! Metrics recording for the attribution and enforcement engine.
//!
//! Standardized counters/histograms/gauges for the synchroniser phases, the
//! enforcement pass, and the cache layer.

use metrics::{counter, gauge, histogram};

/// Record one synchroniser phase's outcome.
pub fn record_sync_phase(phase: &str, attributed: usize, skipped: usize, duration_secs: f64) {
    let labels = [("phase", phase.to_string())];

    counter!("sync_phase_attributed_total", &labels).increment(attributed as u64);
    counter!("sync_phase_skipped_total", &labels).increment(skipped as u64);
    histogram!("sync_phase_duration_seconds", &labels).record(duration_secs);
}

/// Record an enforcement pass outcome for one uid.
pub fn record_enforcement_uid(uid: u32, removed: usize, over_quota: bool) {
    let labels = [("uid", uid.to_string())];

    if over_quota {
        counter!("enforcement_quota_exceeded_total", &labels).increment(1);
    }
    counter!("enforcement_containers_removed_total", &labels).increment(removed as u64);
}

/// Record a full enforcement pass.
pub fn record_enforcement_pass(enforced_count: usize, event_count: usize, duration_secs: f64) {
    gauge!("enforcement_pass_enforced_count").set(enforced_count as f64);
    gauge!("enforcement_pass_event_count").set(event_count as f64);
    histogram!("enforcement_pass_duration_seconds").record(duration_secs);
}

/// Record a cache lookup result.
pub fn record_cache_lookup(key: &str, hit: bool) {
    let labels = [
        ("key", key.to_string()),
        ("result", if hit { "hit" } else { "miss" }.to_string()),
    ];
    counter!("cache_lookups_total", &labels).increment(1);
}

/// Record a coordinator callback POST attempt.
pub fn record_coordinator_callback(success: bool, events: usize) {
    let labels = [("status", if success { "success" } else { "failure" }.to_string())];
    counter!("coordinator_callback_total", &labels).increment(1);
    counter!("coordinator_callback_events_total", &labels).increment(events as u64);
}

/// Record a Docker inspector operation.
pub fn record_inspector_operation(operation: &str, success: bool, duration_secs: f64) {
    let labels = [
        ("operation", operation.to_string()),
        ("status", if success { "success" } else { "failure" }.to_string()),
    ];
    counter!("inspector_operations_total", &labels).increment(1);
    histogram!("inspector_operation_duration_seconds", &labels).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sync_phase() {
        record_sync_phase("containers_from_audit", 3, 1, 0.2);
    }

    #[test]
    fn test_record_enforcement_uid() {
        record_enforcement_uid(1001, 2, true);
    }

    #[test]
    fn test_record_enforcement_pass() {
        record_enforcement_pass(2, 2, 1.1);
    }

    #[test]
    fn test_record_cache_lookup() {
        record_cache_lookup("docker:containers:list", true);
        record_cache_lookup("docker:images:list", false);
    }

    #[test]
    fn test_record_coordinator_callback() {
        record_coordinator_callback(true, 2);
    }

    #[test]
    fn test_record_inspector_operation() {
        record_inspector_operation("list_containers", true, 0.05);
    }
}
