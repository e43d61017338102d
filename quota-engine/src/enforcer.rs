//! Docker quota enforcement (stop+remove over-limit containers, report to
//! the coordinator).

use attribution_store::AttributionStore;
use common::config::EnforcementOrder;
use common::error::{EnforcementError, InspectorError};
use docker_inspector::Inspector;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::aggregator::QuotaAggregator;
use crate::types::{EnforcementEvent, EnforcementEventDetail, EnforcementEventType, EnforcementSummary};

/// Docker container ids are 64-char hex; the coordinator event contract uses
/// the 12-char short id, matching the original's `cid[:12]`.
fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

pub struct QuotaEnforcer {
    inspector: Arc<dyn Inspector>,
    store: AttributionStore,
    aggregator: QuotaAggregator,
    order: EnforcementOrder,
    host_id: String,
    callback_url: Option<String>,
    callback_secret: Option<String>,
    http: reqwest::Client,
}

struct CandidateContainer {
    id: String,
    size_bytes: i64,
    created_unix: f64,
}

impl QuotaEnforcer {
    pub fn new(
        inspector: Arc<dyn Inspector>,
        store: AttributionStore,
        order: EnforcementOrder,
        host_id: String,
        callback_url: Option<String>,
        callback_secret: Option<String>,
    ) -> Self {
        let aggregator = QuotaAggregator::new(inspector.clone(), store.clone());
        QuotaEnforcer {
            inspector,
            store,
            aggregator,
            order,
            host_id,
            callback_url,
            callback_secret,
            http: common::http_client(),
        }
    }

    async fn containers_by_uid(&self) -> Result<std::collections::HashMap<i64, Vec<CandidateContainer>>, EnforcementError> {
        let df = self.inspector.get_system_df(None).await?;
        let live = self.inspector.list_containers(true).await?;
        let created_by_id: std::collections::HashMap<&str, f64> =
            live.iter().map(|c| (c.id.as_str(), c.created_unix)).collect();

        let attributions = self.store.list_container_attributions().await?;
        let mut by_uid: std::collections::HashMap<i64, Vec<CandidateContainer>> = std::collections::HashMap::new();
        for a in attributions {
            let Some(uid) = a.uid.or_else(|| common::resolve_uid(&a.host_user_name).map(|u| u as i64)) else {
                continue;
            };
            let size_bytes = df.containers.get(&a.container_id).copied().unwrap_or(0) as i64;
            let created_unix = created_by_id.get(a.container_id.as_str()).copied().unwrap_or(0.0);
            by_uid.entry(uid).or_default().push(CandidateContainer { id: a.container_id, size_bytes, created_unix });
        }

        for list in by_uid.values_mut() {
            match self.order {
                EnforcementOrder::NewestFirst => {
                    list.sort_by(|a, b| b.created_unix.partial_cmp(&a.created_unix).unwrap())
                }
                EnforcementOrder::OldestFirst => {
                    list.sort_by(|a, b| a.created_unix.partial_cmp(&b.created_unix).unwrap())
                }
                EnforcementOrder::LargestFirst => list.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes)),
            }
        }
        Ok(by_uid)
    }

    /// Stops and removes containers, uid by uid, until every uid with a
    /// configured hard limit is back under it. Emits `quota_exceeded` /
    /// `container_removed` events for the coordinator POST.
    pub async fn enforce(&self) -> Result<EnforcementSummary, EnforcementError> {
        let started = Instant::now();
        let limits = self.store.list_user_quota_limits().await?;
        if limits.is_empty() {
            return Ok(EnforcementSummary::default());
        }

        let uid_to_containers = self.containers_by_uid().await?;
        let mut events: Vec<EnforcementEvent> = Vec::new();
        let mut total_removed = 0usize;

        for limit in &limits {
            if limit.block_hard_limit <= 0 {
                continue;
            }
            let limit_bytes = limit.block_hard_limit * 1024;
            let usage = self.aggregator.aggregate_usage_by_uid(None).await.map_err(|_| {
                EnforcementError::Inspector(InspectorError::BadData("usage aggregation failed".into()))
            })?;
            let current = usage.usage_by_uid.get(&limit.uid).copied().unwrap_or(0);
            if current <= limit_bytes {
                continue;
            }

            let host_user_name = common::resolve_username(limit.uid as u32);
            events.push(EnforcementEvent {
                host_user_name: host_user_name.clone(),
                event_type: EnforcementEventType::QuotaExceeded,
                detail: EnforcementEventDetail::QuotaExceeded {
                    uid: limit.uid,
                    block_current: current,
                    block_hard_limit: limit.block_hard_limit,
                },
            });
            common::metrics::record_enforcement_uid(limit.uid as u32, 0, true);

            let mut removed_ids = Vec::new();
            let candidates = uid_to_containers.get(&limit.uid).cloned_or_empty();
            for candidate in candidates {
                let usage = self.aggregator.aggregate_usage_by_uid(None).await.map_err(|_| {
                    EnforcementError::Inspector(InspectorError::BadData("usage aggregation failed".into()))
                })?;
                let current = usage.usage_by_uid.get(&limit.uid).copied().unwrap_or(0);
                if current <= limit_bytes {
                    break;
                }

                info!(container = %candidate.id, uid = limit.uid, size = candidate.size_bytes, "stopping container over quota");
                if let Err(e) = self
                    .inspector
                    .stop_container(&candidate.id, common::constants::STOP_CONTAINER_GRACE_SECS as i64)
                    .await
                {
                    warn!(container = %candidate.id, error = %e, "failed to stop container during enforcement");
                    continue;
                }
                if let Err(e) = self.inspector.remove_container(&candidate.id, true).await {
                    warn!(container = %candidate.id, error = %e, "failed to remove container during enforcement");
                    continue;
                }
                self.store.delete_container_attribution(&candidate.id).await?;

                let updated = self.aggregator.aggregate_usage_by_uid(None).await.map_err(|_| {
                    EnforcementError::Inspector(InspectorError::BadData("usage aggregation failed".into()))
                })?;
                let new_usage = updated.usage_by_uid.get(&limit.uid).copied().unwrap_or(0);
                total_removed += 1;
                removed_ids.push(candidate.id.clone());

                events.push(EnforcementEvent {
                    host_user_name: host_user_name.clone(),
                    event_type: EnforcementEventType::ContainerRemoved,
                    detail: EnforcementEventDetail::ContainerRemoved {
                        container_id: short_id(&candidate.id),
                        size_bytes: candidate.size_bytes,
                        new_usage,
                        removed_ids: removed_ids.iter().map(|id| short_id(id)).collect(),
                    },
                });
                common::metrics::record_enforcement_uid(limit.uid as u32, 1, false);
            }
        }

        if !events.is_empty() {
            self.post_events_to_coordinator(&events).await;
        }

        let summary = EnforcementSummary { enforced: total_removed, events: events.len() };
        common::metrics::record_enforcement_pass(summary.enforced, summary.events, started.elapsed().as_secs_f64());
        Ok(summary)
    }

    async fn post_events_to_coordinator(&self, events: &[EnforcementEvent]) {
        let (Some(url), Some(secret)) = (&self.callback_url, &self.callback_secret) else {
            tracing::debug!("coordinator callback not configured; skipping event POST");
            return;
        };
        let endpoint = format!("{}/api/internal/slave-events", url.trim_end_matches('/'));
        let body = serde_json::json!({ "host_id": self.host_id, "events": events });

        let result = self
            .http
            .post(&endpoint)
            .header("X-API-Key", secret)
            .timeout(std::time::Duration::from_secs(common::constants::COORDINATOR_CALLBACK_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                common::metrics::record_coordinator_callback(true, events.len());
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "coordinator event callback returned non-2xx");
                common::metrics::record_coordinator_callback(false, events.len());
            }
            Err(e) => {
                warn!(error = %e, "coordinator event callback failed");
                common::metrics::record_coordinator_callback(false, events.len());
            }
        }
    }
}

trait OptVecExt {
    fn cloned_or_empty(self) -> Vec<CandidateContainer>;
}

impl OptVecExt for Option<&Vec<CandidateContainer>> {
    fn cloned_or_empty(self) -> Vec<CandidateContainer> {
        self.map(|v| v.iter().map(|c| CandidateContainer {
            id: c.id.clone(),
            size_bytes: c.size_bytes,
            created_unix: c.created_unix,
        }).collect()).unwrap_or_default()
    }
}
