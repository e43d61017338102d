//! Three-phase attribution synchroniser (Component E).
//!
//! Each phase is independent and idempotent: re-running any of them against
//! unchanged Docker/audit state must not change already-attributed rows.

pub mod types;

use attribution_store::{AttributionSource, AttributionStore, CreationMethod};
use audit_reader::AuditReader;
use common::constants::{
    DEFAULT_AUDIT_KEYS, EVENTS_DEFAULT_LOOKBACK_HOURS, EVENT_COLLECTION_MAX_EVENTS,
    EVENT_COLLECTION_MAX_WALL_SECS, OWNER_LABEL_KEY, AUDIT_LOOKBACK_DEFAULT, AUDIT_TIME_WINDOW_SECONDS,
};
use common::error::SyncError;
use docker_inspector::Inspector;
use quota_cache::QuotaCache;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub use types::{Phase1Summary, SyncSummary};

fn now_unix() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64()
}

/// Find the uid whose audit timestamp is closest to `event_ts` within the
/// configured window. `audit_by_ts` must be sorted ascending by timestamp;
/// ties (identical absolute delta) resolve to whichever entry is scanned
/// first, i.e. the earlier timestamp.
fn best_matching_uid(audit_by_ts: &[(f64, u32)], event_ts: f64) -> Option<u32> {
    let mut best: Option<(f64, u32)> = None;
    for &(at, uid) in audit_by_ts {
        let delta = (at - event_ts).abs();
        if delta <= AUDIT_TIME_WINDOW_SECONDS as f64 {
            match best {
                Some((best_delta, _)) if delta >= best_delta => {}
                _ => best = Some((delta, uid)),
            }
        }
    }
    best.map(|(_, uid)| uid)
}

/// Drives the three synchroniser phases against a live inspector/audit
/// reader and persists results to the attribution store.
pub struct AttributionSynchroniser {
    inspector: Arc<dyn Inspector>,
    audit: Arc<dyn AuditReader>,
    store: AttributionStore,
    cache: QuotaCache,
}

impl AttributionSynchroniser {
    pub fn new(
        inspector: Arc<dyn Inspector>,
        audit: Arc<dyn AuditReader>,
        store: AttributionStore,
        cache: QuotaCache,
    ) -> Self {
        AttributionSynchroniser { inspector, audit, store, cache }
    }

    async fn audit_by_ts(&self) -> Result<Vec<(f64, u32)>, SyncError> {
        let records = self
            .audit
            .read_audit_records(&DEFAULT_AUDIT_KEYS, AUDIT_LOOKBACK_DEFAULT)
            .await?;
        let mut out: Vec<(f64, u32)> = records
            .into_iter()
            .filter_map(|r| match (r.timestamp_unix, r.initiator_uid) {
                (Some(ts), Some(uid)) => Some((ts, uid)),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        Ok(out)
    }

    /// Attributes every layer of `image_id` whose layer id is not already
    /// claimed by another image (first-writer-wins at the store). Returns
    /// the count of layers newly attributed.
    async fn attribute_image_layers(
        &self,
        image_id: &str,
        host_user_name: &str,
        uid: Option<i64>,
        creation_method: Option<CreationMethod>,
    ) -> Result<usize, SyncError> {
        let layers = self.inspector.get_image_layers_with_sizes(image_id).await?;
        let mut new_count = 0usize;
        for (layer_id, size_bytes) in layers {
            let created = self
                .store
                .set_layer_attribution(
                    &layer_id,
                    uid,
                    host_user_name,
                    size_bytes as i64,
                    now_unix(),
                    creation_method,
                )
                .await?;
            if created {
                new_count += 1;
            }
        }
        Ok(new_count)
    }

    /// Phase 1: attribute containers with no owner by matching their
    /// creation time against nearby audit records. Already-attributed
    /// containers are left alone save for a `size_bytes` refresh.
    pub async fn sync_containers_from_audit(&self) -> Result<Phase1Summary, SyncError> {
        let attributed: std::collections::HashSet<String> = self
            .store
            .list_container_attributions()
            .await?
            .into_iter()
            .map(|a| a.container_id)
            .collect();
        let containers = self.inspector.list_containers(true).await?;
        let df = self.inspector.get_system_df(None).await?;
        let audit_by_ts = self.audit_by_ts().await?;

        let mut summary = Phase1Summary::default();
        for c in &containers {
            if attributed.contains(&c.id) {
                let size_bytes = df.containers.get(&c.id).copied().unwrap_or(0);
                self.store.update_container_size(&c.id, size_bytes as i64).await?;
                continue;
            }
            if c.labels.get(OWNER_LABEL_KEY).is_some() {
                continue;
            }
            if c.created_unix <= 0.0 {
                summary.skipped_because_no_created_ts += 1;
                continue;
            }
            match best_matching_uid(&audit_by_ts, c.created_unix) {
                Some(uid) => {
                    let name = common::resolve_username(uid);
                    let size_bytes = df.containers.get(&c.id).copied().unwrap_or(0);
                    self.store
                        .set_container_attribution(
                            &c.id,
                            &name,
                            Some(uid as i64),
                            c.image_id.as_deref(),
                            size_bytes as i64,
                            now_unix(),
                        )
                        .await?;
                    summary.attributed += 1;
                    info!(container = %c.short_id, uid, "attributed container from audit time window");
                }
                None => {
                    summary.skipped_because_no_audit_match += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Phase 2: replay Docker events since the last watermark, attributing
    /// new containers/images and chaining committed images to their
    /// creating container.
    pub async fn sync_from_docker_events(&self) -> Result<(usize, usize), SyncError> {
        let now_ts = now_unix();
        let since_ts = self
            .store
            .get_events_watermark()
            .await?
            .unwrap_or(now_ts - (EVENTS_DEFAULT_LOOKBACK_HOURS as f64 * 3600.0));

        let events = self
            .inspector
            .stream_events_since(since_ts, EVENT_COLLECTION_MAX_WALL_SECS, EVENT_COLLECTION_MAX_EVENTS)
            .await?;
        let audit_by_ts = self.audit_by_ts().await?;
        let df = self.inspector.get_system_df(None).await?;

        let mut containers_set = 0usize;
        let mut images_set = 0usize;
        let mut attributed_containers: std::collections::HashMap<String, (String, Option<i64>)> = self
            .store
            .list_container_attributions()
            .await?
            .into_iter()
            .map(|a| (a.container_id.clone(), (a.host_user_name, a.uid)))
            .collect();
        let mut attributed_images: std::collections::HashSet<String> = self
            .store
            .list_image_attributions()
            .await?
            .into_iter()
            .map(|a| a.image_id)
            .collect();

        for ev in &events {
            let eid = &ev.id;
            if eid.is_empty() {
                continue;
            }
            let ev_ts = ev.time_unix();

            match (ev.kind.as_str(), ev.action.as_str()) {
                ("container", "create") => {
                    if attributed_containers.contains_key(eid) {
                        continue;
                    }
                    if let Some(uid) = best_matching_uid(&audit_by_ts, ev_ts) {
                        let name = common::resolve_username(uid);
                        let size_bytes = df.containers.get(eid).copied().unwrap_or(0);
                        self.store
                            .set_container_attribution(eid, &name, Some(uid as i64), None, size_bytes as i64, now_unix())
                            .await?;
                        attributed_containers.insert(eid.clone(), (name.clone(), Some(uid as i64)));
                        containers_set += 1;
                        self.cache.invalidate_containers().await;
                        info!(container = %eid, uid, "attributed container from docker event");
                    }
                }
                ("container", "commit") => {
                    // `eid` may be a `name:tag`; resolve to the full image id before
                    // touching the store (scenario 1: `busybox:latest` -> `sha256:AAA...`).
                    let Some(image_id) = self.inspector.resolve_image_ref(eid).await? else {
                        continue;
                    };
                    if attributed_images.contains(&image_id) {
                        continue;
                    }
                    let owner = ev
                        .from
                        .as_ref()
                        .and_then(|cid| attributed_containers.get(cid).cloned())
                        .or_else(|| best_matching_uid(&audit_by_ts, ev_ts).map(|uid| (common::resolve_username(uid), Some(uid as i64))));
                    if let Some((name, uid)) = owner {
                        let size_bytes = df.images.get(&image_id).copied().unwrap_or(0);
                        self.store.set_image_attribution(&image_id, &name, uid, size_bytes as i64, now_unix()).await?;
                        self.attribute_image_layers(&image_id, &name, uid, Some(CreationMethod::Commit)).await?;
                        attributed_images.insert(image_id.clone());
                        images_set += 1;
                        self.cache.invalidate_images().await;
                        info!(image = %image_id, "attributed committed image");
                    }
                }
                ("image", action @ ("pull" | "tag" | "import" | "load")) => {
                    let Some(image_id) = self.inspector.resolve_image_ref(eid).await? else {
                        continue;
                    };
                    if attributed_images.contains(&image_id) {
                        continue;
                    }
                    if let Some(uid) = best_matching_uid(&audit_by_ts, ev_ts) {
                        let name = common::resolve_username(uid);
                        let size_bytes = df.images.get(&image_id).copied().unwrap_or(0);
                        let method = match action {
                            "pull" => CreationMethod::Pull,
                            "tag" => CreationMethod::Build,
                            "import" => CreationMethod::Import,
                            _ => CreationMethod::Load,
                        };
                        self.store.set_image_attribution(&image_id, &name, Some(uid as i64), size_bytes as i64, now_unix()).await?;
                        self.attribute_image_layers(&image_id, &name, Some(uid as i64), Some(method)).await?;
                        attributed_images.insert(image_id.clone());
                        images_set += 1;
                        self.cache.invalidate_images().await;
                        info!(image = %image_id, uid, %action, "attributed image from docker event");
                    }
                }
                _ => {}
            }
        }

        self.store.advance_events_watermark(now_ts).await?;
        Ok((containers_set, images_set))
    }

    /// Phase 3: back-fill layer attribution for already-attributed images
    /// whose layer set grew (e.g. via a prior partial run).
    pub async fn sync_existing_images(&self) -> Result<usize, SyncError> {
        let image_attributions = self.store.list_image_attributions().await?;
        let mut backfilled = 0usize;
        for img in image_attributions {
            let new_layers = self
                .attribute_image_layers(&img.image_id, &img.puller_host_user_name, img.puller_uid, None)
                .await?;
            if new_layers > 0 {
                backfilled += 1;
                info!(image = %img.image_id, new_layers, "backfilled layers for existing image");
            }
        }
        Ok(backfilled)
    }

    /// Runs all three phases in order, as the scheduled sync task does. A
    /// failure inside any phase is logged and counted, not propagated;
    /// the remaining phases still run and the pass always returns a summary.
    pub async fn run(&self) -> SyncSummary {
        let started = std::time::Instant::now();
        let mut phase_failures = 0usize;

        let phase1 = self.sync_containers_from_audit().await.unwrap_or_else(|e| {
            warn!(error = %e, phase = "sync_containers_from_audit", "attribution sync phase failed");
            phase_failures += 1;
            Phase1Summary::default()
        });

        let (containers_from_events, images_from_events) =
            self.sync_from_docker_events().await.unwrap_or_else(|e| {
                warn!(error = %e, phase = "sync_from_docker_events", "attribution sync phase failed");
                phase_failures += 1;
                (0, 0)
            });

        let images_backfilled = self.sync_existing_images().await.unwrap_or_else(|e| {
            warn!(error = %e, phase = "sync_existing_images", "attribution sync phase failed");
            phase_failures += 1;
            0
        });

        let summary = SyncSummary {
            containers_attributed_from_audit: phase1.attributed,
            containers_skipped_no_created_ts: phase1.skipped_because_no_created_ts,
            containers_skipped_no_audit_match: phase1.skipped_because_no_audit_match,
            containers_attributed_from_events: containers_from_events,
            images_attributed_from_events: images_from_events,
            images_backfilled_with_layers: images_backfilled,
            phase_failures,
        };
        common::metrics::record_sync_phase("full", summary.total(), phase_failures, started.elapsed().as_secs_f64());
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_matching_uid_picks_smallest_delta() {
        let audit = vec![(100.0, 1001u32), (105.0, 1002u32), (130.0, 1003u32)];
        assert_eq!(best_matching_uid(&audit, 104.0), Some(1002));
    }

    #[test]
    fn test_best_matching_uid_outside_window_is_none() {
        let audit = vec![(100.0, 1001u32)];
        assert_eq!(best_matching_uid(&audit, 100.0 + AUDIT_TIME_WINDOW_SECONDS as f64 + 1.0), None);
    }

    #[test]
    fn test_best_matching_uid_ties_prefer_earlier_scan_order() {
        let audit = vec![(90.0, 1001u32), (110.0, 1002u32)];
        // both are 10s away from 100.0; first entry scanned wins the tie
        assert_eq!(best_matching_uid(&audit, 100.0), Some(1001));
    }

    async fn test_store() -> AttributionStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_test.sqlite3");
        std::mem::forget(dir);
        AttributionStore::connect(path.to_str().unwrap()).await.unwrap()
    }

    fn audit_record(ts: f64, uid: u32) -> audit_reader::AuditRecord {
        audit_reader::AuditRecord {
            timestamp_unix: Some(ts),
            initiator_uid: Some(uid),
            effective_uid: Some(uid),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sync_containers_from_audit_attributes_new_container() {
        let store = test_store().await;

        let mut inspector = docker_inspector::MockInspector::new();
        inspector.expect_list_containers().returning(|_| {
            Ok(vec![docker_inspector::ContainerSummary {
                id: "c1".into(),
                short_id: "c1".into(),
                name: "web".into(),
                image_id: Some("img1".into()),
                created_unix: 1000.0,
                labels: Default::default(),
            }])
        });
        inspector.expect_get_system_df().returning(|_| {
            Ok(docker_inspector::SystemDf {
                containers: [("c1".to_string(), 4096u64)].into_iter().collect(),
                images: Default::default(),
            })
        });

        let mut audit = audit_reader::MockAuditReader::new();
        audit
            .expect_read_audit_records()
            .returning(|_, _| Ok(vec![audit_record(1005.0, 1001)]));

        let cache = QuotaCache::disabled();
        let sync = AttributionSynchroniser::new(Arc::new(inspector), Arc::new(audit), store.clone(), cache);

        let summary = sync.sync_containers_from_audit().await.unwrap();
        assert_eq!(summary.attributed, 1);
        assert_eq!(summary.skipped_because_no_audit_match, 0);
        assert_eq!(summary.skipped_because_no_created_ts, 0);

        let row = store.get_container_attribution("c1").await.unwrap().unwrap();
        assert_eq!(row.uid, Some(1001));
        assert_eq!(row.size_bytes, 4096);
    }

    #[tokio::test]
    async fn test_sync_containers_from_audit_skips_labeled_container() {
        let store = test_store().await;

        let mut inspector = docker_inspector::MockInspector::new();
        inspector.expect_list_containers().returning(|_| {
            Ok(vec![docker_inspector::ContainerSummary {
                id: "c1".into(),
                short_id: "c1".into(),
                name: "web".into(),
                image_id: None,
                created_unix: 1000.0,
                labels: [(common::constants::OWNER_LABEL_KEY.to_string(), "bob".to_string())]
                    .into_iter()
                    .collect(),
            }])
        });
        inspector.expect_get_system_df().returning(|_| Ok(docker_inspector::SystemDf::default()));

        let mut audit = audit_reader::MockAuditReader::new();
        audit.expect_read_audit_records().returning(|_, _| Ok(vec![audit_record(1005.0, 1001)]));

        let cache = QuotaCache::disabled();
        let sync = AttributionSynchroniser::new(Arc::new(inspector), Arc::new(audit), store.clone(), cache);

        let summary = sync.sync_containers_from_audit().await.unwrap();
        assert_eq!(summary.attributed, 0);
        assert!(store.get_container_attribution("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_containers_from_audit_tallies_skip_reasons() {
        let store = test_store().await;

        let mut inspector = docker_inspector::MockInspector::new();
        inspector.expect_list_containers().returning(|_| {
            Ok(vec![
                docker_inspector::ContainerSummary {
                    id: "no-created-ts".into(),
                    short_id: "no-created-ts".into(),
                    name: "a".into(),
                    image_id: None,
                    created_unix: 0.0,
                    labels: Default::default(),
                },
                docker_inspector::ContainerSummary {
                    id: "no-audit-match".into(),
                    short_id: "no-audit-match".into(),
                    name: "b".into(),
                    image_id: None,
                    created_unix: 1000.0,
                    labels: Default::default(),
                },
            ])
        });
        inspector.expect_get_system_df().returning(|_| Ok(docker_inspector::SystemDf::default()));

        let mut audit = audit_reader::MockAuditReader::new();
        audit.expect_read_audit_records().returning(|_, _| Ok(Vec::new()));

        let cache = QuotaCache::disabled();
        let sync = AttributionSynchroniser::new(Arc::new(inspector), Arc::new(audit), store.clone(), cache);

        let summary = sync.sync_containers_from_audit().await.unwrap();
        assert_eq!(summary.attributed, 0);
        assert_eq!(summary.skipped_because_no_created_ts, 1);
        assert_eq!(summary.skipped_because_no_audit_match, 1);
    }
}
