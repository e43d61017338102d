//! Usage aggregation: Docker disk usage summed per attributing uid.

use attribution_store::AttributionStore;
use common::error::EngineError;
use docker_inspector::Inspector;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{DeviceUsage, DockerDevice, UserQuotaView};

pub struct UsageSummary {
    pub usage_by_uid: HashMap<i64, i64>,
    pub total_used: i64,
    pub unattributed: i64,
}

pub struct QuotaAggregator {
    inspector: Arc<dyn Inspector>,
    store: AttributionStore,
}

impl QuotaAggregator {
    pub fn new(inspector: Arc<dyn Inspector>, store: AttributionStore) -> Self {
        QuotaAggregator { inspector, store }
    }

    /// Sums container and image-layer usage by the uid that first created
    /// them. `unattributed` is whatever remains once the attributed sum is
    /// subtracted from the live total, and is never negative.
    pub async fn aggregate_usage_by_uid(
        &self,
        container_ids: Option<&[String]>,
    ) -> Result<UsageSummary, EngineError> {
        let df = self.inspector.get_system_df(container_ids).await?;
        let attributions = self.store.list_container_attributions().await?;
        let layer_attributions = self.store.list_layer_attributions().await?;

        let mut cid_to_uid: HashMap<String, Option<i64>> = HashMap::new();
        for a in &attributions {
            let uid = a.uid.or_else(|| common::resolve_uid(&a.host_user_name).map(|u| u as i64));
            cid_to_uid.insert(a.container_id.clone(), uid);
        }

        let mut usage_by_uid: HashMap<i64, i64> = HashMap::new();
        let mut total_container_used: i64 = 0;
        for (cid, size) in &df.containers {
            total_container_used += *size as i64;
            if let Some(Some(uid)) = cid_to_uid.get(cid) {
                *usage_by_uid.entry(*uid).or_insert(0) += *size as i64;
            }
        }

        let mut total_layer_used: i64 = 0;
        for layer in &layer_attributions {
            total_layer_used += layer.size_bytes;
            if let Some(uid) = layer.first_puller_uid {
                *usage_by_uid.entry(uid).or_insert(0) += layer.size_bytes;
            }
        }

        let total_used = total_container_used + total_layer_used;
        let attributed_sum: i64 = usage_by_uid.values().sum();
        let unattributed = (total_used - attributed_sum).max(0);

        Ok(UsageSummary { usage_by_uid, total_used, unattributed })
    }

    /// Deletes attribution rows for containers no longer present, then
    /// backfills attribution for any label-owned container missing a row.
    pub async fn reconcile_and_backfill(&self, live_containers: &[docker_inspector::ContainerSummary]) -> Result<usize, EngineError> {
        let live_ids: Vec<String> = live_containers.iter().map(|c| c.id.clone()).collect();
        self.store.reconcile_containers(&live_ids).await?;

        let attributed: std::collections::HashSet<String> = self
            .store
            .list_container_attributions()
            .await?
            .into_iter()
            .map(|a| a.container_id)
            .collect();

        let mut backfilled = 0usize;
        for c in live_containers {
            if attributed.contains(&c.id) {
                continue;
            }
            let Some(owner) = c.labels.get(common::constants::OWNER_LABEL_KEY) else { continue };
            let uid = common::resolve_uid(owner).map(|u| u as i64);
            self.store
                .set_container_attribution(&c.id, owner, uid, c.image_id.as_deref(), 0, 0.0)
                .await?;
            backfilled += 1;
        }
        Ok(backfilled)
    }

    fn device_usage(unattributed: i64, attributed: i64, reserved_bytes: Option<i64>, quota_sum_1k_blocks: i64) -> (DeviceUsage, Option<i64>) {
        let total = if let Some(reserved) = reserved_bytes.filter(|r| *r > 0) {
            reserved
        } else {
            (quota_sum_1k_blocks * 1024 + unattributed).max(1)
        };
        let free = (total - attributed - unattributed).max(0);
        let percent = if total > 0 { (total - free) as f64 / total as f64 * 100.0 } else { 0.0 };
        let rounded_percent = (percent * 10.0).round() / 10.0;
        (
            DeviceUsage { used: attributed, total, free, percent: rounded_percent },
            if unattributed > 0 { Some(unattributed) } else { None },
        )
    }

    /// Builds the single synthetic `docker` device with every user's quota
    /// row attached, as returned by `GET /remote-api/quotas`.
    pub async fn collect_remote_quotas(
        &self,
        data_root: &str,
        reserved_bytes: Option<i64>,
    ) -> Result<DockerDevice, EngineError> {
        let summary = self.aggregate_usage_by_uid(None).await?;
        let attributed: i64 = summary.usage_by_uid.values().sum();
        let limits = self.store.list_user_quota_limits().await?;
        let quota_sum: i64 = limits.iter().map(|l| l.block_hard_limit).sum();

        let (usage, unattributed_usage) =
            Self::device_usage(summary.unattributed, attributed, reserved_bytes, quota_sum);

        let mut uids: std::collections::BTreeSet<i64> = limits.iter().map(|l| l.uid).collect();
        uids.extend(summary.usage_by_uid.keys().copied());

        let user_quotas: Vec<UserQuotaView> = uids
            .into_iter()
            .filter(|uid| common::constants::should_include_uid(*uid as u32))
            .map(|uid| {
                let used = summary.usage_by_uid.get(&uid).copied().unwrap_or(0);
                let limit = limits.iter().find(|l| l.uid == uid).map(|l| l.block_hard_limit).unwrap_or(0);
                UserQuotaView::docker(uid, used, limit)
            })
            .collect();

        Ok(DockerDevice {
            name: "docker",
            mount_points: vec![data_root.to_string()],
            fstype: "docker",
            opts: vec!["docker"],
            usage,
            user_quota_format: Some("docker"),
            user_quotas: Some(user_quotas),
            unattributed_usage,
        })
    }

    /// Builds the device for a single uid, or `None` if that uid has
    /// neither usage nor a configured quota (matches the "omit empty"
    /// contract of `GET /remote-api/quotas/users/<uid>`).
    pub async fn collect_remote_quotas_for_uid(
        &self,
        uid: i64,
        data_root: &str,
        reserved_bytes: Option<i64>,
    ) -> Result<Option<DockerDevice>, EngineError> {
        if !common::constants::should_include_uid(uid as u32) {
            return Ok(None);
        }
        let summary = self.aggregate_usage_by_uid(None).await?;
        let attributed: i64 = summary.usage_by_uid.values().sum();
        let used = summary.usage_by_uid.get(&uid).copied().unwrap_or(0);
        let limit_row = self.store.get_user_quota_limit(uid).await?;
        let limit_1k = limit_row.map(|l| l.block_hard_limit).unwrap_or(0);
        if used == 0 && limit_1k == 0 {
            return Ok(None);
        }

        let limits = self.store.list_user_quota_limits().await?;
        let quota_sum: i64 = limits.iter().map(|l| l.block_hard_limit).sum();
        let (usage, unattributed_usage) =
            Self::device_usage(summary.unattributed, attributed, reserved_bytes, quota_sum);

        Ok(Some(DockerDevice {
            name: "docker",
            mount_points: vec![data_root.to_string()],
            fstype: "docker",
            opts: vec!["docker"],
            usage,
            user_quota_format: Some("docker"),
            user_quotas: Some(vec![UserQuotaView::docker(uid, used, limit_1k)]),
            unattributed_usage,
        }))
    }
}
