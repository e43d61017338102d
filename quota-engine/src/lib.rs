//! Usage aggregation and quota enforcement (Component F).

pub mod aggregator;
pub mod enforcer;
pub mod types;

pub use aggregator::{QuotaAggregator, UsageSummary};
pub use enforcer::QuotaEnforcer;
pub use types::{
    DeviceUsage, DockerDevice, EnforcementEvent, EnforcementEventDetail, EnforcementEventType,
    EnforcementSummary, UserQuotaView,
};

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_store::AttributionStore;
    use docker_inspector::{ContainerSummary, Inspector, MockInspector, SystemDf};
    use std::sync::Arc;

    async fn test_store() -> AttributionStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agg_test.sqlite3");
        std::mem::forget(dir);
        AttributionStore::connect(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_aggregate_usage_by_uid_sums_containers_and_layers() {
        let store = test_store().await;
        store
            .set_container_attribution("c1", "alice", Some(1001), None, 500, 1.0)
            .await
            .unwrap();
        store
            .set_layer_attribution("l1", Some(1001), "alice", 300, 1.0, None)
            .await
            .unwrap();

        let mut mock = MockInspector::new();
        mock.expect_get_system_df().returning(|_| {
            Ok(SystemDf {
                containers: [("c1".to_string(), 500u64)].into_iter().collect(),
                images: Default::default(),
            })
        });

        let aggregator = QuotaAggregator::new(Arc::new(mock), store);
        let summary = aggregator.aggregate_usage_by_uid(None).await.unwrap();
        assert_eq!(summary.usage_by_uid.get(&1001), Some(&800));
        assert_eq!(summary.total_used, 800);
        assert_eq!(summary.unattributed, 0);
    }

    #[tokio::test]
    async fn test_aggregate_usage_by_uid_tracks_unattributed() {
        let store = test_store().await;
        let mut mock = MockInspector::new();
        mock.expect_get_system_df().returning(|_| {
            Ok(SystemDf {
                containers: [("orphan".to_string(), 1_000u64)].into_iter().collect(),
                images: Default::default(),
            })
        });

        let aggregator = QuotaAggregator::new(Arc::new(mock), store);
        let summary = aggregator.aggregate_usage_by_uid(None).await.unwrap();
        assert!(summary.usage_by_uid.is_empty());
        assert_eq!(summary.total_used, 1_000);
        assert_eq!(summary.unattributed, 1_000);
    }

    #[tokio::test]
    async fn test_reconcile_and_backfill_attributes_labeled_container() {
        let store = test_store().await;
        let mock = MockInspector::new();
        let aggregator = QuotaAggregator::new(Arc::new(mock), store.clone());

        let live = vec![ContainerSummary {
            id: "c1".into(),
            short_id: "c1".into(),
            name: "web".into(),
            image_id: None,
            created_unix: 10.0,
            labels: [(common::constants::OWNER_LABEL_KEY.to_string(), "alice".to_string())].into_iter().collect(),
        }];

        let backfilled = aggregator.reconcile_and_backfill(&live).await.unwrap();
        assert_eq!(backfilled, 1);
        let row = store.get_container_attribution("c1").await.unwrap().unwrap();
        assert_eq!(row.host_user_name, "alice");
    }
}
