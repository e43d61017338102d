//! Shared application state for the remote quota API.

use attribution_store::AttributionStore;
use metrics_exporter_prometheus::PrometheusHandle;
use quota_cache::QuotaCache;
use quota_engine::QuotaAggregator;

pub struct AppState {
    pub api_shared_secret: String,
    pub data_root: String,
    pub reserved_bytes: Option<i64>,
    pub store: AttributionStore,
    pub cache: QuotaCache,
    pub aggregator: QuotaAggregator,
    pub metrics_handle: PrometheusHandle,
}
