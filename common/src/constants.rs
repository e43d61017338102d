//! Constants shared across the attribution and enforcement engine.

use std::time::Duration;

// Timeouts
pub const DOCKER_OPERATION_TIMEOUT_SECS: u64 = 60;
pub const AUDIT_SUBPROCESS_TIMEOUT_SECS: u64 = 60;
pub const STOP_CONTAINER_GRACE_SECS: u64 = 60;
pub const COORDINATOR_CALLBACK_TIMEOUT_SECS: u64 = 10;
pub const EVENT_COLLECTION_MAX_WALL_SECS: f64 = 90.0;
pub const EVENT_COLLECTION_MAX_EVENTS: usize = 500;
pub const DOCKER_STATS_SAMPLE_TIMEOUT: Duration = Duration::from_secs(3);

// Retry configuration
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const RETRY_MIN_DELAY_MS: u64 = 100;
pub const RETRY_MAX_DELAY_MS: u64 = 30000;

// Attribution synchroniser defaults
pub const AUDIT_TIME_WINDOW_SECONDS: i64 = 120;
pub const AUDIT_LOOKBACK_DEFAULT: &str = "60m";
pub const EVENTS_DEFAULT_LOOKBACK_HOURS: i64 = 24;
pub const OWNER_LABEL_KEY: &str = "qman.user";
pub const DEFAULT_AUDIT_KEYS: [&str; 2] = ["docker-socket", "docker-client"];

// Scheduling defaults
pub const DEFAULT_SYNC_INTERVAL_SECONDS: u64 = 120;
pub const DEFAULT_ENFORCE_INTERVAL_SECONDS: u64 = 300;

// Cache defaults
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 600;
pub const CACHE_KEY_CONTAINERS: &str = "docker:containers:list";
pub const CACHE_KEY_IMAGES: &str = "docker:images:list";
pub const CACHE_KEY_LAST_INVALIDATION: &str = "docker:cache:last_invalidation";

// Settings keys
pub const SETTING_LAST_EVENTS_TS: &str = "docker_events_last_ts";

// HTTP basic auth
pub const HTTP_BASIC_AUTH_USER: &str = "api";

// Quota listing visibility: exclude system uids and `nobody`.
pub const MIN_QUOTA_UID: u32 = 1000;
pub const NOBODY_UID: u32 = 65534;

/// True if `uid` should appear in user quota listings.
pub fn should_include_uid(uid: u32) -> bool {
    uid >= MIN_QUOTA_UID && uid != NOBODY_UID
}

// Environment variable names
pub mod env {
    pub const USE_DOCKER_QUOTA: &str = "USE_DOCKER_QUOTA";
    pub const DOCKER_DATA_ROOT: &str = "DOCKER_DATA_ROOT";
    pub const DOCKER_QUOTA_RESERVED_BYTES: &str = "DOCKER_QUOTA_RESERVED_BYTES";
    pub const DOCKER_QUOTA_ENFORCE_INTERVAL_SECONDS: &str =
        "DOCKER_QUOTA_ENFORCE_INTERVAL_SECONDS";
    pub const DOCKER_QUOTA_SYNC_INTERVAL_SECONDS: &str = "DOCKER_QUOTA_SYNC_INTERVAL_SECONDS";
    pub const DOCKER_QUOTA_ENFORCEMENT_ORDER: &str = "DOCKER_QUOTA_ENFORCEMENT_ORDER";
    pub const DOCKER_QUOTA_CACHE_TTL_SECONDS: &str = "DOCKER_QUOTA_CACHE_TTL_SECONDS";
    pub const SLAVE_HOST_ID: &str = "SLAVE_HOST_ID";
    pub const MASTER_EVENT_CALLBACK_URL: &str = "MASTER_EVENT_CALLBACK_URL";
    pub const MASTER_EVENT_CALLBACK_SECRET: &str = "MASTER_EVENT_CALLBACK_SECRET";
    pub const DOCKER_QUOTA_DB_PATH: &str = "DOCKER_QUOTA_DB_PATH";
    pub const REDIS_URL: &str = "CELERY_BROKER_URL";
    pub const API_SHARED_SECRET: &str = "QMAN_API_SECRET";
    pub const QMAND_BIND_ADDR: &str = "QMAND_BIND_ADDR";
}
