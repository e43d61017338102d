//! Environment-driven configuration shared by both binaries.

use crate::constants::env;
use serde::Deserialize;

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Per-uid container removal order, configured via `DOCKER_QUOTA_ENFORCEMENT_ORDER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementOrder {
    NewestFirst,
    OldestFirst,
    LargestFirst,
}

impl Default for EnforcementOrder {
    fn default() -> Self {
        EnforcementOrder::NewestFirst
    }
}

impl EnforcementOrder {
    pub fn from_env_str(s: &str) -> Option<Self> {
        match s {
            "newest_first" => Some(EnforcementOrder::NewestFirst),
            "oldest_first" => Some(EnforcementOrder::OldestFirst),
            "largest_first" => Some(EnforcementOrder::LargestFirst),
            _ => None,
        }
    }
}

/// Full engine configuration, resolved once at process start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub use_docker_quota: bool,
    pub docker_data_root: Option<String>,
    pub docker_quota_reserved_bytes: Option<u64>,
    pub enforce_interval_secs: u64,
    pub sync_interval_secs: u64,
    pub enforcement_order: EnforcementOrder,
    pub cache_ttl_secs: u64,
    pub slave_host_id: String,
    pub master_event_callback_url: Option<String>,
    pub master_event_callback_secret: Option<String>,
    pub db_path: String,
    pub redis_url: Option<String>,
    pub api_shared_secret: String,
    pub bind_addr: String,
}

impl EngineConfig {
    /// Load configuration from the process environment, applying the
    /// defaults documented in the external-interfaces section.
    pub fn from_env() -> Self {
        let enforcement_order = std::env::var(env::DOCKER_QUOTA_ENFORCEMENT_ORDER)
            .ok()
            .and_then(|v| EnforcementOrder::from_env_str(&v))
            .unwrap_or_default();

        EngineConfig {
            use_docker_quota: env_bool(env::USE_DOCKER_QUOTA, true),
            docker_data_root: std::env::var(env::DOCKER_DATA_ROOT).ok(),
            docker_quota_reserved_bytes: env_opt_u64(env::DOCKER_QUOTA_RESERVED_BYTES),
            enforce_interval_secs: env_u64(
                env::DOCKER_QUOTA_ENFORCE_INTERVAL_SECONDS,
                crate::constants::DEFAULT_ENFORCE_INTERVAL_SECONDS,
            ),
            sync_interval_secs: env_u64(
                env::DOCKER_QUOTA_SYNC_INTERVAL_SECONDS,
                crate::constants::DEFAULT_SYNC_INTERVAL_SECONDS,
            ),
            enforcement_order,
            cache_ttl_secs: env_u64(
                env::DOCKER_QUOTA_CACHE_TTL_SECONDS,
                crate::constants::DEFAULT_CACHE_TTL_SECONDS,
            ),
            slave_host_id: std::env::var(env::SLAVE_HOST_ID)
                .unwrap_or_else(|_| "unknown-slave".to_string()),
            master_event_callback_url: std::env::var(env::MASTER_EVENT_CALLBACK_URL).ok(),
            master_event_callback_secret: std::env::var(env::MASTER_EVENT_CALLBACK_SECRET).ok(),
            db_path: std::env::var(env::DOCKER_QUOTA_DB_PATH)
                .unwrap_or_else(|_| "/var/lib/qman/docker_quota.sqlite3".to_string()),
            redis_url: std::env::var(env::REDIS_URL).ok(),
            api_shared_secret: std::env::var(env::API_SHARED_SECRET).unwrap_or_default(),
            bind_addr: std::env::var(env::QMAND_BIND_ADDR)
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforcement_order_from_env_str() {
        assert_eq!(
            EnforcementOrder::from_env_str("largest_first"),
            Some(EnforcementOrder::LargestFirst)
        );
        assert_eq!(EnforcementOrder::from_env_str("bogus"), None);
    }

    #[test]
    fn test_default_enforcement_order() {
        assert_eq!(EnforcementOrder::default(), EnforcementOrder::NewestFirst);
    }
}
