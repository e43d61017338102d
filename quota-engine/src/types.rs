//! Output shapes for the §6 HTTP surface and coordinator callback.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceUsage {
    pub used: i64,
    pub total: i64,
    pub free: i64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserQuotaView {
    pub uid: i64,
    pub name: String,
    pub block_hard_limit: i64,
    pub block_soft_limit: i64,
    pub block_current: i64,
    pub inode_hard_limit: i64,
    pub inode_soft_limit: i64,
    pub inode_current: i64,
    pub block_time_limit: i64,
    pub inode_time_limit: i64,
}

impl UserQuotaView {
    pub fn docker(uid: i64, used_bytes: i64, block_hard_limit_1k: i64) -> Self {
        UserQuotaView {
            uid,
            name: common::resolve_username(uid as u32),
            block_hard_limit: block_hard_limit_1k,
            block_soft_limit: block_hard_limit_1k,
            block_current: used_bytes,
            inode_hard_limit: 0,
            inode_soft_limit: 0,
            inode_current: 0,
            block_time_limit: 0,
            inode_time_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DockerDevice {
    pub name: &'static str,
    pub mount_points: Vec<String>,
    pub fstype: &'static str,
    pub opts: Vec<&'static str>,
    pub usage: DeviceUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_quota_format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_quotas: Option<Vec<UserQuotaView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unattributed_usage: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EnforcementEventDetail {
    QuotaExceeded { uid: i64, block_current: i64, block_hard_limit: i64 },
    ContainerRemoved { container_id: String, size_bytes: i64, new_usage: i64, removed_ids: Vec<String> },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementEventType {
    QuotaExceeded,
    ContainerRemoved,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnforcementEvent {
    pub host_user_name: String,
    pub event_type: EnforcementEventType,
    pub detail: EnforcementEventDetail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnforcementSummary {
    pub enforced: usize,
    pub events: usize,
}
