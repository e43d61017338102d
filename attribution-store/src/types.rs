//! Closed row types for each attribution table, replacing the source's
//! untyped ORM rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ContainerAttribution {
    pub container_id: String,
    pub host_user_name: String,
    pub uid: Option<i64>,
    pub image_id: Option<String>,
    pub size_bytes: i64,
    pub created_at: f64,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ImageAttribution {
    pub image_id: String,
    pub puller_host_user_name: String,
    pub puller_uid: Option<i64>,
    pub size_bytes: i64,
    pub created_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationMethod {
    Pull,
    Build,
    Commit,
    Import,
    Load,
}

impl CreationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationMethod::Pull => "pull",
            CreationMethod::Build => "build",
            CreationMethod::Commit => "commit",
            CreationMethod::Import => "import",
            CreationMethod::Load => "load",
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LayerAttribution {
    pub layer_id: String,
    pub first_puller_uid: Option<i64>,
    pub first_puller_host_user_name: String,
    pub size_bytes: i64,
    pub first_seen_at: f64,
    pub creation_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionSource {
    Label,
    Container,
}

impl AttributionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionSource::Label => "label",
            AttributionSource::Container => "container",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "label" => AttributionSource::Label,
            _ => AttributionSource::Container,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct VolumeAttribution {
    pub volume_name: String,
    pub host_user_name: String,
    pub uid: Option<i64>,
    pub size_bytes: i64,
    pub attribution_source: String,
    pub first_seen_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UserQuotaLimit {
    pub uid: i64,
    pub block_hard_limit: i64,
}
