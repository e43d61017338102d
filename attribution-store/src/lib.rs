//! Durable per-slave attribution tables (Component C).
//!
//! Every write runs inside its own transaction; a failure rolls back and
//! surfaces a `StoreError` rather than leaving partial state.

pub mod types;

use common::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub use types::{
    AttributionSource, ContainerAttribution, CreationMethod, ImageAttribution, LayerAttribution,
    UserQuotaLimit, VolumeAttribution,
};

#[derive(Clone)]
pub struct AttributionStore {
    pool: SqlitePool,
}

impl AttributionStore {
    pub async fn connect(db_path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))
            .map_err(StoreError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(AttributionStore { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        AttributionStore { pool }
    }

    // ---- ContainerAttribution ----

    pub async fn set_container_attribution(
        &self,
        container_id: &str,
        host_user_name: &str,
        uid: Option<i64>,
        image_id: Option<&str>,
        size_bytes: i64,
        created_at: f64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO container_attributions
                (container_id, host_user_name, uid, image_id, size_bytes, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(container_id) DO UPDATE SET
                host_user_name = excluded.host_user_name,
                uid = excluded.uid,
                image_id = CASE WHEN excluded.image_id IS NOT NULL
                    THEN excluded.image_id ELSE container_attributions.image_id END,
                size_bytes = excluded.size_bytes",
        )
        .bind(container_id)
        .bind(host_user_name)
        .bind(uid)
        .bind(image_id)
        .bind(size_bytes)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_container_size(&self, container_id: &str, size_bytes: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE container_attributions SET size_bytes = ? WHERE container_id = ?")
            .bind(size_bytes)
            .bind(container_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_container_attribution(
        &self,
        container_id: &str,
    ) -> Result<Option<ContainerAttribution>, StoreError> {
        let row = sqlx::query_as::<_, ContainerAttribution>(
            "SELECT container_id, host_user_name, uid, image_id, size_bytes, created_at
             FROM container_attributions WHERE container_id = ?",
        )
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_container_attribution(&self, container_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM container_attributions WHERE container_id = ?")
            .bind(container_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_container_attributions(&self) -> Result<Vec<ContainerAttribution>, StoreError> {
        let rows = sqlx::query_as::<_, ContainerAttribution>(
            "SELECT container_id, host_user_name, uid, image_id, size_bytes, created_at
             FROM container_attributions",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_container_attributions_by_uid(
        &self,
        uid: i64,
    ) -> Result<Vec<ContainerAttribution>, StoreError> {
        let rows = sqlx::query_as::<_, ContainerAttribution>(
            "SELECT container_id, host_user_name, uid, image_id, size_bytes, created_at
             FROM container_attributions WHERE uid = ?",
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Deletes rows whose key is absent from `live_ids`; returns removed count.
    pub async fn reconcile_containers(&self, live_ids: &[String]) -> Result<usize, StoreError> {
        let existing = self.list_container_attributions().await?;
        let live: std::collections::HashSet<&str> = live_ids.iter().map(String::as_str).collect();
        let mut removed = 0usize;
        let mut tx = self.pool.begin().await?;
        for row in existing {
            if !live.contains(row.container_id.as_str()) {
                sqlx::query("DELETE FROM container_attributions WHERE container_id = ?")
                    .bind(&row.container_id)
                    .execute(&mut *tx)
                    .await?;
                removed += 1;
            }
        }
        tx.commit().await?;
        Ok(removed)
    }

    // ---- ImageAttribution ----

    pub async fn set_image_attribution(
        &self,
        image_id: &str,
        puller_host_user_name: &str,
        puller_uid: Option<i64>,
        size_bytes: i64,
        created_at: f64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO image_attributions
                (image_id, puller_host_user_name, puller_uid, size_bytes, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(image_id) DO UPDATE SET
                puller_host_user_name = excluded.puller_host_user_name,
                puller_uid = excluded.puller_uid,
                size_bytes = excluded.size_bytes",
        )
        .bind(image_id)
        .bind(puller_host_user_name)
        .bind(puller_uid)
        .bind(size_bytes)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_image_attribution(&self, image_id: &str) -> Result<Option<ImageAttribution>, StoreError> {
        let row = sqlx::query_as::<_, ImageAttribution>(
            "SELECT image_id, puller_host_user_name, puller_uid, size_bytes, created_at
             FROM image_attributions WHERE image_id = ?",
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_image_attributions(&self) -> Result<Vec<ImageAttribution>, StoreError> {
        let rows = sqlx::query_as::<_, ImageAttribution>(
            "SELECT image_id, puller_host_user_name, puller_uid, size_bytes, created_at
             FROM image_attributions",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---- LayerAttribution ----

    /// First-writer-wins: a pre-existing row silently prevents the write.
    /// Returns `true` if this call created the row.
    pub async fn set_layer_attribution(
        &self,
        layer_id: &str,
        first_puller_uid: Option<i64>,
        first_puller_host_user_name: &str,
        size_bytes: i64,
        first_seen_at: f64,
        creation_method: Option<CreationMethod>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO layer_attributions
                (layer_id, first_puller_uid, first_puller_host_user_name, size_bytes, first_seen_at, creation_method)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(layer_id)
        .bind(first_puller_uid)
        .bind(first_puller_host_user_name)
        .bind(size_bytes)
        .bind(first_seen_at)
        .bind(creation_method.map(|m| m.as_str()))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_layer_attribution(&self, layer_id: &str) -> Result<Option<LayerAttribution>, StoreError> {
        let row = sqlx::query_as::<_, LayerAttribution>(
            "SELECT layer_id, first_puller_uid, first_puller_host_user_name, size_bytes, first_seen_at, creation_method
             FROM layer_attributions WHERE layer_id = ?",
        )
        .bind(layer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_layer_attributions(&self) -> Result<Vec<LayerAttribution>, StoreError> {
        let rows = sqlx::query_as::<_, LayerAttribution>(
            "SELECT layer_id, first_puller_uid, first_puller_host_user_name, size_bytes, first_seen_at, creation_method
             FROM layer_attributions",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Sum `size_bytes` of every layer by its first puller's uid.
    pub async fn sum_layer_bytes_by_uid(&self) -> Result<std::collections::HashMap<i64, i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT first_puller_uid, SUM(size_bytes) as total
             FROM layer_attributions WHERE first_puller_uid IS NOT NULL GROUP BY first_puller_uid",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = std::collections::HashMap::new();
        for row in rows {
            let uid: i64 = row.try_get("first_puller_uid")?;
            let total: i64 = row.try_get("total")?;
            out.insert(uid, total);
        }
        Ok(out)
    }

    pub async fn reconcile_layers(&self, live_ids: &[String]) -> Result<usize, StoreError> {
        let existing = self.list_layer_attributions().await?;
        let live: std::collections::HashSet<&str> = live_ids.iter().map(String::as_str).collect();
        let mut removed = 0usize;
        let mut tx = self.pool.begin().await?;
        for row in existing {
            if !live.contains(row.layer_id.as_str()) {
                sqlx::query("DELETE FROM layer_attributions WHERE layer_id = ?")
                    .bind(&row.layer_id)
                    .execute(&mut *tx)
                    .await?;
                removed += 1;
            }
        }
        tx.commit().await?;
        Ok(removed)
    }

    // ---- VolumeAttribution ----

    /// Applies the label-precedence rule: a label-sourced write always wins;
    /// a container-sourced write on a label-owned row updates size only.
    pub async fn set_volume_attribution(
        &self,
        volume_name: &str,
        host_user_name: &str,
        uid: Option<i64>,
        size_bytes: i64,
        source: AttributionSource,
        first_seen_at: f64,
    ) -> Result<(), StoreError> {
        let existing = self.get_volume_attribution(volume_name).await?;
        let mut tx = self.pool.begin().await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO volume_attributions
                        (volume_name, host_user_name, uid, size_bytes, attribution_source, first_seen_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(volume_name)
                .bind(host_user_name)
                .bind(uid)
                .bind(size_bytes)
                .bind(source.as_str())
                .bind(first_seen_at)
                .execute(&mut *tx)
                .await?;
            }
            Some(row) => {
                let existing_source = AttributionSource::from_str(&row.attribution_source);
                let size_only = source == AttributionSource::Container
                    && existing_source == AttributionSource::Label;

                if size_only {
                    sqlx::query("UPDATE volume_attributions SET size_bytes = ? WHERE volume_name = ?")
                        .bind(size_bytes)
                        .bind(volume_name)
                        .execute(&mut *tx)
                        .await?;
                } else {
                    sqlx::query(
                        "UPDATE volume_attributions SET host_user_name = ?, uid = ?, size_bytes = ?, attribution_source = ?
                         WHERE volume_name = ?",
                    )
                    .bind(host_user_name)
                    .bind(uid)
                    .bind(size_bytes)
                    .bind(source.as_str())
                    .bind(volume_name)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_volume_attribution(&self, volume_name: &str) -> Result<Option<VolumeAttribution>, StoreError> {
        let row = sqlx::query_as::<_, VolumeAttribution>(
            "SELECT volume_name, host_user_name, uid, size_bytes, attribution_source, first_seen_at
             FROM volume_attributions WHERE volume_name = ?",
        )
        .bind(volume_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_volume_attributions(&self) -> Result<Vec<VolumeAttribution>, StoreError> {
        let rows = sqlx::query_as::<_, VolumeAttribution>(
            "SELECT volume_name, host_user_name, uid, size_bytes, attribution_source, first_seen_at
             FROM volume_attributions",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---- UserQuotaLimit ----

    pub async fn set_user_quota_limit(&self, uid: i64, block_hard_limit: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO user_quota_limits (uid, block_hard_limit) VALUES (?, ?)
             ON CONFLICT(uid) DO UPDATE SET block_hard_limit = excluded.block_hard_limit",
        )
        .bind(uid)
        .bind(block_hard_limit)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_user_quota_limit(&self, uid: i64) -> Result<Option<UserQuotaLimit>, StoreError> {
        let row = sqlx::query_as::<_, UserQuotaLimit>(
            "SELECT uid, block_hard_limit FROM user_quota_limits WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_user_quota_limits(&self) -> Result<Vec<UserQuotaLimit>, StoreError> {
        let rows = sqlx::query_as::<_, UserQuotaLimit>("SELECT uid, block_hard_limit FROM user_quota_limits")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // ---- Settings ----

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set_setting(&self, key: &str, value: &str, updated_at: f64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_events_watermark(&self) -> Result<Option<f64>, StoreError> {
        Ok(self
            .get_setting(common::constants::SETTING_LAST_EVENTS_TS)
            .await?
            .and_then(|v| v.parse::<f64>().ok()))
    }

    /// Never decreases the persisted watermark (event-watermark monotonicity).
    pub async fn advance_events_watermark(&self, ts: f64) -> Result<(), StoreError> {
        let current = self.get_events_watermark().await?.unwrap_or(0.0);
        let next = current.max(ts);
        self.set_setting(common::constants::SETTING_LAST_EVENTS_TS, &next.to_string(), ts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> AttributionStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        // keep the tempdir alive for the duration of the test process by leaking it
        std::mem::forget(dir);
        AttributionStore::connect(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_layer_attribution_first_writer_wins() {
        let store = test_store().await;
        let inserted = store
            .set_layer_attribution("L1", Some(1001), "alice", 100, 1000.0, Some(CreationMethod::Pull))
            .await
            .unwrap();
        assert!(inserted);

        let inserted_again = store
            .set_layer_attribution("L1", Some(2002), "bob", 999, 2000.0, Some(CreationMethod::Pull))
            .await
            .unwrap();
        assert!(!inserted_again);

        let row = store.get_layer_attribution("L1").await.unwrap().unwrap();
        assert_eq!(row.first_puller_uid, Some(1001));
        assert_eq!(row.first_puller_host_user_name, "alice");
    }

    #[tokio::test]
    async fn test_volume_label_precedence() {
        let store = test_store().await;
        store
            .set_volume_attribution("v1", "alice", Some(1001), 100, AttributionSource::Container, 1.0)
            .await
            .unwrap();
        store
            .set_volume_attribution("v1", "bob", Some(1002), 200, AttributionSource::Label, 2.0)
            .await
            .unwrap();

        let row = store.get_volume_attribution("v1").await.unwrap().unwrap();
        assert_eq!(row.host_user_name, "bob");
        assert_eq!(row.attribution_source, "label");

        // A later container-sourced write must not override the label owner.
        store
            .set_volume_attribution("v1", "carol", Some(1003), 300, AttributionSource::Container, 3.0)
            .await
            .unwrap();
        let row = store.get_volume_attribution("v1").await.unwrap().unwrap();
        assert_eq!(row.host_user_name, "bob");
        assert_eq!(row.size_bytes, 300);
    }

    #[tokio::test]
    async fn test_reconcile_layers_idempotent() {
        let store = test_store().await;
        store
            .set_layer_attribution("L1", Some(1), "a", 1, 1.0, None)
            .await
            .unwrap();
        store
            .set_layer_attribution("L2", Some(1), "a", 1, 1.0, None)
            .await
            .unwrap();

        let removed_first = store.reconcile_layers(&["L1".to_string()]).await.unwrap();
        assert_eq!(removed_first, 1);
        let removed_second = store.reconcile_layers(&["L1".to_string()]).await.unwrap();
        assert_eq!(removed_second, 0);
    }

    #[tokio::test]
    async fn test_container_attribution_image_id_preserved_when_none() {
        let store = test_store().await;
        store
            .set_container_attribution("c1", "alice", Some(1001), Some("img1"), 100, 1.0)
            .await
            .unwrap();
        store
            .set_container_attribution("c1", "alice", Some(1001), None, 200, 1.0)
            .await
            .unwrap();

        let row = store.get_container_attribution("c1").await.unwrap().unwrap();
        assert_eq!(row.image_id.as_deref(), Some("img1"));
        assert_eq!(row.size_bytes, 200);
    }

    #[tokio::test]
    async fn test_watermark_monotonic() {
        let store = test_store().await;
        store.advance_events_watermark(100.0).await.unwrap();
        store.advance_events_watermark(50.0).await.unwrap();
        assert_eq!(store.get_events_watermark().await.unwrap(), Some(100.0));
        store.advance_events_watermark(200.0).await.unwrap();
        assert_eq!(store.get_events_watermark().await.unwrap(), Some(200.0));
    }

    #[tokio::test]
    async fn test_no_duplicate_primary_keys() {
        let store = test_store().await;
        store.set_user_quota_limit(1001, 1024).await.unwrap();
        store.set_user_quota_limit(1001, 2048).await.unwrap();
        let limits = store.list_user_quota_limits().await.unwrap();
        assert_eq!(limits.iter().filter(|l| l.uid == 1001).count(), 1);
        assert_eq!(limits[0].block_hard_limit, 2048);
    }
}
