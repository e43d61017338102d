//! Typed, cached-at-the-caller read façade over the Docker daemon (Component A).
//!
//! One `bollard::Docker` connection lives for the life of the process and is
//! shared via `Arc` rather than reopened per call, per the "process-wide
//! singletons -> explicit lifetimes" design note.

pub mod types;

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::ListImagesOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use common::error::InspectorError;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

pub use types::{ContainerSummary, DockerEvent, ImageSummary, SystemDf};

/// The inspector contract. A trait so the synchroniser/enforcer can be
/// exercised against a mock in tests without a live daemon.
#[async_trait]
pub trait Inspector: Send + Sync {
    async fn get_docker_data_root(&self) -> Result<String, InspectorError>;
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, InspectorError>;
    async fn list_images(&self) -> Result<Vec<ImageSummary>, InspectorError>;
    async fn get_system_df(
        &self,
        container_ids: Option<&[String]>,
    ) -> Result<SystemDf, InspectorError>;
    async fn get_image_layers_with_sizes(
        &self,
        image_id: &str,
    ) -> Result<Vec<(String, u64)>, InspectorError>;
    async fn resolve_image_ref(&self, reference: &str) -> Result<Option<String>, InspectorError>;
    async fn stream_events_since(
        &self,
        since_unix: f64,
        max_wall_secs: f64,
        max_events: usize,
    ) -> Result<Vec<DockerEvent>, InspectorError>;
    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), InspectorError>;
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), InspectorError>;
}

#[cfg(any(test, feature = "mock"))]
mockall::mock! {
    pub Inspector {}

    #[async_trait]
    impl Inspector for Inspector {
        async fn get_docker_data_root(&self) -> Result<String, InspectorError>;
        async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, InspectorError>;
        async fn list_images(&self) -> Result<Vec<ImageSummary>, InspectorError>;
        async fn get_system_df<'s, 'a>(&'s self, container_ids: Option<&'a [String]>) -> Result<SystemDf, InspectorError>;
        async fn get_image_layers_with_sizes(&self, image_id: &str) -> Result<Vec<(String, u64)>, InspectorError>;
        async fn resolve_image_ref(&self, reference: &str) -> Result<Option<String>, InspectorError>;
        async fn stream_events_since(&self, since_unix: f64, max_wall_secs: f64, max_events: usize) -> Result<Vec<DockerEvent>, InspectorError>;
        async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), InspectorError>;
        async fn remove_container(&self, id: &str, force: bool) -> Result<(), InspectorError>;
    }
}

/// Real, `bollard`-backed implementation.
pub struct DockerInspector {
    docker: Docker,
}

impl DockerInspector {
    pub fn connect() -> Result<Self, InspectorError> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(DockerInspector { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        DockerInspector { docker }
    }
}

#[async_trait]
impl Inspector for DockerInspector {
    async fn get_docker_data_root(&self) -> Result<String, InspectorError> {
        match self.docker.info().await {
            Ok(info) => Ok(info.docker_root_dir.unwrap_or_else(|| "/var/lib/docker".into())),
            Err(e) => {
                warn!(error = %e, "could not get docker data root, falling back to default");
                Ok("/var/lib/docker".to_string())
            }
        }
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, InspectorError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let id = c.id.unwrap_or_default();
                let short_id: String = id.chars().take(12).collect();
                let name = c
                    .names
                    .as_ref()
                    .and_then(|v| v.first())
                    .map(|s| s.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| short_id.clone());
                ContainerSummary {
                    short_id,
                    name,
                    image_id: c.image_id,
                    created_unix: c.created.map(|t| t as f64).unwrap_or(0.0),
                    labels: c.labels.unwrap_or_default(),
                    id,
                }
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, InspectorError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        Ok(images
            .into_iter()
            .map(|img| ImageSummary {
                short_id: img.id.chars().take(19).collect(),
                size_bytes: img.size.max(0) as u64,
                created_unix: img.created as f64,
                id: img.id,
            })
            .collect())
    }

    async fn get_system_df(
        &self,
        container_ids: Option<&[String]>,
    ) -> Result<SystemDf, InspectorError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await?;

        let wanted: Option<std::collections::HashSet<&str>> =
            container_ids.map(|ids| ids.iter().map(String::as_str).collect());

        let mut container_sizes = HashMap::new();
        for c in &containers {
            let Some(id) = c.id.clone() else { continue };
            if let Some(w) = &wanted {
                if !w.contains(id.as_str()) {
                    continue;
                }
            }
            let size_rw = self
                .docker
                .inspect_container(&id, Some(InspectContainerOptions { size: true }))
                .await
                .ok()
                .and_then(|i| i.size_rw)
                .unwrap_or(0);
            container_sizes.insert(id, size_rw.max(0) as u64);
        }

        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;
        let image_sizes = images
            .into_iter()
            .map(|img| (img.id, img.size.max(0) as u64))
            .collect();

        Ok(SystemDf {
            containers: container_sizes,
            images: image_sizes,
        })
    }

    async fn get_image_layers_with_sizes(
        &self,
        image_id: &str,
    ) -> Result<Vec<(String, u64)>, InspectorError> {
        let inspect = self.docker.inspect_image(image_id).await?;
        let layer_ids: Vec<String> = inspect
            .root_fs
            .and_then(|r| r.layers)
            .unwrap_or_default();
        if layer_ids.is_empty() {
            return Ok(Vec::new());
        }

        let history = self.docker.image_history(image_id).await?;
        // history() is newest-first; reverse to align with RootFS.Layers (oldest-first).
        let history_sizes: Vec<u64> = history
            .into_iter()
            .rev()
            .map(|h| h.size.max(0) as u64)
            .collect();

        Ok(layer_ids
            .into_iter()
            .enumerate()
            .map(|(i, layer_id)| {
                let size = history_sizes.get(i).copied().unwrap_or(0);
                (layer_id, size)
            })
            .collect())
    }

    async fn resolve_image_ref(&self, reference: &str) -> Result<Option<String>, InspectorError> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => Ok(inspect.id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(InspectorError::from(e)),
        }
    }

    async fn stream_events_since(
        &self,
        since_unix: f64,
        max_wall_secs: f64,
        max_events: usize,
    ) -> Result<Vec<DockerEvent>, InspectorError> {
        let since = (since_unix as i64).to_string();
        let mut stream = self.docker.events(Some(EventsOptions::<String> {
            since: Some(since),
            ..Default::default()
        }));

        let deadline = Instant::now() + Duration::from_secs_f64(max_wall_secs.max(0.0));
        let mut out = Vec::new();

        loop {
            if out.len() >= max_events || Instant::now() >= deadline {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(ev))) => {
                    let actor = ev.actor.clone().unwrap_or_default();
                    out.push(DockerEvent {
                        kind: ev
                            .typ
                            .map(|t| format!("{t:?}").to_lowercase())
                            .unwrap_or_default(),
                        action: ev.action.unwrap_or_default(),
                        id: actor.id.unwrap_or_default(),
                        time_nano: ev.time_nano.unwrap_or_else(|| {
                            ev.time.map(|t| t * 1_000_000_000).unwrap_or(0)
                        }),
                        from: actor
                            .attributes
                            .and_then(|a| a.get("image").cloned()),
                    });
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "docker event stream error");
                    break;
                }
                Ok(None) => break,
                Err(_) => break, // deadline hit
            }
        }

        Ok(out)
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), InspectorError> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: grace_secs }))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), InspectorError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_event_time_unix() {
        let ev = DockerEvent {
            kind: "image".into(),
            action: "pull".into(),
            id: "sha256:aaa".into(),
            time_nano: 1_700_000_000_000_000_000,
            from: None,
        };
        assert_eq!(ev.time_unix(), 1_700_000_000.0);
    }

    #[tokio::test]
    async fn test_mock_inspector_list_containers() {
        let mut mock = MockInspector::new();
        mock.expect_list_containers().returning(|_| {
            Ok(vec![ContainerSummary {
                id: "abc123".into(),
                short_id: "abc123".into(),
                name: "web".into(),
                image_id: Some("sha256:img".into()),
                created_unix: 1000.0,
                labels: Default::default(),
            }])
        });

        let containers = mock.list_containers(true).await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "web");
    }
}
