//! Bollard-backed `RuntimeDriver`, grounded on `docker/client.rs`,
//! `docker/container.rs`, and `docker/image.rs` of the teacher repo.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, ListContainersOptionsBuilder, ListImagesOptionsBuilder,
    RemoveContainerOptionsBuilder, RemoveImageOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use futures_util::stream::StreamExt;
use tokio::sync::Mutex;

use crate::spec::{ContainerSpec, Mode, Volume};

use super::error::DriverError;
use super::{ContainerRecord, ImageRecord, RuntimeDriver, LOG_EXPORT_ROOT};

#[derive(Default)]
struct Caches {
    images: Option<Vec<ImageRecord>>,
    containers: Option<Vec<ContainerRecord>>,
}

pub struct BollardDriver {
    client: Docker,
    caches: Mutex<Caches>,
}

impl BollardDriver {
    /// Connects to the runtime endpoint. An empty `remote` connects via the
    /// platform default; otherwise `unix://` is stripped before handing
    /// the path to bollard, matching `docker/client.rs::DockerClient::new`.
    pub fn connect(remote: &str) -> Result<Self, DriverError> {
        let client = if remote.is_empty() {
            Docker::connect_with_local_defaults()
                .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?
        } else {
            let clean = remote.trim_start_matches("unix://");
            Docker::connect_with_unix(clean, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?
        };

        Ok(Self {
            client,
            caches: Mutex::new(Caches::default()),
        })
    }

    async fn load_images(&self) -> Result<Vec<ImageRecord>, DriverError> {
        let options = Some(ListImagesOptionsBuilder::new().all(true).build());
        let images = self.client.list_images(options).await?;
        Ok(images
            .into_iter()
            .map(|i| ImageRecord {
                id: i.id,
                repo_tags: i.repo_tags,
            })
            .collect())
    }

    async fn load_containers(&self) -> Result<Vec<ContainerRecord>, DriverError> {
        let options = Some(ListContainersOptionsBuilder::new().all(true).build());
        let containers = self.client.list_containers(options).await?;
        Ok(containers
            .into_iter()
            .map(|c| {
                let running = c
                    .status
                    .as_deref()
                    .map(|s| s.starts_with("Up ") || s.starts_with("Restarting "))
                    .unwrap_or(false);
                ContainerRecord {
                    id: c.id.unwrap_or_default(),
                    image_tag: c.image.unwrap_or_default(),
                    running,
                }
            })
            .collect())
    }
}

#[async_trait]
impl RuntimeDriver for BollardDriver {
    async fn list_images(&self, dangling_only: bool) -> Result<Vec<ImageRecord>, DriverError> {
        let mut caches = self.caches.lock().await;
        if caches.images.is_none() {
            caches.images = Some(self.load_images().await?);
        }
        let images = caches.images.clone().unwrap_or_default();
        if dangling_only {
            Ok(images.into_iter().filter(|i| i.repo_tags.is_empty()).collect())
        } else {
            Ok(images)
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, DriverError> {
        let mut caches = self.caches.lock().await;
        if caches.containers.is_none() {
            caches.containers = Some(self.load_containers().await?);
        }
        Ok(caches.containers.clone().unwrap_or_default())
    }

    async fn pull(&self, image: &str) -> Result<bool, DriverError> {
        let (repository, tag) = image.split_once(':').unwrap_or((image, "latest"));

        let existing_id = self
            .load_images()
            .await
            .ok()
            .and_then(|images| {
                images
                    .into_iter()
                    .find(|i| i.repo_tags.iter().any(|t| t == image))
                    .map(|i| i.id)
            });

        let options = Some(
            bollard::query_parameters::CreateImageOptionsBuilder::new()
                .from_image(repository)
                .tag(tag)
                .build(),
        );

        let mut stream = self.client.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => tracing::debug!(status = ?info.status, image, "pull progress"),
                Err(e) => {
                    tracing::warn!(image, error = %e, "pull failed, treating as not-updated");
                    return Ok(false);
                }
            }
        }

        self.caches.lock().await.images = None;
        let new_id = self
            .load_images()
            .await
            .ok()
            .and_then(|images| {
                images
                    .into_iter()
                    .find(|i| i.repo_tags.iter().any(|t| t == image))
                    .map(|i| i.id)
            });

        Ok(existing_id != new_id)
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        if spec.has_reserved_name() {
            return Err(DriverError::ReservedName(
                spec.name.clone().unwrap_or_default(),
            ));
        }

        let mut binds: Vec<String> = Vec::new();
        let mut volumes_from: Vec<String> = Vec::new();
        let mut log_export_bound = false;

        for vol in &spec.volumes {
            match vol {
                Volume::VolumesFrom { from } => volumes_from.push(from.clone()),
                Volume::Local { .. } => {
                    // No host binding, per §9 open question (a).
                }
                Volume::Bind {
                    host_path,
                    container_path,
                    mode,
                } => {
                    let ro = matches!(mode, Some(Mode::Ro));
                    binds.push(format!(
                        "{host_path}:{container_path}{}",
                        if ro { ":ro" } else { "" }
                    ));
                    if container_path == LOG_EXPORT_ROOT {
                        log_export_bound = true;
                    }
                }
            }
        }

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for pm in &spec.port_mappings {
            port_bindings.insert(
                format!("{}/tcp", pm.container_port),
                pm.host_port.as_ref().map(|hp| {
                    vec![PortBinding {
                        host_ip: None,
                        host_port: Some(hp.clone()),
                    }]
                }),
            );
        }

        let mut env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        env.push(format!("DOCKER_IMAGE={}", spec.image));

        let restart_name = match spec.restart.as_deref() {
            Some("always") => RestartPolicyNameEnum::ALWAYS,
            Some("unless-stopped") => RestartPolicyNameEnum::UNLESS_STOPPED,
            Some("no") => RestartPolicyNameEnum::NO,
            _ => RestartPolicyNameEnum::ON_FAILURE,
        };

        let host_config = HostConfig {
            binds: Some(binds.clone()),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            volumes_from: if volumes_from.is_empty() {
                None
            } else {
                Some(volumes_from)
            },
            network_mode: spec.network.clone(),
            privileged: Some(spec.privileged),
            restart_policy: Some(RestartPolicy {
                name: Some(restart_name),
                maximum_retry_count: Some(0),
            }),
            ..Default::default()
        };

        let links: Option<Vec<String>> = if spec.links.is_empty() {
            None
        } else {
            Some(
                spec.links
                    .iter()
                    .map(|(target, alias)| format!("{target}:{alias}"))
                    .collect(),
            )
        };

        let mut host_config = host_config;
        host_config.links = links;

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(env),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.command.clone(),
            host_config: Some(host_config),
            ..Default::default()
        };

        let mut options_builder = CreateContainerOptionsBuilder::new();
        if let Some(name) = &spec.name {
            options_builder = options_builder.name(name);
        }
        let options = Some(options_builder.build());

        let created = self.client.create_container(options, body).await?;

        if !log_export_bound {
            tracing::debug!(
                container = %created.id,
                "no explicit {LOG_EXPORT_ROOT} bind for this container"
            );
        }

        self.client
            .start_container(&created.id, None::<StartContainerOptions>)
            .await?;

        self.caches.lock().await.containers = None;
        Ok(created.id)
    }

    async fn stop(&self, id: &str) -> Result<(), DriverError> {
        let options = Some(StopContainerOptionsBuilder::new().build());
        match self.client.stop_container(id, options).await {
            Ok(()) => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }
        self.caches.lock().await.containers = None;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), DriverError> {
        let options = Some(RemoveContainerOptionsBuilder::new().force(true).build());
        match self.client.remove_container(id, options).await {
            Ok(()) => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }
        self.caches.lock().await.containers = None;
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<(), DriverError> {
        let options = Some(RemoveImageOptionsBuilder::new().force(true).build());
        match self.client.remove_image(id, options, None).await {
            Ok(_) => {}
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }
        self.caches.lock().await.images = None;
        Ok(())
    }

    fn refresh(&self) {
        if let Ok(mut caches) = self.caches.try_lock() {
            caches.images = None;
            caches.containers = None;
        }
    }
}
