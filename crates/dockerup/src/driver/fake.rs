//! In-memory `RuntimeDriver` double, grounded on `client/fake.rs`'s
//! mutex-protected `Inner` + seed-method pattern. Backs the reconciler's
//! scenario tests without a running daemon.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::spec::ContainerSpec;

use super::{ContainerRecord, DriverError, ImageRecord, RuntimeDriver};

#[derive(Debug, Clone)]
struct FakeImage {
    id: String,
    repo_tags: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    image_tag: String,
    running: bool,
}

#[derive(Default)]
struct Inner {
    images: Vec<FakeImage>,
    containers: Vec<FakeContainer>,
    next_id: u64,
    /// `image -> image id` the next `pull` should resolve to, so tests can
    /// simulate a registry publishing a new digest.
    pending_pulls: HashMap<String, String>,
    pull_failures: std::collections::HashSet<String>,
}

/// Seedable fake of a container runtime. All methods lock the same
/// `Mutex<Inner>`, matching the single-writer model the reconciler already
/// assumes (spec.md §5).
pub struct FakeDriver {
    inner: Mutex<Inner>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn next_id(inner: &mut Inner) -> String {
        inner.next_id += 1;
        format!("fake-container-{}", inner.next_id)
    }

    /// Seeds an existing image as already present with the given id.
    pub async fn seed_image(&self, image: &str, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.images.push(FakeImage {
            id: id.to_string(),
            repo_tags: vec![image.to_string()],
        });
    }

    /// Seeds a running or stopped container for `image`.
    pub async fn seed_container(&self, image: &str, id: &str, running: bool) -> String {
        let mut inner = self.inner.lock().await;
        inner.containers.push(FakeContainer {
            id: id.to_string(),
            image_tag: image.to_string(),
            running,
        });
        id.to_string()
    }

    /// Arranges for the next `pull(image)` to resolve to `new_id`, so the
    /// caller can assert a drift was detected.
    pub async fn arrange_pull_result(&self, image: &str, new_id: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .pending_pulls
            .insert(image.to_string(), new_id.to_string());
    }

    /// Arranges for the next `pull(image)` to fail, simulating a registry
    /// outage (spec.md §4.A: treated as "not updated", never fatal).
    pub async fn arrange_pull_failure(&self, image: &str) {
        let mut inner = self.inner.lock().await;
        inner.pull_failures.insert(image.to_string());
    }

    pub async fn container_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.containers.iter().map(|c| c.id.clone()).collect()
    }

    pub async fn image_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.images.iter().map(|i| i.id.clone()).collect()
    }
}

#[async_trait]
impl RuntimeDriver for FakeDriver {
    async fn list_images(&self, dangling_only: bool) -> Result<Vec<ImageRecord>, DriverError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .images
            .iter()
            .filter(|i| !dangling_only || i.repo_tags.is_empty())
            .map(|i| ImageRecord {
                id: i.id.clone(),
                repo_tags: i.repo_tags.clone(),
            })
            .collect())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, DriverError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .containers
            .iter()
            .map(|c| ContainerRecord {
                id: c.id.clone(),
                image_tag: c.image_tag.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn pull(&self, image: &str) -> Result<bool, DriverError> {
        let mut inner = self.inner.lock().await;
        if inner.pull_failures.remove(image) {
            return Ok(false);
        }
        let Some(new_id) = inner.pending_pulls.remove(image) else {
            return Ok(false);
        };
        let already_present = inner
            .images
            .iter()
            .any(|i| i.id == new_id && i.repo_tags.iter().any(|t| t == image));
        if already_present {
            return Ok(false);
        }
        inner.images.retain(|i| !i.repo_tags.iter().any(|t| t == image));
        inner.images.push(FakeImage {
            id: new_id,
            repo_tags: vec![image.to_string()],
        });
        Ok(true)
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        if spec.has_reserved_name() {
            return Err(DriverError::ReservedName(
                spec.name.clone().unwrap_or_default(),
            ));
        }
        let mut inner = self.inner.lock().await;
        let id = Self::next_id(&mut inner);
        inner.containers.push(FakeContainer {
            id: id.clone(),
            image_tag: spec.image.clone(),
            running: true,
        });
        Ok(id)
    }

    async fn stop(&self, id: &str) -> Result<(), DriverError> {
        let mut inner = self.inner.lock().await;
        if let Some(c) = inner.containers.iter_mut().find(|c| c.id == id) {
            c.running = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), DriverError> {
        let mut inner = self.inner.lock().await;
        inner.containers.retain(|c| c.id != id);
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<(), DriverError> {
        let mut inner = self.inner.lock().await;
        inner.images.retain(|i| i.id != id);
        Ok(())
    }

    fn refresh(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_container_appears_in_listing() {
        let fake = FakeDriver::new();
        fake.seed_container("redis:7", "c1", true).await;
        let containers = fake.list_containers().await.unwrap();
        assert_eq!(containers.len(), 1);
        assert!(containers[0].running);
    }

    #[tokio::test]
    async fn pull_without_arrangement_reports_no_change() {
        let fake = FakeDriver::new();
        assert!(!fake.pull("redis:7").await.unwrap());
    }

    #[tokio::test]
    async fn arranged_pull_reports_drift() {
        let fake = FakeDriver::new();
        fake.seed_image("redis:7", "old-id").await;
        fake.arrange_pull_result("redis:7", "new-id").await;
        assert!(fake.pull("redis:7").await.unwrap());
        let images = fake.list_images(false).await.unwrap();
        assert_eq!(images[0].id, "new-id");
    }

    #[tokio::test]
    async fn pull_failure_is_reported_as_no_change_not_error() {
        let fake = FakeDriver::new();
        fake.arrange_pull_failure("redis:7").await;
        assert!(!fake.pull("redis:7").await.unwrap());
    }

    #[tokio::test]
    async fn create_and_start_rejects_reserved_name() {
        let fake = FakeDriver::new();
        let spec = ContainerSpec {
            image: "redis:7".into(),
            name: Some("local-reserved".into()),
            ..Default::default()
        };
        let result = fake.create_and_start(&spec).await;
        assert!(matches!(result, Err(DriverError::ReservedName(_))));
    }

    #[tokio::test]
    async fn stop_then_remove_drops_from_listing() {
        let fake = FakeDriver::new();
        let id = fake.seed_container("redis:7", "c1", true).await;
        fake.stop(&id).await.unwrap();
        assert!(!fake.list_containers().await.unwrap()[0].running);
        fake.remove(&id).await.unwrap();
        assert!(fake.list_containers().await.unwrap().is_empty());
    }
}
