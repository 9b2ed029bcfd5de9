//! Runtime Driver — the contract the reconciler uses to talk to the
//! container runtime. See spec.md §4.A.
//!
//! `bollard_driver` provides the production implementation backed by
//! `bollard`. `fake` provides an in-memory test double.

mod bollard_driver;
mod error;
pub mod fake;

pub use bollard_driver::BollardDriver;
pub use error::DriverError;

use async_trait::async_trait;

use crate::spec::ContainerSpec;

/// Host directory containers' logs are bind-mounted under, keyed by
/// container id (spec.md §6).
pub const LOG_EXPORT_ROOT: &str = "/var/log/ext";

/// An image as reported by the runtime's image listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub repo_tags: Vec<String>,
}

/// A container as reported by the runtime's container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    /// Raw `repo:tag` string the container was created from — resolved to
    /// an image id by the reconciler, not the driver (spec.md §4.A rule 1).
    pub image_tag: String,
    pub running: bool,
}

/// Abstracts list/pull/create/start/stop/remove of images and containers
/// (spec.md §4.A). The reconciler is generic over this trait so a
/// `FakeDriver` can back the test suite without a running daemon.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Lists images, optionally filtered to dangling (untagged) ones.
    /// Cached until `refresh` or a mutation flushes it.
    async fn list_images(&self, dangling_only: bool) -> Result<Vec<ImageRecord>, DriverError>;

    /// Lists all containers (running and stopped). Cached until `refresh`
    /// or a mutation flushes it.
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, DriverError>;

    /// Pulls `image` (a `repo:tag` reference). Returns `true` iff the
    /// local image id for that reference changed. A registry error is
    /// treated as "not updated" rather than propagated, per spec.md §4.A.
    async fn pull(&self, image: &str) -> Result<bool, DriverError>;

    /// Creates and starts a container for `spec`, returning its new id.
    /// Refuses specs with a reserved (`local-*`) name, per spec.md §9 open
    /// question (c).
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, DriverError>;

    /// Stops a container. Idempotent: a missing target is not an error.
    async fn stop(&self, id: &str) -> Result<(), DriverError>;

    /// Removes a (stopped) container. Idempotent.
    async fn remove(&self, id: &str) -> Result<(), DriverError>;

    /// Removes an image by id. Idempotent.
    async fn remove_image(&self, id: &str) -> Result<(), DriverError>;

    /// Forces both the image and container caches to reload on next
    /// access.
    fn refresh(&self);

    /// Removes every dangling (untagged) image. `refresh()` is forced
    /// first so the scan sees the effect of this cycle's mutations
    /// (spec.md §5: "refresh() must precede any final image/container
    /// scan, notably the image GC").
    async fn remove_dangling_images(&self) -> Result<(), DriverError> {
        self.refresh();
        for image in self.list_images(true).await? {
            self.remove_image(&image.id).await?;
        }
        Ok(())
    }
}
