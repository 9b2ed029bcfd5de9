//! The Reconciler — the engine. Diffs desired vs actual, decides pull,
//! replace, or leave-alone, invokes the update-strategy machine, and
//! orchestrates orphan cleanup (spec.md §4.E). Grounded on the original's
//! `dockerup/__init__.py` (`DockerUp` class) for the exact decision
//! sequence, and on `service/background.rs`'s mark-and-sweep shape for the
//! cache-cleanup pass.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::driver::{RuntimeDriver, LOG_EXPORT_ROOT};
use crate::resolver::Resolver;
use crate::spec::{ContainerSpec, Inventory, Status};

/// Delay before touching a freshly (re)started dependency's dependents, so
/// link-based service discovery has time to settle (spec.md §4.E.1 step 5).
const LINK_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// The two orders in which "launch new" and "stop old" can run during a
/// replacement. Replaces the original's closure-chain
/// (`update_stop(status, update_launch())`) with a plain two-state value
/// consumed by a linear function, per Design Notes §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// stop-dependents -> stop old -> launch new.
    StopFirst,
    /// launch new -> stop old. Both containers briefly coexist.
    LaunchFirst,
}

pub struct Reconciler<D: RuntimeDriver> {
    driver: D,
    cache: CacheStore,
    global_pull: bool,
    log_export_root: PathBuf,
}

impl<D: RuntimeDriver> Reconciler<D> {
    pub fn new(driver: D, cache: CacheStore, global_pull: bool) -> Self {
        Self {
            driver,
            cache,
            global_pull,
            log_export_root: PathBuf::from(LOG_EXPORT_ROOT),
        }
    }

    #[cfg(test)]
    fn with_log_export_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_export_root = root.into();
        self
    }

    /// Runs one full sync cycle (spec.md §4.E, top-level numbered steps).
    /// The orphan pre-pass runs even if the dependency graph turns out to
    /// contain a cycle (spec.md §8 scenario 4), so it is performed before
    /// resolution rather than after.
    pub async fn sync(&self, inventory: Inventory) -> Result<(), crate::resolver::CycleError> {
        self.shutdown_unknown(&inventory.containers).await;

        let resolver = Resolver::resolve(inventory.containers.clone())?;

        let mut live_ids: HashSet<String> = HashSet::new();
        for spec in resolver.order() {
            if spec.image.is_empty() {
                tracing::warn!(name = ?spec.name, "spec has no image, skipping");
                continue;
            }
            if !spec.is_docker_type() {
                tracing::debug!(name = ?spec.name, kind = ?spec.kind, "non-docker type, skipping at launch time");
                continue;
            }
            let status = self.update(spec, &resolver).await;
            if let Some(id) = status.id {
                live_ids.insert(id);
            }
        }

        self.cleanup(&live_ids).await;

        if let Err(e) = self.driver.remove_dangling_images().await {
            tracing::warn!(error = %e, "failed to remove dangling images");
        }

        Ok(())
    }

    /// State projection for a spec (spec.md §4.E.3).
    pub async fn status(&self, spec: &ContainerSpec) -> Status {
        let images = match self.driver.list_images(false).await {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(error = %e, "listImages failed, treating as empty");
                Vec::new()
            }
        };
        let Some(image) = images
            .iter()
            .find(|i| i.repo_tags.iter().any(|t| t == &spec.image))
        else {
            return Status::absent();
        };

        let containers = match self.driver.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(error = %e, "listContainers failed, treating as empty");
                Vec::new()
            }
        };
        // Cross-cutting rule 1 (spec.md §4.A): a container's raw `image_tag`
        // is translated to an image id via the images listing before it can
        // be compared against `image.id`.
        let container = containers.iter().find(|c| {
            images
                .iter()
                .find(|i| i.repo_tags.iter().any(|t| t == &c.image_tag))
                .map(|i| &i.id)
                == Some(&image.id)
        });

        match container {
            Some(c) => Status {
                image: Some(image.id.clone()),
                id: Some(c.id.clone()),
                tag: Some(c.image_tag.clone()),
                running: c.running,
            },
            None => Status {
                image: Some(image.id.clone()),
                id: None,
                tag: None,
                running: false,
            },
        }
    }

    /// `update(spec)` (spec.md §4.E.1).
    async fn update(&self, spec: &ContainerSpec, resolver: &Resolver) -> Status {
        let fp = spec.fingerprint();
        let current = self.status(spec).await;

        let cached = match self.cache.read(&fp) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(fingerprint = %fp, error = %e, "cache read failed, treating as drifted");
                None
            }
        };
        let mut drifted = match (&cached, spec.canonical()) {
            (Some(cached), Ok(canonical)) => cached.canonical().ok().as_deref() != Some(canonical.as_str()),
            _ => true,
        };

        if drifted {
            if let Err(e) = self.cache.write(&fp, spec) {
                tracing::warn!(fingerprint = %fp, error = %e, "failed to persist cache entry");
            }
        }

        if current.image.is_none() || spec.pull_allowed(self.global_pull) {
            match self.driver.pull(&spec.image).await {
                Ok(updated) => drifted |= updated,
                Err(e) => tracing::warn!(image = %spec.image, error = %e, "pull failed"),
            }
        }

        if !drifted && current.running {
            return current;
        }

        if !spec.links.is_empty() {
            tokio::time::sleep(LINK_SETTLE_DELAY).await;
        }

        if current.running {
            self.update_next_window(spec, current, resolver).await
        } else {
            self.launch(spec).await
        }
    }

    /// `update-next-window` / replace (spec.md §4.E.1.a).
    async fn update_next_window(
        &self,
        spec: &ContainerSpec,
        current: Status,
        resolver: &Resolver,
    ) -> Status {
        if spec.update.rolling {
            // TODO(fleet-coordinator): rolling updates should defer to a
            // cross-host coordinator hook once one exists; until then we
            // fall straight through to an immediate replace.
            tracing::warn!(image = %spec.image, "rolling update requested but not yet supported, replacing immediately");
        }

        let strategy = self.update_strategy(spec);
        let Some(old_id) = current.id.clone() else {
            return self.launch(spec).await;
        };

        match strategy {
            UpdateStrategy::LaunchFirst => {
                let new_status = self.launch(spec).await;
                self.stop_and_remove(&old_id, "eager replacement").await;
                new_status
            }
            UpdateStrategy::StopFirst => {
                self.stop_dependencies(spec, resolver).await;
                self.stop_and_remove(&old_id, "stop-first replacement").await;
                self.launch(spec).await
            }
        }
    }

    /// `is_eager` (spec.md §4.E.1.a): eager is permitted only when the spec
    /// opts in, has no name, and publishes no static host port.
    fn update_strategy(&self, spec: &ContainerSpec) -> UpdateStrategy {
        let no_static_port = spec
            .port_mappings
            .iter()
            .all(|p| p.host_port.is_none());
        let eager = spec.update.eager && spec.name.is_none() && no_static_port;
        if eager {
            UpdateStrategy::LaunchFirst
        } else {
            UpdateStrategy::StopFirst
        }
    }

    /// Stops every currently-running dependent of `spec`, per
    /// `downstream(spec.name)`. A spec without a name has no dependents —
    /// nothing else can reference it.
    async fn stop_dependencies(&self, spec: &ContainerSpec, resolver: &Resolver) {
        let Some(name) = &spec.name else { return };
        for dependent in resolver.downstream(name) {
            let status = self.status(dependent).await;
            if status.running {
                if let Some(id) = status.id {
                    self.stop_and_remove(&id, "dependent").await;
                }
            }
        }
    }

    /// Stops then removes a container, logging either failure. The
    /// original always removes on stop (`client.py::stop`'s `remove=True`
    /// default, never overridden at any of its call sites) so a replaced
    /// or orphaned container's name and ports are freed immediately —
    /// required for invariant 3 (no two containers holding the same name
    /// or static port outside an eager-replacement window).
    async fn stop_and_remove(&self, id: &str, context: &str) {
        if let Err(e) = self.driver.stop(id).await {
            tracing::warn!(id = %id, context, error = %e, "failed to stop container");
        }
        if let Err(e) = self.driver.remove(id).await {
            tracing::warn!(id = %id, context, error = %e, "failed to remove container");
        }
    }

    /// `launch(spec)` (spec.md §4.E.1.b).
    async fn launch(&self, spec: &ContainerSpec) -> Status {
        let current = self.status(spec).await;
        if current.image.is_none() {
            tracing::error!(image = %spec.image, "cannot launch: image still absent after pull attempt");
            return Status::absent();
        }

        match self.driver.create_and_start(spec).await {
            Ok(_id) => self.status(spec).await,
            Err(e) => {
                tracing::error!(image = %spec.image, error = %e, "create+start failed");
                current
            }
        }
    }

    /// Orphan pre-pass / `shutdown_unknown` (spec.md §4.E.2).
    async fn shutdown_unknown(&self, inventory: &[ContainerSpec]) {
        let mut catalog: Vec<ContainerSpec> = inventory.to_vec();
        if let Ok(fingerprints) = self.cache.list() {
            for fp in fingerprints {
                if let Ok(Some(cached)) = self.cache.read(&fp) {
                    catalog.push(cached);
                }
            }
        }

        let mut known_ids: HashSet<String> = HashSet::new();
        for spec in &catalog {
            let status = self.status(spec).await;
            if let Some(id) = status.id {
                known_ids.insert(id);
            }
        }

        let containers = match self.driver.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(error = %e, "listContainers failed during orphan pre-pass");
                Vec::new()
            }
        };

        for container in &containers {
            if container.running && !known_ids.contains(&container.id) {
                tracing::info!(id = %container.id, "stopping orphaned container");
                self.stop_and_remove(&container.id, "orphan").await;
            }
        }

        // `stop`/`remove` flush the driver's container cache, so re-list
        // rather than reuse the pre-stop snapshot — otherwise an orphan
        // just stopped above still reads as `running` here and its
        // /var/log/ext/<id> directory is never reaped.
        let containers_after = match self.driver.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(error = %e, "listContainers failed after orphan pre-pass");
                Vec::new()
            }
        };

        self.reap_log_export_dirs(&containers_after).await;
    }

    /// Post-pass side effect of the orphan sweep: removes
    /// `/var/log/ext/<id>` directories for ids that no longer correspond
    /// to a running container.
    async fn reap_log_export_dirs(&self, containers: &[crate::driver::ContainerRecord]) {
        let running: HashSet<&str> = containers
            .iter()
            .filter(|c| c.running)
            .map(|c| c.id.as_str())
            .collect();

        let entries = match std::fs::read_dir(&self.log_export_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(dir = %self.log_export_root.display(), error = %e, "could not scan log-export root");
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !running.contains(id) {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    tracing::warn!(dir = %path.display(), error = %e, "failed to reap log-export directory");
                }
            }
        }
    }

    /// Cache cleanup (spec.md §4.E step 4): deletes cache entries whose
    /// container id was not preserved or launched this cycle, stopping the
    /// container first if it is still present.
    async fn cleanup(&self, live_ids: &HashSet<String>) {
        let fingerprints = match self.cache.list() {
            Ok(fingerprints) => fingerprints,
            Err(e) => {
                tracing::warn!(error = %e, "cache list failed during cleanup");
                return;
            }
        };

        for fp in fingerprints {
            let Ok(Some(cached)) = self.cache.read(&fp) else {
                continue;
            };
            let status = self.status(&cached).await;
            let keep = status.id.as_ref().is_some_and(|id| live_ids.contains(id));
            if keep {
                continue;
            }
            if let Some(id) = &status.id {
                self.stop_and_remove(id, "cache cleanup").await;
            }
            if let Err(e) = self.cache.delete(&fp) {
                tracing::warn!(fingerprint = %fp, error = %e, "failed to delete stale cache entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    fn spec(image: &str, name: Option<&str>) -> ContainerSpec {
        ContainerSpec {
            image: image.into(),
            name: name.map(str::to_string),
            ..Default::default()
        }
    }

    fn reconciler(driver: FakeDriver) -> Reconciler<FakeDriver> {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        Reconciler::new(driver, cache, true).with_log_export_root(dir.path().join("logs"))
    }

    #[tokio::test]
    async fn fresh_host_single_spec_pulls_and_launches() {
        let driver = FakeDriver::new();
        driver.arrange_pull_result("ex/a:1", "img-1").await;
        let r = reconciler(driver);
        let inventory = Inventory {
            containers: vec![spec("ex/a:1", Some("a"))],
            settings: Default::default(),
        };
        r.sync(inventory).await.unwrap();

        let containers = r.driver.list_containers().await.unwrap();
        assert_eq!(containers.len(), 1);
        assert!(r.cache.exists("ex_a_1-a"));
    }

    #[tokio::test]
    async fn stable_inventory_second_cycle_is_idempotent() {
        let driver = FakeDriver::new();
        driver.arrange_pull_result("ex/a:1", "img-1").await;
        let r = reconciler(driver);
        let spec_a = spec("ex/a:1", Some("a"));
        let inventory = || Inventory {
            containers: vec![spec_a.clone()],
            settings: Default::default(),
        };
        r.sync(inventory()).await.unwrap();
        let count_after_first = r.driver.container_ids().await.len();
        r.sync(inventory()).await.unwrap();
        let count_after_second = r.driver.container_ids().await.len();
        assert_eq!(count_after_first, count_after_second);
    }

    #[tokio::test]
    async fn update_strategy_is_stop_first_when_name_is_set() {
        let driver = FakeDriver::new();
        let r = reconciler(driver);
        let s = spec("ex/a:1", Some("a"));
        assert_eq!(r.update_strategy(&s), UpdateStrategy::StopFirst);
    }

    #[tokio::test]
    async fn update_strategy_is_launch_first_when_eager_and_unnamed() {
        let driver = FakeDriver::new();
        let r = reconciler(driver);
        let mut s = spec("ex/a:1", None);
        s.update.eager = true;
        assert_eq!(r.update_strategy(&s), UpdateStrategy::LaunchFirst);
    }

    #[tokio::test]
    async fn eager_is_downgraded_to_stop_first_when_static_port_present() {
        let driver = FakeDriver::new();
        let r = reconciler(driver);
        let mut s = spec("ex/a:1", None);
        s.update.eager = true;
        s.port_mappings.push(crate::spec::PortMapping {
            container_port: "80".into(),
            host_port: Some("8080".into()),
        });
        assert_eq!(r.update_strategy(&s), UpdateStrategy::StopFirst);
    }

    #[tokio::test]
    async fn orphaned_running_container_is_stopped_and_removed() {
        let driver = FakeDriver::new();
        driver.seed_container("mystery:1", "orphan-1", true).await;
        let r = reconciler(driver);
        r.sync(Inventory {
            containers: vec![],
            settings: Default::default(),
        })
        .await
        .unwrap();
        let containers = r.driver.list_containers().await.unwrap();
        assert!(containers.is_empty());
    }

    #[tokio::test]
    async fn orphan_log_export_directory_is_reaped_same_cycle() {
        let driver = FakeDriver::new();
        driver.seed_container("mystery:1", "orphan-1", true).await;
        let r = reconciler(driver);
        std::fs::create_dir_all(r.log_export_root.join("orphan-1")).unwrap();

        r.sync(Inventory {
            containers: vec![],
            settings: Default::default(),
        })
        .await
        .unwrap();

        assert!(!r.log_export_root.join("orphan-1").exists());
    }

    #[tokio::test]
    async fn cycle_in_links_aborts_sync_without_mutation() {
        let driver = FakeDriver::new();
        let mut a = spec("a", Some("a"));
        a.links.insert("b".into(), "b".into());
        let mut b = spec("b", Some("b"));
        b.links.insert("a".into(), "a".into());
        let r = reconciler(driver);
        let result = r
            .sync(Inventory {
                containers: vec![a, b],
                settings: Default::default(),
            })
            .await;
        assert!(result.is_err());
        assert!(r.driver.container_ids().await.is_empty());
    }
}
