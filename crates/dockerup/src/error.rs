//! Top-level error taxonomy, aggregating the per-module errors. Grounded
//! on `docker/client.rs::DockerError`'s thiserror-enum-of-enums shape.

use thiserror::Error;

use crate::cache::CacheError;
use crate::resolver::CycleError;
use crate::settings::SettingsError;

/// A fatal error: one that aborts the current sync cycle (or the process,
/// for configuration errors encountered at startup). Per-spec failures
/// (a single spec's pull/launch failing) are logged and isolated inside
/// the reconciler, never surfaced as this type (spec.md §7).
#[derive(Error, Debug)]
pub enum DockerupError {
    #[error("configuration error: {0}")]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("dependency cycle: {0}")]
    Cycle(#[from] CycleError),
    #[error("driver connection error: {0}")]
    Driver(#[from] crate::driver::DriverError),
}
