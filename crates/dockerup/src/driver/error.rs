//! Driver error taxonomy, grounded on `docker/client.rs::DockerError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Docker connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Refusing to create container with reserved name: {0}")]
    ReservedName(String),
    #[error("Bollard error: {0}")]
    Bollard(#[from] bollard::errors::Error),
}
