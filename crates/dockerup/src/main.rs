//! `dockerupd` — host-local container reconciler. See module docs for the
//! component this file wires together; `tracing-subscriber` setup is
//! grounded on the teacher's `main.rs`.

mod cache;
mod cli;
mod daemon;
mod driver;
mod error;
mod inventory;
mod reconciler;
mod resolver;
mod settings;
mod spec;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cache::CacheStore;
use cli::Cli;
use driver::BollardDriver;
use error::DockerupError;
use reconciler::Reconciler;
use settings::Settings;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockerup=info")),
        )
        .init();
}

async fn run(cli: Cli) -> Result<(), DockerupError> {
    let settings = Settings::load(&cli)?;
    let driver = BollardDriver::connect(&settings.remote)?;
    let cache = CacheStore::new("/var/cache/dockerup");
    let reconciler = Reconciler::new(driver, cache, settings.pull);

    if settings.server {
        daemon::run_server(&reconciler, &settings).await;
    } else {
        daemon::run_once(&reconciler, &settings).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal configuration error");
            ExitCode::FAILURE
        }
    }
}
