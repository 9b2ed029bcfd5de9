//! Sync Loop — one-shot vs server mode, signal handling, interval sleep
//! (spec.md §4.F). Signal wiring grounded on `main.rs::shutdown_signal`.

use std::time::Duration;

use tokio::signal;

use crate::driver::RuntimeDriver;
use crate::inventory;
use crate::reconciler::Reconciler;
use crate::settings::Settings;

/// One-shot mode: run a single reconcile and return.
pub async fn run_once<D: RuntimeDriver>(reconciler: &Reconciler<D>, settings: &Settings) {
    let inventory = inventory::load(&settings.confdir, settings.aws, Default::default()).await;
    if let Err(e) = reconciler.sync(inventory).await {
        tracing::error!(error = %e, "sync cycle aborted");
    }
}

/// Server mode: installs a termination-signal handler, then alternates
/// reconcile and `interval`-second sleep until asked to stop. A cycle
/// error is logged and the loop continues (spec.md §4.F); only the
/// termination signal ends it. The signal is only allowed to interrupt the
/// sleep, never an in-flight reconcile, matching spec.md §5's cancellation
/// rule ("in-flight runtime operations run to completion").
pub async fn run_server<D: RuntimeDriver>(reconciler: &Reconciler<D>, settings: &Settings) {
    let (tx, mut rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });

    let interval = Duration::from_secs(settings.interval);

    loop {
        if *rx.borrow() {
            return;
        }

        let inventory = inventory::load(&settings.confdir, settings.aws, Default::default()).await;
        if let Err(e) = reconciler.sync(inventory).await {
            tracing::error!(error = %e, "sync cycle aborted, retrying next interval");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = rx.changed() => {
                tracing::info!("termination signal received during sleep, shutting down");
                return;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { tracing::info!("received Ctrl+C"); }
        _ = terminate => { tracing::info!("received SIGTERM"); }
    }
}
