//! The daemon: wire every collaborator, start the engine, and wait for a
//! termination signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use apguard_api::{ApcClient, BusHandle, BusMessage, ReconnectConfig};
use apguard_config::Config;
use apguard_core::{
    Collaborators, DebouncedRestart, Engine, JsonLinesSink, MemoryDirectory, ProcessBackend,
    channels,
};

use crate::error::CliError;

pub async fn handle(config: &Config) -> Result<(), CliError> {
    let transport = apguard_config::to_transport_config(config);
    let apc = Arc::new(ApcClient::new(&config.controller.url, &transport)?);

    let directory = Arc::new(MemoryDirectory::open(&config.inventory.path).await?);
    directory.extend_local_addresses(config.conntrack.local_addresses.iter().copied());

    let backend =
        Arc::new(ProcessBackend::load(apguard_config::to_backend_config(config)?).await?);
    let sink = Arc::new(JsonLinesSink::open(&config.conntrack.sink_path).await?);

    let cancel = CancellationToken::new();
    let (restart, restart_task) = DebouncedRestart::command(
        config.doh.dns_restart_command.clone(),
        Duration::from_millis(config.doh.restart_debounce_ms),
        cancel.child_token(),
    );

    let engine = Engine::new(
        apguard_config::to_engine_config(config),
        Collaborators::with_directory(&directory, apc, backend, Arc::new(restart), sink),
    );

    let bus = if config.bus.enabled {
        let url = config.bus.url.parse::<url::Url>().map_err(|e| CliError::Validation {
            field: "bus.url".into(),
            reason: format!("{e}"),
        })?;
        let handle = BusHandle::connect(
            url,
            channels::SUBSCRIBED.iter().map(ToString::to_string).collect(),
            ReconnectConfig {
                max_delay: Duration::from_secs(config.bus.max_backoff),
                ..ReconnectConfig::default()
            },
            cancel.child_token(),
            transport.token.clone(),
        )?;
        Some(handle)
    } else {
        info!("bus disabled, running on timers only");
        None
    };

    // Without a bus the sender stays alive so the engine's listener idles
    // instead of seeing a closed channel.
    let (messages, idle_tx) = match &bus {
        Some(handle) => (handle.subscribe(), None),
        None => {
            let (tx, rx) = broadcast::channel::<Arc<BusMessage>>(1);
            (rx, Some(tx))
        }
    };

    engine.start(messages).await?;
    info!(
        controller = %config.controller.url,
        inventory = %config.inventory.path.display(),
        "apguard running"
    );

    wait_for_shutdown().await;
    info!("shutting down");

    engine.shutdown().await;
    if let Some(handle) = &bus {
        handle.shutdown();
    }
    cancel.cancel();
    if let Err(e) = restart_task.await {
        warn!(error = %e, "restart task ended abnormally");
    }
    drop(idle_tx);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
