// ── Debounced DNS-service restart ──
//
// Every scope transition asks for a restart. Bursts (a full `apply_doh`
// touching dozens of files) collapse into one restart once the requests
// go quiet for the debounce window.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{RestartScheduler, run_command};
use crate::error::CoreError;

/// Handle for requesting a restart. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DebouncedRestart {
    tx: mpsc::UnboundedSender<()>,
}

impl DebouncedRestart {
    /// Spawn the debounce task. `action` runs once per quiet burst.
    pub fn spawn<F, Fut>(
        debounce: Duration,
        cancel: CancellationToken,
        action: F,
    ) -> (Self, JoinHandle<()>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(restart_task(rx, debounce, cancel, action));
        (Self { tx }, handle)
    }

    /// Debounced restart that runs `argv` (e.g. `systemctl restart dnsmasq`).
    pub fn command(
        argv: Vec<String>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        Self::spawn(debounce, cancel, move || {
            let argv = argv.clone();
            async move { run_command(&argv).await }
        })
    }
}

impl RestartScheduler for DebouncedRestart {
    fn schedule_restart(&self) {
        if self.tx.send(()).is_err() {
            debug!("restart task gone, dropping request");
        }
    }
}

async fn restart_task<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
    cancel: CancellationToken,
    action: F,
) where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CoreError>> + Send,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            req = rx.recv() => {
                if req.is_none() { break; }
            }
        }

        // Absorb follow-up requests until the window passes quietly.
        let mut coalesced = 1_u32;
        let mut closed = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                req = rx.recv() => {
                    if req.is_none() {
                        closed = true;
                        break;
                    }
                    coalesced += 1;
                }
                () = tokio::time::sleep(debounce) => break,
            }
        }

        info!(coalesced, "restarting DNS service");
        if let Err(e) = action().await {
            warn!(error = %e, "DNS service restart failed");
        }
        if closed {
            break;
        }
    }
}
