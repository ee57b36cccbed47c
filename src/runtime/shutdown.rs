//! Shutdown Signaling
//!
//! A single flag shared by every background task. Tasks poll it at the
//! top of each cycle and also wake on the watch channel so shutdown does
//! not wait out a long interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Process-wide shutdown flag with change notification
pub struct ShutdownFlag {
    requested: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            tx,
        }
    }

    /// Request shutdown. Returns false on duplicate requests.
    pub fn request(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal");
            return false;
        }
        info!("Shutdown requested");
        let _ = self.tx.send(true);
        true
    }

    /// Check the flag (cheap atomic load, safe on the hot path)
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Receiver that resolves when shutdown is requested
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers that trip the shutdown flag
pub async fn install_signal_handlers(flag: Arc<ShutdownFlag>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let flag_sigterm = flag.clone();
        let flag_sigint = flag;

        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM");
                    flag_sigterm.request();
                }
                Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
            }
        });

        tokio::spawn(async move {
            match signal(SignalKind::interrupt()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGINT");
                    flag_sigint.request();
                }
                Err(e) => warn!("Failed to install SIGINT handler: {}", e),
            }
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                flag.request();
            }
        });
    }
}
