//! Demo daemon: wires a Vigil runtime with a pair of stub analytic
//! components and drives them with a synthetic tick loop until SIGINT or
//! SIGTERM.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil::{
    install_signal_handlers, ComponentSpec, EventKind, ManagedComponent, Vigil, VigilConfig,
};

struct StubSignalGenerator {
    id: String,
}

#[async_trait]
impl ManagedComponent for StubSignalGenerator {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        info!("{} initialized", self.id);
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        info!("{} shut down", self.id);
        Ok(())
    }
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vigil=debug"));

    let log_dir = std::env::var("VIGIL_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/vigil".to_string());

    // `tracing_appender::rolling::daily` panics if it can't create the
    // initial log file, so preflight writability before installing it.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".vigil_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(&log_dir, "vigil.log");
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_appender)
                        .with_ansi(false),
                )
            }
            Err(_) => None,
        }
    } else {
        None
    };

    let console_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = match VigilConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Falling back to default configuration: {}", e);
            VigilConfig::default()
        }
    };
    if let Err(errors) = config.validate() {
        for error in &errors {
            warn!("Config: {}", error);
        }
        anyhow::bail!("invalid configuration");
    }

    let vigil = Arc::new(Vigil::new(config));
    install_signal_handlers(vigil.shutdown_flag().clone()).await;
    vigil.start().await;

    vigil
        .bus()
        .subscribe(EventKind::CircuitOpened, "console", |event| {
            warn!(
                "Circuit opened for {:?}: {}",
                event.component, event.payload
            );
            Ok(())
        })
        .await;

    // Register one critical and one ordinary stub component
    let fast = Arc::new(StubSignalGenerator {
        id: "momentum_signal".to_string(),
    });
    let slow = Arc::new(StubSignalGenerator {
        id: "regime_analyzer".to_string(),
    });
    vigil
        .registry()
        .register_component(
            fast.clone(),
            ComponentSpec::new("signal_generator", fast.version())
                .critical()
                .with_expected_response_ms(2_000),
        )
        .await?;
    vigil
        .registry()
        .register_component(
            slow.clone(),
            ComponentSpec::new("market_analyzer", slow.version())
                .with_expected_response_ms(10_000),
        )
        .await?;

    // Synthetic tick loop standing in for the market data feed
    let registry = vigil.registry().clone();
    let flag = vigil.shutdown_flag().clone();
    let tick_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        let mut tick: u64 = 0;
        while !flag.is_requested() {
            interval.tick().await;
            tick += 1;

            let started = Instant::now();
            // Every 40th tick simulates an analyzer error
            let is_error = tick % 40 == 0;
            if registry.is_safe_to_use("momentum_signal").await {
                let _ = registry
                    .record_activity(
                        "momentum_signal",
                        "evaluate",
                        Some(started.elapsed() + Duration::from_millis(3)),
                        Some(2 * 1024 * 1024),
                        false,
                    )
                    .await;
            }
            let _ = registry
                .record_activity(
                    "regime_analyzer",
                    "classify",
                    Some(started.elapsed() + Duration::from_millis(12)),
                    None,
                    is_error,
                )
                .await;
        }
    });

    // Periodic status report until a signal arrives
    let mut status_interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                let report = vigil.health_monitor().system_health_report().await;
                info!(
                    "System health {:.2} ({} components, healthy={})",
                    report.score,
                    report.components.len(),
                    report.healthy
                );
            }
            _ = vigil.wait_for_shutdown_request() => {
                break;
            }
        }
    }

    let _ = tick_loop.await;
    vigil.registry().unregister("momentum_signal").await?;
    vigil.registry().unregister("regime_analyzer").await?;
    vigil.shutdown().await;
    info!("Goodbye");
    Ok(())
}
