//! Tab list host.
//!
//! Runs the tab list engine against a console transport: lifecycle events are
//! typed on stdin, rendered updates are written to the log. Useful for trying
//! templates out before wiring the engine into a proxy.

mod cli;
mod config;
mod console;
mod logging;
mod signals;
mod transport;

use anyhow::Context;
use cli::CliArgs;
use config::AppConfig;
use console::{reload_templates, Console, PlayerDirectory};
use signals::{HostSignal, SignalListener};
use std::path::PathBuf;
use std::sync::Arc;
use tablist_engine::TabListEngine;
use terminable::{CompositeTerminable, TaskTerminable, TerminableConsumerExt};
use tracing::{error, info, warn};
use transport::ConsoleTransport;

pub struct Application {
    config: AppConfig,
    config_path: PathBuf,
    directory: Arc<PlayerDirectory>,
    transport: Arc<ConsoleTransport>,
    engine: Arc<TabListEngine>,
    terminables: CompositeTerminable,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Configuration is loaded before logging so the configured level applies.
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("loading {}", args.config_path.display()))?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(tick_ms) = args.tick_ms {
            config.engine.tick_interval_ms = tick_ms;
        }

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
        logging::setup_logging(&config.logging)?;

        let directory = Arc::new(PlayerDirectory::default());
        let transport = Arc::new(ConsoleTransport::new(directory.clone()));
        let engine = Arc::new(TabListEngine::new(
            config.engine.clone(),
            &config.templates,
            transport.clone(),
        )?);

        info!("🚀 Tab list host v{}", env!("CARGO_PKG_VERSION"));
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self {
            config,
            config_path: args.config_path,
            directory,
            transport,
            engine,
            terminables: CompositeTerminable::new(),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!(
            "  ⏱️ Tick: {}ms, full refresh every {} ticks",
            self.config.engine.tick_interval_ms, self.config.engine.refresh_every_ticks
        );
        info!(
            "  👀 Visibility: {:?}, sort: {:?}, max entries: {}",
            self.config.engine.visibility, self.config.engine.sort, self.config.engine.max_entries
        );
        info!("  🧩 Placeholders: {}", self.engine.registry().names().join(", "));

        let mut signals = SignalListener::new().context("installing signal handlers")?;

        self.engine.start()?;
        // Closed in reverse order: console first, then the engine.
        self.terminables.bind_arc(self.engine.clone());

        let console = Console::new(self.engine.clone(), self.directory.clone(), self.config_path.clone());
        self.terminables
            .bind(TaskTerminable::new("console", tokio::spawn(console.run())));

        info!("✅ Tab list host is running");
        info!("🛑 Press Ctrl+C to shut down, send SIGHUP to reload templates");

        loop {
            match signals.next().await? {
                HostSignal::Reload => {
                    if let Err(e) = reload_templates(&self.engine, &self.config_path).await {
                        warn!("⚠️ Reload failed, previous templates stay active: {:#}", e);
                    }
                }
                HostSignal::Shutdown => break,
            }
        }

        info!("🛑 Shutdown signal received, stopping...");
        if let Err(e) = self.terminables.close() {
            e.log_all();
        }

        let status = self.engine.status();
        info!("📊 Final Statistics:");
        info!("  - Players online: {}", status.online);
        info!("  - Passes: {}, updates sent: {}", status.scheduler.passes, status.scheduler.updates_sent);
        info!("  - Updates delivered: {}", self.transport.delivered());
        info!("  - Placeholder failures: {}", status.placeholder_failures);
        info!("👋 Tab list host stopped");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start application: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
