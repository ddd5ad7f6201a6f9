//! cnc_sync: stream a sinusoidal trajectory to two CNC machines in lock-step
//! and capture their reported positions.

use anyhow::{Context, Result};
use clap::Parser;
use cnc_sync::control::ShutdownSignal;
use cnc_sync::{app, logging, Settings};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cnc_sync", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level or filter directive, e.g. `debug` or `cnc_sync=trace` (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Use simulated machines that echo their commanded position
    #[arg(long)]
    simulate: bool,

    /// Sample log path (overrides the config file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of trajectory samples (overrides the config file)
    #[arg(short = 'n', long)]
    samples: Option<usize>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(level) = &self.log_level {
            settings.application.log_level = level.clone();
        }
        if self.json_logs {
            settings.application.json_logs = true;
        }
        if let Some(path) = &self.output {
            settings.storage.path = path.clone();
        }
        if let Some(samples) = self.samples {
            settings.trajectory.num_points = samples;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    logging::init(
        &settings.application.log_level,
        settings.application.json_logs,
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    info!(
        name = %settings.application.name,
        simulate = cli.simulate,
        samples = settings.trajectory.num_points,
        "Starting"
    );

    let app::Rig {
        mut control,
        waypoints,
        events,
    } = app::assemble(&settings, cli.simulate);

    let observer = tokio::spawn(observe(events));

    let (stop_tx, shutdown) = ShutdownSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current sample");
            let _ = stop_tx.send(true);
        }
    });

    let result = control.run(&waypoints, shutdown).await;
    // Dropping the loop drops the publisher, which ends the observer.
    drop(control);
    let _ = observer.await;

    match result {
        Ok(summary) => {
            info!(
                path = %settings.storage.path.display(),
                records = summary.records,
                invalid_cnc1 = summary.invalid_primary,
                invalid_cnc2 = summary.invalid_mirrored,
                "Data saved to {}",
                settings.storage.path.display()
            );
            Ok(())
        }
        Err(e) => {
            error!(
                error = %e,
                path = %settings.storage.path.display(),
                "Run did not complete; the sample log holds the rows recorded before the fault"
            );
            Err(anyhow::Error::from(e).context("Run did not complete"))
        }
    }
}

/// Log every published sample at debug level until the topic closes.
async fn observe(mut events: broadcast::Receiver<cnc_sync::recorder::SampleEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!(target: "cnc_sync::events", "{json}"),
                Err(e) => warn!(error = %e, "Failed to encode sample event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event observer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
