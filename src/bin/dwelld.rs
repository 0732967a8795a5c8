//! dwelld - dwell-time alerting daemon
//!
//! This daemon:
//! 1. Loads configuration (fatal if missing or malformed)
//! 2. Opens the camera and tracker
//! 3. Runs the detection loop until Ctrl-C, then drains pending notifications

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dwell_alert::transport::thread_sleep;
use dwell_alert::{logging, open_tracker, CameraSource, DwellConfig, Runner, UreqTransport};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Alert once when a tracked subject dwells in view"
)]
struct Args {
    /// Path to the configuration file (TOML, or JSON with a .json extension).
    #[arg(long, env = "DWELL_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = DwellConfig::load(&args.config)
        .with_context(|| format!("cannot start with config {}", args.config.display()))?;
    logging::init(&cfg.storage.log_path)?;

    log::info!("dwelld {} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "source={} model={} class={} conf>={:.2} persistence={:.1}s",
        cfg.camera.source,
        cfg.model.path,
        cfg.model.target_class,
        cfg.model.confidence_threshold,
        cfg.tracking.persistence.as_secs_f64()
    );
    log::info!(
        "alert channel {}, audit channel {}",
        if cfg.api.alert.enabled { "enabled" } else { "disabled" },
        if cfg.api.audit.enabled { "enabled" } else { "disabled" }
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let source = CameraSource::new(cfg.camera.source.clone())?;
    let tracker = open_tracker(&cfg.model)?;
    let transport = Arc::new(UreqTransport::new(cfg.api.timeout));

    let runner = Runner::new(&cfg, source, tracker, transport, thread_sleep())?;
    log::info!("dwelld running (Ctrl-C to stop)");
    let summary = runner.run(&shutdown)?;

    log::info!(
        "processed {} frames, {} notifications",
        summary.frames,
        summary.notifications
    );
    Ok(())
}
