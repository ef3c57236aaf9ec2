//! Batch driver: run every photo through one editing session and hand off the order.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use memotile::config::Configuration;
use memotile::error::Error;
use memotile::events::AdvanceOutcome;
use memotile::order::{LocalDirUploader, build_order_lines};
use memotile::scan::{self, ScanOptions};
use memotile::session::EditingSession;
use memotile::tasks::baker::CpuSurface;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "memotile", about = "Crop, filter and export photo tiles")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Filter preset applied to every photo
    #[arg(long, value_name = "ID")]
    filter: Option<String>,

    /// Zoom applied to every photo (1.0 = cover fit)
    #[arg(long, value_name = "Z")]
    zoom: Option<f64>,

    /// Order identifier used in remote paths
    #[arg(long, value_name = "ID")]
    order_id: Option<String>,

    /// How many times to wait again if exports are still processing
    #[arg(long, default_value_t = 2)]
    checkout_retries: u32,

    /// Directory receiving the uploaded order artifacts
    #[arg(long, value_name = "DIR")]
    out: PathBuf,

    /// Photos or directories of photos, in order
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,memotile={level}")));
    fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Configuration::default(),
    }
    .validated()
    .context("validating configuration")?;

    let files = scan::discover(&cli.paths, &ScanOptions::default())?;
    let sources = scan::identify_all(&files);
    if sources.is_empty() {
        bail!("no usable photos found");
    }
    info!(count = sources.len(), "photos discovered");

    let session = EditingSession::start(config, sources, Arc::new(CpuSurface::new())).await?;
    tokio::select! {
        res = run(session, &cli) => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("ctrl-c received; abandoning session");
            Ok(())
        }
    }
}

async fn run(mut session: EditingSession, cli: &Cli) -> Result<()> {
    loop {
        apply_edits(&mut session, cli)?;
        let index = session.current();
        match session.advance().await {
            Ok(AdvanceOutcome::Advanced { next }) => info!(index, next, "photo exported"),
            Ok(AdvanceOutcome::ReadyForCheckout) => break,
            Ok(AdvanceOutcome::NotReady) => bail!("editor layout not ready for photo {index}"),
            Err(Error::QueueTimeout { waited, pending }) => {
                warn!(
                    pending,
                    waited = %humantime::format_duration(waited),
                    "exports still processing"
                );
                wait_with_retries(&session, cli.checkout_retries).await?;
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let order_id = cli
        .order_id
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
    let photos = session.photos().snapshot();
    let lines = build_order_lines(&photos, &order_id, &LocalDirUploader::new(&cli.out)).await?;
    println!("{}", serde_json::to_string_pretty(&lines)?);

    session.complete().await?;
    Ok(())
}

fn apply_edits(session: &mut EditingSession, cli: &Cli) -> Result<()> {
    if let Some(filter) = &cli.filter {
        session.set_filter(filter)?;
    }
    if let Some(zoom) = cli.zoom {
        let controller = session.controller_mut();
        controller.pinch_begin();
        controller.pinch_update(zoom);
        if let Some(resting) = controller.pinch_end() {
            session.record_transform(resting)?;
        }
    }
    Ok(())
}

async fn wait_with_retries(session: &EditingSession, retries: u32) -> Result<()> {
    for attempt in 1..=retries {
        warn!(attempt, "exports still processing; waiting again");
        match session.retry_checkout().await {
            Ok(()) => return Ok(()),
            Err(Error::QueueTimeout { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    bail!("exports still processing after {retries} retries")
}
