//! vmig - VM migration sequencer.
//!
//! Moves a batch of VMs from a source vCenter to a target vCenter whose ONTAP
//! volumes are SnapMirror destinations of the source datastores.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vmig_core::backend::{ontap::OntapClient, vsphere::VsphereClient};
use vmig_core::{
    load_batch, AutoConfirmer, CancellationToken, Confirmer, ConsoleConfirmer, RunOutcome,
    Sequencer, SessionLedger,
};

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let code = run(args).await?;
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let log_path = args.log_path();
    let config = args.run_config(log_path.clone());
    let ledger = SessionLedger::open(&log_path)
        .with_context(|| format!("cannot open session log {}", log_path.display()))?;
    info!("Session log: {}", log_path.display());

    // The batch is validated before any credential prompt or connection
    let units = match load_batch(&args.vm_list) {
        Ok(units) => units,
        Err(e) => return Ok(RunOutcome::rejected(&config, &ledger, e).exit_code()),
    };

    let source = cli::endpoint(
        "Source vCenter",
        &args.source_vcenter,
        args.source_user.as_deref(),
        args.source_password.as_deref(),
        args.insecure,
    )?;
    let target = cli::endpoint(
        "Target vCenter",
        &args.target_vcenter,
        args.target_user.as_deref(),
        args.target_password.as_deref(),
        args.insecure,
    )?;
    let ontap = cli::endpoint(
        "Target ONTAP",
        &args.target_ontap,
        args.ontap_user.as_deref(),
        args.ontap_password.as_deref(),
        args.insecure,
    )?;

    let confirmer: Arc<dyn Confirmer> = if args.yes {
        Arc::new(AutoConfirmer::new(true))
    } else {
        Arc::new(ConsoleConfirmer)
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || on_signal.cancel()) {
        warn!("Ctrl-C handler not installed: {}", e);
    }

    let sequencer = Sequencer::new(
        config,
        Arc::new(VsphereClient::new(&source)?),
        Arc::new(VsphereClient::new(&target)?),
        Arc::new(OntapClient::new(&ontap)?),
        confirmer,
        ledger,
    )
    .with_cancellation(cancel);

    let outcome = sequencer.run(units).await;
    Ok(outcome.exit_code())
}
