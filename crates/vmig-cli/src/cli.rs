//! Command-line arguments and their translation into a [`RunConfig`].

use anyhow::Context;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use vmig_core::{AppConfig, Endpoint, RunConfig, StartConfirmation};

#[derive(Parser, Debug)]
#[command(name = "vmig")]
#[command(about = "Migrate a batch of VMs between vSphere/ONTAP sites over SnapMirror")]
pub struct Args {
    /// Source vCenter host
    #[arg(long)]
    pub source_vcenter: String,

    /// Target vCenter host
    #[arg(long)]
    pub target_vcenter: String,

    /// Target ONTAP cluster management host
    #[arg(long)]
    pub target_ontap: String,

    /// CSV file with a VMName column
    #[arg(long)]
    pub vm_list: PathBuf,

    /// Cluster on the target vCenter that receives the VMs
    #[arg(long)]
    pub target_cluster: String,

    /// SVM on the target ONTAP cluster owning the destination volumes
    #[arg(long)]
    pub target_svm: String,

    /// Session log (defaults to vm-migration-<timestamp>.log)
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Backup tag attached to migrated VMs
    #[arg(long, default_value = AppConfig::DEFAULT_BACKUP_TAG)]
    pub backup_tag: String,

    /// Tag category holding the backup tag
    #[arg(long, default_value = AppConfig::DEFAULT_BACKUP_CATEGORY)]
    pub backup_category: String,

    /// Simulate: log what would be done without changing anything
    #[arg(long)]
    pub what_if: bool,

    /// Answer yes to every confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Ask once before starting all VMs instead of once per VM
    #[arg(long)]
    pub batch_start: bool,

    /// Offer to power off source VMs that are still running
    #[arg(long)]
    pub shutdown_source: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Give up waiting on a SnapMirror transfer after this many seconds
    #[arg(long)]
    pub poll_timeout_secs: Option<u64>,

    /// Accept self-signed certificates
    #[arg(long)]
    pub insecure: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    #[arg(long, env = "VMIG_SOURCE_USER")]
    pub source_user: Option<String>,

    #[arg(long, env = "VMIG_SOURCE_PASSWORD", hide = true, hide_env_values = true)]
    pub source_password: Option<String>,

    #[arg(long, env = "VMIG_TARGET_USER")]
    pub target_user: Option<String>,

    #[arg(long, env = "VMIG_TARGET_PASSWORD", hide = true, hide_env_values = true)]
    pub target_password: Option<String>,

    #[arg(long, env = "VMIG_ONTAP_USER")]
    pub ontap_user: Option<String>,

    #[arg(long, env = "VMIG_ONTAP_PASSWORD", hide = true, hide_env_values = true)]
    pub ontap_password: Option<String>,
}

impl Args {
    pub fn log_path(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| RunConfig::default_log_path(chrono::Local::now()))
    }

    pub fn run_config(&self, log_path: PathBuf) -> RunConfig {
        let start = if self.batch_start {
            StartConfirmation::Batch
        } else {
            StartConfirmation::PerUnit
        };
        let mut config = RunConfig::new(&self.target_cluster, &self.target_svm, log_path)
            .with_simulate(self.what_if)
            .with_backup_tag(&self.backup_category, &self.backup_tag)
            .with_report_path(self.report.clone())
            .with_start_confirmation(start)
            .with_shutdown_source(self.shutdown_source);
        if let Some(secs) = self.poll_timeout_secs {
            config = config.with_replication_timeout(Duration::from_secs(secs));
        }
        config
    }
}

/// Build an endpoint, prompting on the terminal for missing credentials.
///
/// Passwords are read without echo.
pub fn endpoint(
    label: &str,
    host: &str,
    user: Option<&str>,
    password: Option<&str>,
    insecure: bool,
) -> anyhow::Result<Endpoint> {
    resolve_endpoint(label, host, user, password, insecure, prompt, prompt_secret)
}

fn resolve_endpoint(
    label: &str,
    host: &str,
    user: Option<&str>,
    password: Option<&str>,
    insecure: bool,
    mut ask: impl FnMut(&str) -> anyhow::Result<String>,
    mut ask_secret: impl FnMut(&str) -> anyhow::Result<String>,
) -> anyhow::Result<Endpoint> {
    let user = match user {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => ask(&format!("{} user for {}:", label, host))?,
    };
    let password = match password {
        Some(p) => p.to_string(),
        None => ask_secret(&format!("{} password for {}@{}:", label, user, host))?,
    };
    Ok(Endpoint::new(host, user, password).with_accept_invalid_certs(insecure))
}

fn prompt(message: &str) -> anyhow::Result<String> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{} ", message)?;
    stderr.flush()?;

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        anyhow::bail!("no input for '{}'", message.trim_end_matches(':'));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_secret(message: &str) -> anyhow::Result<String> {
    rpassword::prompt_password(format!("{} ", message))
        .with_context(|| format!("cannot read '{}'", message.trim_end_matches(':')))
}
