//! Cutover: mount the broken-off volumes on the target cluster, register the
//! VMs from them and power them on.

use std::collections::HashMap;
use tracing::debug;

use super::{units_at, vm_count, Discovery, StageContext};
use crate::config::{SequencerConfig, StartConfirmation};
use crate::confirm::UnitDecision;
use crate::error::{MigrationError, Result};
use crate::matching::{match_volume, select_interface, MatchKind};
use crate::models::{HostInfo, MigrationUnit, NetworkInterface, PowerState, UnitStatus, Volume};
use crate::poll::poll_until;

/// Outcome of the mount step, by datastore name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountReport {
    pub mounted: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of the start step, by unit name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub started: Vec<String>,
    pub skipped: Vec<String>,
    /// Started but not observed running before the power poll gave up.
    pub not_running: Vec<String>,
    /// The user stopped the step before every unit was handled.
    pub aborted: bool,
}

/// `[datastore] vm/vm.vmx`
pub fn vmx_path(datastore: &str, vm: &str) -> String {
    format!("[{}] {}/{}.vmx", datastore, vm, vm)
}

async fn connected_hosts(ctx: &StageContext<'_>) -> Result<Vec<HostInfo>> {
    let hosts = ctx
        .target
        .list_cluster_hosts(&ctx.config.target_cluster)
        .await?;
    Ok(hosts.into_iter().filter(|h| h.connected).collect())
}

/// Mount every datastore used by a `Replicated` unit on all connected hosts
/// of the target cluster.
pub async fn mount(
    ctx: &StageContext<'_>,
    units: &mut [MigrationUnit],
    discovery: &Discovery,
) -> Result<MountReport> {
    let candidates = units_at(units, UnitStatus::Replicated);
    let mut report = MountReport::default();
    if candidates.is_empty() {
        ctx.ledger.warning("No replicated VMs to mount");
        return Ok(report);
    }

    let mut datastores: Vec<&str> = Vec::new();
    for &idx in &candidates {
        for ds in discovery.datastores_of(&units[idx].name) {
            if !datastores.contains(&ds.as_str()) {
                datastores.push(ds);
            }
        }
    }

    let svm = ctx.config.target_svm.as_str();
    let hosts = connected_hosts(ctx).await?;
    let volumes = ctx.storage.list_volumes(svm).await?;
    let interfaces = ctx.storage.list_interfaces(svm).await?;
    let lif = select_interface(&interfaces, SequencerConfig::MOUNT_PROTOCOL);
    debug!(
        "{} host(s), {} volume(s), {} interface(s) on {}",
        hosts.len(),
        volumes.len(),
        interfaces.len(),
        svm
    );

    let mut existing: HashMap<&str, Vec<String>> = HashMap::new();
    for host in &hosts {
        match ctx.target.list_host_datastores(&host.id).await {
            Ok(list) => {
                existing.insert(host.id.as_str(), list.into_iter().map(|d| d.name).collect());
            }
            Err(e) => ctx.ledger.warning(format!(
                "Could not list datastores on host {}: {}",
                host.name, e
            )),
        }
    }

    let mut resolved: HashMap<&str, String> = HashMap::new();
    for ds in datastores {
        ctx.cancel.check()?;
        match mount_datastore(ctx, ds, &volumes, lif, &hosts, &existing).await {
            Ok(volume) => {
                resolved.insert(ds, volume);
                report.mounted.push(ds.to_string());
            }
            Err(e) => {
                ctx.ledger.error(e.to_string());
                report.failed.push(ds.to_string());
            }
        }
    }

    for idx in candidates {
        let unit = &mut units[idx];
        let missing = discovery
            .datastores_of(&unit.name)
            .iter()
            .find(|ds| !resolved.contains_key(ds.as_str()));
        if let Some(ds) = missing {
            unit.fail(format!("datastore {} is not mounted on the target", ds));
            continue;
        }
        unit.target_volume = unit
            .source_datastore
            .as_deref()
            .and_then(|ds| resolved.get(ds))
            .cloned();
        unit.advance(UnitStatus::Mounted);
    }

    ctx.ledger.info(format!(
        "Mount complete: {} datastore(s) mounted, {} failed",
        report.mounted.len(),
        report.failed.len()
    ));
    Ok(report)
}

/// Mount one datastore; returns the backing volume name.
async fn mount_datastore(
    ctx: &StageContext<'_>,
    datastore: &str,
    volumes: &[Volume],
    lif: Option<&NetworkInterface>,
    hosts: &[HostInfo],
    existing: &HashMap<&str, Vec<String>>,
) -> Result<String> {
    let mount_error = |message: String| MigrationError::Mount {
        datastore: datastore.to_string(),
        message,
    };

    let (volume, kind) = match_volume(datastore, volumes).ok_or_else(|| {
        mount_error(format!("no matching volume on SVM {}", ctx.config.target_svm))
    })?;
    if kind != MatchKind::Exact {
        ctx.ledger.warning(format!(
            "Datastore {} resolved to volume {} by {:?} match",
            datastore, volume.name, kind
        ));
    }
    let junction = volume
        .junction_path
        .as_deref()
        .ok_or_else(|| mount_error(format!("volume {} has no junction path", volume.name)))?;
    let lif = lif.ok_or_else(|| {
        mount_error(format!(
            "no {} interface on SVM {}",
            SequencerConfig::MOUNT_PROTOCOL,
            ctx.config.target_svm
        ))
    })?;
    if hosts.is_empty() {
        return Err(mount_error(format!(
            "no connected hosts in cluster {}",
            ctx.config.target_cluster
        )));
    }

    let mut mounted_on = 0;
    for host in hosts {
        let already = existing
            .get(host.id.as_str())
            .is_some_and(|names| names.iter().any(|n| n == datastore));
        if already {
            ctx.ledger
                .info(format!("Datastore {} already mounted on {}", datastore, host.name));
            mounted_on += 1;
            continue;
        }

        if ctx.simulate() {
            ctx.what_if(format!(
                "mount {}:{} as datastore {} on host {}",
                lif.address, junction, datastore, host.name
            ));
            mounted_on += 1;
            continue;
        }

        match ctx
            .target
            .mount_nfs_datastore(&host.id, datastore, &lif.address, junction)
            .await
        {
            Ok(()) => {
                ctx.ledger
                    .success(format!("Mounted datastore {} on {}", datastore, host.name));
                mounted_on += 1;
            }
            Err(e) => ctx.ledger.warning(format!(
                "Failed to mount datastore {} on {}: {}",
                datastore, host.name, e
            )),
        }
    }

    if mounted_on == 0 {
        return Err(mount_error("not mounted on any host".to_string()));
    }
    Ok(volume.name.clone())
}

/// Register every `Mounted` unit on the first connected target host.
///
/// Returns the number of registered units.
pub async fn register(ctx: &StageContext<'_>, units: &mut [MigrationUnit]) -> Result<usize> {
    let candidates = units_at(units, UnitStatus::Mounted);
    if candidates.is_empty() {
        ctx.ledger.warning("No mounted VMs to register");
        return Ok(0);
    }

    if !ctx.simulate() {
        let prompt = format!(
            "Register {} on cluster {}?",
            vm_count(candidates.len()),
            ctx.config.target_cluster
        );
        if !ctx.confirm(&prompt)? {
            ctx.ledger.warning("Registration declined by user");
            return Ok(0);
        }
    }

    let hosts = connected_hosts(ctx).await?;
    let host = hosts.first().ok_or_else(|| {
        MigrationError::operation(
            "register",
            &ctx.config.target_cluster,
            "no connected host in cluster",
        )
    })?;

    let mut registered = 0;
    for idx in candidates {
        ctx.cancel.check()?;
        let unit = &mut units[idx];
        let Some(datastore) = unit.source_datastore.clone() else {
            unit.fail("no datastore recorded");
            continue;
        };
        let path = vmx_path(&datastore, &unit.name);

        if ctx.simulate() {
            ctx.what_if(format!("register VM {} from {} on {}", unit.name, path, host.name));
            unit.advance(UnitStatus::Registered);
            registered += 1;
            continue;
        }

        match ctx.target.register_vm(&unit.name, &path, &host.id).await {
            Ok(vm_id) => {
                ctx.ledger
                    .success(format!("Registered VM {} on {} ({})", unit.name, host.name, vm_id));
                unit.target_vm_id = Some(vm_id);
                unit.advance(UnitStatus::Registered);
                registered += 1;
            }
            Err(e) => {
                let err = MigrationError::Registration {
                    unit: unit.name.clone(),
                    message: e.to_string(),
                };
                ctx.ledger.error(err.to_string());
                unit.fail(err.to_string());
            }
        }
    }
    Ok(registered)
}

/// Power on every `Registered` unit.
pub async fn start(ctx: &StageContext<'_>, units: &mut [MigrationUnit]) -> Result<StartReport> {
    let candidates = units_at(units, UnitStatus::Registered);
    let mut report = StartReport::default();
    if candidates.is_empty() {
        ctx.ledger.warning("No registered VMs to start");
        return Ok(report);
    }

    if ctx.simulate() {
        for idx in candidates {
            let unit = &mut units[idx];
            ctx.what_if(format!(
                "start VM {} and answer its relocation question",
                unit.name
            ));
            unit.advance(UnitStatus::Started);
            report.started.push(unit.name.clone());
        }
        return Ok(report);
    }

    let per_unit = ctx.config.start_confirmation == StartConfirmation::PerUnit;
    if !per_unit {
        let prompt = format!("Power on {} on the target?", vm_count(candidates.len()));
        if !ctx.confirm(&prompt)? {
            ctx.ledger.warning("Start declined by user");
            report.skipped = candidates.iter().map(|&i| units[i].name.clone()).collect();
            return Ok(report);
        }
    }

    for (pos, &idx) in candidates.iter().enumerate() {
        ctx.cancel.check()?;
        let remaining = candidates.len() - pos - 1;
        let unit = &mut units[idx];

        if per_unit {
            match ctx.confirm_unit(&format!("Start VM {}?", unit.name))? {
                UnitDecision::Proceed => {}
                UnitDecision::Skip => {
                    ctx.ledger.warning(format!("Skipped start of VM {}", unit.name));
                    report.skipped.push(unit.name.clone());
                    continue;
                }
                UnitDecision::Abort => {
                    ctx.ledger.warning(format!(
                        "Start aborted by user; {} not started",
                        vm_count(remaining + 1)
                    ));
                    report.aborted = true;
                    break;
                }
            }
        }

        match start_one(ctx, unit).await {
            Ok(running) => {
                if running {
                    ctx.ledger.success(format!("VM {} is running", unit.name));
                } else {
                    ctx.ledger.warning(format!(
                        "VM {} did not report powered on; check it manually",
                        unit.name
                    ));
                    report.not_running.push(unit.name.clone());
                }
                unit.advance(UnitStatus::Started);
                report.started.push(unit.name.clone());
            }
            Err(MigrationError::Cancelled) => return Err(MigrationError::Cancelled),
            Err(e) => {
                ctx.ledger
                    .error(format!("Failed to start VM {}: {}", unit.name, e));
                unit.fail(format!("start failed: {}", e));
                if remaining > 0
                    && !ctx.confirm("Continue starting the remaining VMs?")?
                {
                    ctx.ledger.warning(format!(
                        "Start aborted by user; {} not started",
                        vm_count(remaining)
                    ));
                    report.aborted = true;
                    break;
                }
            }
        }
    }
    Ok(report)
}

/// Power on one unit and answer its relocation question.
///
/// Returns whether the VM was observed running.
async fn start_one(ctx: &StageContext<'_>, unit: &MigrationUnit) -> Result<bool> {
    let vm_id = unit
        .target_vm_id
        .as_deref()
        .ok_or_else(|| MigrationError::Registration {
            unit: unit.name.clone(),
            message: "no target VM id recorded".to_string(),
        })?;
    let target = ctx.target;

    ctx.ledger.info(format!("Powering on VM {}", unit.name));
    target.power_on(vm_id).await?;
    ctx.cancel.sleep(ctx.config.power_on_settle).await?;

    if let Some(question) = target.pending_question(vm_id).await? {
        match question.moved_choice() {
            Some(choice) => {
                ctx.ledger.info(format!(
                    "Answering question on VM {} with '{}'",
                    unit.name, choice.label
                ));
                target
                    .answer_question(vm_id, &question.id, &choice.key)
                    .await?;
            }
            None => ctx.ledger.warning(format!(
                "VM {} asked an unexpected question: {}",
                unit.name, question.text
            )),
        }
    }
    ctx.cancel.sleep(ctx.config.question_settle).await?;

    let what = format!("VM {} to power on", unit.name);
    let waited = poll_until(&ctx.config.power_poll, ctx.cancel, &what, || async move {
        let state = target.power_state(vm_id).await?;
        Ok((state == PowerState::PoweredOn).then_some(()))
    })
    .await;

    match waited {
        Ok(()) => Ok(true),
        Err(MigrationError::Timeout { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
