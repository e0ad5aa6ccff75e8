//! Discovery and verification.
//!
//! Discovery builds the VM → datastore map from the source vCenter. A VM that
//! cannot be found aborts the run, since every later stage needs a complete
//! map. Verification then checks that every source VM is powered off,
//! collecting all violations before deciding whether the run can continue.

use std::collections::HashMap;
use tracing::debug;

use super::{units_at, vm_count, StageContext};
use crate::error::{MigrationError, Result};
use crate::models::{MigrationUnit, PowerState, UnitStatus, VmInfo};
use crate::poll::poll_until;

/// Source-side snapshot taken once per run.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Source VMs keyed by unit name.
    pub vms: HashMap<String, VmInfo>,
    /// Datastore names in order of first appearance, deduplicated.
    pub datastores: Vec<String>,
}

impl Discovery {
    /// Datastores used by the named unit.
    pub fn datastores_of(&self, unit: &str) -> &[String] {
        self.vms
            .get(unit)
            .map(|vm| vm.datastores.as_slice())
            .unwrap_or(&[])
    }

    /// Units whose VM lives (at least partly) on `datastore`.
    pub fn units_on(&self, datastore: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .vms
            .iter()
            .filter(|(_, vm)| vm.datastores.iter().any(|d| d == datastore))
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Resolve every unit's VM and datastore on the source vCenter.
pub async fn discover(ctx: &StageContext<'_>, units: &mut [MigrationUnit]) -> Result<Discovery> {
    let mut discovery = Discovery::default();

    for unit in units.iter_mut() {
        ctx.cancel.check()?;

        let vm = ctx
            .source
            .find_vm(&unit.name)
            .await?
            .ok_or_else(|| MigrationError::lookup("VM", &unit.name))?;

        let Some(primary) = vm.datastores.first().cloned() else {
            return Err(MigrationError::lookup("datastore for VM", &unit.name));
        };

        for ds in &vm.datastores {
            if !discovery.datastores.contains(ds) {
                discovery.datastores.push(ds.clone());
            }
        }

        ctx.ledger.info(format!(
            "Found VM {} on datastore {} (power state: {})",
            unit.name, primary, vm.power_state
        ));
        unit.source_datastore = Some(primary);
        unit.advance(UnitStatus::Discovered);
        discovery.vms.insert(unit.name.clone(), vm);
    }

    ctx.ledger.info(format!(
        "Discovered {} on {} datastore(s): {}",
        vm_count(units.len()),
        discovery.datastores.len(),
        discovery.datastores.join(", ")
    ));
    Ok(discovery)
}

/// Check that every discovered VM is powered off.
///
/// All violations are collected first. In live mode any violation fails the
/// run; in simulation mode they are reported and the offending units are
/// marked failed so later stages skip them.
pub async fn verify(
    ctx: &StageContext<'_>,
    units: &mut [MigrationUnit],
    discovery: &Discovery,
) -> Result<()> {
    if ctx.config.shutdown_source {
        shutdown_running(ctx, units, discovery).await?;
    }

    let mut violations: Vec<(usize, PowerState)> = Vec::new();

    for idx in units_at(units, UnitStatus::Discovered) {
        ctx.cancel.check()?;
        let unit = &mut units[idx];
        let Some(vm) = discovery.vms.get(&unit.name) else {
            continue;
        };

        let state = ctx.source.power_state(&vm.id).await?;
        if state == PowerState::PoweredOff {
            debug!("{} is powered off", unit.name);
            unit.advance(UnitStatus::Verified);
        } else {
            violations.push((idx, state));
        }
    }

    if violations.is_empty() {
        ctx.ledger
            .success(format!("All {} are powered off", vm_count(units.len())));
        return Ok(());
    }

    let mut names = Vec::with_capacity(violations.len());
    for (idx, state) in &violations {
        let unit = &mut units[*idx];
        let message = format!("VM {} must be powered off before migration (currently {})", unit.name, state);
        if ctx.simulate() {
            ctx.ledger.warning(message);
        } else {
            ctx.ledger.error(message);
        }
        unit.fail(format!("powered on at verification ({})", state));
        names.push(unit.name.clone());
    }

    if ctx.simulate() {
        ctx.ledger.warning(format!(
            "Simulation continues despite {} still running",
            vm_count(violations.len())
        ));
        return Ok(());
    }

    Err(MigrationError::Precondition {
        unit: names.join(", "),
        message: "source VMs must be powered off".to_string(),
    })
}

/// Offer to power off source VMs that are still running.
async fn shutdown_running(
    ctx: &StageContext<'_>,
    units: &[MigrationUnit],
    discovery: &Discovery,
) -> Result<()> {
    let mut running = Vec::new();
    for unit in units.iter().filter(|u| u.is_at(UnitStatus::Discovered)) {
        if let Some(vm) = discovery.vms.get(&unit.name) {
            if ctx.source.power_state(&vm.id).await? != PowerState::PoweredOff {
                running.push(vm);
            }
        }
    }
    if running.is_empty() {
        return Ok(());
    }

    if ctx.simulate() {
        for vm in &running {
            ctx.what_if(format!("power off source VM {}", vm.name));
        }
        return Ok(());
    }

    let prompt = format!(
        "{} still running on the source. Power them off now?",
        vm_count(running.len())
    );
    if !ctx.confirm(&prompt)? {
        ctx.ledger.warning("Source shutdown declined by user");
        return Ok(());
    }

    for vm in running {
        ctx.ledger.info(format!("Powering off source VM {}", vm.name));
        if let Err(e) = ctx.source.power_off(&vm.id).await {
            ctx.ledger
                .error(format!("Failed to power off VM {}: {}", vm.name, e));
            continue;
        }
        let what = format!("VM {} to power off", vm.name);
        let source = ctx.source;
        let vm_id = vm.id.as_str();
        let waited = poll_until(&ctx.config.power_poll, ctx.cancel, &what, || async move {
            let state = source.power_state(vm_id).await?;
            Ok((state == PowerState::PoweredOff).then_some(()))
        })
        .await;
        if let Err(e) = waited {
            ctx.ledger.warning(format!("{}", e));
        }
    }
    Ok(())
}
