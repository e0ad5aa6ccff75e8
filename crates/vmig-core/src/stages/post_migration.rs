//! Post-migration: tag the started VMs for backup, cut the source VMs off the
//! network and remove them from the source inventory.
//!
//! Each step has its own confirmation. Declining one never prevents the next
//! from being offered.

use super::{units_at, vm_count, Discovery, StageContext};
use crate::error::Result;
use crate::models::{MigrationUnit, UnitStatus};

/// Indices of units whose target VM was started, in batch order.
fn started_units(units: &[MigrationUnit]) -> Vec<usize> {
    units
        .iter()
        .enumerate()
        .filter(|(_, u)| u.reached(UnitStatus::Started))
        .map(|(i, _)| i)
        .collect()
}

/// Attach the backup tag to every started target VM.
///
/// The category and tag are created when missing. Returns the number of
/// tagged units; zero when the user declines.
pub async fn tag(ctx: &StageContext<'_>, units: &mut [MigrationUnit]) -> Result<usize> {
    let candidates = units_at(units, UnitStatus::Started);
    if candidates.is_empty() {
        ctx.ledger.warning("No started VMs to tag");
        return Ok(0);
    }

    let category = ctx.config.backup_category.as_str();
    let tag_name = ctx.config.backup_tag.as_str();

    if ctx.simulate() {
        ctx.what_if(format!("ensure tag category {} with tag {}", category, tag_name));
        for idx in candidates.iter().copied() {
            let unit = &mut units[idx];
            ctx.what_if(format!("tag VM {} with {}/{}", unit.name, category, tag_name));
            unit.advance(UnitStatus::Tagged);
        }
        return Ok(candidates.len());
    }

    let prompt = format!(
        "Tag {} on the target with {}/{}?",
        vm_count(candidates.len()),
        category,
        tag_name
    );
    if !ctx.confirm(&prompt)? {
        ctx.ledger.warning("Backup tagging declined by user");
        return Ok(0);
    }

    let tag_id = match ensure_backup_tag(ctx, category, tag_name).await {
        Ok(id) => id,
        Err(e) => {
            ctx.ledger.error(format!(
                "Could not prepare backup tag {}/{}: {}",
                category, tag_name, e
            ));
            return Ok(0);
        }
    };

    let mut tagged = 0;
    for idx in candidates {
        ctx.cancel.check()?;
        let unit = &mut units[idx];
        let Some(vm_id) = unit.target_vm_id.as_deref() else {
            ctx.ledger
                .error(format!("VM {} has no target id; cannot tag", unit.name));
            continue;
        };
        match ctx.target.attach_tag(&tag_id, vm_id).await {
            Ok(()) => {
                ctx.ledger
                    .success(format!("Tagged VM {} with {}", unit.name, tag_name));
                unit.advance(UnitStatus::Tagged);
                tagged += 1;
            }
            Err(e) => ctx
                .ledger
                .error(format!("Failed to tag VM {}: {}", unit.name, e)),
        }
    }
    Ok(tagged)
}

async fn ensure_backup_tag(ctx: &StageContext<'_>, category: &str, tag: &str) -> Result<String> {
    let category_id = ctx.target.ensure_category(category).await?;
    ctx.target.ensure_tag(&category_id, tag).await
}

/// Disconnect every network adapter of the source VMs behind started units.
///
/// Returns the names of the units whose source VM was disconnected; empty
/// when the user declines.
pub async fn disconnect(
    ctx: &StageContext<'_>,
    units: &mut [MigrationUnit],
    discovery: &Discovery,
) -> Result<Vec<String>> {
    let candidates = started_units(units);
    let mut done = Vec::new();
    if candidates.is_empty() {
        ctx.ledger.warning("No migrated VMs to disconnect on the source");
        return Ok(done);
    }

    if !ctx.simulate() {
        let prompt = format!(
            "Disconnect all network adapters of {} on the source?",
            vm_count(candidates.len())
        );
        if !ctx.confirm(&prompt)? {
            ctx.ledger
                .warning("Source network disconnect declined by user");
            return Ok(done);
        }
    }

    for idx in candidates {
        ctx.cancel.check()?;
        let unit = &mut units[idx];
        let Some(vm) = discovery.vms.get(&unit.name) else {
            continue;
        };

        let adapters = match ctx.source.list_adapters(&vm.id).await {
            Ok(adapters) => adapters,
            Err(e) => {
                ctx.ledger.error(format!(
                    "Failed to list adapters of source VM {}: {}",
                    unit.name, e
                ));
                continue;
            }
        };

        let mut clean = true;
        for adapter in &adapters {
            if ctx.simulate() {
                ctx.what_if(format!(
                    "disconnect {} of source VM {}",
                    adapter.label, unit.name
                ));
                continue;
            }
            if let Err(e) = ctx.source.disconnect_adapter(&vm.id, &adapter.id).await {
                ctx.ledger.error(format!(
                    "Failed to disconnect {} of source VM {}: {}",
                    adapter.label, unit.name, e
                ));
                clean = false;
            }
        }

        if clean {
            if !ctx.simulate() {
                ctx.ledger.success(format!(
                    "Disconnected {} adapter(s) of source VM {}",
                    adapters.len(),
                    unit.name
                ));
            }
            unit.advance(UnitStatus::Disconnected);
            done.push(unit.name.clone());
        }
    }
    Ok(done)
}

/// Remove the source VMs behind started units from the source inventory.
///
/// Files on the datastore are kept. Returns the names of the deregistered
/// units; empty when the user declines.
pub async fn deregister(
    ctx: &StageContext<'_>,
    units: &mut [MigrationUnit],
    discovery: &Discovery,
) -> Result<Vec<String>> {
    let candidates = started_units(units);
    let mut done = Vec::new();
    if candidates.is_empty() {
        ctx.ledger.warning("No migrated VMs to deregister on the source");
        return Ok(done);
    }

    if !ctx.simulate() {
        let prompt = format!(
            "WARNING: this removes {} from the source inventory. Their files are kept, \
             but re-registering them is a manual job. Deregister now?",
            vm_count(candidates.len())
        );
        if !ctx.confirm(&prompt)? {
            ctx.ledger.warning("Source deregistration declined by user");
            return Ok(done);
        }
    }

    for idx in candidates {
        ctx.cancel.check()?;
        let unit = &mut units[idx];
        let Some(vm) = discovery.vms.get(&unit.name) else {
            continue;
        };

        if ctx.simulate() {
            ctx.what_if(format!("unregister source VM {}", unit.name));
        } else if let Err(e) = ctx.source.unregister_vm(&vm.id).await {
            ctx.ledger
                .error(format!("Failed to deregister source VM {}: {}", unit.name, e));
            continue;
        } else {
            ctx.ledger
                .success(format!("Deregistered source VM {}", unit.name));
        }
        unit.advance(UnitStatus::Deregistered);
        done.push(unit.name.clone());
    }
    Ok(done)
}
