//! SnapMirror cutover: update, wait, quiesce and break every relationship
//! backing a verified unit's datastores.

use std::collections::HashSet;
use tracing::debug;

use super::{units_at, Discovery, StageContext};
use crate::config::SequencerConfig;
use crate::error::{MigrationError, Result};
use crate::matching::{match_relationships, MatchKind};
use crate::models::{MigrationUnit, ReplicationRelationship, UnitStatus};
use crate::poll::{poll_until, PollConfig};

/// Outcome of the replication step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Relationships driven to broken-off (or simulated).
    pub processed: usize,
    /// Relationships that failed along the way.
    pub failed: usize,
    /// Datastores with no matching relationship.
    pub unmatched: Vec<String>,
}

/// Break the replication of every datastore used by a `Verified` unit.
pub async fn replicate(
    ctx: &StageContext<'_>,
    units: &mut [MigrationUnit],
    discovery: &Discovery,
) -> Result<ReplicationReport> {
    let candidates = units_at(units, UnitStatus::Verified);
    let mut report = ReplicationReport::default();
    if candidates.is_empty() {
        ctx.ledger.warning("No verified VMs to replicate");
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

    let relationships = ctx.storage.list_relationships().await?;
    debug!("{} SnapMirror relationship(s) visible", relationships.len());

    let mut failed_datastores: HashSet<&str> = HashSet::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for ds in datastores {
        ctx.cancel.check()?;

        let (matches, kind) = match_relationships(ds, &relationships);
        if matches.is_empty() {
            ctx.ledger.warning(format!(
                "No SnapMirror relationship found for datastore {}; skipping",
                ds
            ));
            report.unmatched.push(ds.to_string());
            continue;
        }
        if kind == Some(MatchKind::Substring) {
            ctx.ledger.warning(format!(
                "Datastore {} matched {} relationship(s) by substring",
                ds,
                matches.len()
            ));
        }

        for rel in matches {
            if !seen.insert(rel.uuid.as_str()) {
                continue;
            }

            if ctx.simulate() {
                if rel.is_broken_off() {
                    log_already_broken_off(ctx, rel);
                } else {
                    ctx.what_if(format!(
                        "update, wait for transfer, quiesce and break SnapMirror {} -> {}",
                        rel.source_path, rel.destination_path
                    ));
                }
                report.processed += 1;
                continue;
            }

            match drive_to_broken_off(ctx, rel).await {
                Ok(()) => {
                    ctx.ledger.success(format!(
                        "SnapMirror {} -> {} broken off",
                        rel.source_path, rel.destination_path
                    ));
                    report.processed += 1;
                }
                Err(MigrationError::Cancelled) => return Err(MigrationError::Cancelled),
                Err(e) => {
                    ctx.ledger.error(format!(
                        "SnapMirror {} -> {} failed: {}",
                        rel.source_path, rel.destination_path, e
                    ));
                    report.failed += 1;
                    failed_datastores.insert(ds);
                }
            }
        }
    }

    for idx in candidates {
        let unit = &mut units[idx];
        let broken = discovery
            .datastores_of(&unit.name)
            .iter()
            .find(|ds| failed_datastores.contains(ds.as_str()));
        match broken {
            Some(ds) => unit.fail(format!("replication of datastore {} failed", ds)),
            None => {
                unit.advance(UnitStatus::Replicated);
            }
        }
    }

    ctx.ledger.info(format!(
        "Replication complete: {} processed, {} failed, {} datastore(s) without a relationship",
        report.processed,
        report.failed,
        report.unmatched.len()
    ));
    Ok(report)
}

fn log_already_broken_off(ctx: &StageContext<'_>, rel: &ReplicationRelationship) {
    ctx.ledger.info(format!(
        "SnapMirror to {} is already broken off",
        rel.destination_path
    ));
}

/// Waits after the transfer have their own, shorter bound.
fn settle_poll(config: &PollConfig) -> PollConfig {
    match config.timeout {
        Some(t) if t <= SequencerConfig::QUIESCE_TIMEOUT => config.clone(),
        _ => config.clone().with_timeout(SequencerConfig::QUIESCE_TIMEOUT),
    }
}

async fn drive_to_broken_off(ctx: &StageContext<'_>, rel: &ReplicationRelationship) -> Result<()> {
    let storage = ctx.storage;
    let uuid = rel.uuid.as_str();
    let destination = rel.destination_path.as_str();

    let current = storage.get_relationship(uuid).await?;
    if current.is_broken_off() {
        log_already_broken_off(ctx, &current);
        return Ok(());
    }

    ctx.ledger.info(format!("Updating SnapMirror {} -> {}", rel.source_path, destination));
    storage.update_relationship(&current).await?;

    let what = format!("SnapMirror transfer to {}", destination);
    poll_until(&ctx.config.replication_poll, ctx.cancel, &what, || async move {
        let r = storage.get_relationship(uuid).await?;
        Ok((!r.is_transferring()).then_some(()))
    })
    .await?;

    let settle = settle_poll(&ctx.config.replication_poll);

    ctx.ledger.info(format!("Quiescing SnapMirror to {}", destination));
    storage.quiesce_relationship(&current).await?;
    let what = format!("SnapMirror to {} to quiesce", destination);
    poll_until(&settle, ctx.cancel, &what, || async move {
        let r = storage.get_relationship(uuid).await?;
        Ok(r.is_quiesced().then_some(()))
    })
    .await?;

    ctx.ledger.info(format!("Breaking SnapMirror to {}", destination));
    storage.break_relationship(&current).await?;
    let what = format!("SnapMirror to {} to break", destination);
    poll_until(&settle, ctx.cancel, &what, || async move {
        let r = storage.get_relationship(uuid).await?;
        Ok(r.is_broken_off().then_some(()))
    })
    .await
}
