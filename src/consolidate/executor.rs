// src/consolidate/executor.rs

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;
use std::time::Instant;
use tokio_postgres::Transaction;

use crate::db::{self, PgPool, DEPENDENT_TABLES};
use crate::models::{EntityId, MergeCandidate, NewMergeAudit};

/// Outcome of one merge batch.
#[derive(Debug, Default, Clone)]
pub struct MergeReport {
    /// Merges committed (or, in dry-run mode, fully simulated and rolled
    /// back)
    pub applied: usize,
    pub failed: usize,
    pub mentions_transferred: i64,
}

struct EntityRow {
    name: String,
    mention_count: i64,
}

/// Applies a resolved merge plan, one transaction per candidate, in plan
/// order.
///
/// Plan order matters: chain resolution guarantees a candidate's target was
/// not yet consumed when the candidate was emitted, so applying candidates
/// in the same order keeps every target live until it is referenced.
///
/// One failed merge rolls back its own transaction, is logged and counted,
/// and the batch continues. With `dry_run` set, every transaction is rolled
/// back after executing, and outcomes are logged as advisories.
pub async fn apply_merges(
    pool: &PgPool,
    candidates: &[MergeCandidate],
    dry_run: bool,
) -> Result<MergeReport> {
    info!(
        "Applying {} resolved merge candidates{}...",
        candidates.len(),
        if dry_run { " [dry run]" } else { "" }
    );
    let start_time = Instant::now();
    let mut report = MergeReport::default();

    for candidate in candidates {
        let mut conn = pool
            .get()
            .await
            .context("Failed to get DB connection for merge")?;
        let tx = match conn.transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(
                    "Could not open transaction for merge {} -> {}: {}",
                    candidate.source_id, candidate.target_id, e
                );
                report.failed += 1;
                continue;
            }
        };

        match execute_merge(&tx, candidate).await {
            Ok(audit) => {
                let finish = if dry_run {
                    tx.rollback()
                        .await
                        .context("Failed to roll back dry-run merge transaction")
                } else {
                    match db::insert_merge_audit(&tx, &audit).await {
                        Ok(_) => tx.commit().await.context("Failed to commit merge transaction"),
                        Err(e) => Err(e),
                    }
                };
                match finish {
                    Ok(()) => {
                        if dry_run {
                            info!(
                                "[dry run] Would merge '{}' ({}) into '{}' ({}), transferring {} mentions.",
                                audit.source_name,
                                audit.source_id,
                                audit.target_name,
                                audit.target_id,
                                audit.mentions_transferred
                            );
                        } else {
                            info!(
                                "Merged '{}' ({}) into '{}' ({}), transferred {} mentions.",
                                audit.source_name,
                                audit.source_id,
                                audit.target_name,
                                audit.target_id,
                                audit.mentions_transferred
                            );
                        }
                        report.applied += 1;
                        report.mentions_transferred += audit.mentions_transferred;
                    }
                    Err(e) => {
                        warn!(
                            "Merge {} -> {} failed at finalization: {:#}",
                            candidate.source_id, candidate.target_id, e
                        );
                        report.failed += 1;
                    }
                }
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                drop(tx);
                if dry_run {
                    info!(
                        "[dry run] Merge {} -> {} would fail: {:#}",
                        candidate.source_id, candidate.target_id, e
                    );
                } else {
                    warn!(
                        "Merge {} -> {} failed and was rolled back: {:#}",
                        candidate.source_id, candidate.target_id, e
                    );
                }
                report.failed += 1;
            }
        }
    }

    info!(
        "Merge batch finished in {:.2?}: {} applied, {} failed, {} mentions transferred.",
        start_time.elapsed(),
        report.applied,
        report.failed,
        report.mentions_transferred
    );
    Ok(report)
}

/// Executes the multi-table surgery for one merge inside the caller's
/// transaction and returns the audit record to append. Steps, in order:
/// migrate dependent-table rows, migrate the one-to-one person sub-profile,
/// accumulate the source's mentions onto the target, delete the source.
async fn execute_merge(
    tx: &Transaction<'_>,
    candidate: &MergeCandidate,
) -> Result<NewMergeAudit> {
    let source = fetch_entity_for_update(tx, candidate.source_id)
        .await?
        .ok_or_else(|| anyhow!("source entity {} no longer exists", candidate.source_id))?;
    let target = fetch_entity_for_update(tx, candidate.target_id)
        .await?
        .ok_or_else(|| anyhow!("target entity {} no longer exists", candidate.target_id))?;

    // 1. Dependent tables, blind or conflict-aware per the registry.
    let mut table_counts = serde_json::Map::new();
    for dep in DEPENDENT_TABLES {
        let (moved, dropped) = match dep.unique_column {
            None => {
                let moved = db::repoint_rows(
                    tx,
                    dep.table,
                    dep.entity_column,
                    candidate.source_id,
                    candidate.target_id,
                )
                .await?;
                (moved, 0)
            }
            Some(unique_column) => {
                db::update_or_delete_on_conflict(
                    tx,
                    dep.table,
                    dep.entity_column,
                    unique_column,
                    candidate.source_id,
                    candidate.target_id,
                )
                .await?
            }
        };
        debug!(
            "Merge {} -> {}: {} rows of {} repointed, {} dropped.",
            candidate.source_id, candidate.target_id, moved, dep.table, dropped
        );
        table_counts.insert(
            dep.table.to_string(),
            json!({ "moved": moved, "dropped": dropped }),
        );
    }

    // 2. One-to-one person sub-profile and its alias children.
    let (alias_moved, alias_dropped) = merge_person_profile(tx, candidate).await?;
    table_counts.insert(
        "person_alias".to_string(),
        json!({ "moved": alias_moved, "dropped": alias_dropped }),
    );

    // 3. Accumulate mentions onto the target.
    let now = Utc::now().naive_utc();
    tx.execute(
        "UPDATE public.entity
         SET mention_count = mention_count + $1, updated_at = $2
         WHERE id = $3",
        &[&source.mention_count, &now, &candidate.target_id],
    )
    .await
    .context("Failed to accumulate mention count onto target")?;

    // 4. Delete the source entity row.
    let deleted = tx
        .execute(
            "DELETE FROM public.entity WHERE id = $1",
            &[&candidate.source_id],
        )
        .await
        .context("Failed to delete source entity")?;
    if deleted != 1 {
        return Err(anyhow!(
            "expected to delete exactly one source entity row, deleted {}",
            deleted
        ));
    }

    Ok(NewMergeAudit {
        source_id: candidate.source_id,
        source_name: source.name,
        target_id: candidate.target_id,
        target_name: target.name,
        mentions_transferred: source.mention_count,
        confidence: candidate.confidence,
        method: candidate.method.as_str().to_string(),
        details: Some(json!({
            "reason": candidate.reason,
            "tables": table_counts,
        })),
    })
}

/// Migrates the `person` sub-profile: repointed in place when the target
/// has none, otherwise the source's profile row is deleted after its alias
/// children are migrated conflict-aware. Returns the alias `(moved,
/// dropped)` counts.
async fn merge_person_profile(
    tx: &Transaction<'_>,
    candidate: &MergeCandidate,
) -> Result<(u64, u64)> {
    let alias_counts = db::update_or_delete_on_conflict(
        tx,
        "person_alias",
        "entity_id",
        "alias",
        candidate.source_id,
        candidate.target_id,
    )
    .await?;

    let target_has_profile = tx
        .query_opt(
            "SELECT entity_id FROM public.person WHERE entity_id = $1",
            &[&candidate.target_id],
        )
        .await
        .context("Failed to check target person profile")?
        .is_some();

    if target_has_profile {
        tx.execute(
            "DELETE FROM public.person WHERE entity_id = $1",
            &[&candidate.source_id],
        )
        .await
        .context("Failed to delete source person profile")?;
    } else {
        tx.execute(
            "UPDATE public.person SET entity_id = $1 WHERE entity_id = $2",
            &[&candidate.target_id, &candidate.source_id],
        )
        .await
        .context("Failed to repoint person profile")?;
    }

    Ok(alias_counts)
}

async fn fetch_entity_for_update(
    tx: &Transaction<'_>,
    id: EntityId,
) -> Result<Option<EntityRow>> {
    let row = tx
        .query_opt(
            "SELECT name, mention_count FROM public.entity WHERE id = $1 FOR UPDATE",
            &[&id],
        )
        .await
        .with_context(|| format!("Failed to lock entity {} for merge", id))?;
    Ok(row.map(|row| EntityRow {
        name: row.get("name"),
        mention_count: row.get("mention_count"),
    }))
}
