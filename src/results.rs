// src/results.rs

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;

use crate::db::PgPool;

/// Complete run statistics, assembled phase by phase and persisted with the
/// run record.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub run_id: String,
    pub run_timestamp: NaiveDateTime,
    pub dry_run: bool,

    pub total_entities: usize,
    pub candidates_found: usize,
    pub merges_planned: usize,
    pub merges_applied: usize,
    pub merges_failed: usize,
    pub mentions_transferred: i64,
    pub relationship_edges_written: usize,
    pub entities_scored: usize,
    /// Index 0 holds the count of rating-1 entities, index 4 rating-5.
    pub rating_distribution: [usize; 5],

    pub detection_time: f64,
    pub merge_time: f64,
    pub relationship_time: f64,
    pub risk_time: f64,
    pub total_processing_time: f64,
}

impl RunStats {
    pub fn new(run_id: String, run_timestamp: NaiveDateTime, dry_run: bool) -> Self {
        Self {
            run_id,
            run_timestamp,
            dry_run,
            total_entities: 0,
            candidates_found: 0,
            merges_planned: 0,
            merges_applied: 0,
            merges_failed: 0,
            mentions_transferred: 0,
            relationship_edges_written: 0,
            entities_scored: 0,
            rating_distribution: [0; 5],
            detection_time: 0.0,
            merge_time: 0.0,
            relationship_time: 0.0,
            risk_time: 0.0,
            total_processing_time: 0.0,
        }
    }
}

async fn store_run_stats(pool: &PgPool, stats: &RunStats) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for storing run stats")?;

    const INSERT_RUN_SQL: &str = "
        INSERT INTO public.pipeline_run (
            id, run_timestamp, dry_run,
            total_entities, candidates_found, merges_applied, merges_failed,
            mentions_transferred, relationship_edges_written, entities_scored,
            rating_1_count, rating_2_count, rating_3_count, rating_4_count, rating_5_count,
            detection_time, merge_time, relationship_time, risk_time, total_processing_time
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
    ";
    conn.execute(
        INSERT_RUN_SQL,
        &[
            &stats.run_id,
            &stats.run_timestamp,
            &stats.dry_run,
            &(stats.total_entities as i64),
            &(stats.candidates_found as i64),
            &(stats.merges_applied as i64),
            &(stats.merges_failed as i64),
            &stats.mentions_transferred,
            &(stats.relationship_edges_written as i64),
            &(stats.entities_scored as i64),
            &(stats.rating_distribution[0] as i64),
            &(stats.rating_distribution[1] as i64),
            &(stats.rating_distribution[2] as i64),
            &(stats.rating_distribution[3] as i64),
            &(stats.rating_distribution[4] as i64),
            &stats.detection_time,
            &stats.merge_time,
            &stats.relationship_time,
            &stats.risk_time,
            &stats.total_processing_time,
        ],
    )
    .await
    .context("Failed to insert pipeline run record")?;

    info!("Run record stored with run_id: {}", stats.run_id);
    Ok(())
}

fn print_report(stats: &RunStats) {
    println!("\n========== ENTITY CONSOLIDATION RUN REPORT ==========");
    println!("Run ID: {}", stats.run_id);
    println!("Timestamp: {}", stats.run_timestamp);
    if stats.dry_run {
        println!("Mode: DRY RUN (no changes were committed)");
    }

    println!("\n--- DEDUPLICATION ---");
    println!("Person entities examined: {}", stats.total_entities);
    println!("Merge candidates found: {}", stats.candidates_found);
    println!("Candidates surviving chain resolution: {}", stats.merges_planned);
    println!(
        "Merges {}: {}",
        if stats.dry_run { "simulated" } else { "applied" },
        stats.merges_applied
    );
    println!("Merges failed: {}", stats.merges_failed);
    println!("Mentions transferred: {}", stats.mentions_transferred);

    println!("\n--- RELATIONSHIPS ---");
    println!(
        "Co-mention edges written: {}",
        stats.relationship_edges_written
    );

    println!("\n--- RISK RATINGS ---");
    println!("Entities scored: {}", stats.entities_scored);
    for (idx, count) in stats.rating_distribution.iter().enumerate() {
        println!("  Rating {}: {}", idx + 1, count);
    }

    println!("\n--- TIMING INFORMATION ---");
    println!("Candidate detection time: {:.2} seconds", stats.detection_time);
    println!("Merge execution time: {:.2} seconds", stats.merge_time);
    println!(
        "Relationship rebuild time: {:.2} seconds",
        stats.relationship_time
    );
    println!("Risk recompute time: {:.2} seconds", stats.risk_time);
    println!(
        "Total processing time: {:.2} seconds",
        stats.total_processing_time
    );
    println!("\n=====================================================\n");
}

/// Persists the run record (skipped in dry-run mode) and prints the
/// console summary.
pub async fn generate_report(pool: &PgPool, stats: &RunStats) -> Result<()> {
    if !stats.dry_run {
        store_run_stats(pool, stats).await?;
    } else {
        info!("[dry run] Skipping run record persistence.");
    }
    print_report(stats);
    Ok(())
}
