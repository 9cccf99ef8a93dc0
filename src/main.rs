// src/main.rs
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use std::{path::Path, time::Instant};
use uuid::Uuid;

use consolidate_lib::{
    config, consolidate,
    db::{self, PgPool},
    matching::name::NicknameDictionary,
    matching, relationships, results::{self, RunStats},
    risk,
};

/// Entity consolidation batch for the document archive: detects duplicate
/// person entities, merges them, rebuilds the co-mention relationship
/// graph, and recomputes risk ratings.
#[derive(Parser, Debug)]
#[command(name = "consolidate", version, about)]
struct Args {
    /// Detect and score but roll back every transaction.
    #[arg(long)]
    dry_run: bool,

    /// Skip the co-mention relationship rebuild; risk scoring reads the
    /// persisted graph instead.
    #[arg(long)]
    skip_relationships: bool,

    /// Skip the risk rating recompute.
    #[arg(long)]
    skip_risk: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = Args::parse();
    info!(
        "Starting entity consolidation pipeline{}",
        if args.dry_run { " [dry run]" } else { "" }
    );
    let start_time = Instant::now();

    // Try to load .env file if it exists
    let env_paths = [".env", ".env.local", "../.env"];
    let mut loaded_env = false;

    for path in env_paths.iter() {
        if Path::new(path).exists() {
            if let Err(e) = db::load_env_from_file(path) {
                warn!("Failed to load environment from {}: {}", path, e);
            } else {
                info!("Loaded environment variables from {}", path);
                loaded_env = true;
                break;
            }
        }
    }

    if !loaded_env {
        info!("No .env file found, using environment variables from system");
    }

    // An unreachable store at startup is fatal.
    let pool = db::connect()
        .await
        .context("Failed to connect to database")?;
    info!("Successfully connected to the database");

    let stats = run_pipeline(&pool, &args).await?;

    info!(
        "Pipeline completed in {:.2?}: {} merges, {} relationship edges, {} entities rated.",
        start_time.elapsed(),
        stats.merges_applied,
        stats.relationship_edges_written,
        stats.entities_scored
    );

    results::generate_report(&pool, &stats).await?;

    Ok(())
}

async fn run_pipeline(pool: &PgPool, args: &Args) -> Result<RunStats> {
    let run_id = Uuid::new_v4().to_string();
    let run_timestamp = Utc::now().naive_utc();
    let mut stats = RunStats::new(run_id, run_timestamp, args.dry_run);

    let dictionary = NicknameDictionary::new();

    // Phase 1: Merge candidate detection
    info!("Phase 1: Merge candidate detection");
    let phase1_start = Instant::now();
    {
        let conn = pool
            .get()
            .await
            .context("Failed to get DB connection for entity count")?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM public.entity WHERE entity_type = 'person'",
                &[],
            )
            .await
            .context("Failed to count person entities")?;
        stats.total_entities = row.get::<_, i64>(0) as usize;
    }
    let candidates = matching::name::find_matches(pool, &dictionary).await?;
    stats.candidates_found = candidates.len();
    stats.detection_time = phase1_start.elapsed().as_secs_f64();
    info!(
        "Found {} candidates across {} entities in {:.2?}. Phase 1 complete.",
        stats.candidates_found,
        stats.total_entities,
        phase1_start.elapsed()
    );

    // Phase 2: Chain resolution
    info!("Phase 2: Merge chain resolution");
    let plan = consolidate::resolve_chains(candidates);
    stats.merges_planned = plan.candidates.len();
    info!(
        "{} candidates survive chain resolution. Phase 2 complete.",
        stats.merges_planned
    );

    // Phase 3: Merge execution
    info!("Phase 3: Merge execution");
    let phase3_start = Instant::now();
    let merge_report = consolidate::apply_merges(pool, &plan.candidates, args.dry_run).await?;
    stats.merges_applied = merge_report.applied;
    stats.merges_failed = merge_report.failed;
    stats.mentions_transferred = merge_report.mentions_transferred;
    stats.merge_time = phase3_start.elapsed().as_secs_f64();
    info!(
        "{} merges applied, {} failed in {:.2?}. Phase 3 complete.",
        stats.merges_applied,
        stats.merges_failed,
        phase3_start.elapsed()
    );

    // Phase 4: Relationship rebuild
    let graph = if args.skip_relationships {
        info!("Phase 4: Relationship rebuild skipped by flag; loading persisted graph.");
        relationships::load_graph(pool).await?
    } else {
        info!("Phase 4: Co-mention relationship rebuild");
        let phase4_start = Instant::now();
        let (edges_written, graph) = relationships::rebuild(pool, args.dry_run).await?;
        stats.relationship_edges_written = edges_written;
        stats.relationship_time = phase4_start.elapsed().as_secs_f64();
        info!(
            "{} co-mention edges written in {:.2?}. Phase 4 complete.",
            edges_written,
            phase4_start.elapsed()
        );
        graph
    };

    // Phase 5: Risk recompute
    if args.skip_risk {
        info!("Phase 5: Risk recompute skipped by flag.");
    } else {
        info!("Phase 5: Risk rating recompute");
        let phase5_start = Instant::now();
        let anchors = {
            let conn = pool
                .get()
                .await
                .context("Failed to get DB connection for anchor resolution")?;
            db::resolve_anchor_ids(&*conn, &config::ANCHOR_NAMES).await?
        };
        let summary = risk::recompute(pool, &graph, &anchors, args.dry_run).await?;
        stats.entities_scored = summary.entities_scored;
        stats.rating_distribution = summary.rating_distribution;
        stats.risk_time = phase5_start.elapsed().as_secs_f64();
        info!(
            "{} entities rated in {:.2?}. Phase 5 complete.",
            stats.entities_scored,
            phase5_start.elapsed()
        );
    }

    stats.total_processing_time =
        stats.detection_time + stats.merge_time + stats.relationship_time + stats.risk_time;

    Ok(stats)
}
