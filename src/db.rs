// src/db.rs

use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use chrono::Utc;
use log::{debug, info, warn};
use std::time::Duration;
use tokio_postgres::{Config, GenericClient, NoTls};
use uuid::Uuid;

use crate::models::{Document, Entity, EntityId, NewMergeAudit, RelationshipEdge};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

//------------------------------------------------------------------------------
// DEPENDENT-TABLE REGISTRY
//------------------------------------------------------------------------------

/// A table holding a foreign key to `entity.id` that must be migrated when
/// its entity is merged away.
///
/// `unique_column` is the second column of a compound UNIQUE
/// `(entity_column, unique_column)` constraint, when one exists. Tables
/// without one can be repointed blindly; tables with one go through the
/// conflict-aware primitive so the target's existing rows win and the
/// source's redundant duplicates are dropped.
#[derive(Debug, Clone, Copy)]
pub struct DependentTable {
    pub table: &'static str,
    pub entity_column: &'static str,
    pub unique_column: Option<&'static str>,
}

/// Every dependent table the merge executor migrates, in migration order.
/// The one-to-one `person` sub-profile (and its `person_alias` children) is
/// handled separately by the executor.
pub const DEPENDENT_TABLES: [DependentTable; 4] = [
    DependentTable {
        table: "entity_mention",
        entity_column: "entity_id",
        unique_column: None,
    },
    DependentTable {
        table: "entity_media",
        entity_column: "entity_id",
        unique_column: Some("media_id"),
    },
    DependentTable {
        table: "entity_organization",
        entity_column: "entity_id",
        unique_column: Some("organization_id"),
    },
    DependentTable {
        table: "black_book_entry",
        entity_column: "entity_id",
        unique_column: Some("source_page"),
    },
];

//------------------------------------------------------------------------------
// CONNECTION MANAGEMENT
//------------------------------------------------------------------------------

/// Reads environment variables and constructs a PostgreSQL config.
fn build_pg_config() -> Config {
    let mut config = Config::new();
    let host = std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port_str = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
    let port = port_str.parse::<u16>().unwrap_or(5432);
    let dbname = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "archive".to_string());
    let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();

    info!(
        "DB Config: Host={}, Port={}, DB={}, User={}",
        host, port, dbname, user
    );
    config
        .host(&host)
        .port(port)
        .dbname(&dbname)
        .user(&user)
        .password(&password);
    config.application_name("entity_consolidation");
    config.connect_timeout(Duration::from_secs(10));
    config
}

/// Initializes the database connection pool.
pub async fn connect() -> Result<PgPool> {
    let config = build_pg_config();
    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(config, NoTls);

    let pool = Pool::builder()
        .max_size(8)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    // Test connection
    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    info!("Database connection pool initialized successfully.");
    Ok(pool.clone())
}

/// Loads environment variables from a .env file.
pub fn load_env_from_file(file_path: &str) -> Result<()> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    info!(
        "Attempting to load environment variables from: {}",
        file_path
    );
    match File::open(file_path) {
        Ok(file) => {
            let reader = BufReader::new(file);
            for line in reader.lines() {
                let line = line.context("Failed to read line from env file")?;
                if line.starts_with('#') || line.trim().is_empty() {
                    continue;
                }
                if let Some(idx) = line.find('=') {
                    let key = line[..idx].trim();
                    let value = line[idx + 1..].trim().trim_matches('"');
                    if std::env::var(key).is_err() {
                        // Set only if not already set
                        unsafe { std::env::set_var(key, value); }
                        debug!(
                            "Set env var from file: {} = {}",
                            key,
                            if key == "POSTGRES_PASSWORD" {
                                "[hidden]"
                            } else {
                                value
                            }
                        );
                    }
                }
            }
            info!("Successfully processed env file: {}", file_path);
        }
        Err(e) => {
            warn!(
                "Could not open env file '{}': {}. Proceeding with system environment variables.",
                file_path, e
            );
            // Not returning an error, as .env file is optional.
        }
    }
    Ok(())
}

//------------------------------------------------------------------------------
// READ PATHS
//------------------------------------------------------------------------------

/// Fetches all person entities that have a non-empty name.
/// Accepts a GenericClient, which can be a direct connection or transaction.
pub async fn fetch_person_entities(conn: &impl GenericClient) -> Result<Vec<Entity>> {
    let query = "
        SELECT e.id, e.name, e.mention_count, e.is_vip, e.risk_rating
        FROM public.entity e
        WHERE e.entity_type = 'person' AND e.name IS NOT NULL AND e.name != ''
        ORDER BY e.id
    ";
    let rows = conn
        .query(query, &[])
        .await
        .context("Failed to query person entities")?;

    rows.iter()
        .map(|row| {
            Ok(Entity {
                id: row.try_get("id").context("Failed to get 'id' for entity")?,
                name: row
                    .try_get("name")
                    .context("Failed to get 'name' for entity")?,
                mention_count: row
                    .try_get("mention_count")
                    .context("Failed to get 'mention_count' for entity")?,
                is_vip: row
                    .try_get("is_vip")
                    .context("Failed to get 'is_vip' for entity")?,
                risk_rating: row
                    .try_get("risk_rating")
                    .context("Failed to get 'risk_rating' for entity")?,
            })
        })
        .collect::<Result<Vec<Entity>>>()
}

/// Fetches all documents with non-empty text content.
pub async fn fetch_documents(conn: &impl GenericClient) -> Result<Vec<Document>> {
    let query = "
        SELECT d.id, d.content
        FROM public.document d
        WHERE d.content IS NOT NULL AND d.content != ''
    ";
    let rows = conn
        .query(query, &[])
        .await
        .context("Failed to query documents")?;

    rows.iter()
        .map(|row| {
            Ok(Document {
                id: row
                    .try_get("id")
                    .context("Failed to get 'id' for document")?,
                content: row
                    .try_get("content")
                    .context("Failed to get 'content' for document")?,
            })
        })
        .collect::<Result<Vec<Document>>>()
}

/// Resolves the configured anchor names to live entity ids. Anchors absent
/// from the entity table are excluded with a debug log, not an error.
pub async fn resolve_anchor_ids(
    conn: &impl GenericClient,
    anchor_names: &[&str],
) -> Result<Vec<EntityId>> {
    let mut ids = Vec::with_capacity(anchor_names.len());
    for name in anchor_names {
        let row = conn
            .query_opt(
                "SELECT id FROM public.entity WHERE LOWER(name) = LOWER($1)",
                &[name],
            )
            .await
            .with_context(|| format!("Failed to resolve anchor entity '{}'", name))?;
        match row {
            Some(row) => ids.push(row.get("id")),
            None => debug!("Anchor entity '{}' not found in entity table, excluding.", name),
        }
    }
    info!(
        "Resolved {}/{} anchor entities.",
        ids.len(),
        anchor_names.len()
    );
    Ok(ids)
}

//------------------------------------------------------------------------------
// MERGE PRIMITIVES
//------------------------------------------------------------------------------

/// Repoints every row of `table` from the source entity to the target,
/// honoring a compound UNIQUE `(entity_column, unique_column)` constraint:
/// rows whose unique value the target already holds are skipped by the
/// UPDATE and then deleted, so the target's data always wins and the
/// source's redundant duplicates are discarded instead of aborting.
///
/// Returns `(rows_repointed, rows_dropped)`.
pub async fn update_or_delete_on_conflict(
    conn: &impl GenericClient,
    table: &str,
    entity_column: &str,
    unique_column: &str,
    source_id: EntityId,
    target_id: EntityId,
) -> Result<(u64, u64)> {
    let update_sql = format!(
        "UPDATE public.{t} SET {e} = $1
         WHERE {e} = $2
           AND {u} NOT IN (SELECT {u} FROM public.{t} WHERE {e} = $1)",
        t = table,
        e = entity_column,
        u = unique_column,
    );
    let moved = conn
        .execute(&update_sql, &[&target_id, &source_id])
        .await
        .with_context(|| format!("Failed conflict-aware repoint of {}", table))?;

    let delete_sql = format!(
        "DELETE FROM public.{t} WHERE {e} = $1",
        t = table,
        e = entity_column,
    );
    let dropped = conn
        .execute(&delete_sql, &[&source_id])
        .await
        .with_context(|| format!("Failed to drop conflicting {} rows", table))?;

    Ok((moved, dropped))
}

/// Blind repoint for tables without a secondary uniqueness constraint.
/// Returns the number of rows repointed.
pub async fn repoint_rows(
    conn: &impl GenericClient,
    table: &str,
    entity_column: &str,
    source_id: EntityId,
    target_id: EntityId,
) -> Result<u64> {
    let sql = format!(
        "UPDATE public.{t} SET {e} = $1 WHERE {e} = $2",
        t = table,
        e = entity_column,
    );
    conn.execute(&sql, &[&target_id, &source_id])
        .await
        .with_context(|| format!("Failed to repoint {} rows", table))
}

/// Appends one merge audit record. Called inside the merge transaction so
/// the audit entry commits atomically with the merge itself.
pub async fn insert_merge_audit(
    conn: &impl GenericClient,
    audit: &NewMergeAudit,
) -> Result<String> {
    const INSERT_AUDIT_SQL: &str = "
        INSERT INTO public.merge_audit (
            id, source_id, source_name, target_id, target_name,
            mentions_transferred, confidence, method, details, merged_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id";
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().naive_utc();
    let row = conn
        .query_one(
            INSERT_AUDIT_SQL,
            &[
                &id,
                &audit.source_id,
                &audit.source_name,
                &audit.target_id,
                &audit.target_name,
                &audit.mentions_transferred,
                &audit.confidence,
                &audit.method,
                &audit.details,
                &now,
            ],
        )
        .await
        .context("Failed to insert merge_audit record")?;
    Ok(row.get(0))
}

//------------------------------------------------------------------------------
// RELATIONSHIP PATHS
//------------------------------------------------------------------------------

/// Removes relationship edges that reference entities no longer present,
/// then clears all co-mention edges ahead of a from-scratch rebuild.
pub async fn clear_co_mention_edges(conn: &impl GenericClient, rel_type: &str) -> Result<u64> {
    let dangling = conn
        .execute(
            "DELETE FROM public.relationship r
             WHERE NOT EXISTS (SELECT 1 FROM public.entity e WHERE e.id = r.source_id)
                OR NOT EXISTS (SELECT 1 FROM public.entity e WHERE e.id = r.target_id)",
            &[],
        )
        .await
        .context("Failed to purge dangling relationship edges")?;
    if dangling > 0 {
        warn!("Purged {} relationship edges with dead endpoints.", dangling);
    }

    conn.execute(
        "DELETE FROM public.relationship WHERE rel_type = $1",
        &[&rel_type],
    )
    .await
    .context("Failed to clear co-mention edges")
}

/// Inserts or refreshes one relationship edge.
pub async fn upsert_relationship(
    conn: &impl GenericClient,
    edge: &RelationshipEdge,
) -> Result<()> {
    const UPSERT_SQL: &str = "
        INSERT INTO public.relationship (source_id, target_id, rel_type, strength, confidence)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (source_id, target_id, rel_type)
        DO UPDATE SET strength = EXCLUDED.strength, confidence = EXCLUDED.confidence";
    conn.execute(
        UPSERT_SQL,
        &[
            &edge.source_id,
            &edge.target_id,
            &edge.rel_type,
            &edge.strength,
            &edge.confidence,
        ],
    )
    .await
    .with_context(|| {
        format!(
            "Failed to upsert relationship ({}, {})",
            edge.source_id, edge.target_id
        )
    })?;
    Ok(())
}

//------------------------------------------------------------------------------
// RISK PATHS
//------------------------------------------------------------------------------

/// One row of per-entity aggregates feeding the risk model. Anchor adjacency
/// comes from the in-memory co-mention graph, not from this query.
#[derive(Debug)]
pub struct RiskSignalRow {
    pub entity_id: EntityId,
    pub mention_count: i64,
    pub is_vip: bool,
    pub prior_rating: i32,
    pub media_count: i64,
    pub codeword_mentions: i64,
    pub avg_significance: f64,
}

/// Fetches the stored aggregates for every person entity in one pass.
/// `keyword_patterns` are ILIKE patterns built from the sensitive-keyword
/// list (e.g. `%island%`).
pub async fn fetch_risk_signals(
    conn: &impl GenericClient,
    keyword_patterns: &[String],
) -> Result<Vec<RiskSignalRow>> {
    const SIGNALS_SQL: &str = "
        SELECT
            e.id,
            e.mention_count,
            e.is_vip,
            e.risk_rating,
            COALESCE(media.media_count, 0) AS media_count,
            COALESCE(mentions.codeword_mentions, 0) AS codeword_mentions,
            COALESCE(mentions.avg_significance, 0.0) AS avg_significance
        FROM public.entity e
        LEFT JOIN (
            SELECT entity_id, COUNT(*) AS media_count
            FROM public.entity_media
            GROUP BY entity_id
        ) media ON media.entity_id = e.id
        LEFT JOIN (
            SELECT entity_id,
                   COUNT(*) FILTER (WHERE context ILIKE ANY($1)) AS codeword_mentions,
                   COALESCE(AVG(significance), 0.0)::float8 AS avg_significance
            FROM public.entity_mention
            GROUP BY entity_id
        ) mentions ON mentions.entity_id = e.id
        WHERE e.entity_type = 'person'
    ";
    let rows = conn
        .query(SIGNALS_SQL, &[&keyword_patterns])
        .await
        .context("Failed to query per-entity risk signals")?;

    let mut signals = Vec::with_capacity(rows.len());
    for row in rows {
        signals.push(RiskSignalRow {
            entity_id: row.get(0),
            mention_count: row.get(1),
            is_vip: row.get(2),
            prior_rating: row.get(3),
            media_count: row.get(4),
            codeword_mentions: row.get(5),
            avg_significance: row.get(6),
        });
    }
    Ok(signals)
}

/// Writes one entity's recomputed rating and level.
pub async fn update_entity_risk(
    conn: &impl GenericClient,
    id: EntityId,
    rating: i32,
    level: &str,
) -> Result<()> {
    let now = Utc::now().naive_utc();
    conn.execute(
        "UPDATE public.entity SET risk_rating = $1, risk_level = $2, updated_at = $3 WHERE id = $4",
        &[&rating, &level, &now, &id],
    )
    .await
    .with_context(|| format!("Failed to update risk for entity {}", id))?;
    Ok(())
}
