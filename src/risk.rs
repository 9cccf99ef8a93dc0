// src/risk.rs

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashSet;
use std::time::Instant;

use crate::config;
use crate::db::{self, PgPool};
use crate::models::{EntityId, RiskLevel, RiskSignals};
use crate::relationships::RelationshipGraph;

/// One entity's freshly computed risk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScore {
    pub total: f64,
    pub rating: i32,
    pub level: RiskLevel,
}

/// Rating distribution and level counts for one recompute pass.
#[derive(Debug, Default, Clone)]
pub struct RiskSummary {
    pub entities_scored: usize,
    /// Index 0 holds the count of rating-1 entities, index 4 rating-5.
    pub rating_distribution: [usize; 5],
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Computes the additive composite score and maps it to a 1-5 rating.
///
/// Signals: log-scaled mention exposure, capped proximity to the anchor
/// set, capped media bonus, a flat penalty when any mention co-occurs with
/// a sensitive keyword, and a boost for high average mention significance.
pub fn score(signals: &RiskSignals) -> RiskScore {
    let exposure = ((signals.mention_count + 1) as f64).log10() * config::EXPOSURE_WEIGHT;

    let network = (config::ANCHOR_EDGE_WEIGHT * f64::from(signals.anchor_edge_count)
        + signals.anchor_edge_strength as f64 / config::ANCHOR_STRENGTH_DIVISOR)
        .min(config::NETWORK_SCORE_CAP);

    let media = (signals.media_count as f64 * config::MEDIA_WEIGHT).min(config::MEDIA_SCORE_CAP);

    let codeword = if signals.codeword_mentions > 0 {
        config::CODEWORD_PENALTY
    } else {
        0.0
    };

    let significance = if signals.avg_significance > config::SIGNIFICANCE_THRESHOLD {
        config::SIGNIFICANCE_BOOST
    } else {
        0.0
    };

    let total = exposure + network + media + codeword + significance;
    let rating = rating_for(total);
    RiskScore {
        total,
        rating,
        level: RiskLevel::from_rating(rating),
    }
}

pub(crate) fn rating_for(total: f64) -> i32 {
    if total > config::RATING_5_THRESHOLD {
        5
    } else if total > config::RATING_4_THRESHOLD {
        4
    } else if total > config::RATING_3_THRESHOLD {
        3
    } else if total > config::RATING_2_THRESHOLD {
        2
    } else {
        1
    }
}

/// VIP floor: a flagged entity's stored rating is never lowered by a
/// recompute. Ratings rise freely; the level always tracks the kept rating.
pub fn apply_vip_floor(score: RiskScore, is_vip: bool, prior_rating: i32) -> RiskScore {
    if is_vip && prior_rating > score.rating {
        RiskScore {
            rating: prior_rating,
            level: RiskLevel::from_rating(prior_rating),
            ..score
        }
    } else {
        score
    }
}

/// Full risk recompute: every person entity's rating and level are
/// overwritten from current signals. Writes are batched in one transaction,
/// rolled back in dry-run mode.
pub async fn recompute(
    pool: &PgPool,
    graph: &RelationshipGraph,
    anchors: &[EntityId],
    dry_run: bool,
) -> Result<RiskSummary> {
    info!(
        "Recomputing risk ratings against {} anchor entities...",
        anchors.len()
    );
    let start_time = Instant::now();

    let keyword_patterns: Vec<String> = config::SENSITIVE_KEYWORDS
        .iter()
        .map(|kw| format!("%{}%", kw))
        .collect();

    let read_conn = pool
        .get()
        .await
        .context("Failed to get DB connection for risk signal reads")?;
    let rows = db::fetch_risk_signals(&*read_conn, &keyword_patterns).await?;
    drop(read_conn);
    info!("Fetched risk signals for {} entities.", rows.len());

    let anchor_set: HashSet<EntityId> = anchors.iter().copied().collect();

    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for risk updates")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start risk update transaction")?;

    let mut summary = RiskSummary::default();
    for row in &rows {
        let (anchor_edge_count, anchor_edge_strength) =
            graph.anchor_proximity(row.entity_id, &anchor_set);
        let signals = RiskSignals {
            mention_count: row.mention_count,
            anchor_edge_count,
            anchor_edge_strength,
            media_count: row.media_count,
            codeword_mentions: row.codeword_mentions,
            avg_significance: row.avg_significance,
            is_vip: row.is_vip,
            prior_rating: row.prior_rating,
        };
        let computed = apply_vip_floor(score(&signals), row.is_vip, row.prior_rating);
        debug!(
            "Entity {}: total {:.2}, rating {}, level {}.",
            row.entity_id,
            computed.total,
            computed.rating,
            computed.level.as_str()
        );

        db::update_entity_risk(&tx, row.entity_id, computed.rating, computed.level.as_str())
            .await?;

        summary.entities_scored += 1;
        summary.rating_distribution[(computed.rating - 1) as usize] += 1;
        match computed.level {
            RiskLevel::High => summary.high += 1,
            RiskLevel::Medium => summary.medium += 1,
            RiskLevel::Low => summary.low += 1,
        }
    }

    if dry_run {
        tx.rollback()
            .await
            .context("Failed to roll back dry-run risk transaction")?;
        info!(
            "[dry run] Would rate {} entities (computed in {:.2?}).",
            summary.entities_scored,
            start_time.elapsed()
        );
    } else {
        tx.commit()
            .await
            .context("Failed to commit risk update transaction")?;
        info!(
            "Risk recompute finished in {:.2?}: {} entities rated ({} HIGH, {} MEDIUM, {} LOW).",
            start_time.elapsed(),
            summary.entities_scored,
            summary.high,
            summary.medium,
            summary.low
        );
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_thresholds_are_exclusive_lower_bounds() {
        assert_eq!(rating_for(0.0), 1);
        assert_eq!(rating_for(3.0), 1);
        assert_eq!(rating_for(3.1), 2);
        assert_eq!(rating_for(7.0), 2);
        assert_eq!(rating_for(7.1), 3);
        assert_eq!(rating_for(12.0), 3);
        assert_eq!(rating_for(12.1), 4);
        assert_eq!(rating_for(20.0), 4);
        assert_eq!(rating_for(20.1), 5);
    }

    #[test]
    fn anchor_proximity_scenario_rates_high() {
        // 1,000 mentions and 3 direct anchor edges with summed strength 40:
        // exposure ~9.0, network capped at 10, total ~19 -> rating 4, HIGH.
        let signals = RiskSignals {
            mention_count: 1_000,
            anchor_edge_count: 3,
            anchor_edge_strength: 40,
            ..Default::default()
        };
        let result = score(&signals);
        assert!(result.total > 18.9 && result.total < 19.1);
        assert_eq!(result.rating, 4);
        assert_eq!(result.level, RiskLevel::High);
    }

    #[test]
    fn network_component_is_capped() {
        let modest = score(&RiskSignals {
            anchor_edge_count: 5,
            ..Default::default()
        });
        let extreme = score(&RiskSignals {
            anchor_edge_count: 500,
            anchor_edge_strength: 10_000,
            ..Default::default()
        });
        assert!((extreme.total - modest.total).abs() < 1e-9);
    }

    #[test]
    fn codeword_and_significance_components() {
        let base = score(&RiskSignals::default());
        let with_codeword = score(&RiskSignals {
            codeword_mentions: 1,
            ..Default::default()
        });
        assert!((with_codeword.total - base.total - 8.0).abs() < 1e-9);

        let with_significance = score(&RiskSignals {
            avg_significance: 2.5,
            ..Default::default()
        });
        assert!((with_significance.total - base.total - 3.0).abs() < 1e-9);

        // Average significance of exactly 2 does not trigger the boost.
        let at_threshold = score(&RiskSignals {
            avg_significance: 2.0,
            ..Default::default()
        });
        assert!((at_threshold.total - base.total).abs() < 1e-9);
    }

    #[test]
    fn media_bonus_is_capped() {
        let three = score(&RiskSignals {
            media_count: 3,
            ..Default::default()
        });
        assert!((three.total - 4.5).abs() < 1e-9);

        let many = score(&RiskSignals {
            media_count: 40,
            ..Default::default()
        });
        assert!((many.total - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rating_is_monotone_in_anchor_strength() {
        // Increasing direct anchor-edge strength with everything else held
        // fixed must never lower the rating.
        let mut previous = 0;
        for strength in (0..500).step_by(5) {
            let result = score(&RiskSignals {
                mention_count: 200,
                anchor_edge_count: 1,
                anchor_edge_strength: strength,
                ..Default::default()
            });
            assert!(result.rating >= previous);
            previous = result.rating;
        }
    }

    #[test]
    fn vip_floor_keeps_prior_rating() {
        let computed = RiskScore {
            total: 5.0,
            rating: 2,
            level: RiskLevel::Medium,
        };
        let floored = apply_vip_floor(computed, true, 5);
        assert_eq!(floored.rating, 5);
        assert_eq!(floored.level, RiskLevel::High);

        // Non-VIP entities are lowered freely.
        let unfloored = apply_vip_floor(computed, false, 5);
        assert_eq!(unfloored.rating, 2);

        // Ratings may still rise for VIPs.
        let raised = apply_vip_floor(
            RiskScore {
                total: 25.0,
                rating: 5,
                level: RiskLevel::High,
            },
            true,
            3,
        );
        assert_eq!(raised.rating, 5);
    }
}
