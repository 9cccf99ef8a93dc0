// src/consolidate/chain.rs

use log::{debug, info};
use std::collections::{HashMap, HashSet};

use crate::models::{EntityId, MergeCandidate};

/// Candidate list made safe for sequential application, plus the redirect
/// map built while flattening transitive chains.
#[derive(Debug)]
pub struct ResolvedPlan {
    /// Surviving candidates; no two share a source, and every target is a
    /// final surviving entity.
    pub candidates: Vec<MergeCandidate>,

    /// Retired entity id -> resolved final surviving id, for this run only.
    pub redirects: HashMap<EntityId, EntityId>,
}

/// Collapses transitive merge chains (A->B->C) into direct redirects so the
/// candidates can be applied in any order without mutual interference.
///
/// Candidates are processed in descending confidence order; a candidate
/// whose source was already consumed by a higher-confidence merge is
/// skipped, and one that resolves onto its own source is dropped as a
/// self-merge no-op.
pub fn resolve_chains(mut candidates: Vec<MergeCandidate>) -> ResolvedPlan {
    // Descending confidence; ties ordered by (source, target) so the plan
    // is deterministic across runs.
    candidates.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then(a.source_id.cmp(&b.source_id))
            .then(a.target_id.cmp(&b.target_id))
    });

    let mut redirects: HashMap<EntityId, EntityId> = HashMap::new();
    let mut kept = Vec::with_capacity(candidates.len());
    let mut skipped = 0usize;
    let mut dropped = 0usize;

    for mut candidate in candidates {
        if redirects.contains_key(&candidate.source_id) {
            // Source already consumed by a higher-confidence merge.
            skipped += 1;
            continue;
        }

        let resolved = follow_redirects(&redirects, candidate.target_id);
        if resolved == candidate.source_id {
            debug!(
                "Dropping self-merge candidate {} -> {} (target resolves back to source).",
                candidate.source_id, candidate.target_id
            );
            dropped += 1;
            continue;
        }

        if resolved != candidate.target_id {
            debug!(
                "Rewrote candidate target {} -> {} for source {}.",
                candidate.target_id, resolved, candidate.source_id
            );
            candidate.target_id = resolved;
        }
        redirects.insert(candidate.source_id, resolved);
        kept.push(candidate);
    }

    info!(
        "Chain resolution: {} candidates kept, {} skipped (source consumed), {} dropped (self-merge).",
        kept.len(),
        skipped,
        dropped
    );

    ResolvedPlan {
        candidates: kept,
        redirects,
    }
}

/// Follows the redirect chain from `start` to its final id. Iterative with a
/// visited set: on a revisit the walk stops and the last resolved id wins,
/// so a cyclic map still terminates in one pass over its nodes.
pub(crate) fn follow_redirects(
    redirects: &HashMap<EntityId, EntityId>,
    start: EntityId,
) -> EntityId {
    let mut current = start;
    let mut visited: HashSet<EntityId> = HashSet::new();
    visited.insert(current);
    while let Some(&next) = redirects.get(&current) {
        if !visited.insert(next) {
            break;
        }
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MergeMethod;

    fn candidate(source: i64, target: i64, confidence: i32) -> MergeCandidate {
        MergeCandidate {
            source_id: EntityId(source),
            target_id: EntityId(target),
            confidence,
            reason: "test".to_string(),
            method: MergeMethod::Nickname,
        }
    }

    #[test]
    fn collapses_transitive_chain_to_direct_redirects() {
        // A->B (85) and B->C (90): the C edge wins first, then A->B is
        // rewritten into A->C.
        let plan = resolve_chains(vec![candidate(1, 2, 85), candidate(2, 3, 90)]);

        assert_eq!(plan.candidates.len(), 2);
        assert_eq!(plan.redirects.get(&EntityId(2)), Some(&EntityId(3)));
        assert_eq!(plan.redirects.get(&EntityId(1)), Some(&EntityId(3)));
        let rewritten = plan
            .candidates
            .iter()
            .find(|c| c.source_id == EntityId(1))
            .unwrap();
        assert_eq!(rewritten.target_id, EntityId(3));
    }

    #[test]
    fn drops_mutual_pair_as_self_merge() {
        let plan = resolve_chains(vec![candidate(1, 2, 90), candidate(2, 1, 85)]);

        assert_eq!(plan.candidates.len(), 1);
        assert_eq!(plan.candidates[0].source_id, EntityId(1));
        assert_eq!(plan.candidates[0].target_id, EntityId(2));
    }

    #[test]
    fn no_two_surviving_candidates_share_a_source() {
        let plan = resolve_chains(vec![
            candidate(1, 2, 85),
            candidate(1, 3, 85),
            candidate(3, 2, 85),
            candidate(4, 1, 70),
        ]);

        let mut sources: Vec<EntityId> = plan.candidates.iter().map(|c| c.source_id).collect();
        sources.sort();
        let before = sources.len();
        sources.dedup();
        assert_eq!(sources.len(), before);
    }

    #[test]
    fn never_yields_resolved_target_equal_to_source() {
        let plan = resolve_chains(vec![
            candidate(1, 2, 95),
            candidate(2, 3, 90),
            candidate(3, 1, 85),
        ]);
        for c in &plan.candidates {
            assert_ne!(c.source_id, c.target_id);
        }
    }

    #[test]
    fn follow_redirects_terminates_on_cyclic_map() {
        // A handcrafted cycle can't arise from resolve_chains itself, but
        // the guard must still terminate and return the last resolved id.
        let mut redirects = HashMap::new();
        redirects.insert(EntityId(1), EntityId(2));
        redirects.insert(EntityId(2), EntityId(3));
        redirects.insert(EntityId(3), EntityId(1));

        assert_eq!(follow_redirects(&redirects, EntityId(1)), EntityId(3));
    }

    #[test]
    fn later_sources_chain_through_earlier_targets() {
        // 4->1 resolves through 1->3 into 4->3.
        let plan = resolve_chains(vec![candidate(1, 3, 90), candidate(4, 1, 80)]);
        let late = plan
            .candidates
            .iter()
            .find(|c| c.source_id == EntityId(4))
            .unwrap();
        assert_eq!(late.target_id, EntityId(3));
    }
}
