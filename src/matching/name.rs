// src/matching/name.rs

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::config;
use crate::db::{self, PgPool};
use crate::models::{Entity, EntityId, MergeCandidate, MergeMethod};

/// Informal given-name variants, one group per canonical formal name.
/// The first token of each group is the canonical spelling used in
/// candidate reason strings.
const NICKNAME_GROUPS: [&[&str]; 30] = [
    &["william", "bill", "billy", "will", "liam"],
    &["robert", "bob", "bobby", "rob", "robbie"],
    &["richard", "rick", "ricky", "dick"],
    &["james", "jim", "jimmy", "jamie"],
    &["john", "jack", "johnny", "jon"],
    &["michael", "mike", "mickey"],
    &["jeffrey", "jeff", "geoffrey", "geoff"],
    &["thomas", "tom", "tommy"],
    &["charles", "charlie", "chuck"],
    &["edward", "ed", "eddie", "ted", "ned"],
    &["donald", "don", "donnie"],
    &["ronald", "ron", "ronnie"],
    &["steven", "stephen", "steve"],
    &["andrew", "andy", "drew"],
    &["anthony", "tony"],
    &["christopher", "chris", "topher"],
    &["daniel", "dan", "danny"],
    &["david", "dave", "davey"],
    &["joseph", "joe", "joey"],
    &["matthew", "matt"],
    &["nicholas", "nick", "nicky"],
    &["alexander", "alex", "sasha"],
    &["benjamin", "ben", "benny"],
    &["samuel", "sam", "sammy"],
    &["kenneth", "ken", "kenny"],
    &["margaret", "peggy", "maggie", "meg"],
    &["elizabeth", "liz", "beth", "betty", "lizzie"],
    &["katherine", "catherine", "kate", "kathy", "katie", "cathy"],
    &["patricia", "pat", "patty", "tricia"],
    &["susan", "sue", "susie", "suzanne"],
];

/// Flattened lookup from a given-name token to its nickname group.
///
/// Built once from the static table and passed explicitly into detection;
/// there is no module-level mutable state.
pub struct NicknameDictionary {
    token_to_group: HashMap<&'static str, usize>,
}

impl NicknameDictionary {
    pub fn new() -> Self {
        let mut token_to_group = HashMap::new();
        for (group_id, group) in NICKNAME_GROUPS.iter().enumerate() {
            for token in group.iter() {
                token_to_group.insert(*token, group_id);
            }
        }
        Self { token_to_group }
    }

    /// Group id for a token, if the dictionary defines one.
    pub fn group_of(&self, token: &str) -> Option<usize> {
        self.token_to_group.get(token).copied()
    }

    /// Canonical spelling for a token's group. Total function: a token
    /// absent from the dictionary is its own canonical form.
    pub fn canonical_token<'a>(&self, token: &'a str) -> &'a str {
        match self.group_of(token) {
            Some(group_id) => NICKNAME_GROUPS[group_id][0],
            None => token,
        }
    }
}

impl Default for NicknameDictionary {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonicalizes a raw display name into its token sequence: lower-cased,
/// punctuation stripped, whitespace collapsed. Deterministic and
/// side-effect-free.
pub fn normalize_name(name: &str) -> Vec<String> {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Normalized view of one entity's name, kept alongside the entity for
/// bucket scans.
struct NormalizedEntity<'a> {
    entity: &'a Entity,
    tokens: Vec<String>,
}

/// Finds merge candidates across the live person entity set.
///
/// Entities are bucketed by surname (last normalized token); two
/// bucket-mates form a candidate when their first-name tokens map to the
/// same nickname group and every token after the first is identical. The
/// identical-remainder rule rejects middle-name mismatches outright, which
/// bounds false positives at the cost of missing some true pairs.
///
/// Orientation: the entity with fewer mentions becomes the merge source.
/// On an exact mention-count tie the lower id becomes the source, so the
/// older record survives.
pub fn find_merge_candidates(
    entities: &[Entity],
    dictionary: &NicknameDictionary,
) -> Vec<MergeCandidate> {
    // Single-token names carry no surname and are too ambiguous to match.
    let normalized: Vec<NormalizedEntity> = entities
        .iter()
        .filter_map(|entity| {
            let tokens = normalize_name(&entity.name);
            if tokens.len() >= 2 {
                Some(NormalizedEntity { entity, tokens })
            } else {
                debug!(
                    "Excluding single-token name '{}' (entity {}) from matching.",
                    entity.name, entity.id
                );
                None
            }
        })
        .collect();

    // Surname buckets for O(1) candidate lookup.
    let mut surname_buckets: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, ne) in normalized.iter().enumerate() {
        let surname = ne.tokens[ne.tokens.len() - 1].as_str();
        surname_buckets.entry(surname).or_default().push(idx);
    }

    let mut candidates = Vec::new();
    let mut seen_pairs: HashSet<(EntityId, EntityId)> = HashSet::new();

    for ne in &normalized {
        let first = ne.tokens[0].as_str();
        let Some(group) = dictionary.group_of(first) else {
            continue;
        };
        let surname = ne.tokens[ne.tokens.len() - 1].as_str();
        let Some(bucket) = surname_buckets.get(surname) else {
            continue;
        };

        for &other_idx in bucket {
            let other = &normalized[other_idx];
            if other.entity.id == ne.entity.id {
                continue;
            }
            if dictionary.group_of(other.tokens[0].as_str()) != Some(group) {
                continue;
            }
            // Everything after the first token must match token-for-token.
            if ne.tokens[1..] != other.tokens[1..] {
                continue;
            }

            let (source, target) = orient(ne.entity, other.entity);
            if !seen_pairs.insert((source.id, target.id)) {
                continue;
            }

            candidates.push(MergeCandidate {
                source_id: source.id,
                target_id: target.id,
                confidence: config::NICKNAME_MATCH_CONFIDENCE,
                reason: format!(
                    "first names '{}' and '{}' share nickname group '{}'",
                    ne.tokens[0],
                    other.tokens[0],
                    dictionary.canonical_token(first)
                ),
                method: MergeMethod::Nickname,
            });
        }
    }

    candidates
}

/// Source/target orientation: fewer mentions merges into more; equal
/// mention counts break toward the lower id as source.
fn orient<'a>(a: &'a Entity, b: &'a Entity) -> (&'a Entity, &'a Entity) {
    if a.mention_count < b.mention_count {
        (a, b)
    } else if b.mention_count < a.mention_count {
        (b, a)
    } else if a.id < b.id {
        (a, b)
    } else {
        (b, a)
    }
}

/// Fetches the live person entity set and runs candidate detection over it.
pub async fn find_matches(
    pool: &PgPool,
    dictionary: &NicknameDictionary,
) -> Result<Vec<MergeCandidate>> {
    info!("Starting nickname-equivalence merge candidate detection...");
    let start_time = Instant::now();

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for candidate detection")?;
    let entities = db::fetch_person_entities(&*conn).await?;
    info!("Fetched {} person entities with names.", entities.len());

    let candidates = find_merge_candidates(&entities, dictionary);

    info!(
        "Candidate detection completed in {:.2?}: {} candidate pairs across {} entities.",
        start_time.elapsed(),
        candidates.len(),
        entities.len()
    );
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: i64, name: &str, mentions: i64) -> Entity {
        Entity {
            id: EntityId(id),
            name: name.to_string(),
            mention_count: mentions,
            is_vip: false,
            risk_rating: 1,
        }
    }

    #[test]
    fn normalize_strips_punctuation_and_collapses_whitespace() {
        assert_eq!(
            normalize_name("  Clinton,  William J. "),
            vec!["clinton", "william", "j"]
        );
        assert_eq!(normalize_name("Jean-Luc O'Brien"), vec!["jean", "luc", "o", "brien"]);
        assert!(normalize_name("...").is_empty());
    }

    #[test]
    fn nickname_lookup_is_bidirectional() {
        let dict = NicknameDictionary::new();
        assert_eq!(dict.group_of("bill"), dict.group_of("william"));
        assert!(dict.group_of("bill").is_some());
        assert_ne!(dict.group_of("bill"), dict.group_of("robert"));
    }

    #[test]
    fn canonical_token_falls_back_to_itself() {
        let dict = NicknameDictionary::new();
        assert_eq!(dict.canonical_token("billy"), "william");
        assert_eq!(dict.canonical_token("zephyr"), "zephyr");
    }

    #[test]
    fn detects_nickname_pair_with_orientation() {
        // Bill (50 mentions) should merge into William (120 mentions).
        let dict = NicknameDictionary::new();
        let entities = vec![
            entity(1, "Bill Clinton", 50),
            entity(2, "William Clinton", 120),
        ];
        let candidates = find_merge_candidates(&entities, &dict);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source_id, EntityId(1));
        assert_eq!(candidates[0].target_id, EntityId(2));
        assert_eq!(candidates[0].confidence, 85);
        assert_eq!(candidates[0].method, MergeMethod::Nickname);
        assert!(candidates[0].reason.contains("william"));
    }

    #[test]
    fn rejects_middle_name_mismatch() {
        let dict = NicknameDictionary::new();
        let entities = vec![
            entity(1, "Bill Rodham Clinton", 50),
            entity(2, "William Jefferson Clinton", 120),
        ];
        assert!(find_merge_candidates(&entities, &dict).is_empty());
    }

    #[test]
    fn matches_identical_middle_names() {
        let dict = NicknameDictionary::new();
        let entities = vec![
            entity(1, "Bill Jefferson Clinton", 50),
            entity(2, "William Jefferson Clinton", 120),
        ];
        let candidates = find_merge_candidates(&entities, &dict);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn rejects_different_surnames_and_unknown_first_names() {
        let dict = NicknameDictionary::new();
        let entities = vec![
            entity(1, "Bill Clinton", 50),
            entity(2, "William Gates", 120),
            entity(3, "Zork Clinton", 10),
            entity(4, "Zork Clinton Jr", 10),
        ];
        assert!(find_merge_candidates(&entities, &dict).is_empty());
    }

    #[test]
    fn excludes_single_token_names() {
        let dict = NicknameDictionary::new();
        let entities = vec![entity(1, "Bill", 50), entity(2, "William", 120)];
        assert!(find_merge_candidates(&entities, &dict).is_empty());
    }

    #[test]
    fn equal_mention_counts_orient_lower_id_as_source() {
        let dict = NicknameDictionary::new();
        let entities = vec![
            entity(7, "Bob Marley", 30),
            entity(3, "Robert Marley", 30),
        ];
        let candidates = find_merge_candidates(&entities, &dict);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source_id, EntityId(3));
        assert_eq!(candidates[0].target_id, EntityId(7));
    }

    #[test]
    fn deduplicates_pairs_within_one_pass() {
        // Both scan directions find the same pair; only one candidate
        // survives.
        let dict = NicknameDictionary::new();
        let entities = vec![
            entity(1, "Jeff Epstein", 10),
            entity(2, "Jeffrey Epstein", 500),
            entity(3, "Geoffrey Epstein", 40),
        ];
        let candidates = find_merge_candidates(&entities, &dict);
        let mut pairs: Vec<(EntityId, EntityId)> = candidates
            .iter()
            .map(|c| (c.source_id, c.target_id))
            .collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), candidates.len(), "pairs must be unique");
        // jeff->jeffrey, geoffrey->jeffrey, jeff->geoffrey all qualify.
        assert_eq!(candidates.len(), 3);
    }
}
