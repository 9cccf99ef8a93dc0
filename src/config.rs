// src/config.rs

// Confidence assigned to nickname-equivalence merge candidates
pub const NICKNAME_MATCH_CONFIDENCE: i32 = 85;

// Co-mention edges weaker than this are discarded after the corpus scan
pub const MIN_CO_MENTION_STRENGTH: u32 = 2;

// Upper bound on persisted co-mention edges per rebuild
pub const MAX_CO_MENTION_EDGES: usize = 10_000;

// Relationship type tag written for co-mention edges
pub const CO_MENTION_TYPE: &str = "co_mention";

// Named high-risk anchor entities for proximity scoring.
// Anchors missing from the live entity table are excluded at run start.
pub const ANCHOR_NAMES: [&str; 2] = ["Jeffrey Epstein", "Ghislaine Maxwell"];

// Keywords whose co-occurrence with a mention triggers the codeword penalty
pub const SENSITIVE_KEYWORDS: [&str; 5] =
    ["massage", "island", "flight log", "settlement", "deposition"];

// --- Risk scoring weights and thresholds ---

pub const EXPOSURE_WEIGHT: f64 = 3.0;

pub const NETWORK_SCORE_CAP: f64 = 10.0;
pub const ANCHOR_EDGE_WEIGHT: f64 = 2.0;
pub const ANCHOR_STRENGTH_DIVISOR: f64 = 10.0;

pub const MEDIA_SCORE_CAP: f64 = 5.0;
pub const MEDIA_WEIGHT: f64 = 1.5;

pub const CODEWORD_PENALTY: f64 = 8.0;

pub const SIGNIFICANCE_BOOST: f64 = 3.0;
pub const SIGNIFICANCE_THRESHOLD: f64 = 2.0;

// Total score -> 1..5 rating boundaries (exclusive lower bounds)
pub const RATING_5_THRESHOLD: f64 = 20.0;
pub const RATING_4_THRESHOLD: f64 = 12.0;
pub const RATING_3_THRESHOLD: f64 = 7.0;
pub const RATING_2_THRESHOLD: f64 = 3.0;
