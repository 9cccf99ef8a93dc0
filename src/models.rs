// src/models.rs

use bytes::BytesMut;
use postgres_types::{FromSql, IsNull, ToSql, Type};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Using newtype pattern for type safety to prevent mixing different ID types

/// Strongly typed identifier for Entity records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement ToSql for EntityId
impl ToSql for EntityId {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        // Delegate to the implementation for i64
        self.0.to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool {
        // EntityId can be used anywhere an i64 can be used
        <i64 as ToSql>::accepts(ty)
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.0.to_sql_checked(ty, out)
    }
}

// Implement FromSql for EntityId
impl<'a> FromSql<'a> for EntityId {
    fn from_sql(ty: &Type, raw: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let v = i64::from_sql(ty, raw)?;
        Ok(EntityId(v))
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as FromSql>::accepts(ty)
    }
}

/// Strongly typed identifier for Document records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub i64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'a> FromSql<'a> for DocumentId {
    fn from_sql(ty: &Type, raw: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let v = i64::from_sql(ty, raw)?;
        Ok(DocumentId(v))
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as FromSql>::accepts(ty)
    }
}

//------------------------------------------------------------------------------
// CORE DOMAIN MODELS
//------------------------------------------------------------------------------

/// A deduplicated real-world referent (a person in the archive).
///
/// Carries exactly the columns the consolidation core reads: merge candidate
/// detection needs the name and mention count, risk recomputation needs the
/// VIP flag and the previously stored rating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier for this entity
    pub id: EntityId,

    /// Canonical display name
    pub name: String,

    /// Number of document mentions attributed to this entity
    pub mention_count: i64,

    /// VIP flag; establishes a floor under the stored risk rating
    pub is_vip: bool,

    /// Previously stored 1-5 risk rating
    pub risk_rating: i32,
}

/// A document from the archive corpus, as consumed by the co-mention scan.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub content: String,
}

/// A proposed merge pair, transient to one detection run.
///
/// Never persisted; consumed by chain resolution and then execution.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    /// Entity to be retired by the merge
    pub source_id: EntityId,

    /// Surviving entity; rewritten by chain resolution when the nominal
    /// target is itself consumed by a higher-confidence merge
    pub target_id: EntityId,

    /// Confidence in the match, 0-100
    pub confidence: i32,

    /// Human-readable explanation of why the pair matched
    pub reason: String,

    /// How the pair was detected
    pub method: MergeMethod,
}

/// Enum for supported merge detection methods
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MergeMethod {
    /// First names share a nickname group, remaining name tokens identical
    Nickname,

    /// Custom method tag (for extensibility)
    Custom(String),
}

impl MergeMethod {
    /// Converts the enum to a string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Nickname => "nickname",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Creates the enum from a string representation
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "nickname" => Self::Nickname,
            _ => Self::Custom(s.to_string()),
        }
    }
}

/// Append-only record of an applied merge, written inside the merge
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMergeAudit {
    pub source_id: EntityId,
    pub source_name: String,
    pub target_id: EntityId,
    pub target_name: String,
    pub mentions_transferred: i64,
    pub confidence: i32,
    pub method: String,
    /// Structured payload: normalized names, per-table migration counts
    pub details: Option<serde_json::Value>,
}

/// An unordered co-mention edge between two live entities.
///
/// Invariant: `source_id < target_id`, so each pair is stored in one
/// direction only.
#[derive(Debug, Clone)]
pub struct RelationshipEdge {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub rel_type: String,
    pub strength: i32,
    pub confidence: Option<f32>,
}

/// Enum for the coarse risk level derived from the 1-5 rating
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Converts the enum to a string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    /// Creates the enum from a string representation
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Level implied by a 1-5 rating: >=4 HIGH, 2-3 MEDIUM, 1 LOW
    pub fn from_rating(rating: i32) -> Self {
        if rating >= 4 {
            Self::High
        } else if rating >= 2 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Per-entity inputs to the risk scoring model, assembled from the entity
/// row, its mention/media aggregates, and the co-mention graph.
#[derive(Debug, Clone, Default)]
pub struct RiskSignals {
    pub mention_count: i64,

    /// Number of direct co-mention edges to any anchor entity
    pub anchor_edge_count: u32,

    /// Summed strength of those edges
    pub anchor_edge_strength: i64,

    pub media_count: i64,

    /// Mentions whose context co-occurs with a sensitive keyword
    pub codeword_mentions: i64,

    pub avg_significance: f64,

    pub is_vip: bool,

    /// Previously stored rating; with `is_vip`, floors the recomputed one
    pub prior_rating: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_from_rating_bands() {
        assert_eq!(RiskLevel::from_rating(1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_rating(2), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_rating(3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_rating(4), RiskLevel::High);
        assert_eq!(RiskLevel::from_rating(5), RiskLevel::High);
    }

    #[test]
    fn risk_level_round_trips_through_strings() {
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            assert_eq!(RiskLevel::from_str(level.as_str()), level);
        }
    }

    #[test]
    fn merge_method_string_representation() {
        assert_eq!(MergeMethod::Nickname.as_str(), "nickname");
        assert_eq!(MergeMethod::from_str("nickname"), MergeMethod::Nickname);
        assert_eq!(
            MergeMethod::from_str("manual"),
            MergeMethod::Custom("manual".to_string())
        );
    }
}
