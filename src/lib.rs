// src/lib.rs
pub mod config;
pub mod consolidate;
pub mod db;
pub mod matching;
pub mod models;
pub mod relationships;
pub mod results;
pub mod risk;

// Re-export common types for easier access
pub use models::{
    Document, DocumentId, Entity, EntityId, MergeCandidate, MergeMethod, RelationshipEdge,
    RiskLevel, RiskSignals,
};

// Re-export important functionality
pub use db::PgPool;
pub use matching::name::NicknameDictionary;
pub use relationships::RelationshipGraph;
