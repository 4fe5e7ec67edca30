//! Deterministic eligibility matching for government benefit schemes.
//!
//! The engine takes one validated [`Profile`] and an immutable catalog of
//! [`Scheme`] values and returns an [`EvaluationReport`]: ranked, explained
//! recommendations plus per-scheme warnings for catalog entries that could
//! not be evaluated. Nothing here performs I/O.

mod catalog;
mod engine;
mod profile;

pub use catalog::{
    decode_catalog_entries, decode_catalog_json, BenefitType, CatalogLoad, Condition, Predicate,
    RuleNode, RuleValue, Scheme, SchemeSummary, MAX_RULE_DEPTH,
};
pub use engine::{
    default_tie_breakers, evaluate, evaluate_input, evaluate_load, DeterminismMetadata,
    EvaluationReport, EvaluationWarning, Exclusion, MatchPolicy, Recommendation, ScoringPolicy,
    WarningKind, RULESET_VERSION,
};
pub use profile::{
    FieldKind, Gender, Language, Profile, ProfileField, ProfileInput, ProfileValue, MAX_AGE,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum MatchError {
    /// The profile (or request policy) is unusable; nothing was evaluated.
    #[error("validation error: {0}")]
    Validation(String),
    /// A scheme record or rule tree is malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal error: {0}")]
    Internal(String),
}
