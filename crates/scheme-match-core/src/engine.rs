use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{
    format_number, resolve_predicate, CatalogLoad, Condition, RuleNode, RuleValue,
};
use crate::profile::{Profile, ProfileField, ProfileInput, ProfileValue};
use crate::{MatchError, Scheme, SchemeSummary};

pub const RULESET_VERSION: &str = "eligibility-scoring.v1";

const OPEN_SCHEME_REASON: &str = "open to all applicants";
const PENALTY_PREFIX: &str = "penalty: ";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Failed mandatory predicates exclude; everything else earns partial credit.
    #[default]
    Weighted,
    /// The rule tree must hold as a boolean expression.
    AllOrNothing,
}

impl ScoringPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weighted => "weighted",
            Self::AllOrNothing => "all_or_nothing",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weighted" => Some(Self::Weighted),
            "all_or_nothing" => Some(Self::AllOrNothing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MatchPolicy {
    pub scoring: ScoringPolicy,
    /// Inclusive lower bound on `match_score`. A score of zero never qualifies.
    pub min_score: f64,
    pub limit: Option<usize>,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { scoring: ScoringPolicy::Weighted, min_score: 0.0, limit: None }
    }
}

impl MatchPolicy {
    /// # Errors
    /// Returns [`MatchError::Validation`] when `min_score` is outside `0..=100`
    /// or `limit` is zero.
    pub fn validate(&self) -> Result<(), MatchError> {
        if !self.min_score.is_finite() || !(0.0..=100.0).contains(&self.min_score) {
            return Err(MatchError::Validation("min_score MUST be within [0, 100]".to_string()));
        }
        if self.limit == Some(0) {
            return Err(MatchError::Validation("limit MUST be >= 1 when provided".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub rank: usize,
    pub scheme: SchemeSummary,
    pub match_score: f64,
    pub matched: Vec<String>,
    pub failed: Vec<String>,
}

/// A scheme that evaluated cleanly but is not recommended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exclusion {
    pub scheme_id: String,
    pub match_score: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Configuration,
    Internal,
}

/// A catalog entry that was skipped instead of evaluated.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EvaluationWarning {
    pub entry_index: usize,
    pub scheme_id: Option<String>,
    pub kind: WarningKind,
    pub message: String,
}

impl EvaluationWarning {
    fn from_error(entry_index: usize, scheme_id: &str, err: &MatchError) -> Self {
        let (kind, message) = match err {
            MatchError::Configuration(message) => (WarningKind::Configuration, message.clone()),
            MatchError::Internal(message) | MatchError::Validation(message) => {
                (WarningKind::Internal, message.clone())
            }
        };
        let scheme_id = if scheme_id.trim().is_empty() { None } else { Some(scheme_id.to_string()) };
        Self { entry_index, scheme_id, kind, message }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeterminismMetadata {
    pub ruleset_version: String,
    pub scoring_policy: ScoringPolicy,
    pub min_score: f64,
    pub limit: Option<usize>,
    pub tie_breakers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub recommendations: Vec<Recommendation>,
    pub excluded: Vec<Exclusion>,
    pub warnings: Vec<EvaluationWarning>,
    pub determinism: DeterminismMetadata,
}

#[must_use]
pub fn default_tie_breakers() -> Vec<String> {
    vec!["match_score desc".to_string(), "scheme_id asc".to_string()]
}

struct LeafOutcome {
    satisfied: bool,
    mandatory: bool,
    weight: f64,
    explanation: String,
}

struct NodeOutcome {
    earned: f64,
    possible: f64,
    satisfied: bool,
    leaves: Vec<LeafOutcome>,
}

impl NodeOutcome {
    fn fraction(&self) -> f64 {
        if self.possible > 0.0 {
            self.earned / self.possible
        } else {
            self.earned.min(0.0)
        }
    }
}

struct Candidate<'a> {
    scheme: &'a Scheme,
    score: f64,
    matched: Vec<String>,
    failed: Vec<String>,
}

impl Candidate<'_> {
    fn ranking(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.score.total_cmp(&lhs.score).then_with(|| lhs.scheme.id.cmp(&rhs.scheme.id))
    }
}

enum Assessment<'a> {
    Included(Candidate<'a>),
    Excluded(Exclusion),
}

/// Validate a submitted profile, then evaluate it.
///
/// # Errors
/// Returns [`MatchError::Validation`] when the profile or policy is invalid.
pub fn evaluate_input(
    input: ProfileInput,
    catalog: &[Scheme],
    policy: &MatchPolicy,
) -> Result<EvaluationReport, MatchError> {
    let profile = input.into_profile()?;
    evaluate(&profile, catalog, policy)
}

/// Evaluate a decoded catalog and fold its decode warnings into the report.
///
/// Every warning index refers to the position of the raw entry the catalog
/// was decoded from, so skipped and evaluated entries share one index space.
///
/// # Errors
/// Returns [`MatchError::Validation`] when the profile or policy is invalid.
pub fn evaluate_load(
    profile: &Profile,
    load: CatalogLoad,
    policy: &MatchPolicy,
) -> Result<EvaluationReport, MatchError> {
    let skipped = load.warnings.iter().map(|warning| warning.entry_index).collect::<BTreeSet<_>>();
    let total_entries = load.schemes.len() + skipped.len();
    let decoded_positions =
        (0..total_entries).filter(|index| !skipped.contains(index)).collect::<Vec<_>>();

    let mut report = evaluate(profile, &load.schemes, policy)?;
    for warning in &mut report.warnings {
        if let Some(raw_index) = decoded_positions.get(warning.entry_index) {
            warning.entry_index = *raw_index;
        }
    }
    report.warnings.extend(load.warnings);
    report.warnings.sort_by_key(|warning| warning.entry_index);
    Ok(report)
}

/// Evaluate every scheme in `catalog` against `profile` and rank the matches.
///
/// Per-scheme configuration or internal failures never abort the batch; they
/// are returned as [`EvaluationWarning`]s in catalog order. The first record
/// with a given id wins; later duplicates are skipped with a warning.
///
/// # Errors
/// Returns [`MatchError::Validation`] when the profile or policy is invalid.
pub fn evaluate(
    profile: &Profile,
    catalog: &[Scheme],
    policy: &MatchPolicy,
) -> Result<EvaluationReport, MatchError> {
    profile.validate()?;
    policy.validate()?;

    let mut seen_ids: BTreeSet<&str> = BTreeSet::new();
    let mut candidates: Vec<Candidate<'_>> = Vec::new();
    let mut excluded: Vec<Exclusion> = Vec::new();
    let mut warnings: Vec<EvaluationWarning> = Vec::new();

    for (entry_index, scheme) in catalog.iter().enumerate() {
        if !scheme.id.trim().is_empty() && !seen_ids.insert(scheme.id.as_str()) {
            let err = MatchError::Configuration(format!(
                "duplicate scheme id `{}`; first occurrence wins",
                scheme.id
            ));
            tracing::warn!(entry_index, scheme_id = %scheme.id, error = %err, "skipping scheme");
            warnings.push(EvaluationWarning::from_error(entry_index, &scheme.id, &err));
            continue;
        }

        match assess_scheme(profile, scheme, policy) {
            Ok(Assessment::Included(candidate)) => candidates.push(candidate),
            Ok(Assessment::Excluded(exclusion)) => excluded.push(exclusion),
            Err(err) => {
                tracing::warn!(entry_index, scheme_id = %scheme.id, error = %err, "skipping scheme");
                warnings.push(EvaluationWarning::from_error(entry_index, &scheme.id, &err));
            }
        }
    }

    candidates.sort_by(Candidate::ranking);
    if let Some(limit) = policy.limit {
        for candidate in candidates.split_off(limit.min(candidates.len())) {
            excluded.push(Exclusion {
                scheme_id: candidate.scheme.id.clone(),
                match_score: candidate.score,
                reasons: vec![format!("ranked below the result limit of {limit}")],
            });
        }
    }
    excluded.sort_by(|lhs, rhs| lhs.scheme_id.cmp(&rhs.scheme_id));

    let recommendations = candidates
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| Recommendation {
            rank: index + 1,
            scheme: SchemeSummary::from(candidate.scheme),
            match_score: candidate.score,
            matched: candidate.matched,
            failed: candidate.failed,
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        schemes = catalog.len(),
        recommended = recommendations.len(),
        excluded = excluded.len(),
        warnings = warnings.len(),
        "evaluated catalog"
    );

    Ok(EvaluationReport {
        recommendations,
        excluded,
        warnings,
        determinism: DeterminismMetadata {
            ruleset_version: RULESET_VERSION.to_string(),
            scoring_policy: policy.scoring,
            min_score: policy.min_score,
            limit: policy.limit,
            tie_breakers: default_tie_breakers(),
        },
    })
}

fn assess_scheme<'a>(
    profile: &Profile,
    scheme: &'a Scheme,
    policy: &MatchPolicy,
) -> Result<Assessment<'a>, MatchError> {
    scheme.validate()?;

    if !scheme.is_active {
        return Ok(Assessment::Excluded(Exclusion {
            scheme_id: scheme.id.clone(),
            match_score: 0.0,
            reasons: vec!["scheme is inactive".to_string()],
        }));
    }

    let Some(rule) = &scheme.eligibility else {
        return Ok(Assessment::Included(Candidate {
            scheme,
            score: 100.0,
            matched: vec![OPEN_SCHEME_REASON.to_string()],
            failed: Vec::new(),
        }));
    };

    let outcome = evaluate_node(rule, profile)?;
    if !outcome.earned.is_finite() || !outcome.possible.is_finite() {
        return Err(MatchError::Internal(format!(
            "score for scheme `{}` is not finite; check predicate weights",
            scheme.id
        )));
    }

    let score = round_score(outcome.fraction());
    let matched_positive =
        outcome.leaves.iter().any(|leaf| leaf.satisfied && leaf.weight > 0.0);
    let mandatory_failures = outcome
        .leaves
        .iter()
        .filter(|leaf| leaf.mandatory && !leaf.satisfied)
        .map(|leaf| format!("mandatory criterion not met: {}", leaf.explanation))
        .collect::<Vec<_>>();

    let mut matched = Vec::new();
    let mut failed = Vec::new();
    for leaf in outcome.leaves {
        if leaf.satisfied && leaf.weight < 0.0 {
            matched.push(format!("{PENALTY_PREFIX}{}", leaf.explanation));
        } else if leaf.satisfied {
            matched.push(leaf.explanation);
        } else {
            failed.push(leaf.explanation);
        }
    }

    let exclusion = |mut reasons: Vec<String>, failed: &[String]| {
        reasons.extend(failed.iter().cloned());
        Assessment::Excluded(Exclusion { scheme_id: scheme.id.clone(), match_score: score, reasons })
    };

    match policy.scoring {
        ScoringPolicy::AllOrNothing if !outcome.satisfied => {
            return Ok(exclusion(vec!["eligibility rules not satisfied".to_string()], &failed));
        }
        ScoringPolicy::Weighted if !mandatory_failures.is_empty() => {
            return Ok(exclusion(mandatory_failures, &[]));
        }
        _ => {}
    }

    if !matched_positive || score <= 0.0 {
        return Ok(exclusion(vec!["no eligibility criterion matched".to_string()], &failed));
    }

    if score < policy.min_score {
        return Ok(exclusion(
            vec![format!(
                "match score {} below minimum of {}",
                format_number(score),
                format_number(policy.min_score)
            )],
            &[],
        ));
    }

    Ok(Assessment::Included(Candidate { scheme, score, matched, failed }))
}

fn round_score(fraction: f64) -> f64 {
    (fraction.clamp(0.0, 1.0) * 10_000.0).round() / 100.0
}

fn evaluate_node(node: &RuleNode, profile: &Profile) -> Result<NodeOutcome, MatchError> {
    match node {
        RuleNode::Predicate(predicate) => {
            let field = resolve_predicate(predicate)?;
            let (satisfied, explanation) =
                check_condition(field, &predicate.condition, profile.value_of(field));
            Ok(NodeOutcome {
                earned: if satisfied { predicate.weight } else { 0.0 },
                possible: predicate.weight.max(0.0),
                satisfied,
                leaves: vec![LeafOutcome {
                    satisfied,
                    mandatory: predicate.mandatory,
                    weight: predicate.weight,
                    explanation,
                }],
            })
        }
        RuleNode::All(children) => {
            let mut combined =
                NodeOutcome { earned: 0.0, possible: 0.0, satisfied: true, leaves: Vec::new() };
            for child in children {
                let outcome = evaluate_node(child, profile)?;
                combined.earned += outcome.earned;
                combined.possible += outcome.possible;
                combined.satisfied &= outcome.satisfied;
                combined.leaves.extend(outcome.leaves);
            }
            Ok(combined)
        }
        RuleNode::Any(children) => {
            // A satisfied branch always beats an unsatisfied one; among equals the
            // best fraction counts and the first branch wins ties.
            let mut best: Option<NodeOutcome> = None;
            for child in children {
                let outcome = evaluate_node(child, profile)?;
                let replace = match &best {
                    None => true,
                    Some(current) => match (outcome.satisfied, current.satisfied) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => outcome.fraction() > current.fraction(),
                    },
                };
                if replace {
                    best = Some(outcome);
                }
            }
            best.ok_or_else(|| {
                MatchError::Configuration("`any` group MUST NOT be empty".to_string())
            })
        }
    }
}

fn check_condition(
    field: ProfileField,
    condition: &Condition,
    value: ProfileValue<'_>,
) -> (bool, String) {
    match value {
        ProfileValue::Missing => (false, format!("{field} not provided")),
        ProfileValue::Number(actual) => check_number(field, condition, actual),
        ProfileValue::Text(actual) => check_text(field, condition, actual),
        ProfileValue::Flag(actual) => check_flag(field, condition, actual),
    }
}

fn check_number(field: ProfileField, condition: &Condition, actual: f64) -> (bool, String) {
    let shown = format_number(actual);
    match condition {
        Condition::Gt { value } => {
            let limit = format_number(*value);
            if actual > *value {
                (true, format!("{field} {shown} above {limit}"))
            } else {
                (false, format!("{field} {shown} not above {limit}"))
            }
        }
        Condition::Gte { value } => {
            let limit = format_number(*value);
            if actual >= *value {
                (true, format!("{field} {shown} meets minimum of {limit}"))
            } else {
                (false, format!("{field} {shown} below minimum of {limit}"))
            }
        }
        Condition::Lt { value } => {
            let limit = format_number(*value);
            if actual < *value {
                (true, format!("{field} {shown} below ceiling of {limit}"))
            } else {
                (false, format!("{field} {shown} not below ceiling of {limit}"))
            }
        }
        Condition::Lte { value } => {
            let limit = format_number(*value);
            if actual <= *value {
                (true, format!("{field} {shown} within ceiling of {limit}"))
            } else {
                (false, format!("{field} {shown} exceeds ceiling of {limit}"))
            }
        }
        Condition::Between { min, max } => {
            let range = format!("{}-{}", format_number(*min), format_number(*max));
            if (*min..=*max).contains(&actual) {
                (true, format!("{field} {shown} within range {range}"))
            } else {
                (false, format!("{field} {shown} outside range {range}"))
            }
        }
        Condition::Eq { value: RuleValue::Number(expected) } => {
            #[allow(clippy::float_cmp)]
            let equal = actual == *expected;
            if equal {
                (true, format!("{field} equals {shown}"))
            } else {
                (false, format!("{field} {shown} is not {}", format_number(*expected)))
            }
        }
        Condition::Eq { .. } | Condition::In { .. } => {
            (false, format!("{field} cannot be compared with `{}`", condition.op_name()))
        }
    }
}

fn normalized(value: &str) -> String {
    value.trim().to_lowercase()
}

fn check_text(field: ProfileField, condition: &Condition, actual: &str) -> (bool, String) {
    let actual_normalized = normalized(actual);
    match condition {
        Condition::Eq { value: RuleValue::Text(expected) } => {
            if actual_normalized == normalized(expected) {
                (true, format!("{field} matches: {actual}"))
            } else {
                (false, format!("{field} {actual} does not match: {expected}"))
            }
        }
        Condition::In { values } => {
            if values.iter().any(|value| normalized(value) == actual_normalized) {
                (true, format!("{field} matches: {actual}"))
            } else {
                (false, format!("{field} {actual} not in [{}]", values.join(", ")))
            }
        }
        _ => (false, format!("{field} cannot be compared with `{}`", condition.op_name())),
    }
}

fn check_flag(field: ProfileField, condition: &Condition, actual: bool) -> (bool, String) {
    match condition {
        Condition::Eq { value: RuleValue::Flag(expected) } => {
            if actual == *expected {
                (true, format!("{field} is {actual}"))
            } else {
                (false, format!("{field} is {actual}, requires {expected}"))
            }
        }
        _ => (false, format!("{field} cannot be compared with `{}`", condition.op_name())),
    }
}
