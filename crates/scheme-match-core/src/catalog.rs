use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::engine::{EvaluationWarning, WarningKind};
use crate::profile::{FieldKind, ProfileField};
use crate::MatchError;

pub const MAX_RULE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BenefitType {
    CashTransfer,
    Subsidy,
    Service,
    Pension,
    Employment,
    Insurance,
    Loan,
}

impl BenefitType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CashTransfer => "cash-transfer",
            Self::Subsidy => "subsidy",
            Self::Service => "service",
            Self::Pension => "pension",
            Self::Employment => "employment",
            Self::Insurance => "insurance",
            Self::Loan => "loan",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash-transfer" => Some(Self::CashTransfer),
            "subsidy" => Some(Self::Subsidy),
            "service" => Some(Self::Service),
            "pension" => Some(Self::Pension),
            "employment" => Some(Self::Employment),
            "insurance" => Some(Self::Insurance),
            "loan" => Some(Self::Loan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RuleValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl Display for RuleValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag(value) => write!(f, "{value}"),
            Self::Number(value) => f.write_str(&format_number(*value)),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Comparison applied to one profile field. Operator names follow the
/// admin catalog's rule vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Gt { value: f64 },
    Gte { value: f64 },
    Lt { value: f64 },
    Lte { value: f64 },
    Between { min: f64, max: f64 },
    Eq { value: RuleValue },
    In { values: Vec<String> },
}

impl Condition {
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Gt { .. } => "gt",
            Self::Gte { .. } => "gte",
            Self::Lt { .. } => "lt",
            Self::Lte { .. } => "lte",
            Self::Between { .. } => "between",
            Self::Eq { .. } => "eq",
            Self::In { .. } => "in",
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Predicate {
    pub field: String,
    #[serde(flatten)]
    pub condition: Condition,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub mandatory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuleNode {
    All(Vec<RuleNode>),
    Any(Vec<RuleNode>),
    Predicate(Predicate),
}

impl RuleNode {
    #[must_use]
    pub fn predicate(field: &str, condition: Condition) -> Self {
        Self::Predicate(Predicate {
            field: field.to_string(),
            condition,
            weight: default_weight(),
            mandatory: false,
        })
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scheme {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub benefit_amount: Option<f64>,
    pub benefit_type: BenefitType,
    #[serde(default)]
    pub is_central: bool,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub application_url: Option<String>,
    #[serde(default)]
    pub required_documents: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// `None` means the scheme is open to every applicant.
    #[serde(default)]
    pub eligibility: Option<RuleNode>,
}

impl Scheme {
    /// Check catalog metadata and the shape of the rule tree.
    ///
    /// # Errors
    /// Returns [`MatchError::Configuration`] when the record is malformed or a
    /// rule references an unknown profile field.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.id.trim().is_empty() {
            return Err(MatchError::Configuration("scheme id MUST be non-empty".to_string()));
        }

        if self.name.trim().is_empty() {
            return Err(MatchError::Configuration(format!(
                "scheme `{}` MUST have a non-empty name",
                self.id
            )));
        }

        if let Some(amount) = self.benefit_amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err(MatchError::Configuration(format!(
                    "scheme `{}` benefit_amount MUST be finite and non-negative",
                    self.id
                )));
            }
        }

        if self.required_documents.iter().any(|document| document.trim().is_empty()) {
            return Err(MatchError::Configuration(format!(
                "scheme `{}` required_documents MUST NOT contain blank entries",
                self.id
            )));
        }

        if let Some(rule) = &self.eligibility {
            let positive = check_rule(rule, 1)?;
            if positive == 0 {
                return Err(MatchError::Configuration(format!(
                    "scheme `{}` rule tree has no positively weighted predicate",
                    self.id
                )));
            }
        }

        Ok(())
    }
}

/// Returns the number of positively weighted leaves under `node`.
fn check_rule(node: &RuleNode, depth: usize) -> Result<usize, MatchError> {
    if depth > MAX_RULE_DEPTH {
        return Err(MatchError::Configuration(format!(
            "rule tree nesting exceeds {MAX_RULE_DEPTH} levels"
        )));
    }

    match node {
        RuleNode::All(children) | RuleNode::Any(children) => {
            if children.is_empty() {
                let kind = if matches!(node, RuleNode::All(_)) { "all" } else { "any" };
                return Err(MatchError::Configuration(format!("`{kind}` group MUST NOT be empty")));
            }
            let mut positive = 0;
            for child in children {
                positive += check_rule(child, depth + 1)?;
            }
            Ok(positive)
        }
        RuleNode::Predicate(predicate) => {
            resolve_predicate(predicate)?;
            Ok(usize::from(predicate.weight > 0.0))
        }
    }
}

/// Resolve the field a predicate reads and check the operator fits it.
pub(crate) fn resolve_predicate(predicate: &Predicate) -> Result<ProfileField, MatchError> {
    let field = ProfileField::parse(&predicate.field).ok_or_else(|| {
        MatchError::Configuration(format!(
            "rule references unknown profile field `{}`",
            predicate.field
        ))
    })?;

    if !predicate.weight.is_finite() {
        return Err(MatchError::Configuration(format!(
            "weight for `{field}` MUST be finite"
        )));
    }

    let kind = field.kind();
    let mismatch = || {
        MatchError::Configuration(format!(
            "operator `{}` cannot be applied to field `{field}`",
            predicate.condition.op_name()
        ))
    };

    match &predicate.condition {
        Condition::Gt { value }
        | Condition::Gte { value }
        | Condition::Lt { value }
        | Condition::Lte { value } => {
            if kind != FieldKind::Numeric {
                return Err(mismatch());
            }
            ensure_finite(field, *value)?;
        }
        Condition::Between { min, max } => {
            if kind != FieldKind::Numeric {
                return Err(mismatch());
            }
            ensure_finite(field, *min)?;
            ensure_finite(field, *max)?;
            if min > max {
                return Err(MatchError::Configuration(format!(
                    "between bounds for `{field}` are inverted ({} > {})",
                    format_number(*min),
                    format_number(*max)
                )));
            }
        }
        Condition::Eq { value } => match (kind, value) {
            (FieldKind::Numeric, RuleValue::Number(number)) => ensure_finite(field, *number)?,
            (FieldKind::Text, RuleValue::Text(_)) | (FieldKind::Flag, RuleValue::Flag(_)) => {}
            _ => {
                return Err(MatchError::Configuration(format!(
                    "eq value `{value}` does not match the type of field `{field}`"
                )));
            }
        },
        Condition::In { values } => {
            if kind != FieldKind::Text {
                return Err(mismatch());
            }
            if values.is_empty() {
                return Err(MatchError::Configuration(format!(
                    "`in` list for `{field}` MUST NOT be empty"
                )));
            }
        }
    }

    Ok(field)
}

fn ensure_finite(field: ProfileField, value: f64) -> Result<(), MatchError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MatchError::Configuration(format!("operand for `{field}` MUST be finite")))
    }
}

/// Render whole numbers without a trailing `.0`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Scheme fields a recommendation carries for rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemeSummary {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub benefit_amount: Option<f64>,
    pub benefit_type: BenefitType,
    pub is_central: bool,
    pub state: Option<String>,
    pub application_url: Option<String>,
    pub required_documents: Vec<String>,
}

impl From<&Scheme> for SchemeSummary {
    fn from(scheme: &Scheme) -> Self {
        Self {
            id: scheme.id.clone(),
            name: scheme.name.clone(),
            category: scheme.category.clone(),
            description: scheme.description.clone(),
            benefit_amount: scheme.benefit_amount,
            benefit_type: scheme.benefit_type,
            is_central: scheme.is_central,
            state: scheme.state.clone(),
            application_url: scheme.application_url.clone(),
            required_documents: scheme.required_documents.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogLoad {
    pub schemes: Vec<Scheme>,
    pub warnings: Vec<EvaluationWarning>,
}

/// Decode raw catalog entries one at a time so a single bad record only
/// costs that record.
#[must_use]
pub fn decode_catalog_entries(entries: Vec<serde_json::Value>) -> CatalogLoad {
    let mut load = CatalogLoad::default();
    for (entry_index, entry) in entries.into_iter().enumerate() {
        let scheme_id =
            entry.get("id").and_then(serde_json::Value::as_str).map(ToString::to_string);
        match serde_json::from_value::<Scheme>(entry) {
            Ok(scheme) => load.schemes.push(scheme),
            Err(err) => {
                tracing::warn!(
                    entry_index,
                    scheme_id = scheme_id.as_deref().unwrap_or("<unknown>"),
                    error = %err,
                    "skipping undecodable catalog entry"
                );
                load.warnings.push(EvaluationWarning {
                    entry_index,
                    scheme_id,
                    kind: WarningKind::Configuration,
                    message: format!("malformed scheme record: {err}"),
                });
            }
        }
    }
    load
}

/// Decode a JSON array of scheme records.
///
/// # Errors
/// Returns [`MatchError::Configuration`] when the document is not a JSON array.
pub fn decode_catalog_json(body: &str) -> Result<CatalogLoad, MatchError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|err| MatchError::Configuration(format!("catalog is not valid JSON: {err}")))?;
    let serde_json::Value::Array(entries) = value else {
        return Err(MatchError::Configuration("catalog MUST be a JSON array".to_string()));
    };
    Ok(decode_catalog_entries(entries))
}
