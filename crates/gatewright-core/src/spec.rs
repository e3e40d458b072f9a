use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// A gate as supplied on the wire.
///
/// Variants are tried in declaration order: a bare string, then the strict
/// `{name, description}` custom check, then the full object form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateSpecification {
    /// A canonical gate ID or inline criteria text.
    Reference(String),
    Custom(CustomCheck),
    Full(Box<GateObject>),
}

/// A named check with a description, the lightest ad-hoc gate form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomCheck {
    pub name: String,
    pub description: String,
}

/// The full ad-hoc gate object.
///
/// Enumerated fields are kept as free strings so an unrecognized value falls
/// back to a default during normalization instead of rejecting the request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GateObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub gate_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_criteria: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_step_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_to_steps: Option<Vec<u32>>,
}

impl GateObject {
    /// The referenced gate ID, preferring `id` over `template`.
    pub fn reference(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.template.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether the object carries criteria, guidance or description text of its own.
    ///
    /// Inline content means the caller wants an ad-hoc gate, whatever `id` says.
    pub fn has_inline_content(&self) -> bool {
        non_empty_list(self.criteria.as_deref())
            || non_empty_list(self.pass_criteria.as_deref())
            || non_empty_text(self.guidance.as_deref())
            || non_empty_text(self.description.as_deref())
    }
}

impl GateSpecification {
    /// Enforce the ingress shape rules for a single gate specification.
    pub fn validate(&self) -> Result<(), GateError> {
        match self {
            GateSpecification::Reference(text) => {
                if text.trim().is_empty() {
                    return Err(GateError::InvalidGateSpec(
                        "gate reference must be a non-empty string".into(),
                    ));
                }
            }
            GateSpecification::Custom(check) => {
                if check.name.is_empty() || check.description.is_empty() {
                    return Err(GateError::InvalidGateSpec(
                        "custom check requires a non-empty name and description".into(),
                    ));
                }
            }
            GateSpecification::Full(object) => {
                if object.reference().is_none() && !object.has_inline_content() {
                    return Err(GateError::InvalidGateSpec(
                        "gate object needs an id/template or criteria, pass_criteria, guidance or description".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn non_empty_list(items: Option<&[String]>) -> bool {
    items.is_some_and(|list| list.iter().any(|s| !s.trim().is_empty()))
}

fn non_empty_text(text: Option<&str>) -> bool {
    text.is_some_and(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateType {
    #[default]
    Validation,
    Guidance,
}

impl GateType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "validation" => Some(GateType::Validation),
            "guidance" => Some(GateType::Guidance),
            _ => None,
        }
    }
}

impl std::fmt::Display for GateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateType::Validation => write!(f, "validation"),
            GateType::Guidance => write!(f, "guidance"),
        }
    }
}

/// Lifetime a temporary gate is bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateScope {
    #[default]
    Execution,
    Session,
    Chain,
    Step,
}

impl GateScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "execution" => Some(GateScope::Execution),
            "session" => Some(GateScope::Session),
            "chain" => Some(GateScope::Chain),
            "step" => Some(GateScope::Step),
            _ => None,
        }
    }
}

impl std::fmt::Display for GateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateScope::Execution => write!(f, "execution"),
            GateScope::Session => write!(f, "session"),
            GateScope::Chain => write!(f, "chain"),
            GateScope::Step => write!(f, "step"),
        }
    }
}

/// Who authored an ad-hoc gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOrigin {
    Manual,
    #[default]
    Automatic,
    Analysis,
}

impl GateOrigin {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(GateOrigin::Manual),
            "automatic" => Some(GateOrigin::Automatic),
            "analysis" => Some(GateOrigin::Analysis),
            _ => None,
        }
    }
}

/// Metadata only. Severity never changes enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

/// Canonical internal form of an ad-hoc gate after defaulting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedGateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    pub scope: GateScope,
    pub source: GateOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_criteria: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_step_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_to_steps: Option<Vec<u32>>,
}
