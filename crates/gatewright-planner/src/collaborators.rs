use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use gatewright_core::registry::TemporaryGateRegistry;
use serde::{Deserialize, Serialize};

use crate::config::ActivationRule;
use crate::error::PlannerError;

/// Heading the list renderer puts above its gate section.
const GATE_SECTION_HEADING: &str = "## Quality Gates";

/// Context handed to the renderer alongside the gate IDs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateContext {
    pub prompt_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explicit_gate_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateValidationResult {
    pub gate_id: String,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedPrompt {
    pub enhanced_prompt: String,
    pub instruction_length: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_results: Vec<GateValidationResult>,
}

/// Renders gate instructions into a prompt template.
pub trait GateRenderer: Send + Sync {
    fn enhance_prompt<'a>(
        &'a self,
        prompt: &'a str,
        gate_ids: &'a [String],
        context: &'a GateContext,
    ) -> Pin<Box<dyn Future<Output = Result<EnhancedPrompt, PlannerError>> + Send + 'a>>;
}

/// Appends a markdown list of gates to the template.
///
/// Temporary gates are rendered with their guidance; other gates by ID.
pub struct ListGateRenderer {
    registry: Arc<TemporaryGateRegistry>,
}

impl ListGateRenderer {
    pub fn new(registry: Arc<TemporaryGateRegistry>) -> Self {
        Self { registry }
    }
}

impl GateRenderer for ListGateRenderer {
    fn enhance_prompt<'a>(
        &'a self,
        prompt: &'a str,
        gate_ids: &'a [String],
        _context: &'a GateContext,
    ) -> Pin<Box<dyn Future<Output = Result<EnhancedPrompt, PlannerError>> + Send + 'a>> {
        Box::pin(async move {
            if gate_ids.is_empty() {
                return Ok(EnhancedPrompt {
                    enhanced_prompt: prompt.to_string(),
                    instruction_length: 0,
                    validation_results: Vec::new(),
                });
            }

            let mut section = format!("\n\n{GATE_SECTION_HEADING}\n");
            for id in gate_ids {
                match self.registry.get_temporary_gate(id).await {
                    Some(gate) => {
                        let guidance = gate.guidance.replace('\n', "\n  ");
                        section.push_str(&format!("- **{}**: {guidance}\n", gate.input.name));
                    }
                    None => section.push_str(&format!("- **{id}**\n")),
                }
            }

            Ok(EnhancedPrompt {
                instruction_length: section.len(),
                enhanced_prompt: format!("{prompt}{section}"),
                validation_results: Vec::new(),
            })
        })
    }
}

/// Display-only instructions: what the renderer appended to `original`.
///
/// Returns `None` when `enhanced` does not start with `original` or adds
/// nothing.
pub fn extract_gate_instructions(original: &str, enhanced: &str) -> Option<String> {
    let suffix = enhanced.strip_prefix(original)?.trim();
    if suffix.is_empty() {
        None
    } else {
        Some(suffix.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateSelectionCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub enabled_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSelection {
    pub selected_ids: Vec<String>,
    #[serde(default)]
    pub skipped_ids: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Picks registry gates that should apply automatically.
pub trait GateAutoSelector: Send + Sync {
    fn select_gates<'a>(
        &'a self,
        criteria: &'a GateSelectionCriteria,
    ) -> Pin<Box<dyn Future<Output = Result<GateSelection, PlannerError>> + Send + 'a>>;
}

/// Selects gates from configured activation rules.
pub struct RuleBasedAutoSelector {
    rules: Vec<ActivationRule>,
}

impl RuleBasedAutoSelector {
    pub fn new(rules: Vec<ActivationRule>) -> Self {
        Self { rules }
    }

    fn matches(rule: &ActivationRule, criteria: &GateSelectionCriteria) -> bool {
        let category_ok = rule.categories.is_empty()
            || criteria
                .prompt_category
                .as_ref()
                .is_some_and(|c| rule.categories.iter().any(|r| r.eq_ignore_ascii_case(c)));
        let framework_ok = rule.frameworks.is_empty()
            || criteria
                .framework
                .as_ref()
                .is_some_and(|f| rule.frameworks.iter().any(|r| r.eq_ignore_ascii_case(f)));
        category_ok && framework_ok
    }
}

impl GateAutoSelector for RuleBasedAutoSelector {
    fn select_gates<'a>(
        &'a self,
        criteria: &'a GateSelectionCriteria,
    ) -> Pin<Box<dyn Future<Output = Result<GateSelection, PlannerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut selection = GateSelection::default();
            for rule in &self.rules {
                let id = &rule.gate_id;
                let eligible = (rule.enabled || !criteria.enabled_only) && Self::matches(rule, criteria);
                let bucket = if eligible {
                    &mut selection.selected_ids
                } else {
                    &mut selection.skipped_ids
                };
                if !bucket.contains(id) {
                    bucket.push(id.clone());
                }
            }
            selection
                .metadata
                .insert("rules".into(), self.rules.len().to_string());
            Ok(selection)
        })
    }
}
