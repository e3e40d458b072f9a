use std::collections::HashMap;
use std::path::Path;

use gatewright_core::enforcement::ExecutionStrategy;
use gatewright_core::spec::GateSpecification;
use serde::{Deserialize, Serialize};

use crate::error::PlannerError;

/// A prompt the caller can execute, with its gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Template text the gate renderer enhances.
    #[serde(default)]
    pub template: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_steps: Vec<ChainStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_configuration: Option<GateConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_assigned_gates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script_tools: Vec<String>,
}

impl PromptDefinition {
    pub fn has_chain_steps(&self) -> bool {
        !self.chain_steps.is_empty()
    }

    /// Whether methodology gates may apply to this prompt.
    pub fn framework_gates_enabled(&self) -> bool {
        self.gate_configuration
            .as_ref()
            .is_none_or(|c| c.framework_gates)
    }

    pub fn gate_includes(&self) -> &[String] {
        self.gate_configuration
            .as_ref()
            .map(|c| c.include.as_slice())
            .unwrap_or_default()
    }

    pub fn gate_excludes(&self) -> &[String] {
        self.gate_configuration
            .as_ref()
            .map(|c| c.exclude.as_slice())
            .unwrap_or_default()
    }

    pub fn inline_gate_definitions(&self) -> &[GateSpecification] {
        self.gate_configuration
            .as_ref()
            .map(|c| c.inline_gate_definitions.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub prompt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfiguration {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_framework_gates")]
    pub framework_gates: bool,
    #[serde(default)]
    pub inline_gate_definitions: Vec<GateSpecification>,
}

impl Default for GateConfiguration {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            framework_gates: true,
            inline_gate_definitions: Vec::new(),
        }
    }
}

fn default_framework_gates() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gate_configuration: CategoryGates,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryGates {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Prompts and categories, loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptCatalog {
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
    #[serde(default)]
    pub categories: Vec<CategoryDefinition>,
}

impl PromptCatalog {
    pub async fn load(path: &Path) -> Result<Self, PlannerError> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            PlannerError::CatalogError(format!("{}: {e}", path.display()))
        })
    }

    pub fn prompt(&self, id: &str) -> Option<&PromptDefinition> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn category(&self, id: &str) -> Option<&CategoryDefinition> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn categories_by_id(&self) -> HashMap<String, CategoryDefinition> {
        self.categories
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect()
    }
}

/// Execution modifiers. At most one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Clean,
    Judge,
    Lean,
    Framework,
}

impl Modifier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "clean" => Some(Modifier::Clean),
            "judge" => Some(Modifier::Judge),
            "lean" => Some(Modifier::Lean),
            "framework" => Some(Modifier::Framework),
            _ => None,
        }
    }

    /// Whether the modifier removes every gate from the plan.
    pub fn clears_gates(self) -> bool {
        matches!(self, Modifier::Clean | Modifier::Framework)
    }

    /// The framework requirement the modifier forces.
    pub fn requires_framework(self) -> bool {
        matches!(self, Modifier::Judge | Modifier::Framework)
    }
}

impl std::fmt::Display for Modifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modifier::Clean => write!(f, "clean"),
            Modifier::Judge => write!(f, "judge"),
            Modifier::Lean => write!(f, "lean"),
            Modifier::Framework => write!(f, "framework"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionModifiers {
    pub clean: bool,
    pub judge: bool,
    pub lean: bool,
    pub framework: bool,
}

impl ExecutionModifiers {
    pub fn active(&self) -> Option<Modifier> {
        if self.clean {
            Some(Modifier::Clean)
        } else if self.judge {
            Some(Modifier::Judge)
        } else if self.lean {
            Some(Modifier::Lean)
        } else if self.framework {
            Some(Modifier::Framework)
        } else {
            None
        }
    }

    pub fn suppresses_gates(&self) -> bool {
        self.active().is_some_and(Modifier::clears_gates)
    }
}

impl From<Modifier> for ExecutionModifiers {
    fn from(modifier: Modifier) -> Self {
        let mut modifiers = Self::default();
        match modifier {
            Modifier::Clean => modifiers.clean = true,
            Modifier::Judge => modifiers.judge = true,
            Modifier::Lean => modifiers.lean = true,
            Modifier::Framework => modifiers.framework = true,
        }
        modifiers
    }
}

/// Upstream analysis of how a command should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticAnalysis {
    pub execution_type: ExecutionStrategy,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Resolved plan for one prompt or chain step, or for a whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub strategy: ExecutionStrategy,
    pub gates: Vec<String>,
    pub requires_framework: bool,
    pub requires_session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub modifiers: ExecutionModifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<SemanticAnalysis>,
    /// Gates in `gates` that came from the auto-selector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_selected_gates: Vec<String>,
}

/// A chain-level plan plus one plan per step, in step order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPlan {
    pub chain_plan: ExecutionPlan,
    pub step_plans: Vec<ExecutionPlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_gate_configuration_allows_framework_gates() {
        let prompt = PromptDefinition {
            id: "analyze".into(),
            ..Default::default()
        };
        assert!(prompt.framework_gates_enabled());
        assert!(prompt.gate_includes().is_empty());
    }

    #[test]
    fn gate_configuration_defaults_framework_gates_on() {
        let prompt: PromptDefinition = serde_json::from_str(
            r#"{"id": "analyze", "gate_configuration": {"include": ["code-quality"]}}"#,
        )
        .unwrap();
        assert!(prompt.framework_gates_enabled());
        assert_eq!(prompt.gate_includes(), ["code-quality"]);
    }

    #[test]
    fn catalog_lookup() {
        let catalog: PromptCatalog = serde_json::from_str(
            r#"{
                "prompts": [{"id": "analyze", "category": "analysis"}],
                "categories": [{"id": "analysis", "gate_configuration": {"exclude": ["tone"]}}]
            }"#,
        )
        .unwrap();
        assert!(catalog.prompt("analyze").is_some());
        assert!(catalog.prompt("missing").is_none());
        assert_eq!(
            catalog.category("analysis").unwrap().gate_configuration.exclude,
            ["tone"]
        );
    }

    #[test]
    fn modifier_effects() {
        assert!(Modifier::Clean.clears_gates());
        assert!(!Modifier::Clean.requires_framework());
        assert!(Modifier::Framework.clears_gates());
        assert!(Modifier::Framework.requires_framework());
        assert!(!Modifier::Lean.clears_gates());
        assert!(Modifier::Judge.requires_framework());
        assert_eq!(Modifier::parse("LEAN"), Some(Modifier::Lean));
        assert_eq!(Modifier::parse("verbose"), None);
    }

    #[test]
    fn modifiers_from_single_flag() {
        let modifiers = ExecutionModifiers::from(Modifier::Judge);
        assert_eq!(modifiers.active(), Some(Modifier::Judge));
        assert!(!modifiers.suppresses_gates());
        assert!(ExecutionModifiers::from(Modifier::Clean).suppresses_gates());
    }
}
