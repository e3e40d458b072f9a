use std::collections::HashMap;
use std::sync::Arc;

use gatewright_core::enforcement::ExecutionStrategy;
use gatewright_core::methodology::{MethodologyGateCache, strip_methodology_gates};
use gatewright_core::spec::GateSpecification;

use crate::collaborators::{GateAutoSelector, GateSelectionCriteria};
use crate::operators::ParsedCommand;
use crate::types::{
    CategoryDefinition, ChainPlan, ExecutionModifiers, ExecutionPlan, Modifier, PromptDefinition,
    SemanticAnalysis,
};

/// Inputs to planning beyond the prompt itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanningContext<'a> {
    pub parsed: Option<&'a ParsedCommand>,
    /// Framework processing is globally enabled.
    pub framework_enabled: bool,
    pub active_framework: Option<&'a str>,
    /// The request's unified gate override list.
    pub gate_overrides: &'a [GateSpecification],
    pub analysis: Option<&'a SemanticAnalysis>,
}

/// Resolves strategy, gates and framework/session requirements for prompts.
#[derive(Default)]
pub struct ExecutionPlanner {
    auto_selector: Option<Arc<dyn GateAutoSelector>>,
    methodology: Option<Arc<MethodologyGateCache>>,
    categories: HashMap<String, CategoryDefinition>,
}

impl ExecutionPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_selector(mut self, selector: Arc<dyn GateAutoSelector>) -> Self {
        self.auto_selector = Some(selector);
        self
    }

    pub fn with_methodology_cache(mut self, cache: Arc<MethodologyGateCache>) -> Self {
        self.methodology = Some(cache);
        self
    }

    pub fn with_categories(mut self, categories: HashMap<String, CategoryDefinition>) -> Self {
        self.categories = categories;
        self
    }

    pub async fn create_plan(
        &self,
        prompt: &PromptDefinition,
        ctx: &PlanningContext<'_>,
    ) -> ExecutionPlan {
        let strategy = resolve_strategy(prompt, ctx);
        let modifier = resolve_modifier(prompt, ctx);

        let requires_framework = match modifier {
            Some(m) => m.requires_framework(),
            None => ctx.framework_enabled || ctx.parsed.is_some_and(|p| p.framework.is_some()),
        };
        let requires_session = strategy == ExecutionStrategy::Chain
            || prompt.has_chain_steps()
            || ctx.parsed.is_some_and(|p| p.operators.requires_session());

        let (gates, auto_selected_gates) = if modifier.is_some_and(Modifier::clears_gates) {
            (Vec::new(), Vec::new())
        } else {
            self.assemble_gates(prompt, ctx).await
        };

        let plan = ExecutionPlan {
            strategy,
            gates,
            requires_framework,
            requires_session,
            category: prompt.category.clone(),
            modifiers: modifier.map(ExecutionModifiers::from).unwrap_or_default(),
            analysis: ctx.analysis.cloned(),
            auto_selected_gates,
        };

        tracing::info!(
            prompt_id = %prompt.id,
            strategy = %plan.strategy,
            gates = plan.gates.len(),
            requires_framework = plan.requires_framework,
            modifier = ?modifier,
            "Execution plan created"
        );
        plan
    }

    /// Plan each step, then fold the step plans into one chain-level plan.
    pub async fn create_chain_plan(
        &self,
        steps: &[&PromptDefinition],
        ctx: &PlanningContext<'_>,
    ) -> ChainPlan {
        let mut step_plans = Vec::with_capacity(steps.len());
        for prompt in steps {
            step_plans.push(self.create_plan(prompt, ctx).await);
        }

        let mut gates = Vec::new();
        let mut auto_selected_gates = Vec::new();
        for plan in &step_plans {
            push_unique(&mut gates, &plan.gates);
            push_unique(&mut auto_selected_gates, &plan.auto_selected_gates);
        }

        let first = step_plans.first();
        let chain_plan = ExecutionPlan {
            strategy: ExecutionStrategy::Chain,
            gates,
            requires_framework: step_plans.iter().any(|p| p.requires_framework),
            requires_session: true,
            category: first.and_then(|p| p.category.clone()),
            // Only modifiers the caller typed apply chain-wide; a step's
            // script-tool default stays on that step's plan.
            modifiers: explicit_modifier(ctx, false)
                .map(ExecutionModifiers::from)
                .unwrap_or_default(),
            analysis: ctx.analysis.cloned(),
            auto_selected_gates,
        };

        tracing::info!(
            steps = step_plans.len(),
            gates = chain_plan.gates.len(),
            "Chain plan created"
        );
        ChainPlan {
            chain_plan,
            step_plans,
        }
    }

    async fn assemble_gates(
        &self,
        prompt: &PromptDefinition,
        ctx: &PlanningContext<'_>,
    ) -> (Vec<String>, Vec<String>) {
        let category = prompt
            .category
            .as_deref()
            .and_then(|id| self.categories.get(id));

        let mut gates = Vec::new();
        push_unique(&mut gates, prompt.gate_includes());
        push_unique(&mut gates, &prompt.auto_assigned_gates);
        if let Some(category) = category {
            push_unique(&mut gates, &category.gate_configuration.include);
        }

        let auto = self.auto_select(prompt, ctx).await;
        push_unique(&mut gates, &auto);

        gates.retain(|id| {
            let excluded = prompt.gate_excludes().contains(id)
                || category.is_some_and(|c| c.gate_configuration.exclude.contains(id));
            if excluded {
                tracing::debug!(gate_id = %id, prompt_id = %prompt.id, "Gate excluded");
            }
            !excluded
        });
        let mut auto_selected: Vec<String> =
            auto.into_iter().filter(|id| gates.contains(id)).collect();

        for spec in ctx.gate_overrides {
            if let GateSpecification::Reference(id) = spec
                && !gates.contains(id)
            {
                gates.push(id.clone());
            }
        }

        if !prompt.framework_gates_enabled()
            && let Some(cache) = &self.methodology
        {
            let methodology_ids = cache.get().await;
            let removed = strip_methodology_gates(&mut gates, &methodology_ids);
            if removed > 0 {
                tracing::debug!(
                    prompt_id = %prompt.id,
                    removed,
                    "Methodology gates suppressed by prompt"
                );
            }
        }

        auto_selected.retain(|id| gates.contains(id));
        (gates, auto_selected)
    }

    async fn auto_select(&self, prompt: &PromptDefinition, ctx: &PlanningContext<'_>) -> Vec<String> {
        let Some(selector) = &self.auto_selector else {
            return Vec::new();
        };

        let criteria = GateSelectionCriteria {
            prompt_category: prompt.category.clone(),
            framework: ctx.active_framework.map(str::to_string),
            enabled_only: true,
        };
        match selector.select_gates(&criteria).await {
            Ok(selection) => {
                tracing::debug!(
                    prompt_id = %prompt.id,
                    selected = ?selection.selected_ids,
                    skipped = selection.skipped_ids.len(),
                    "Auto-selected gates"
                );
                selection.selected_ids
            }
            Err(e) => {
                tracing::warn!(prompt_id = %prompt.id, error = %e, "Gate auto-selection failed");
                Vec::new()
            }
        }
    }
}

fn resolve_strategy(prompt: &PromptDefinition, ctx: &PlanningContext<'_>) -> ExecutionStrategy {
    let explicit_chain = prompt.has_chain_steps()
        || ctx
            .parsed
            .is_some_and(|p| p.is_chain() || p.operators.chain);
    if explicit_chain {
        return ExecutionStrategy::Chain;
    }

    if let Some(analysis) = ctx.analysis
        && analysis.execution_type == ExecutionStrategy::Chain
    {
        tracing::debug!(prompt_id = %prompt.id, "Semantic analysis suggests chain execution");
        return ExecutionStrategy::Chain;
    }

    ExecutionStrategy::Single
}

/// First explicit modifier wins; script-tool prompts default to clean when the
/// caller asked for nothing else.
fn resolve_modifier(prompt: &PromptDefinition, ctx: &PlanningContext<'_>) -> Option<Modifier> {
    if let Some(modifier) = explicit_modifier(ctx, true) {
        return Some(modifier);
    }

    let custom_gates =
        !ctx.gate_overrides.is_empty() || ctx.parsed.is_some_and(ParsedCommand::has_inline_gates);
    if !prompt.script_tools.is_empty() && !custom_gates {
        tracing::debug!(prompt_id = %prompt.id, "Script tools present, defaulting to clean");
        return Some(Modifier::Clean);
    }

    None
}

fn explicit_modifier(ctx: &PlanningContext<'_>, warn_on_conflict: bool) -> Option<Modifier> {
    let explicit = ctx.parsed.map(|p| p.modifiers.as_slice()).unwrap_or_default();
    let (first, rest) = explicit.split_first()?;
    if warn_on_conflict && !rest.is_empty() {
        tracing::warn!(
            kept = %first,
            ignored = ?rest,
            "Conflicting modifiers, keeping the first"
        );
    }
    Some(*first)
}

fn push_unique(target: &mut Vec<String>, ids: &[String]) {
    for id in ids {
        if !target.contains(id) {
            target.push(id.clone());
        }
    }
}
