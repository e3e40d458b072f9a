use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use gatewright_core::accumulator::{GateAccumulator, GateSource};
use gatewright_core::canonical::{CanonicalReferenceResolver, InMemoryCanonicalProvider};
use gatewright_core::enforcement::{EnforcementMode, EnforcementState, ExecutionStrategy};
use gatewright_core::engine::{GateIntake, IntakeContext, SourceContribution, merge_contributions};
use gatewright_core::methodology::{
    MethodologyGateCache, StaticMethodologyGateProvider, ensure_methodology_gate,
};
use gatewright_core::registry::{RegistrationBatch, TemporaryGateRegistry, derive_scope_id};
use gatewright_core::spec::GateSpecification;
use gatewright_core::step_filter::filter_by_step;
use gatewright_core::wire::{ExecutionRequest, GateAction, GateVerdict};
use serde::Serialize;

use crate::collaborators::{
    GateAutoSelector, GateContext, GateRenderer, ListGateRenderer, RuleBasedAutoSelector,
    extract_gate_instructions,
};
use crate::config::GatewrightConfig;
use crate::error::PlannerError;
use crate::metrics::{
    GateKind, GateMetrics, GateUsageRecord, MetricsSink, ValidationOutcome,
    split_instruction_budget,
};
use crate::operators::{ParsedCommand, parse_command};
use crate::planner::{ExecutionPlanner, PlanningContext};
use crate::types::{ExecutionPlan, PromptCatalog, PromptDefinition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateProvenance {
    pub gate_id: String,
    pub source: GateSource,
}

/// Gates and rendered instructions for one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStep {
    pub step_number: u32,
    pub prompt_id: String,
    pub plan: ExecutionPlan,
    pub gates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub instruction_length: usize,
}

/// Outcome of resolving one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedExecution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    pub steps: Vec<ResolvedStep>,
    pub gates: Vec<String>,
    pub source_counts: BTreeMap<GateSource, usize>,
    pub provenance: Vec<GateProvenance>,
    pub temporary_gate_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforcement_mode: Option<EnforcementMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<GateVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<GateAction>,
    /// Why work was skipped or degraded.
    pub diagnostics: Vec<String>,
}

impl ResolvedExecution {
    fn note(&mut self, diagnostic: impl Into<String>) {
        let diagnostic = diagnostic.into();
        tracing::info!(diagnostic = %diagnostic, "Gate resolution skipped work");
        self.diagnostics.push(diagnostic);
    }
}

/// Request-wide gate IDs shared by every accumulator in one resolution.
#[derive(Default)]
struct RequestSources<'a> {
    inline: Vec<String>,
    client: Vec<String>,
    temporary: Vec<String>,
    /// Canonical id-only objects from the request, merged as prompt config.
    prompt_config: Vec<String>,
    /// Raw override strings; their classification comes from intake.
    override_strings: HashSet<&'a str>,
}

/// Where the default methodology gate may be injected.
#[derive(Clone, Copy)]
struct MethodologyPolicy<'a> {
    ids: &'a HashSet<String>,
    framework_active: bool,
}

/// Resolves a request end to end: parse, plan, intake ad-hoc gates, merge
/// sources by priority, filter per step, fix enforcement and render.
pub struct GateResolutionPipeline {
    config: GatewrightConfig,
    catalog: PromptCatalog,
    planner: ExecutionPlanner,
    intake: GateIntake,
    methodology: Option<Arc<MethodologyGateCache>>,
    renderer: Option<Arc<dyn GateRenderer>>,
    metrics: Arc<GateMetrics>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl GateResolutionPipeline {
    /// Pipeline with no collaborators: every reference is ad-hoc and nothing
    /// is rendered.
    pub fn new(
        config: GatewrightConfig,
        catalog: PromptCatalog,
        registry: Arc<TemporaryGateRegistry>,
    ) -> Self {
        let planner = ExecutionPlanner::new().with_categories(catalog.categories_by_id());
        Self {
            config,
            catalog,
            planner,
            intake: GateIntake::new(CanonicalReferenceResolver::detached(), registry),
            methodology: None,
            renderer: None,
            metrics: Arc::new(GateMetrics::new()),
            sink: None,
        }
    }

    /// Pipeline wired with in-process collaborators built from `config`.
    pub fn with_defaults(config: GatewrightConfig, catalog: PromptCatalog) -> Self {
        let registry = Arc::new(match config.temporary_gate_ttl() {
            Some(ttl) => TemporaryGateRegistry::with_ttl(ttl),
            None => TemporaryGateRegistry::new(),
        });
        let resolver = CanonicalReferenceResolver::new(Arc::new(InMemoryCanonicalProvider::new(
            config.gates.canonical.clone(),
        )));

        let mut methodology_ids = config.gates.methodology.clone();
        if !config.gates.methodology_default_gate.is_empty() {
            methodology_ids.push(config.gates.methodology_default_gate.clone());
        }
        let methodology = Arc::new(MethodologyGateCache::new(Arc::new(
            StaticMethodologyGateProvider::new(methodology_ids),
        )));
        let selector = Arc::new(RuleBasedAutoSelector::new(config.gates.activation.clone()));
        let renderer = Arc::new(ListGateRenderer::new(Arc::clone(&registry)));

        Self::new(config, catalog, registry)
            .with_resolver(resolver)
            .with_methodology_cache(methodology)
            .with_auto_selector(selector)
            .with_renderer(renderer)
    }

    pub fn with_resolver(mut self, resolver: CanonicalReferenceResolver) -> Self {
        self.intake = GateIntake::new(resolver, Arc::clone(self.intake.registry()));
        self
    }

    pub fn with_methodology_cache(mut self, cache: Arc<MethodologyGateCache>) -> Self {
        self.planner = std::mem::take(&mut self.planner).with_methodology_cache(Arc::clone(&cache));
        self.methodology = Some(cache);
        self
    }

    pub fn with_auto_selector(mut self, selector: Arc<dyn GateAutoSelector>) -> Self {
        self.planner = std::mem::take(&mut self.planner).with_auto_selector(selector);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn GateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<TemporaryGateRegistry> {
        self.intake.registry()
    }

    pub fn metrics(&self) -> &Arc<GateMetrics> {
        &self.metrics
    }

    /// Call after gate definitions change so methodology IDs are reloaded.
    pub async fn reload_gate_definitions(&self) {
        if let Some(cache) = &self.methodology {
            cache.invalidate().await;
        }
    }

    /// End a scope: every temporary gate owned by `scope_id` is released.
    pub async fn end_scope(&self, scope_id: &str) -> usize {
        self.registry().release_owner(scope_id).await
    }

    /// Resolve a request as a fresh execution.
    pub async fn resolve(&self, request: &ExecutionRequest) -> Result<ResolvedExecution, PlannerError> {
        let state = EnforcementState::new();
        self.resolve_with_state(request, &state).await
    }

    /// Resolve a request within an ongoing execution whose enforcement mode
    /// may already be fixed.
    ///
    /// Only ingress validation returns an error; every later failure degrades
    /// to fewer gates and a diagnostic.
    pub async fn resolve_with_state(
        &self,
        request: &ExecutionRequest,
        state: &EnforcementState,
    ) -> Result<ResolvedExecution, PlannerError> {
        request.validate()?;

        // A restarted execution starts over with no enforcement mode.
        let restarted = EnforcementState::new();
        let state = if request.force_restart { &restarted } else { state };

        let mut resolved = ResolvedExecution {
            verdict: request.verdict(),
            action: request.action(),
            enforcement_mode: state.mode(),
            ..Default::default()
        };

        let purged = self.registry().purge_expired(Utc::now()).await;
        if purged > 0 {
            tracing::debug!(purged, "Expired temporary gates purged");
        }

        let scope_id = derive_scope_id(
            request.session_id.as_deref(),
            request.chain_id.as_deref(),
            request.command_text(),
        );
        if resolved.action == Some(GateAction::Abort) {
            let released = self.end_scope(&scope_id).await;
            resolved.note(format!(
                "execution aborted; released {released} temporary gates for scope {scope_id}"
            ));
            return Ok(resolved);
        }
        if request.force_restart {
            let released = self.end_scope(&scope_id).await;
            tracing::info!(scope_id = %scope_id, released, "Execution restarted");
        }

        let Some(command) = request.command_text() else {
            resolved.note("request has no command; nothing to plan");
            return Ok(resolved);
        };
        let parsed = parse_command(command);
        let Some((prompts, expanded)) = self.lookup_prompts(&parsed, &mut resolved) else {
            return Ok(resolved);
        };

        let active_framework = parsed
            .framework
            .as_deref()
            .or(self.config.frameworks.active.as_deref());
        let ctx = PlanningContext {
            parsed: Some(&parsed),
            framework_enabled: self.config.frameworks.enabled,
            active_framework,
            gate_overrides: &request.gates,
            analysis: None,
        };

        let (plan, step_plans) = if parsed.is_chain() || expanded {
            let chain = self.planner.create_chain_plan(&prompts, &ctx).await;
            (chain.chain_plan, chain.step_plans)
        } else {
            let plan = self.planner.create_plan(prompts[0], &ctx).await;
            (plan.clone(), vec![plan])
        };
        self.metrics.record_plan_created();

        resolved.plan = Some(plan.clone());
        resolved.steps = prompts
            .iter()
            .zip(&step_plans)
            .enumerate()
            .map(|(i, (prompt, step_plan))| ResolvedStep {
                step_number: (i + 1) as u32,
                prompt_id: prompt.id.clone(),
                plan: step_plan.clone(),
                gates: Vec::new(),
                instructions: None,
                instruction_length: 0,
            })
            .collect();

        if !self.config.gates.enabled {
            resolved.note("gate system disabled");
            return Ok(resolved);
        }
        if let Some(modifier) = plan.modifiers.active()
            && plan.modifiers.suppresses_gates()
        {
            resolved.note(format!("gates suppressed by %{modifier}"));
            return Ok(resolved);
        }

        let is_chain = plan.strategy == ExecutionStrategy::Chain;
        let mut batch = RegistrationBatch::new();

        let sources = self
            .intake_request(&parsed, &request.gates, is_chain, &scope_id, &mut batch)
            .await;

        let mut step_inline = Vec::with_capacity(prompts.len());
        for (i, prompt) in prompts.iter().enumerate() {
            let ctx = IntakeContext {
                is_chain,
                current_step: (i + 1) as u32,
                scope_id: &scope_id,
            };
            let result = self
                .intake
                .process(prompt.inline_gate_definitions(), ctx, &mut batch)
                .await;
            let mut ids = result.canonical;
            extend_unique(&mut ids, result.temporary);
            step_inline.push(ids);
        }

        let methodology_ids = match &self.methodology {
            Some(cache) => cache.get().await,
            None => Arc::new(HashSet::new()),
        };
        let framework_active = active_framework.is_some();

        let mut chain_inline = Vec::new();
        for (ids, step_plan) in step_inline.iter().zip(&step_plans) {
            if !step_plan.modifiers.suppresses_gates() {
                extend_unique(&mut chain_inline, ids.iter().cloned());
            }
        }
        let policy = MethodologyPolicy {
            ids: &methodology_ids,
            framework_active: framework_active
                && plan.requires_framework
                && prompts.iter().all(|p| p.framework_gates_enabled()),
        };
        let accumulator = self.accumulate(&plan, &chain_inline, &sources, policy);

        if is_chain {
            for ((step, step_plan), (prompt, inline)) in resolved
                .steps
                .iter_mut()
                .zip(&step_plans)
                .zip(prompts.iter().zip(&step_inline))
            {
                if let Some(modifier) = step_plan.modifiers.active()
                    && step_plan.modifiers.suppresses_gates()
                {
                    tracing::debug!(
                        step = step.step_number,
                        prompt_id = %prompt.id,
                        modifier = %modifier,
                        "Gates suppressed for step"
                    );
                    continue;
                }
                let policy = MethodologyPolicy {
                    ids: &methodology_ids,
                    framework_active: framework_active
                        && step_plan.requires_framework
                        && prompt.framework_gates_enabled(),
                };
                let step_accumulator = self.accumulate(step_plan, inline, &sources, policy);
                step.gates =
                    filter_by_step(self.registry(), step_accumulator.get_all(), step.step_number).await;
            }
        } else if let Some(step) = resolved.steps.first_mut() {
            step.gates = accumulator.get_all().to_vec();
        }

        resolved.source_counts = accumulator.source_counts().clone();
        resolved.provenance = accumulator
            .provenance()
            .into_iter()
            .map(|(gate_id, source)| GateProvenance { gate_id, source })
            .collect();
        resolved.temporary_gate_ids = batch.produced().to_vec();
        resolved.gates = accumulator.into_ids();
        resolved.enforcement_mode = state.assign(plan.strategy, !resolved.gates.is_empty());

        self.render(&prompts, &plan, active_framework, &mut resolved).await;

        self.metrics.record_gates_applied(resolved.gates.len());
        self.metrics
            .record_temporary_gates(batch.created(), batch.duplicates());
        if let Some(sink) = &self.sink {
            record_usage(sink.as_ref(), &resolved, request.session_id.as_deref());
        }

        tracing::info!(
            scope_id = %scope_id,
            strategy = %plan.strategy,
            gates = resolved.gates.len(),
            temporary = resolved.temporary_gate_ids.len(),
            dropped = batch.dropped(),
            mode = ?resolved.enforcement_mode,
            "Gate resolution complete"
        );
        Ok(resolved)
    }

    /// Prompts for each parsed step. A single prompt with declared chain steps
    /// expands into those steps; the flag reports whether that happened.
    fn lookup_prompts<'c>(
        &'c self,
        parsed: &ParsedCommand,
        resolved: &mut ResolvedExecution,
    ) -> Option<(Vec<&'c PromptDefinition>, bool)> {
        if parsed.steps.is_empty() {
            resolved.note("command names no prompt");
            return None;
        }

        let mut prompts = Vec::with_capacity(parsed.steps.len());
        for step in &parsed.steps {
            match self.catalog.prompt(&step.prompt_id) {
                Some(prompt) => prompts.push(prompt),
                None => {
                    resolved.note(format!("unknown prompt '{}'", step.prompt_id));
                    return None;
                }
            }
        }

        if let [single] = prompts.as_slice()
            && single.has_chain_steps()
        {
            let mut steps = Vec::with_capacity(single.chain_steps.len());
            for chain_step in &single.chain_steps {
                match self.catalog.prompt(&chain_step.prompt_id) {
                    Some(prompt) => steps.push(prompt),
                    None => {
                        resolved.note(format!(
                            "chain '{}' references unknown prompt '{}'",
                            single.id, chain_step.prompt_id
                        ));
                        return None;
                    }
                }
            }
            return Some((steps, true));
        }

        Some((prompts, false))
    }

    /// Run inline operator gates and request gates through intake.
    async fn intake_request<'r>(
        &self,
        parsed: &ParsedCommand,
        request_gates: &'r [GateSpecification],
        is_chain: bool,
        scope_id: &str,
        batch: &mut RegistrationBatch,
    ) -> RequestSources<'r> {
        let mut sources = RequestSources::default();

        for gate in &parsed.inline_gates {
            let ctx = IntakeContext {
                is_chain,
                current_step: gate.step,
                scope_id,
            };
            let result = self
                .intake
                .process(&[gate.to_specification()], ctx, batch)
                .await;
            extend_unique(&mut sources.inline, result.canonical);
            extend_unique(&mut sources.inline, result.temporary);
        }

        let ctx = IntakeContext {
            is_chain,
            current_step: 1,
            scope_id,
        };
        for spec in request_gates {
            let result = self
                .intake
                .process(std::slice::from_ref(spec), ctx, batch)
                .await;
            match spec {
                GateSpecification::Reference(raw) => {
                    sources.override_strings.insert(raw.as_str());
                    extend_unique(&mut sources.client, result.canonical);
                }
                _ => extend_unique(&mut sources.prompt_config, result.canonical),
            }
            extend_unique(&mut sources.temporary, result.temporary);
        }

        sources
    }

    /// Merge every source for one plan into a fresh accumulator.
    fn accumulate(
        &self,
        plan: &ExecutionPlan,
        prompt_inline: &[String],
        sources: &RequestSources<'_>,
        policy: MethodologyPolicy<'_>,
    ) -> GateAccumulator {
        let mut prompt_config = Vec::new();
        let mut methodology = Vec::new();
        let mut auto = Vec::new();

        for id in &plan.gates {
            if sources.override_strings.contains(id.as_str()) {
                continue;
            }
            if policy.ids.contains(id) {
                methodology.push(id.clone());
            } else if plan.auto_selected_gates.contains(id) {
                auto.push(id.clone());
            } else {
                prompt_config.push(id.clone());
            }
        }
        extend_unique(&mut prompt_config, sources.prompt_config.iter().cloned());
        extend_unique(&mut prompt_config, prompt_inline.iter().cloned());

        let mut combined: Vec<String> = sources
            .inline
            .iter()
            .chain(&sources.client)
            .chain(&sources.temporary)
            .chain(&prompt_config)
            .chain(&methodology)
            .chain(&auto)
            .cloned()
            .collect();
        let default_gate = &self.config.gates.methodology_default_gate;
        if ensure_methodology_gate(
            &mut combined,
            policy.ids,
            self.config.gates.enable_methodology_gates,
            policy.framework_active,
            default_gate,
        ) {
            methodology.push(default_gate.clone());
        }

        merge_contributions(vec![
            SourceContribution::ok(GateSource::InlineOperator, sources.inline.clone()),
            SourceContribution::ok(GateSource::ClientSelection, sources.client.clone()),
            SourceContribution::ok(GateSource::TemporaryRequest, sources.temporary.clone()),
            SourceContribution::ok(GateSource::PromptConfig, prompt_config),
            SourceContribution::ok(GateSource::Methodology, methodology),
            SourceContribution::ok(GateSource::RegistryAuto, auto),
        ])
    }

    /// Render gate instructions per step. A failing step is logged and
    /// skipped; the others still render.
    async fn render(
        &self,
        prompts: &[&PromptDefinition],
        plan: &ExecutionPlan,
        active_framework: Option<&str>,
        resolved: &mut ResolvedExecution,
    ) {
        let Some(renderer) = &self.renderer else {
            if !resolved.gates.is_empty() {
                resolved.note("no gate renderer configured; instructions not rendered");
            }
            return;
        };

        let framework = active_framework
            .filter(|_| plan.requires_framework)
            .map(str::to_string);

        for (step, prompt) in resolved.steps.iter_mut().zip(prompts) {
            if step.gates.is_empty() {
                continue;
            }
            let context = GateContext {
                prompt_id: prompt.id.clone(),
                explicit_gate_ids: prompt.gate_includes().to_vec(),
                framework: framework.clone(),
                category: prompt.category.clone(),
            };

            match renderer
                .enhance_prompt(&prompt.template, &step.gates, &context)
                .await
            {
                Ok(enhanced) => {
                    step.instructions =
                        extract_gate_instructions(&prompt.template, &enhanced.enhanced_prompt);
                    step.instruction_length = enhanced.instruction_length;
                }
                Err(e) => {
                    tracing::error!(
                        step = step.step_number,
                        prompt_id = %prompt.id,
                        error = %e,
                        "Gate rendering failed for step, skipping"
                    );
                    self.metrics.record_step_failed();
                    resolved
                        .diagnostics
                        .push(format!("step {}: gate rendering failed: {e}", step.step_number));
                }
            }
        }
    }
}

fn record_usage(sink: &dyn MetricsSink, resolved: &ResolvedExecution, session_id: Option<&str>) {
    let total_characters: usize = resolved.steps.iter().map(|s| s.instruction_length).sum();
    let budget = split_instruction_budget(total_characters, resolved.gates.len());
    let validation_result = resolved.verdict.as_ref().map(|v| {
        if v.passed {
            ValidationOutcome::Passed
        } else {
            ValidationOutcome::Failed
        }
    });

    for (gate_id, characters) in resolved.gates.iter().zip(budget) {
        let temporary = resolved.temporary_gate_ids.contains(gate_id);
        let mut metadata = BTreeMap::new();
        if let Some(p) = resolved.provenance.iter().find(|p| &p.gate_id == gate_id) {
            metadata.insert("source".to_string(), p.source.to_string());
        }
        sink.record_gate_usage(&GateUsageRecord {
            gate_id: gate_id.clone(),
            gate_type: if temporary {
                GateKind::Temporary
            } else {
                GateKind::Canonical
            },
            instruction_count: resolved
                .steps
                .iter()
                .filter(|s| s.instructions.is_some() && s.gates.contains(gate_id))
                .count(),
            instruction_characters: characters,
            temporary,
            session_id: session_id.map(str::to_string),
            validation_result,
            metadata,
        });
    }
}

fn extend_unique(target: &mut Vec<String>, ids: impl IntoIterator<Item = String>) {
    for id in ids {
        if !target.contains(&id) {
            target.push(id);
        }
    }
}
