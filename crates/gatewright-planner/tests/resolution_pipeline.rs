//! End-to-end gate resolution tests.
//!
//! These drive the full pipeline (validation → parsing → planning → intake →
//! priority merge → step filter → enforcement → rendering) with the in-process
//! collaborators.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use gatewright_core::accumulator::GateSource;
use gatewright_core::enforcement::{EnforcementMode, EnforcementState};
use gatewright_core::wire::ExecutionRequest;
use gatewright_planner::collaborators::{EnhancedPrompt, GateContext, GateRenderer};
use gatewright_planner::config::GatewrightConfig;
use gatewright_planner::error::PlannerError;
use gatewright_planner::metrics::{GateKind, GateUsageRecord, MetricsSink};
use gatewright_planner::pipeline::GateResolutionPipeline;
use gatewright_planner::types::PromptCatalog;
use serde_json::json;

const CONFIG: &str = r#"
[gates]
canonical = ["code-quality", "security-awareness", "technical-accuracy"]
methodology = ["framework-compliance", "cageerf-structure"]

[[gates.activation]]
gate_id = "security-awareness"
categories = ["development"]

[frameworks]
enabled = true
active = "CAGEERF"
"#;

fn config() -> GatewrightConfig {
    GatewrightConfig::from_toml(CONFIG).unwrap()
}

fn catalog() -> PromptCatalog {
    serde_json::from_value(json!({
        "prompts": [
            {
                "id": "analyze",
                "name": "Analyze",
                "category": "analysis",
                "template": "Analyze the input.",
                "gate_configuration": {"include": ["technical-accuracy"]}
            },
            {"id": "draft", "template": "Write a draft."},
            {"id": "edit", "template": "Edit the draft."},
            {"id": "publish", "template": "Prepare for publishing."},
            {"id": "count", "template": "Count the words.", "script_tools": ["word_count"]},
            {
                "id": "release",
                "chain_steps": [{"prompt_id": "draft"}, {"prompt_id": "publish"}]
            },
            {
                "id": "refactor",
                "category": "development",
                "template": "Refactor the module.",
                "gate_configuration": {
                    "include": ["code-quality"],
                    "framework_gates": false,
                    "inline_gate_definitions": [
                        {"name": "Tests", "criteria": ["Existing tests still pass"]}
                    ]
                }
            }
        ],
        "categories": [
            {"id": "development", "gate_configuration": {"exclude": ["technical-accuracy"]}}
        ]
    }))
    .unwrap()
}

fn pipeline() -> GateResolutionPipeline {
    GateResolutionPipeline::with_defaults(config(), catalog())
}

fn request(value: serde_json::Value) -> ExecutionRequest {
    serde_json::from_value(value).unwrap()
}

fn source_of(resolved: &gatewright_planner::pipeline::ResolvedExecution, id: &str) -> GateSource {
    resolved
        .provenance
        .iter()
        .find(|p| p.gate_id == id)
        .map(|p| p.source)
        .unwrap_or_else(|| panic!("no provenance for {id}"))
}

#[tokio::test]
async fn sources_merge_in_priority_order() {
    let resolved = pipeline()
        .resolve(&request(json!({
            "command": ">>analyze :: code-quality",
            "gates": [
                "security-awareness",
                "code-quality",
                {"name": "Sources", "criteria": ["Cite every claim"]}
            ]
        })))
        .await
        .unwrap();

    let temp = resolved.temporary_gate_ids[0].clone();
    assert_eq!(
        resolved.gates,
        [
            "code-quality".to_string(),
            "security-awareness".to_string(),
            temp.clone(),
            "technical-accuracy".to_string(),
            "framework-compliance".to_string(),
        ]
    );
    assert_eq!(source_of(&resolved, "code-quality"), GateSource::InlineOperator);
    assert_eq!(source_of(&resolved, "security-awareness"), GateSource::ClientSelection);
    assert_eq!(source_of(&resolved, &temp), GateSource::TemporaryRequest);
    assert_eq!(source_of(&resolved, "technical-accuracy"), GateSource::PromptConfig);
    assert_eq!(source_of(&resolved, "framework-compliance"), GateSource::Methodology);
    assert_eq!(resolved.source_counts[&GateSource::ClientSelection], 1);
    assert_eq!(resolved.enforcement_mode, Some(EnforcementMode::Advisory));

    let instructions = resolved.steps[0].instructions.as_deref().unwrap();
    assert!(instructions.starts_with("## Quality Gates"));
    assert!(instructions.contains("Cite every claim"));
}

#[tokio::test]
async fn identical_ad_hoc_gates_share_one_id() {
    let pipeline = pipeline();
    let gate = json!({"name": "Tone", "criteria": ["Stay neutral"], "scope": "session"});
    let resolved = pipeline
        .resolve(&request(json!({"command": ">>analyze", "gates": [gate, gate]})))
        .await
        .unwrap();

    assert_eq!(resolved.temporary_gate_ids.len(), 1);
    assert_eq!(pipeline.metrics().snapshot().duplicate_gates_skipped, 1);
    assert_eq!(pipeline.registry().len().await, 1);
}

#[tokio::test]
async fn ad_hoc_gates_with_different_criteria_stay_distinct() {
    let pipeline = pipeline();
    let resolved = pipeline
        .resolve(&request(json!({
            "command": ">>analyze",
            "gates": [
                {"name": "Tone", "criteria": ["Stay neutral"]},
                {"name": "Tone", "criteria": ["Stay friendly"]}
            ]
        })))
        .await
        .unwrap();

    assert_eq!(resolved.temporary_gate_ids.len(), 2);
    assert_ne!(resolved.temporary_gate_ids[0], resolved.temporary_gate_ids[1]);
    assert_eq!(pipeline.metrics().snapshot().temporary_gates_created, 2);
}

#[tokio::test]
async fn chain_steps_only_see_targeted_gates() {
    let resolved = pipeline()
        .resolve(&request(json!({
            "command": ">>draft --> >>edit --> >>publish",
            "gates": [{"criteria": ["Use plain language"], "apply_to_steps": [2, 3]}]
        })))
        .await
        .unwrap();

    let temp = &resolved.temporary_gate_ids[0];
    assert!(resolved.gates.contains(temp));
    assert!(!resolved.steps[0].gates.contains(temp));
    assert!(resolved.steps[1].gates.contains(temp));
    assert!(resolved.steps[2].gates.contains(temp));
    assert_eq!(resolved.enforcement_mode, Some(EnforcementMode::Blocking));
}

#[tokio::test]
async fn inline_operator_gate_targets_its_own_step() {
    let resolved = pipeline()
        .resolve(&request(json!({"command": ">>draft --> >>edit :: 'keep the author voice'"})))
        .await
        .unwrap();

    let temp = &resolved.temporary_gate_ids[0];
    assert_eq!(source_of(&resolved, temp), GateSource::InlineOperator);
    assert!(!resolved.steps[0].gates.contains(temp));
    assert!(resolved.steps[1].gates.contains(temp));
}

#[tokio::test]
async fn declared_chain_expands_into_steps() {
    let resolved = pipeline()
        .resolve(&request(json!({"command": ">>release"})))
        .await
        .unwrap();

    let ids: Vec<_> = resolved.steps.iter().map(|s| s.prompt_id.as_str()).collect();
    assert_eq!(ids, ["draft", "publish"]);
    assert!(resolved.plan.unwrap().requires_session);
}

#[tokio::test]
async fn clean_modifier_suppresses_every_source() {
    let pipeline = pipeline();
    let resolved = pipeline
        .resolve(&request(json!({
            "command": ">>analyze %clean :: 'cite sources'",
            "gates": ["security-awareness", {"criteria": ["Be brief"]}]
        })))
        .await
        .unwrap();

    assert!(resolved.gates.is_empty());
    assert!(resolved.temporary_gate_ids.is_empty());
    assert!(resolved.enforcement_mode.is_none());
    assert_eq!(resolved.diagnostics, ["gates suppressed by %clean"]);
    assert!(pipeline.registry().is_empty().await);
}

#[tokio::test]
async fn inline_content_bypasses_canonical_lookup() {
    let resolved = pipeline()
        .resolve(&request(json!({
            "command": ">>analyze",
            "gates": [
                {"id": "code-quality", "criteria": ["x"]},
                {"id": "security-awareness"}
            ]
        })))
        .await
        .unwrap();

    // The criteria make it ad-hoc, but it must not shadow the canonical id.
    assert_eq!(resolved.temporary_gate_ids.len(), 1);
    let temp = &resolved.temporary_gate_ids[0];
    assert_ne!(temp, "code-quality");
    assert_eq!(source_of(&resolved, temp), GateSource::TemporaryRequest);
    assert!(!resolved.gates.contains(&"code-quality".to_string()));
    assert_eq!(source_of(&resolved, "security-awareness"), GateSource::PromptConfig);
}

#[tokio::test]
async fn prompt_settings_shape_the_gate_list() {
    let resolved = pipeline()
        .resolve(&request(json!({"command": ">>refactor"})))
        .await
        .unwrap();

    // framework_gates = false: no methodology gate even with an active framework.
    assert!(!resolved.gates.contains(&"framework-compliance".to_string()));
    assert_eq!(resolved.gates[0], "code-quality");
    assert_eq!(source_of(&resolved, "security-awareness"), GateSource::RegistryAuto);

    let temp = &resolved.temporary_gate_ids[0];
    assert_eq!(source_of(&resolved, temp), GateSource::PromptConfig);
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<GateUsageRecord>>,
}

impl MetricsSink for RecordingSink {
    fn record_gate_usage(&self, record: &GateUsageRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

#[tokio::test]
async fn usage_records_split_the_instruction_budget() {
    let sink = Arc::new(RecordingSink::default());
    let pipeline = pipeline().with_metrics_sink(sink.clone());

    let resolved = pipeline
        .resolve(&request(json!({
            "command": ">>analyze",
            "session_id": "sess-1",
            "gate_verdict": "GATE_REVIEW: PASS - all criteria met",
            "gates": [{"criteria": ["Name the data source"]}]
        })))
        .await
        .unwrap();

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), resolved.gates.len());
    let total: usize = records.iter().map(|r| r.instruction_characters).sum();
    assert_eq!(total, resolved.steps[0].instruction_length);
    assert!(records[0].instruction_characters >= records[records.len() - 1].instruction_characters);

    let temporary: Vec<_> = records.iter().filter(|r| r.temporary).collect();
    assert_eq!(temporary.len(), 1);
    assert_eq!(temporary[0].gate_type, GateKind::Temporary);
    assert_eq!(temporary[0].session_id.as_deref(), Some("sess-1"));
    assert!(resolved.verdict.unwrap().passed);
}

struct FailingRenderer {
    fail_for: &'static str,
}

impl GateRenderer for FailingRenderer {
    fn enhance_prompt<'a>(
        &'a self,
        prompt: &'a str,
        gate_ids: &'a [String],
        context: &'a GateContext,
    ) -> Pin<Box<dyn Future<Output = Result<EnhancedPrompt, PlannerError>> + Send + 'a>> {
        Box::pin(async move {
            if context.prompt_id == self.fail_for {
                return Err(PlannerError::RenderError("template engine offline".into()));
            }
            let section = format!("\n\nGates: {}", gate_ids.join(", "));
            Ok(EnhancedPrompt {
                instruction_length: section.len(),
                enhanced_prompt: format!("{prompt}{section}"),
                validation_results: vec![],
            })
        })
    }
}

#[tokio::test]
async fn failing_step_render_does_not_stop_siblings() {
    let pipeline = pipeline().with_renderer(Arc::new(FailingRenderer { fail_for: "edit" }));
    let resolved = pipeline
        .resolve(&request(json!({
            "command": ">>draft --> >>edit --> >>publish",
            "gates": ["code-quality"]
        })))
        .await
        .unwrap();

    assert!(resolved.steps[0].instructions.is_some());
    assert!(resolved.steps[1].instructions.is_none());
    assert!(resolved.steps[2].instructions.is_some());
    assert!(resolved.diagnostics.iter().any(|d| d.starts_with("step 2:")));
    assert_eq!(pipeline.metrics().snapshot().steps_failed, 1);
}

#[tokio::test]
async fn resume_without_command_is_skipped() {
    let resolved = pipeline()
        .resolve(&request(json!({
            "chain_id": "chain-release#2",
            "gate_verdict": "GATE_REVIEW: FAIL - missing changelog",
            "gate_action": "retry"
        })))
        .await
        .unwrap();

    assert!(resolved.plan.is_none());
    assert!(!resolved.verdict.unwrap().passed);
    assert_eq!(resolved.diagnostics.len(), 1);
}

#[tokio::test]
async fn explicit_gate_ids_do_not_leak_between_sessions() {
    let pipeline = pipeline();
    pipeline
        .resolve(&request(json!({
            "command": ">>refactor --> >>edit",
            "session_id": "session-a",
            "gates": [{"id": "code-quality", "criteria": ["session A only"]}]
        })))
        .await
        .unwrap();
    assert!(!pipeline.registry().contains("code-quality").await);

    let resolved = pipeline
        .resolve(&request(json!({
            "command": ">>refactor --> >>edit",
            "session_id": "session-b"
        })))
        .await
        .unwrap();
    assert!(resolved.steps[0].gates.contains(&"code-quality".to_string()));
    let instructions = resolved.steps[0].instructions.as_deref().unwrap();
    assert!(instructions.contains("- **code-quality**"));
    assert!(!instructions.contains("session A only"));

    pipeline
        .resolve(&request(json!({
            "command": ">>draft",
            "session_id": "session-c",
            "gates": [{"id": "tone", "criteria": ["be formal"]}]
        })))
        .await
        .unwrap();
    let resolved = pipeline
        .resolve(&request(json!({
            "command": ">>draft",
            "session_id": "session-d",
            "gates": [{"id": "tone", "criteria": ["be casual"]}]
        })))
        .await
        .unwrap();
    let instructions = resolved.steps[0].instructions.as_deref().unwrap();
    assert!(instructions.contains("be casual"));
    assert!(!instructions.contains("be formal"));
    assert!(!resolved.gates.contains(&"tone".to_string()));
}

#[tokio::test]
async fn script_tool_default_only_cleans_its_own_step() {
    let resolved = pipeline()
        .resolve(&request(json!({"command": ">>count --> >>refactor"})))
        .await
        .unwrap();

    assert!(resolved.diagnostics.iter().all(|d| !d.contains("suppressed")));
    assert!(resolved.steps[0].gates.is_empty());
    assert!(resolved.steps[1].gates.contains(&"code-quality".to_string()));
    assert!(resolved.gates.contains(&"code-quality".to_string()));
}

#[tokio::test]
async fn oversized_ttl_creates_gates_that_never_expire() {
    let mut config = config();
    config.gates.temporary_gate_ttl_secs = 9_000_000_000_000;
    let pipeline = GateResolutionPipeline::with_defaults(config, catalog());

    let resolved = pipeline
        .resolve(&request(json!({"command": ">>draft :: 'cite sources'"})))
        .await
        .unwrap();

    let temp = &resolved.temporary_gate_ids[0];
    let gate = pipeline.registry().get_temporary_gate(temp).await.unwrap();
    assert!(gate.expires_at.is_none());
}

#[tokio::test]
async fn abort_releases_the_scope() {
    let pipeline = pipeline();
    pipeline
        .resolve(&request(json!({
            "command": ">>draft --> >>edit",
            "chain_id": "chain-essay",
            "gates": [{"name": "Sources", "criteria": ["Cite every claim"]}]
        })))
        .await
        .unwrap();
    assert_eq!(pipeline.registry().len().await, 1);

    let resolved = pipeline
        .resolve(&request(json!({
            "chain_id": "chain-essay",
            "gate_verdict": "GATE_REVIEW: FAIL - no sources",
            "gate_action": "abort"
        })))
        .await
        .unwrap();

    assert!(pipeline.registry().is_empty().await);
    assert!(resolved.plan.is_none());
    assert!(resolved.diagnostics[0].starts_with("execution aborted"));
}

#[tokio::test]
async fn force_restart_drops_earlier_gates_and_mode() {
    let pipeline = pipeline();
    let state = EnforcementState::new();
    let first = pipeline
        .resolve_with_state(
            &request(json!({
                "command": ">>draft --> >>edit",
                "session_id": "s1",
                "gates": [{"name": "Sources", "criteria": ["Cite every claim"]}]
            })),
            &state,
        )
        .await
        .unwrap();
    let earlier = first.temporary_gate_ids[0].clone();
    assert_eq!(state.mode(), Some(EnforcementMode::Blocking));

    let restarted = pipeline
        .resolve_with_state(
            &request(json!({
                "command": ">>draft",
                "session_id": "s1",
                "force_restart": true
            })),
            &state,
        )
        .await
        .unwrap();

    assert!(!pipeline.registry().contains(&earlier).await);
    assert_eq!(restarted.enforcement_mode, Some(EnforcementMode::Advisory));
}

#[tokio::test]
async fn end_scope_reports_released_gates() {
    let pipeline = pipeline();
    pipeline
        .resolve(&request(json!({
            "command": ">>draft",
            "session_id": "s1",
            "gates": ["Cite every claim", "Use plain language"]
        })))
        .await
        .unwrap();

    assert_eq!(pipeline.end_scope("s2").await, 0);
    assert_eq!(pipeline.end_scope("s1").await, 2);
    assert!(pipeline.registry().is_empty().await);
}
