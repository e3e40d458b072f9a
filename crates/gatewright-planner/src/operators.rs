//! Symbolic command parsing.
//!
//! A command is one or more `-->`-separated steps, each `>>prompt_id args`,
//! decorated with operators: `:: 'criteria'` gates, `@FRAMEWORK`, `#style`,
//! `* N` repetition and `%modifier` flags.

use std::sync::LazyLock;

use gatewright_core::spec::{GateObject, GateSpecification};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Modifier;

const CHAIN_OPERATOR: &str = "-->";

/// Upper bound on `* N`; larger counts are clamped.
pub const MAX_REPETITION: u32 = 20;

static GATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\s+(?:::|=)\s*(?:([a-z][a-z0-9_-]*):["']([^"']+)["']|["']([^"']+)["']|([^\s"']+))"#,
    )
    .expect("valid gate operator regex")
});
static REPETITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\*\s*(\d+)(?:\s|$)").expect("valid repetition regex"));
static FRAMEWORK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Za-z0-9_-]+)$").expect("valid framework regex"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#([A-Za-z][A-Za-z0-9_-]*)$").expect("valid style regex"));

/// One prompt invocation within a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    pub prompt_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

/// A gate written with the `::` operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineGate {
    /// Label from the `name:'text'` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub text: String,
    /// Whether `text` was quoted; unquoted text may name a registered gate.
    pub quoted: bool,
    /// 1-based step the gate was written on.
    pub step: u32,
}

impl InlineGate {
    pub fn to_specification(&self) -> GateSpecification {
        match &self.label {
            Some(label) => GateSpecification::Full(Box::new(GateObject {
                name: Some(label.clone()),
                criteria: Some(vec![self.text.clone()]),
                ..Default::default()
            })),
            None => GateSpecification::Reference(self.text.clone()),
        }
    }
}

/// Which operators appeared in a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedOperators {
    pub chain: bool,
    pub gate: bool,
    pub framework: bool,
    pub style: bool,
    pub repetition: bool,
    pub modifier: bool,
}

impl DetectedOperators {
    /// Chains and gates need session state to pause for review.
    pub fn requires_session(&self) -> bool {
        self.chain || self.gate
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub steps: Vec<CommandStep>,
    pub inline_gates: Vec<InlineGate>,
    pub framework: Option<String>,
    pub style: Option<String>,
    pub repetition: Option<u32>,
    /// Modifiers in order of appearance.
    pub modifiers: Vec<Modifier>,
    pub operators: DetectedOperators,
}

impl ParsedCommand {
    pub fn is_chain(&self) -> bool {
        self.steps.len() > 1
    }

    pub fn has_inline_gates(&self) -> bool {
        !self.inline_gates.is_empty()
    }
}

pub fn parse_command(command: &str) -> ParsedCommand {
    let mut parsed = ParsedCommand::default();
    let segments: Vec<&str> = command.split(CHAIN_OPERATOR).collect();
    parsed.operators.chain = segments.len() > 1;

    for segment in segments {
        let step_number = u32::try_from(parsed.steps.len() + 1).unwrap_or(u32::MAX);
        let padded = format!(" {segment}");

        for caps in GATE_RE.captures_iter(&padded) {
            let gate = if let (Some(label), Some(text)) = (caps.get(1), caps.get(2)) {
                InlineGate {
                    label: Some(label.as_str().to_string()),
                    text: text.as_str().trim().to_string(),
                    quoted: true,
                    step: step_number,
                }
            } else if let Some(text) = caps.get(3) {
                InlineGate {
                    label: None,
                    text: text.as_str().trim().to_string(),
                    quoted: true,
                    step: step_number,
                }
            } else if let Some(id) = caps.get(4) {
                InlineGate {
                    label: None,
                    text: id.as_str().to_string(),
                    quoted: false,
                    step: step_number,
                }
            } else {
                continue;
            };
            if !gate.text.is_empty() {
                parsed.operators.gate = true;
                parsed.inline_gates.push(gate);
            }
        }
        let without_gates = GATE_RE.replace_all(&padded, " ");

        let mut repeat = 1;
        if let Some(caps) = REPETITION_RE.captures(&without_gates) {
            parsed.operators.repetition = true;
            // Digits too long for u32 are clamped like any other oversized count.
            let requested = caps[1].parse::<u32>().unwrap_or(u32::MAX).max(1);
            repeat = requested.min(MAX_REPETITION);
            if repeat < requested {
                tracing::warn!(
                    requested,
                    max = MAX_REPETITION,
                    "Repetition count too large, clamping"
                );
            }
            parsed.repetition.get_or_insert(repeat);
        }
        let remaining = REPETITION_RE.replace_all(&without_gates, " ");

        let mut words = Vec::new();
        for token in remaining.split_whitespace() {
            if let Some(caps) = FRAMEWORK_RE.captures(token) {
                parsed.operators.framework = true;
                parsed.framework.get_or_insert_with(|| caps[1].to_string());
            } else if let Some(caps) = STYLE_RE.captures(token) {
                parsed.operators.style = true;
                parsed.style.get_or_insert_with(|| caps[1].to_string());
            } else if let Some(modifier) = token.strip_prefix('%').and_then(Modifier::parse) {
                parsed.operators.modifier = true;
                if !parsed.modifiers.contains(&modifier) {
                    parsed.modifiers.push(modifier);
                }
            } else {
                words.push(token);
            }
        }

        let Some(step) = parse_step(&words) else {
            continue;
        };
        for _ in 0..repeat {
            parsed.steps.push(step.clone());
        }
    }

    parsed
}

fn parse_step(words: &[&str]) -> Option<CommandStep> {
    let (first, rest) = words.split_first()?;
    let prompt_id = first.trim_start_matches(">>");
    if prompt_id.is_empty() {
        return None;
    }
    Some(CommandStep {
        prompt_id: prompt_id.to_string(),
        args: rest.join(" "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_with_args() {
        let parsed = parse_command(">>analyze the quarterly report");
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].prompt_id, "analyze");
        assert_eq!(parsed.steps[0].args, "the quarterly report");
        assert!(!parsed.is_chain());
        assert_eq!(parsed.operators, DetectedOperators::default());
    }

    #[test]
    fn chain_operator_splits_steps() {
        let parsed = parse_command(">>analyze --> >>implement --> >>test");
        let ids: Vec<_> = parsed.steps.iter().map(|s| s.prompt_id.as_str()).collect();
        assert_eq!(ids, ["analyze", "implement", "test"]);
        assert!(parsed.operators.chain);
        assert!(parsed.operators.requires_session());
    }

    #[test]
    fn gate_operator_forms() {
        let parsed = parse_command(
            ">>review code :: 'cite sources' :: security:'no secrets' :: code-quality",
        );
        assert_eq!(parsed.steps[0].args, "code");
        assert_eq!(parsed.inline_gates.len(), 3);

        assert_eq!(parsed.inline_gates[0].text, "cite sources");
        assert!(parsed.inline_gates[0].quoted);
        assert_eq!(parsed.inline_gates[1].label.as_deref(), Some("security"));
        assert_eq!(parsed.inline_gates[1].text, "no secrets");
        assert_eq!(parsed.inline_gates[2].text, "code-quality");
        assert!(!parsed.inline_gates[2].quoted);
        assert!(parsed.operators.gate);
    }

    #[test]
    fn inline_gates_remember_their_step() {
        let parsed = parse_command(">>draft --> >>edit :: 'plain language'");
        assert_eq!(parsed.inline_gates.len(), 1);
        assert_eq!(parsed.inline_gates[0].step, 2);
    }

    #[test]
    fn framework_style_and_modifiers() {
        let parsed = parse_command("@CAGEERF #analytical >>report sales %lean %judge %lean");
        assert_eq!(parsed.framework.as_deref(), Some("CAGEERF"));
        assert_eq!(parsed.style.as_deref(), Some("analytical"));
        assert_eq!(parsed.modifiers, [Modifier::Lean, Modifier::Judge]);
        assert_eq!(parsed.steps[0].prompt_id, "report");
        assert_eq!(parsed.steps[0].args, "sales");
    }

    #[test]
    fn email_address_is_not_a_framework() {
        let parsed = parse_command(">>notify ops@example.com");
        assert!(parsed.framework.is_none());
        assert_eq!(parsed.steps[0].args, "ops@example.com");
    }

    #[test]
    fn repetition_expands_step() {
        let parsed = parse_command(">>brainstorm * 3 --> >>summarize");
        let ids: Vec<_> = parsed.steps.iter().map(|s| s.prompt_id.as_str()).collect();
        assert_eq!(ids, ["brainstorm", "brainstorm", "brainstorm", "summarize"]);
        assert_eq!(parsed.repetition, Some(3));
        assert!(parsed.is_chain());
    }

    #[test]
    fn repetition_is_clamped() {
        let parsed = parse_command(">>draft * 3000000");
        assert_eq!(parsed.steps.len(), MAX_REPETITION as usize);
        assert_eq!(parsed.repetition, Some(MAX_REPETITION));

        let parsed = parse_command(">>draft * 99999999999999999999");
        assert_eq!(parsed.steps.len(), MAX_REPETITION as usize);
    }

    #[test]
    fn labelled_gate_becomes_criteria_object() {
        let parsed = parse_command(">>review :: security:'no secrets'");
        match parsed.inline_gates[0].to_specification() {
            GateSpecification::Full(obj) => {
                assert_eq!(obj.name.as_deref(), Some("security"));
                assert_eq!(obj.criteria, Some(vec!["no secrets".to_string()]));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn empty_command_has_no_steps() {
        assert!(parse_command("   ").steps.is_empty());
    }
}
