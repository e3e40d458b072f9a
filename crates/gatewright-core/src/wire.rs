use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::spec::GateSpecification;

static CHAIN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^chain-[a-zA-Z0-9_-]+(?:#\d+)?$").expect("valid chain id regex"));
static GATE_VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^GATE_REVIEW:\s(PASS|FAIL)\s-\s(.+)$").expect("valid gate verdict regex")
});

/// A request to run a prompt or chain, as received from the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Unified gate override: canonical IDs, inline criteria or gate objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<GateSpecification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_verdict: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_action: Option<String>,
    #[serde(default)]
    pub force_restart: bool,
}

/// Caller's choice once a gate's retry limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Retry,
    Skip,
    Abort,
}

impl GateAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "retry" => Some(GateAction::Retry),
            "skip" => Some(GateAction::Skip),
            "abort" => Some(GateAction::Abort),
            _ => None,
        }
    }
}

/// A parsed `GATE_REVIEW: PASS|FAIL - rationale` verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub rationale: String,
}

impl GateVerdict {
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = GATE_VERDICT_RE.captures(raw)?;
        Some(Self {
            passed: &caps[1] == "PASS",
            rationale: caps[2].to_string(),
        })
    }
}

pub fn is_valid_chain_id(chain_id: &str) -> bool {
    CHAIN_ID_RE.is_match(chain_id)
}

impl ExecutionRequest {
    /// Reject malformed requests before any gate work happens.
    pub fn validate(&self) -> Result<(), GateError> {
        let has_command = self
            .command
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if !has_command && self.chain_id.is_none() {
            return Err(GateError::InvalidRequest(
                "request must include a non-empty command or a chain_id".into(),
            ));
        }

        if let Some(chain_id) = &self.chain_id
            && !is_valid_chain_id(chain_id)
        {
            return Err(GateError::InvalidRequest(format!(
                "chain_id '{chain_id}' must match chain-<name> or chain-<name>#<run>"
            )));
        }

        if let Some(verdict) = &self.gate_verdict
            && GateVerdict::parse(verdict).is_none()
        {
            return Err(GateError::InvalidRequest(format!(
                "gate_verdict '{verdict}' must look like 'GATE_REVIEW: PASS - reason' or 'GATE_REVIEW: FAIL - reason'"
            )));
        }

        if let Some(action) = &self.gate_action
            && GateAction::parse(action).is_none()
        {
            return Err(GateError::InvalidRequest(format!(
                "gate_action '{action}' must be one of retry, skip, abort"
            )));
        }

        for (index, gate) in self.gates.iter().enumerate() {
            gate.validate().map_err(|e| {
                GateError::InvalidRequest(format!("gates[{index}]: {e}"))
            })?;
        }

        Ok(())
    }

    pub fn verdict(&self) -> Option<GateVerdict> {
        self.gate_verdict.as_deref().and_then(GateVerdict::parse)
    }

    pub fn action(&self) -> Option<GateAction> {
        self.gate_action.as_deref().and_then(GateAction::parse)
    }

    /// The command text, if non-blank.
    pub fn command_text(&self) -> Option<&str> {
        self.command.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}
