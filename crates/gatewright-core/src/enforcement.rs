use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// How a request executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    #[default]
    Single,
    Chain,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStrategy::Single => write!(f, "single"),
            ExecutionStrategy::Chain => write!(f, "chain"),
        }
    }
}

/// Gate application policy for an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Guidance is appended to output; nothing waits on it.
    Advisory,
    /// Execution pauses for gate review before continuing.
    Blocking,
}

impl EnforcementMode {
    /// The mode a strategy implies when it has gates, `None` when it has none.
    pub fn for_strategy(strategy: ExecutionStrategy, has_gates: bool) -> Option<Self> {
        if !has_gates {
            return None;
        }
        Some(match strategy {
            ExecutionStrategy::Single => EnforcementMode::Advisory,
            ExecutionStrategy::Chain => EnforcementMode::Blocking,
        })
    }
}

impl std::fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnforcementMode::Advisory => write!(f, "advisory"),
            EnforcementMode::Blocking => write!(f, "blocking"),
        }
    }
}

/// Enforcement mode for one execution: unset until the first computation
/// with gates, then frozen.
#[derive(Debug, Default)]
pub struct EnforcementState {
    mode: OnceLock<EnforcementMode>,
}

impl EnforcementState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute and set the mode if still unset. Returns the mode in effect.
    ///
    /// Later calls never overwrite an assigned mode.
    pub fn assign(
        &self,
        strategy: ExecutionStrategy,
        has_gates: bool,
    ) -> Option<EnforcementMode> {
        let Some(candidate) = EnforcementMode::for_strategy(strategy, has_gates) else {
            return self.mode();
        };

        let assigned = *self.mode.get_or_init(|| candidate);
        if assigned == candidate {
            tracing::debug!(mode = %assigned, strategy = %strategy, "Enforcement mode in effect");
        } else {
            tracing::debug!(
                mode = %assigned,
                ignored = %candidate,
                "Enforcement mode already set, keeping first assignment"
            );
        }
        Some(assigned)
    }

    pub fn mode(&self) -> Option<EnforcementMode> {
        self.mode.get().copied()
    }

    pub fn is_set(&self) -> bool {
        self.mode.get().is_some()
    }
}
