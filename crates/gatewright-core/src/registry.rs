use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::spec::{GateScope, NormalizedGateInput};

/// Lead-in line used when criteria are turned into guidance text.
const CRITERIA_GUIDANCE_HEADER: &str = "Evaluate the response against these criteria:";

/// A short-lived gate created from ad-hoc criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryGateDefinition {
    pub id: String,
    pub scope_id: String,
    pub guidance: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub input: NormalizedGateInput,
}

impl TemporaryGateDefinition {
    pub fn scope(&self) -> GateScope {
        self.input.scope
    }

    /// Whether this gate should be included for chain step `step`.
    pub fn applies_to_step(&self, step: u32) -> bool {
        if let Some(target) = self.input.target_step_number {
            return target == step;
        }
        match &self.input.apply_to_steps {
            Some(steps) if !steps.is_empty() => steps.contains(&step),
            _ => true,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// What happened to one ad-hoc gate during batch registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new temporary gate was created.
    Created(String),
    /// The explicit ID was already registered earlier in the request.
    Existing(String),
    /// Identical content was already registered in this batch.
    Duplicate(String),
    /// No guidance, criteria or description; nothing to register.
    Dropped,
}

impl RegistrationOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            RegistrationOutcome::Created(id)
            | RegistrationOutcome::Existing(id)
            | RegistrationOutcome::Duplicate(id) => Some(id),
            RegistrationOutcome::Dropped => None,
        }
    }
}

/// Per-request registration state.
///
/// Registration within one request is sequential, so the signature set needs
/// no locking of its own.
#[derive(Debug, Default)]
pub struct RegistrationBatch {
    signatures: HashMap<String, String>,
    explicit: HashMap<String, String>,
    produced: Vec<String>,
    created: usize,
    duplicates: usize,
    dropped: usize,
}

impl RegistrationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// IDs produced by this batch (created or already known), in order.
    pub fn produced(&self) -> &[String] {
        &self.produced
    }

    /// Gates newly created by this batch.
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn record(&mut self, id: &str) {
        if !self.produced.iter().any(|p| p == id) {
            self.produced.push(id.to_string());
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    gates: HashMap<String, TemporaryGateDefinition>,
    scopes: HashMap<(GateScope, String), Vec<String>>,
}

impl RegistryState {
    fn owned_by(&self, id: &str, scope_id: &str) -> bool {
        self.gates
            .get(id)
            .is_none_or(|gate| gate.scope_id == scope_id)
    }

    /// Pick the ID an explicit gate is stored under.
    ///
    /// The bare ID is used when it is free or already owned by `scope_id`.
    /// Otherwise the ID is namespaced by scope, so one scope never reads or
    /// overwrites another scope's gate.
    fn claim_explicit_id(&self, explicit: &str, scope_id: &str) -> String {
        if self.owned_by(explicit, scope_id) {
            return explicit.to_string();
        }
        let namespaced = format!("{explicit}@{scope_id}");
        if self.owned_by(&namespaced, scope_id) {
            tracing::debug!(id = %explicit, scope_id = %scope_id, "Explicit gate id owned by another scope; namespacing");
            return namespaced;
        }
        self.fresh_id()
    }

    fn fresh_id(&self) -> String {
        loop {
            let candidate = format!("temp_{}", uuid::Uuid::new_v4().simple());
            if !self.gates.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn unindex(&mut self, scope: GateScope, scope_id: &str, id: &str) {
        let key = (scope, scope_id.to_string());
        if let Some(ids) = self.scopes.get_mut(&key) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.scopes.remove(&key);
            }
        }
    }
}

/// Process-wide store of temporary gates.
///
/// Entries are keyed by ID. An ID belongs to the scope that created it; only
/// that scope may replace it. The `(scope, scope_id)` index is secondary and
/// always derived from the entries.
pub struct TemporaryGateRegistry {
    state: RwLock<RegistryState>,
    default_ttl: Option<Duration>,
}

impl TemporaryGateRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            default_ttl: None,
        }
    }

    /// Gates created by this registry expire `ttl` after creation.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            default_ttl: Some(ttl),
        }
    }

    /// Expiry for a gate created at `now`. A TTL too large to represent means
    /// the gate never expires.
    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ttl = self.default_ttl?;
        let expires_at = now.checked_add_signed(ttl);
        if expires_at.is_none() {
            tracing::warn!(ttl_secs = ttl.num_seconds(), "Temporary gate TTL out of range; gate will not expire");
        }
        expires_at
    }

    /// Create a temporary gate owned by `scope_id`.
    ///
    /// Returns `None` when the input has no guidance, criteria or description.
    pub async fn create_temporary_gate(
        &self,
        input: &NormalizedGateInput,
        scope_id: &str,
    ) -> Option<String> {
        let Some(guidance) = resolve_guidance(input) else {
            tracing::warn!(
                name = %input.name,
                "Temporary gate has no guidance, criteria or description; dropping"
            );
            return None;
        };

        let now = Utc::now();
        let mut state = self.state.write().await;

        let id = match &input.id {
            Some(explicit) => state.claim_explicit_id(explicit, scope_id),
            None => state.fresh_id(),
        };

        // A gate re-declared by its owner replaces the previous content.
        if let Some(previous) = state.gates.remove(&id) {
            state.unindex(previous.scope(), &previous.scope_id, &id);
        }

        let definition = TemporaryGateDefinition {
            id: id.clone(),
            scope_id: scope_id.to_string(),
            guidance,
            created_at: now,
            expires_at: self.expiry_from(now),
            input: input.clone(),
        };

        state
            .scopes
            .entry((input.scope, scope_id.to_string()))
            .or_default()
            .push(id.clone());
        state.gates.insert(id.clone(), definition);

        tracing::info!(
            id = %id,
            name = %input.name,
            scope = %input.scope,
            scope_id = %scope_id,
            "Temporary gate created"
        );
        Some(id)
    }

    /// Register one ad-hoc gate as part of a request-wide batch.
    ///
    /// Skips creation for explicit IDs an earlier stage of the same request
    /// already registered, and for content whose signature was already seen in
    /// `batch`.
    pub async fn register(
        &self,
        batch: &mut RegistrationBatch,
        input: &NormalizedGateInput,
        scope_id: &str,
    ) -> RegistrationOutcome {
        if let Some(explicit) = &input.id
            && let Some(existing) = batch.explicit.get(explicit).cloned()
        {
            tracing::debug!(id = %existing, "Explicit gate id already registered in this request");
            batch.record(&existing);
            return RegistrationOutcome::Existing(existing);
        }

        if resolve_guidance(input).is_none() {
            tracing::warn!(
                name = %input.name,
                "Ad-hoc gate has no usable content; dropping"
            );
            batch.dropped += 1;
            return RegistrationOutcome::Dropped;
        }

        let signature = gate_signature(input);
        if let Some(existing) = batch.signatures.get(&signature) {
            tracing::debug!(
                id = %existing,
                name = %input.name,
                "Duplicate ad-hoc gate in request; skipping"
            );
            batch.duplicates += 1;
            return RegistrationOutcome::Duplicate(existing.clone());
        }

        match self.create_temporary_gate(input, scope_id).await {
            Some(id) => {
                if let Some(explicit) = &input.id {
                    batch.explicit.insert(explicit.clone(), id.clone());
                }
                batch.signatures.insert(signature, id.clone());
                batch.record(&id);
                batch.created += 1;
                RegistrationOutcome::Created(id)
            }
            None => {
                batch.dropped += 1;
                RegistrationOutcome::Dropped
            }
        }
    }

    pub async fn get_temporary_gate(&self, id: &str) -> Option<TemporaryGateDefinition> {
        let state = self.state.read().await;
        state.gates.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        let state = self.state.read().await;
        state.gates.contains_key(id)
    }

    /// IDs owned by a scope, in creation order.
    pub async fn gates_in_scope(&self, scope: GateScope, scope_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .scopes
            .get(&(scope, scope_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every gate owned by a scope that has ended. Returns how many were removed.
    pub async fn release_scope(&self, scope: GateScope, scope_id: &str) -> usize {
        let mut state = self.state.write().await;
        let Some(ids) = state.scopes.remove(&(scope, scope_id.to_string())) else {
            return 0;
        };

        let removed = ids
            .iter()
            .filter(|id| state.gates.remove(*id).is_some())
            .count();
        tracing::info!(scope = %scope, scope_id = %scope_id, removed, "Scope released");
        removed
    }

    /// Drop every gate owned by `scope_id`, whatever its scope kind.
    pub async fn release_owner(&self, scope_id: &str) -> usize {
        let mut state = self.state.write().await;
        let keys: Vec<(GateScope, String)> = state
            .scopes
            .keys()
            .filter(|(_, owner)| owner == scope_id)
            .cloned()
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some(ids) = state.scopes.remove(&key) {
                removed += ids
                    .iter()
                    .filter(|id| state.gates.remove(*id).is_some())
                    .count();
            }
        }
        if removed > 0 {
            tracing::info!(scope_id = %scope_id, removed, "Scope owner released");
        }
        removed
    }

    /// Remove entries whose expiry is at or before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let expired: HashSet<String> = state
            .gates
            .values()
            .filter(|gate| gate.is_expired(now))
            .map(|gate| gate.id.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        for id in &expired {
            state.gates.remove(id);
        }
        state.scopes.retain(|_, ids| {
            ids.retain(|id| !expired.contains(id));
            !ids.is_empty()
        });

        tracing::info!(purged = expired.len(), "Expired temporary gates purged");
        expired.len()
    }

    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.gates.len()
    }

    pub async fn is_empty(&self) -> bool {
        let state = self.state.read().await;
        state.gates.is_empty()
    }
}

impl Default for TemporaryGateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Guidance text for a gate: explicit guidance, then criteria as prose, then description.
pub fn resolve_guidance(input: &NormalizedGateInput) -> Option<String> {
    if let Some(guidance) = input.guidance.as_deref().filter(|g| !g.trim().is_empty()) {
        return Some(guidance.to_string());
    }

    let criteria = input
        .criteria
        .as_deref()
        .filter(|c| !c.is_empty())
        .or_else(|| input.pass_criteria.as_deref().filter(|c| !c.is_empty()));
    if let Some(criteria) = criteria {
        return Some(format_criteria_as_guidance(criteria));
    }

    input
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(String::from)
}

pub fn format_criteria_as_guidance(criteria: &[String]) -> String {
    let mut text = String::from(CRITERIA_GUIDANCE_HEADER);
    for criterion in criteria {
        text.push_str("\n- ");
        text.push_str(criterion);
    }
    text
}

/// Content signature used to collapse identical ad-hoc gates within a request.
pub fn gate_signature(input: &NormalizedGateInput) -> String {
    let criteria = input
        .criteria
        .as_deref()
        .or(input.pass_criteria.as_deref())
        .unwrap_or_default()
        .join(";")
        .to_lowercase();
    let steps = input
        .apply_to_steps
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let target = input
        .target_step_number
        .map(|n| n.to_string())
        .unwrap_or_default();

    let canonical = [
        input.gate_type.to_string(),
        input.scope.to_string(),
        input.name.to_lowercase(),
        input.description.as_deref().unwrap_or_default().to_lowercase(),
        input.guidance.as_deref().unwrap_or_default().to_lowercase(),
        criteria,
        steps,
        target,
    ]
    .join("|");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Scope owner for temporary gates: session, then chain, then a hash of the command.
pub fn derive_scope_id(
    session_id: Option<&str>,
    chain_id: Option<&str>,
    command: Option<&str>,
) -> String {
    if let Some(session) = session_id.filter(|s| !s.is_empty()) {
        return session.to_string();
    }
    if let Some(chain) = chain_id.filter(|s| !s.is_empty()) {
        return chain.to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(command.unwrap_or_default().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("command-{}", &digest[..16])
}
