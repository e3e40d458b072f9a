use std::sync::Arc;

use crate::accumulator::{GateAccumulator, GateSource};
use crate::canonical::{CanonicalReferenceResolver, Resolution};
use crate::error::GateError;
use crate::normalize::normalize;
use crate::registry::{RegistrationBatch, TemporaryGateRegistry};
use crate::spec::GateSpecification;

/// One source's gate IDs, or the error that prevented collecting them.
#[derive(Debug)]
pub struct SourceContribution {
    pub source: GateSource,
    pub result: Result<Vec<String>, GateError>,
}

impl SourceContribution {
    pub fn ok(source: GateSource, ids: Vec<String>) -> Self {
        Self {
            source,
            result: Ok(ids),
        }
    }
}

/// Merge contributions into a fresh accumulator in priority order.
///
/// Contributions are sorted by source first, so callers may build them in any
/// order. A failed source is logged and contributes nothing.
pub fn merge_contributions(mut contributions: Vec<SourceContribution>) -> GateAccumulator {
    contributions.sort_by_key(|c| c.source);

    let mut accumulator = GateAccumulator::new();
    for contribution in contributions {
        match contribution.result {
            Ok(ids) => {
                accumulator.add_all(&ids, contribution.source);
            }
            Err(e) => {
                tracing::error!(
                    source = %contribution.source,
                    error = %e,
                    "Gate source failed, skipping"
                );
            }
        }
    }

    tracing::debug!(
        total = accumulator.len(),
        counts = ?accumulator.source_counts(),
        "Gate sources merged"
    );
    accumulator
}

/// Gate IDs produced from a list of wire gate specifications.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntakeResult {
    /// Registered gate IDs the specifications referred to.
    pub canonical: Vec<String>,
    /// Temporary gate IDs created or reused for ad-hoc specifications.
    pub temporary: Vec<String>,
}

/// Where an intake runs: chain or single, which step, and who owns the gates.
#[derive(Debug, Clone, Copy)]
pub struct IntakeContext<'a> {
    pub is_chain: bool,
    pub current_step: u32,
    pub scope_id: &'a str,
}

/// Turns wire gate specifications into gate IDs: canonical references resolve
/// to their registered ID, everything else becomes a temporary gate.
pub struct GateIntake {
    resolver: CanonicalReferenceResolver,
    registry: Arc<TemporaryGateRegistry>,
}

impl GateIntake {
    pub fn new(resolver: CanonicalReferenceResolver, registry: Arc<TemporaryGateRegistry>) -> Self {
        Self { resolver, registry }
    }

    pub fn registry(&self) -> &Arc<TemporaryGateRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &CanonicalReferenceResolver {
        &self.resolver
    }

    /// Process `specs` in order, sharing `batch` for request-wide dedup.
    pub async fn process(
        &self,
        specs: &[GateSpecification],
        ctx: IntakeContext<'_>,
        batch: &mut RegistrationBatch,
    ) -> IntakeResult {
        let mut result = IntakeResult::default();

        for spec in specs {
            match self.resolver.classify(spec).await {
                Resolution::Canonical(id) => {
                    if !result.canonical.contains(&id) {
                        result.canonical.push(id);
                    }
                }
                Resolution::AdHoc => {
                    let (mut normalized, _) = normalize(spec, ctx.is_chain, ctx.current_step);
                    if let Some(explicit) = normalized.id.as_deref()
                        && self.resolver.resolve(explicit).await.is_registered()
                    {
                        // The registry must never shadow a canonical gate.
                        tracing::debug!(
                            id = %explicit,
                            "Ad-hoc gate reuses a canonical id; registering under a fresh id"
                        );
                        normalized.id = None;
                    }
                    let outcome = self.registry.register(batch, &normalized, ctx.scope_id).await;

                    if let Some(id) = outcome.id()
                        && !result.temporary.iter().any(|t| t == id)
                    {
                        result.temporary.push(id.to_string());
                    }
                }
            }
        }

        result
    }
}
