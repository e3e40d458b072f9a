use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::spec::GateSpecification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Registered,
    Unregistered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReference {
    pub reference_type: ReferenceType,
    pub gate_id: String,
}

impl GateReference {
    pub fn unregistered(gate_id: &str) -> Self {
        Self {
            reference_type: ReferenceType::Unregistered,
            gate_id: gate_id.to_string(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.reference_type == ReferenceType::Registered
    }
}

/// Lookup of pre-registered gate definitions. Abstracted so the definition store
/// can live elsewhere.
pub trait CanonicalGateProvider: Send + Sync {
    fn resolve<'a>(
        &'a self,
        candidate_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GateReference, GateError>> + Send + 'a>>;
}

/// Provider backed by a fixed set of gate IDs.
pub struct InMemoryCanonicalProvider {
    ids: HashSet<String>,
}

impl InMemoryCanonicalProvider {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl CanonicalGateProvider for InMemoryCanonicalProvider {
    fn resolve<'a>(
        &'a self,
        candidate_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GateReference, GateError>> + Send + 'a>> {
        Box::pin(async move {
            let reference_type = if self.ids.contains(candidate_id) {
                ReferenceType::Registered
            } else {
                ReferenceType::Unregistered
            };
            Ok(GateReference {
                reference_type,
                gate_id: candidate_id.to_string(),
            })
        })
    }
}

/// How an incoming gate specification should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Names a registered gate; use the canonical ID, create nothing.
    Canonical(String),
    /// Needs an ephemeral gate.
    AdHoc,
}

/// Decides whether a gate specification names a canonical gate or carries
/// inline criteria.
///
/// A missing or failing provider makes every reference unregistered, so the
/// request degrades to ad-hoc gates instead of failing.
#[derive(Clone, Default)]
pub struct CanonicalReferenceResolver {
    provider: Option<Arc<dyn CanonicalGateProvider>>,
}

impl CanonicalReferenceResolver {
    pub fn new(provider: Arc<dyn CanonicalGateProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// A resolver with no definition store; nothing resolves canonically.
    pub fn detached() -> Self {
        Self { provider: None }
    }

    pub async fn resolve(&self, candidate_id: &str) -> GateReference {
        let candidate_id = candidate_id.trim();
        let Some(provider) = &self.provider else {
            tracing::debug!(candidate = %candidate_id, "No canonical gate provider configured");
            return GateReference::unregistered(candidate_id);
        };

        match provider.resolve(candidate_id).await {
            Ok(reference) => reference,
            Err(e) => {
                tracing::warn!(
                    candidate = %candidate_id,
                    error = %e,
                    "Canonical gate lookup failed, treating as unregistered"
                );
                GateReference::unregistered(candidate_id)
            }
        }
    }

    /// Classify a wire gate specification.
    ///
    /// Objects with inline content are always ad-hoc and never reach the
    /// provider; custom checks are always ad-hoc.
    pub async fn classify(&self, spec: &GateSpecification) -> Resolution {
        let candidate = match spec {
            GateSpecification::Reference(text) => text.as_str(),
            GateSpecification::Custom(_) => return Resolution::AdHoc,
            GateSpecification::Full(object) => {
                if object.has_inline_content() {
                    return Resolution::AdHoc;
                }
                match object.reference() {
                    Some(reference) => reference,
                    None => return Resolution::AdHoc,
                }
            }
        };

        let reference = self.resolve(candidate).await;
        if reference.is_registered() {
            tracing::debug!(gate_id = %reference.gate_id, "Resolved canonical gate");
            Resolution::Canonical(reference.gate_id)
        } else {
            Resolution::AdHoc
        }
    }
}
