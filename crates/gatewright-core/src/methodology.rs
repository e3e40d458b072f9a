use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::GateError;

/// Gate added when a framework is active but no methodology gate was selected.
pub const DEFAULT_METHODOLOGY_GATE: &str = "framework-compliance";

/// Source of the IDs that count as methodology gates.
pub trait MethodologyGateProvider: Send + Sync {
    fn methodology_gate_ids(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HashSet<String>, GateError>> + Send + '_>>;
}

/// Provider with a fixed ID list, typically loaded from configuration.
pub struct StaticMethodologyGateProvider {
    ids: HashSet<String>,
}

impl StaticMethodologyGateProvider {
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

impl MethodologyGateProvider for StaticMethodologyGateProvider {
    fn methodology_gate_ids(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<HashSet<String>, GateError>> + Send + '_>> {
        Box::pin(async move { Ok(self.ids.clone()) })
    }
}

/// Lazily loaded, read-mostly cache of methodology gate IDs.
///
/// The set lives behind one swappable `Arc`: readers clone the pointer and
/// keep a complete snapshot even while [`invalidate`](Self::invalidate) runs.
pub struct MethodologyGateCache {
    provider: Arc<dyn MethodologyGateProvider>,
    cached: RwLock<Option<Arc<HashSet<String>>>>,
}

impl MethodologyGateCache {
    pub fn new(provider: Arc<dyn MethodologyGateProvider>) -> Self {
        Self {
            provider,
            cached: RwLock::new(None),
        }
    }

    /// Current methodology IDs, loading them on first use.
    ///
    /// A provider failure yields an empty set and is not cached, so the next
    /// call retries.
    pub async fn get(&self) -> Arc<HashSet<String>> {
        if let Some(ids) = self.cached.read().await.as_ref() {
            return Arc::clone(ids);
        }

        let mut slot = self.cached.write().await;
        if let Some(ids) = slot.as_ref() {
            return Arc::clone(ids);
        }

        match self.provider.methodology_gate_ids().await {
            Ok(ids) => {
                tracing::debug!(count = ids.len(), "Methodology gate IDs loaded");
                let ids = Arc::new(ids);
                *slot = Some(Arc::clone(&ids));
                ids
            }
            Err(e) => {
                tracing::warn!(error = %e, "Methodology gate IDs unavailable, using empty set");
                Arc::new(HashSet::new())
            }
        }
    }

    /// Drop the cached set. Call when gate definitions are reloaded.
    pub async fn invalidate(&self) {
        let mut slot = self.cached.write().await;
        if slot.take().is_some() {
            tracing::info!("Methodology gate cache invalidated");
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.cached.read().await.is_some()
    }
}

/// Remove every methodology gate from `gates`, keeping order.
pub fn strip_methodology_gates(gates: &mut Vec<String>, methodology_ids: &HashSet<String>) -> usize {
    let before = gates.len();
    gates.retain(|id| !methodology_ids.contains(id));
    before - gates.len()
}

/// Ensure a framework-driven execution carries at least one methodology gate.
///
/// Adds `default_gate` when methodology gates are enabled, a framework is
/// active, and `gates` holds none of `methodology_ids`. Returns whether a gate
/// was added.
pub fn ensure_methodology_gate(
    gates: &mut Vec<String>,
    methodology_ids: &HashSet<String>,
    enabled: bool,
    framework_active: bool,
    default_gate: &str,
) -> bool {
    if !enabled || !framework_active || default_gate.is_empty() {
        return false;
    }

    let has_methodology_gate =
        gates.iter().any(|id| methodology_ids.contains(id)) || gates.iter().any(|id| id == default_gate);
    if has_methodology_gate {
        return false;
    }

    gates.push(default_gate.to_string());
    tracing::debug!(gate_id = %default_gate, "Default methodology gate injected");
    true
}
