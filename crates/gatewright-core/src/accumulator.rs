use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Where a gate ID came from, in merge priority order (highest first).
///
/// The derived `Ord` follows declaration order, so `InlineOperator` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateSource {
    InlineOperator,
    ClientSelection,
    TemporaryRequest,
    PromptConfig,
    Methodology,
    RegistryAuto,
}

impl GateSource {
    /// All sources, highest priority first.
    pub const PRIORITY_ORDER: [GateSource; 6] = [
        GateSource::InlineOperator,
        GateSource::ClientSelection,
        GateSource::TemporaryRequest,
        GateSource::PromptConfig,
        GateSource::Methodology,
        GateSource::RegistryAuto,
    ];
}

impl std::fmt::Display for GateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateSource::InlineOperator => write!(f, "inline-operator"),
            GateSource::ClientSelection => write!(f, "client-selection"),
            GateSource::TemporaryRequest => write!(f, "temporary-request"),
            GateSource::PromptConfig => write!(f, "prompt-config"),
            GateSource::Methodology => write!(f, "methodology"),
            GateSource::RegistryAuto => write!(f, "registry-auto"),
        }
    }
}

/// Ordered, deduplicating collector of gate IDs for one execution.
///
/// Callers add sources in [`GateSource::PRIORITY_ORDER`]. The first source to
/// contribute an ID owns it; later contributions of the same ID are ignored,
/// so priority is encoded purely by call order.
#[derive(Debug, Default, Clone)]
pub struct GateAccumulator {
    order: Vec<String>,
    sources: HashMap<String, GateSource>,
    counts: BTreeMap<GateSource, usize>,
}

impl GateAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of IDs under one source. Returns how many were new.
    pub fn add_all<I, S>(&mut self, ids: I, source: GateSource) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for id in ids {
            if self.add(id.as_ref(), source) {
                added += 1;
            }
        }

        if added > 0 {
            tracing::debug!(source = %source, added, total = self.order.len(), "Gates accumulated");
        }
        added
    }

    /// Add one ID. Returns `false` if it was blank or already present.
    pub fn add(&mut self, id: &str, source: GateSource) -> bool {
        let id = id.trim();
        if id.is_empty() || self.sources.contains_key(id) {
            return false;
        }

        self.order.push(id.to_string());
        self.sources.insert(id.to_string(), source);
        *self.counts.entry(source).or_insert(0) += 1;
        true
    }

    /// IDs in first-contribution order.
    pub fn get_all(&self) -> &[String] {
        &self.order
    }

    pub fn into_ids(self) -> Vec<String> {
        self.order
    }

    /// Number of IDs each source contributed first.
    pub fn source_counts(&self) -> &BTreeMap<GateSource, usize> {
        &self.counts
    }

    /// The source that first contributed `id`.
    pub fn source_of(&self, id: &str) -> Option<GateSource> {
        self.sources.get(id).copied()
    }

    /// `(id, source)` pairs in order.
    pub fn provenance(&self) -> Vec<(String, GateSource)> {
        self.order
            .iter()
            .filter_map(|id| self.sources.get(id).map(|source| (id.clone(), *source)))
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
