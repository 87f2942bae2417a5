use crate::value_objects::hyperparams::HyperparamSet;
use crate::value_objects::model_family::ModelFamily;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tuned hyperparameters keyed by ticker, then by family cache key.
///
/// Keys are case-sensitive and values are stored as given.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterCache {
    entries: BTreeMap<String, BTreeMap<String, HyperparamSet>>,
}

impl ParameterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ticker: &str, family: ModelFamily) -> Option<&HyperparamSet> {
        self.entries
            .get(ticker)
            .and_then(|families| families.get(family.cache_key()))
    }

    pub fn contains(&self, ticker: &str, family: ModelFamily) -> bool {
        self.get(ticker, family).is_some()
    }

    pub fn insert(&mut self, ticker: &str, family: ModelFamily, params: HyperparamSet) {
        self.entries
            .entry(ticker.to_string())
            .or_default()
            .insert(family.cache_key().to_string(), params);
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of cached (ticker, family) pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
