use augur_domain::value_objects::hyperparams::HyperparamSet;
use augur_domain::value_objects::model_family::ModelFamily;
use augur_domain::value_objects::parameter_cache::ParameterCache;
use parking_lot::Mutex;

/// Parameter cache shared by ticker workers for the duration of a run.
///
/// Each (ticker, family) key is owned by exactly one worker, so a lookup
/// followed by an insert never races with another writer of the same key.
pub(crate) struct SharedParamCache {
    inner: Mutex<ParameterCache>,
}

impl SharedParamCache {
    pub(crate) fn new(cache: ParameterCache) -> Self {
        Self {
            inner: Mutex::new(cache),
        }
    }

    pub(crate) fn get(&self, ticker: &str, family: ModelFamily) -> Option<HyperparamSet> {
        self.inner.lock().get(ticker, family).cloned()
    }

    /// Stores `params` unless an entry already exists; returns the entry
    /// that is in the cache afterwards.
    pub(crate) fn insert_if_absent(
        &self,
        ticker: &str,
        family: ModelFamily,
        params: HyperparamSet,
    ) -> HyperparamSet {
        let mut cache = self.inner.lock();
        if let Some(existing) = cache.get(ticker, family) {
            return existing.clone();
        }
        cache.insert(ticker, family, params.clone());
        params
    }

    pub(crate) fn into_inner(self) -> ParameterCache {
        self.inner.into_inner()
    }
}
