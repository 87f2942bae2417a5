use crate::value_objects::parameter_cache::ParameterCache;

/// Persistent store of tuned hyperparameters.
///
/// `load` on a store that was never written returns an empty cache.
pub trait ParamCacheRepository {
    fn load(&self) -> Result<ParameterCache, String>;
    fn save(&self, cache: &ParameterCache) -> Result<(), String>;
}
