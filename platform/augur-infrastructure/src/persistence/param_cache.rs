use crate::artifacts::{record_read_metrics, record_write_metrics, write_atomic};
use augur_domain::repositories::param_cache::ParamCacheRepository;
use augur_domain::value_objects::parameter_cache::ParameterCache;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// Parameter cache stored as `{ticker: {family: {param: value}}}` JSON.
#[derive(Debug, Clone)]
pub struct JsonParamCacheRepository {
    path: PathBuf,
}

impl JsonParamCacheRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<ParameterCache, String> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no parameter cache yet, starting empty");
                return Ok(ParameterCache::new());
            }
            Err(err) => {
                return Err(format!(
                    "failed to read parameter cache {}: {}",
                    self.path.display(),
                    err
                ))
            }
        };
        serde_json::from_str(&contents).map_err(|err| {
            format!(
                "failed to parse parameter cache {}: {}",
                self.path.display(),
                err
            )
        })
    }
}

impl ParamCacheRepository for JsonParamCacheRepository {
    fn load(&self) -> Result<ParameterCache, String> {
        let start = Instant::now();
        let result = self.read();
        record_read_metrics("param_cache_json", start, &result);
        result
    }

    fn save(&self, cache: &ParameterCache) -> Result<(), String> {
        let start = Instant::now();
        let result = serde_json::to_string_pretty(cache)
            .map_err(|err| format!("failed to serialize parameter cache: {err}"))
            .and_then(|mut json| {
                json.push('\n');
                write_atomic(&self.path, json.as_bytes())
            });
        record_write_metrics("param_cache_json", start, &result);
        if result.is_ok() {
            tracing::info!(
                path = %self.path.display(),
                entries = cache.len(),
                "parameter cache saved"
            );
        }
        result
    }
}

/// Process-local cache store, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryParamCacheRepository {
    cache: Mutex<ParameterCache>,
}

impl InMemoryParamCacheRepository {
    pub fn new(cache: ParameterCache) -> Self {
        Self {
            cache: Mutex::new(cache),
        }
    }

    pub fn snapshot(&self) -> Result<ParameterCache, String> {
        self.cache
            .lock()
            .map(|cache| cache.clone())
            .map_err(|_| "parameter cache lock poisoned".to_string())
    }
}

impl ParamCacheRepository for InMemoryParamCacheRepository {
    fn load(&self) -> Result<ParameterCache, String> {
        self.snapshot()
    }

    fn save(&self, cache: &ParameterCache) -> Result<(), String> {
        let mut stored = self
            .cache
            .lock()
            .map_err(|_| "parameter cache lock poisoned".to_string())?;
        *stored = cache.clone();
        Ok(())
    }
}
