use augur_domain::repositories::forecasts::ForecastWriter;
use augur_domain::value_objects::forecast::ForecastSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub(crate) fn record_write_metrics(kind: &'static str, start: Instant, result: &Result<(), String>) {
    let result_label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!(
        "augur.infra.write.calls_total",
        "kind" => kind,
        "result" => result_label
    )
    .increment(1);
    metrics::histogram!("augur.infra.write_ms", "kind" => kind, "result" => result_label)
        .record(start.elapsed().as_millis() as f64);
}

pub(crate) fn record_read_metrics<T>(kind: &'static str, start: Instant, result: &Result<T, String>) {
    let result_label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!(
        "augur.infra.read.calls_total",
        "kind" => kind,
        "result" => result_label
    )
    .increment(1);
    metrics::histogram!("augur.infra.read_ms", "kind" => kind, "result" => result_label)
        .record(start.elapsed().as_millis() as f64);
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed to create dir {}: {}", parent.display(), err))?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("invalid output path {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents)
        .map_err(|err| format!("failed to write {}: {}", tmp_path.display(), err))?;
    fs::rename(&tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        format!(
            "failed to move {} into place at {}: {}",
            tmp_path.display(),
            path.display(),
            err
        )
    })
}

/// Writes the forecast set as pretty JSON keyed by ticker.
#[derive(Debug, Clone)]
pub struct FilesystemForecastWriter {
    path: PathBuf,
}

impl FilesystemForecastWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ForecastWriter for FilesystemForecastWriter {
    fn write_forecasts(&self, forecasts: &ForecastSet) -> Result<(), String> {
        let start = Instant::now();
        let result = serde_json::to_string_pretty(forecasts)
            .map_err(|err| format!("failed to serialize forecasts: {err}"))
            .and_then(|mut json| {
                json.push('\n');
                write_atomic(&self.path, json.as_bytes())
            });
        record_write_metrics("forecasts_json", start, &result);
        if result.is_ok() {
            tracing::info!(
                path = %self.path.display(),
                tickers = forecasts.len(),
                "forecasts written"
            );
        }
        result
    }
}
