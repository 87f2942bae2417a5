use augur_application::config::{self, Config};
use augur_infrastructure::artifacts::FilesystemForecastWriter;
use augur_infrastructure::market_data::prices::CsvPriceRepository;
use augur_infrastructure::persistence::param_cache::JsonParamCacheRepository;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlessMode {
    Forecast,
    Validate,
    ShowConfig,
}

impl HeadlessMode {
    pub fn label(self) -> &'static str {
        match self {
            HeadlessMode::Forecast => "forecast",
            HeadlessMode::Validate => "validate",
            HeadlessMode::ShowConfig => "show-config",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessArgs {
    pub mode: HeadlessMode,
    /// Optional; built-in defaults apply when absent.
    pub config_path: Option<PathBuf>,
    pub strict: bool,
    pub tickers: Option<Vec<String>>,
    pub target_month: Option<String>,
    pub parallelism: Option<usize>,
}

/// Status reported when the run finished but could not persist its outputs.
pub const STATUS_PERSISTENCE_FAILED: &str = "persistence_failed";

pub fn run_headless(args: HeadlessArgs) -> Result<serde_json::Value, String> {
    let mut config = match args.config_path.as_deref() {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, &args);
    config::validate_config(&config)?;

    let result = match args.mode {
        HeadlessMode::Forecast => run_forecast(&config),
        HeadlessMode::Validate => run_validate(&config, args.strict),
        HeadlessMode::ShowConfig => run_show_config(&config),
    };
    let label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!("augur.cli.runs_total", "mode" => args.mode.label(), "result" => label)
        .increment(1);
    result
}

/// CLI flags win over the config file.
pub fn apply_overrides(config: &mut Config, args: &HeadlessArgs) {
    if let Some(tickers) = &args.tickers {
        config.run.tickers = tickers.clone();
    }
    if let Some(month) = &args.target_month {
        config.run.target_month = month.clone();
    }
    if let Some(parallelism) = args.parallelism {
        config.run.parallelism = Some(parallelism);
    }
}

/// 2 for strict validation failures, 1 for everything else.
pub fn exit_code_for_error(err: &str) -> i32 {
    if err.to_lowercase().contains("strict validation failed") {
        2
    } else {
        1
    }
}

/// Non-zero when the run completed but its outputs were not persisted.
pub fn exit_code_for_report(report: &serde_json::Value) -> i32 {
    if report["status"] == "ok" {
        0
    } else {
        1
    }
}

fn run_forecast(config: &Config) -> Result<serde_json::Value, String> {
    let prices = CsvPriceRepository::new(&config.paths.prices_csv);
    let cache = JsonParamCacheRepository::new(&config.paths.param_cache);
    let writer = FilesystemForecastWriter::new(&config.paths.forecast_out);
    let run = augur_application::forecasting::run_forecast(config, &prices, &cache, &writer)?;

    Ok(serde_json::json!({
        "status": if run.is_persisted() { "ok" } else { STATUS_PERSISTENCE_FAILED },
        "mode": "forecast",
        "forecast_out": config.paths.forecast_out,
        "param_cache": config.paths.param_cache,
        "summary": run.summary_json(),
        "forecasts": run.forecasts,
    }))
}

fn run_validate(config: &Config, strict: bool) -> Result<serde_json::Value, String> {
    let prices = CsvPriceRepository::new(&config.paths.prices_csv);
    let report = augur_application::validation::validate(config, &prices, strict)?;
    Ok(serde_json::json!({
        "status": "ok",
        "mode": "validate",
        "strict": strict,
        "prices_csv": config.paths.prices_csv,
        "report": report,
    }))
}

fn run_show_config(config: &Config) -> Result<serde_json::Value, String> {
    let rendered = config::to_toml_pretty(config)?;
    Ok(serde_json::json!({
        "status": "ok",
        "mode": "show-config",
        "config_toml": rendered,
    }))
}
