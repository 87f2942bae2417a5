use augur_domain::services::models::TrainingConfig as ModelTraining;
use augur_domain::services::sequences::WindowConfig;
use augur_domain::services::tuning::{IntRange, SearchSpace, TuningSettings};
use augur_domain::value_objects::target_month::TargetMonth;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TICKERS: [&str; 2] = ["AAPL", "MSFT"];
pub const DEFAULT_TARGET_MONTH: &str = "2025-01";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub windows: WindowsConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub tickers: Vec<String>,
    /// `YYYY-MM`.
    pub target_month: String,
    pub seed: u64,
    pub parallelism: Option<usize>,
    pub ticker_timeout_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
            target_month: DEFAULT_TARGET_MONTH.to_string(),
            seed: 42,
            parallelism: None,
            ticker_timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub prices_csv: String,
    pub param_cache: String,
    pub forecast_out: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prices_csv: "data/processed/cleaned_stock_data.csv".to_string(),
            param_cache: "outputs/param_cache.json".to_string(),
            forecast_out: "outputs/forecast_results.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct WindowsConfig {
    pub length: usize,
    pub eval_fraction: f64,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        let defaults = WindowConfig::default();
        Self {
            length: defaults.length,
            eval_fraction: defaults.eval_fraction,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.01,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct TuningConfig {
    pub trials: usize,
    pub startup_trials: usize,
    pub units_min: i64,
    pub units_max: i64,
    pub batch_size_min: i64,
    pub batch_size_max: i64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            trials: 10,
            startup_trials: 4,
            units_min: 16,
            units_max: 128,
            batch_size_min: 8,
            batch_size_max: 64,
        }
    }
}

impl Config {
    /// Configured tickers trimmed, without blanks or repeats, in first-seen
    /// order. Empty means every ticker in the price source.
    pub fn tickers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.run
            .tickers
            .iter()
            .map(|ticker| ticker.trim())
            .filter(|ticker| !ticker.is_empty())
            .filter(|ticker| seen.insert(ticker.to_string()))
            .map(str::to_string)
            .collect()
    }

    pub fn target_month(&self) -> Result<TargetMonth, String> {
        self.run.target_month.parse()
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            length: self.windows.length,
            eval_fraction: self.windows.eval_fraction,
        }
    }

    /// Training settings with the run seed; callers derive per-model seeds.
    pub fn model_training(&self) -> ModelTraining {
        ModelTraining {
            epochs: self.training.epochs,
            learning_rate: self.training.learning_rate,
            seed: self.run.seed,
        }
    }

    pub fn tuning_settings(&self) -> TuningSettings {
        TuningSettings {
            trials: self.tuning.trials,
            startup_trials: self.tuning.startup_trials,
            seed: self.run.seed,
        }
    }

    pub fn search_space(&self) -> SearchSpace {
        SearchSpace::units_and_batch(
            IntRange::new(self.tuning.units_min, self.tuning.units_max),
            IntRange::new(self.tuning.batch_size_min, self.tuning.batch_size_max),
        )
    }

    pub fn ticker_timeout(&self) -> Option<Duration> {
        self.run.ticker_timeout_secs.map(Duration::from_secs)
    }
}

/// Semantic checks serde cannot express.
pub fn validate_config(config: &Config) -> Result<(), String> {
    config.target_month()?;
    if config.windows.length == 0 {
        return Err("windows.length must be >= 1".to_string());
    }
    if !(0.0..1.0).contains(&config.windows.eval_fraction) {
        return Err(format!(
            "windows.eval_fraction must be in [0, 1) (got {})",
            config.windows.eval_fraction
        ));
    }
    if config.training.epochs == 0 {
        return Err("training.epochs must be >= 1".to_string());
    }
    if !(config.training.learning_rate.is_finite() && config.training.learning_rate > 0.0) {
        return Err(format!(
            "training.learning_rate must be > 0 (got {})",
            config.training.learning_rate
        ));
    }
    if config.tuning.trials == 0 {
        return Err("tuning.trials must be >= 1".to_string());
    }
    if config.tuning.units_min < 1 || config.tuning.units_min > config.tuning.units_max {
        return Err(format!(
            "tuning units range is invalid ({}..={})",
            config.tuning.units_min, config.tuning.units_max
        ));
    }
    if config.tuning.batch_size_min < 1
        || config.tuning.batch_size_min > config.tuning.batch_size_max
    {
        return Err(format!(
            "tuning batch_size range is invalid ({}..={})",
            config.tuning.batch_size_min, config.tuning.batch_size_max
        ));
    }
    if config.run.parallelism == Some(0) {
        return Err("run.parallelism must be >= 1".to_string());
    }
    if config.run.ticker_timeout_secs == Some(0) {
        return Err("run.ticker_timeout_secs must be >= 1".to_string());
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    validate_config(&config)
        .map_err(|err| format!("invalid config {}: {err}", path.display()))?;
    Ok((config, contents))
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}
