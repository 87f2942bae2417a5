mod cache;
mod pool;
mod ticker;

pub use ticker::TickerStage;

use crate::config::{validate_config, Config};
use augur_domain::repositories::forecasts::ForecastWriter;
use augur_domain::repositories::param_cache::ParamCacheRepository;
use augur_domain::repositories::prices::{PriceQuery, PriceRepository};
use augur_domain::services::models::TrainingConfig as ModelTraining;
use augur_domain::services::sequences::WindowConfig;
use augur_domain::services::tuning::{SearchSpace, TuningSettings};
use augur_domain::value_objects::forecast::ForecastSet;
use augur_domain::value_objects::model_family::ModelFamily;
use augur_domain::value_objects::target_month::TargetMonth;
use cache::SharedParamCache;
use pool::{normalize_parallelism, run_tickers};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use ticker::process_ticker;
use tracing::info_span;

/// A ticker that produced no record, with the stage it had reached.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTicker {
    pub ticker: String,
    pub stage: TickerStage,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub tickers: usize,
    pub recorded: usize,
    pub skipped: usize,
    /// (ticker, family) pairs served from the parameter cache.
    pub cache_hits: usize,
    /// (ticker, family) pairs tuned in this run.
    pub tuned_pairs: usize,
    pub tuning_trials: usize,
    pub failed_trials: usize,
}

#[derive(Debug, Clone)]
pub struct ForecastRun {
    pub target_month: TargetMonth,
    pub forecasts: ForecastSet,
    pub skipped: Vec<SkippedTicker>,
    pub stats: RunStats,
    /// Cache save and result write failures. Results are still returned.
    pub persistence_errors: Vec<String>,
}

impl ForecastRun {
    pub fn is_persisted(&self) -> bool {
        self.persistence_errors.is_empty()
    }

    pub fn summary_json(&self) -> serde_json::Value {
        let skipped: Vec<serde_json::Value> = self
            .skipped
            .iter()
            .map(|skip| {
                serde_json::json!({
                    "ticker": skip.ticker,
                    "stage": skip.stage.to_string(),
                    "kind": skip.kind,
                    "reason": skip.reason,
                })
            })
            .collect();
        serde_json::json!({
            "target_month": self.target_month.to_string(),
            "tickers": self.stats.tickers,
            "recorded": self.stats.recorded,
            "recorded_tickers": self.forecasts.keys().collect::<Vec<_>>(),
            "skipped": skipped,
            "cache_hits": self.stats.cache_hits,
            "tuned_pairs": self.stats.tuned_pairs,
            "tuning_trials": self.stats.tuning_trials,
            "failed_trials": self.stats.failed_trials,
            "persistence_errors": self.persistence_errors,
        })
    }
}

/// Settings shared by every ticker of one run.
#[derive(Debug, Clone)]
pub(crate) struct ForecastPlan {
    pub(crate) target_month: TargetMonth,
    pub(crate) windows: WindowConfig,
    pub(crate) training: ModelTraining,
    pub(crate) tuning: TuningSettings,
    pub(crate) space: SearchSpace,
    pub(crate) ticker_timeout: Option<Duration>,
}

impl ForecastPlan {
    fn from_config(config: &Config, target_month: TargetMonth) -> Self {
        Self {
            target_month,
            windows: config.window_config(),
            training: config.model_training(),
            tuning: config.tuning_settings(),
            space: config.search_space(),
            ticker_timeout: config.ticker_timeout(),
        }
    }

    pub(crate) fn training_for(&self, ticker: &str, family: ModelFamily) -> ModelTraining {
        ModelTraining {
            seed: derive_seed(self.training.seed, ticker, family),
            ..self.training
        }
    }

    pub(crate) fn tuning_for(&self, ticker: &str, family: ModelFamily) -> TuningSettings {
        TuningSettings {
            seed: derive_seed(self.tuning.seed, ticker, family),
            ..self.tuning
        }
    }
}

/// Seed for one (ticker, family) pair, independent of scheduling order.
fn derive_seed(seed: u64, ticker: &str, family: ModelFamily) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{seed}:{ticker}:{}", family.cache_key()).as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

pub fn run_forecast(
    config: &Config,
    prices: &dyn PriceRepository,
    params: &dyn ParamCacheRepository,
    writer: &dyn ForecastWriter,
) -> Result<ForecastRun, String> {
    validate_config(config)?;
    let target_month = config.target_month()?;
    let requested = config.tickers();
    let parallelism = normalize_parallelism(config.run.parallelism);
    let _span = info_span!(
        "forecast",
        target_month = %target_month,
        tickers = requested.len(),
        parallelism
    )
    .entered();

    let cache = params
        .load()
        .map_err(|err| format!("failed to load parameter cache: {err}"))?;
    tracing::info!(entries = cache.len(), "parameter cache loaded");

    let stage_start = Instant::now();
    let table = prices
        .load_prices(&PriceQuery {
            tickers: requested.clone(),
        })
        .map_err(|err| format!("failed to load prices: {err}"))?;
    metrics::histogram!("augur.pipeline.load_prices_ms")
        .record(stage_start.elapsed().as_millis() as f64);

    // An empty ticker list forecasts every ticker in the source.
    let tickers = if requested.is_empty() {
        table.series.keys().cloned().collect()
    } else {
        requested
    };
    tracing::info!(
        tickers = tickers.len(),
        loaded = table.series.len(),
        "prices loaded"
    );

    let plan = ForecastPlan::from_config(config, target_month);
    let shared = SharedParamCache::new(cache);
    let outcomes = run_tickers(&tickers, parallelism, |ticker| {
        process_ticker(ticker, &table, &plan, &shared)
    });

    let mut forecasts = ForecastSet::new();
    let mut skipped = Vec::new();
    let mut stats = RunStats {
        tickers: tickers.len(),
        ..RunStats::default()
    };
    for outcome in outcomes {
        let tuned = match outcome.result {
            Ok(report) => {
                stats.recorded += 1;
                stats.cache_hits += report.cache_hits;
                forecasts.insert(outcome.ticker, report.record);
                report.tuned
            }
            Err(failure) => {
                stats.skipped += 1;
                skipped.push(SkippedTicker {
                    ticker: outcome.ticker,
                    stage: failure.stage,
                    kind: failure.error.kind().to_string(),
                    reason: failure.error.to_string(),
                });
                failure.tuned
            }
        };
        for work in tuned {
            stats.tuned_pairs += 1;
            stats.tuning_trials += work.trials;
            stats.failed_trials += work.failed_trials;
        }
    }

    let mut persistence_errors = Vec::new();
    let cache = shared.into_inner();
    if let Err(err) = params.save(&cache) {
        tracing::error!(error = %err, "failed to save parameter cache");
        persistence_errors.push(format!("failed to save parameter cache: {err}"));
    }
    if let Err(err) = writer.write_forecasts(&forecasts) {
        tracing::error!(error = %err, "failed to write forecasts");
        persistence_errors.push(format!("failed to write forecasts: {err}"));
    }

    tracing::info!(
        recorded = stats.recorded,
        skipped = stats.skipped,
        cache_hits = stats.cache_hits,
        tuning_trials = stats.tuning_trials,
        "forecast run finished"
    );

    Ok(ForecastRun {
        target_month,
        forecasts,
        skipped,
        stats,
        persistence_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_domain::repositories::prices::PriceTable;
    use augur_domain::value_objects::forecast::BestModel;
    use augur_domain::value_objects::hyperparams::HyperparamSet;
    use augur_domain::value_objects::parameter_cache::ParameterCache;
    use augur_domain::value_objects::price_bar::{PriceBar, PriceSeries};
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct FakePrices {
        table: PriceTable,
    }

    impl PriceRepository for FakePrices {
        fn load_prices(&self, query: &PriceQuery) -> Result<PriceTable, String> {
            let mut table = PriceTable::default();
            for (ticker, series) in &self.table.series {
                if query.tickers.is_empty() || query.tickers.contains(ticker) {
                    table.series.insert(ticker.clone(), series.clone());
                }
            }
            Ok(table)
        }
    }

    #[derive(Default)]
    struct FakeCache {
        stored: Mutex<Option<ParameterCache>>,
        fail_load: bool,
        fail_save: bool,
        saves: Mutex<usize>,
    }

    impl FakeCache {
        fn with(cache: ParameterCache) -> Self {
            Self {
                stored: Mutex::new(Some(cache)),
                ..Self::default()
            }
        }

        fn current(&self) -> ParameterCache {
            self.stored
                .lock()
                .expect("lock")
                .clone()
                .unwrap_or_default()
        }
    }

    impl ParamCacheRepository for FakeCache {
        fn load(&self) -> Result<ParameterCache, String> {
            if self.fail_load {
                return Err("corrupt cache file".to_string());
            }
            Ok(self.current())
        }

        fn save(&self, cache: &ParameterCache) -> Result<(), String> {
            *self.saves.lock().expect("lock") += 1;
            if self.fail_save {
                return Err("disk full".to_string());
            }
            *self.stored.lock().expect("lock") = Some(cache.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeWriter {
        written: Mutex<Vec<ForecastSet>>,
    }

    impl ForecastWriter for FakeWriter {
        fn write_forecasts(&self, forecasts: &ForecastSet) -> Result<(), String> {
            self.written.lock().expect("lock").push(forecasts.clone());
            Ok(())
        }
    }

    fn bar(date: NaiveDate, close: f64) -> PriceBar {
        PriceBar {
            date,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000_000.0 + close * 10.0,
        }
    }

    /// Daily rows from 2024-11-22 with `close = base + step * i`, then one
    /// January observation continuing the line.
    fn trending(ticker: &str, rows: usize, base: f64, step: f64) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 11, 22).expect("date");
        let mut bars: Vec<PriceBar> = (0..rows)
            .map(|i| bar(start + chrono::Duration::days(i as i64), base + step * i as f64))
            .collect();
        let january = NaiveDate::from_ymd_opt(2025, 1, 2).expect("date");
        bars.push(bar(january, base + step * rows as f64));
        PriceSeries::new(ticker, Some("Technology".to_string()), bars).expect("series")
    }

    fn short(ticker: &str) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 12, 23).expect("date");
        let mut bars: Vec<PriceBar> = (0..5)
            .map(|i| bar(start + chrono::Duration::days(i), 50.0 + i as f64))
            .collect();
        bars.push(bar(NaiveDate::from_ymd_opt(2025, 1, 3).expect("date"), 56.0));
        PriceSeries::new(ticker, None, bars).expect("series")
    }

    fn prices(series: Vec<PriceSeries>) -> FakePrices {
        let mut table = PriceTable::default();
        for s in series {
            table.series.insert(s.ticker().to_string(), s);
        }
        FakePrices { table }
    }

    fn test_config(tickers: &[&str]) -> Config {
        let mut config = Config::default();
        config.run.tickers = tickers.iter().map(|t| t.to_string()).collect();
        config.run.target_month = "2025-01".to_string();
        config.windows.length = 6;
        config.training.epochs = 100;
        config.tuning.trials = 3;
        config.tuning.startup_trials = 2;
        config.tuning.units_min = 4;
        config.tuning.units_max = 12;
        config.tuning.batch_size_min = 4;
        config.tuning.batch_size_max = 8;
        config
    }

    #[test]
    fn forecasts_linear_trend_for_both_families() {
        let repo = prices(vec![trending("TEST", 40, 100.0, 1.0)]);
        let cache = FakeCache::default();
        let writer = FakeWriter::default();
        let run = run_forecast(&test_config(&["TEST"]), &repo, &cache, &writer).expect("run");

        assert_eq!(run.forecasts.len(), 1);
        let record = &run.forecasts["TEST"];
        assert_eq!(record.actual_price, 140.0);
        assert_eq!(
            record.target_date,
            NaiveDate::from_ymd_opt(2025, 1, 2).expect("date")
        );
        assert_eq!(
            record.window_end,
            NaiveDate::from_ymd_opt(2024, 12, 31).expect("date")
        );
        for family in ModelFamily::ALL {
            let scored = record.family(family).expect("family forecast");
            assert!(
                (scored.forecast - 140.0).abs() <= 0.03 * 140.0,
                "{family} forecast {} too far from 140",
                scored.forecast
            );
            assert!(scored.rmse >= 0.0);
        }
        assert!(matches!(record.best_model, BestModel::Family(_)));

        assert_eq!(cache.current().len(), 2);
        assert_eq!(run.stats.tuned_pairs, 2);
        assert_eq!(run.stats.tuning_trials, 6);
        assert_eq!(*cache.saves.lock().expect("lock"), 1);
        assert_eq!(writer.written.lock().expect("lock").len(), 1);
        assert!(run.is_persisted());
    }

    #[test]
    fn short_history_is_skipped_without_touching_the_cache() {
        let repo = prices(vec![short("SHORT")]);
        let cache = FakeCache::default();
        let writer = FakeWriter::default();
        let run = run_forecast(&test_config(&["SHORT"]), &repo, &cache, &writer).expect("run");

        assert!(run.forecasts.is_empty());
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].kind, "insufficient_history");
        assert_eq!(run.skipped[0].stage, TickerStage::GroundTruthResolved);
        assert!(!cache.current().contains("SHORT", ModelFamily::Sequential));
        assert!(cache.current().is_empty());
        assert_eq!(run.stats.tuning_trials, 0);
    }

    #[test]
    fn missing_ticker_and_missing_month_are_skipped() {
        let mut late = test_config(&["TEST", "NOPE"]);
        late.run.target_month = "2025-03".to_string();
        let repo = prices(vec![trending("TEST", 40, 100.0, 1.0)]);
        let run = run_forecast(&late, &repo, &FakeCache::default(), &FakeWriter::default())
            .expect("run");

        assert!(run.forecasts.is_empty());
        let kinds: Vec<_> = run.skipped.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ground_truth_missing", "ground_truth_missing"]);
        assert!(run.skipped.iter().all(|s| s.stage == TickerStage::Pending));
    }

    #[test]
    fn second_run_reuses_cached_hyperparameters() {
        let repo = prices(vec![trending("TEST", 40, 100.0, 1.0)]);
        let cache = FakeCache::default();
        let config = test_config(&["TEST"]);

        let first = run_forecast(&config, &repo, &cache, &FakeWriter::default()).expect("first");
        let after_first = cache.current();
        let second = run_forecast(&config, &repo, &cache, &FakeWriter::default()).expect("second");

        assert_eq!(second.stats.tuning_trials, 0);
        assert_eq!(second.stats.cache_hits, 2);
        assert_eq!(first.forecasts, second.forecasts);
        assert_eq!(cache.current(), after_first);
    }

    #[test]
    fn cached_entries_are_used_verbatim() {
        let mut seeded = ParameterCache::new();
        seeded.insert("TEST", ModelFamily::Sequential, HyperparamSet::new(5, 4));
        let repo = prices(vec![trending("TEST", 40, 100.0, 1.0)]);
        let cache = FakeCache::with(seeded);
        let run = run_forecast(&test_config(&["TEST"]), &repo, &cache, &FakeWriter::default())
            .expect("run");

        assert_eq!(run.stats.cache_hits, 1);
        assert_eq!(run.stats.tuned_pairs, 1);
        assert_eq!(
            cache.current().get("TEST", ModelFamily::Sequential),
            Some(&HyperparamSet::new(5, 4))
        );
        assert!(cache.current().contains("TEST", ModelFamily::FeedForward));
    }

    #[test]
    fn parallel_run_matches_serial_run() {
        let series = vec![
            trending("TEST", 40, 100.0, 1.0),
            trending("DOWN", 40, 300.0, -2.0),
            short("SHORT"),
        ];
        let mut config = test_config(&["TEST", "SHORT", "DOWN"]);

        config.run.parallelism = Some(1);
        let serial = run_forecast(
            &config,
            &prices(series.clone()),
            &FakeCache::default(),
            &FakeWriter::default(),
        )
        .expect("serial");

        config.run.parallelism = Some(3);
        let parallel = run_forecast(
            &config,
            &prices(series),
            &FakeCache::default(),
            &FakeWriter::default(),
        )
        .expect("parallel");

        assert_eq!(serial.forecasts, parallel.forecasts);
        assert_eq!(serial.skipped, parallel.skipped);
        assert_eq!(parallel.forecasts.len(), 2);
        assert_eq!(parallel.skipped[0].ticker, "SHORT");
    }

    #[test]
    fn save_failure_still_returns_results() {
        let repo = prices(vec![trending("TEST", 40, 100.0, 1.0)]);
        let cache = FakeCache {
            fail_save: true,
            ..FakeCache::default()
        };
        let writer = FakeWriter::default();
        let run = run_forecast(&test_config(&["TEST"]), &repo, &cache, &writer).expect("run");

        assert_eq!(run.forecasts.len(), 1);
        assert!(!run.is_persisted());
        assert_eq!(run.persistence_errors.len(), 1);
        assert!(run.persistence_errors[0].contains("disk full"));
        assert_eq!(writer.written.lock().expect("lock").len(), 1);
    }

    #[test]
    fn cache_load_failure_aborts_before_processing() {
        let repo = prices(vec![trending("TEST", 40, 100.0, 1.0)]);
        let cache = FakeCache {
            fail_load: true,
            ..FakeCache::default()
        };
        let writer = FakeWriter::default();
        let err = run_forecast(&test_config(&["TEST"]), &repo, &cache, &writer)
            .expect_err("load failure is fatal");
        assert!(err.contains("failed to load parameter cache"));
        assert!(writer.written.lock().expect("lock").is_empty());
    }

    #[test]
    fn derived_seeds_differ_per_pair_and_are_stable() {
        let a = derive_seed(42, "AAPL", ModelFamily::Sequential);
        assert_eq!(a, derive_seed(42, "AAPL", ModelFamily::Sequential));
        assert_ne!(a, derive_seed(42, "AAPL", ModelFamily::FeedForward));
        assert_ne!(a, derive_seed(42, "MSFT", ModelFamily::Sequential));
        assert_ne!(a, derive_seed(7, "AAPL", ModelFamily::Sequential));
    }

    #[test]
    fn summary_lists_skips_and_persistence_errors() {
        let repo = prices(vec![short("SHORT")]);
        let run = run_forecast(
            &test_config(&["SHORT"]),
            &repo,
            &FakeCache::default(),
            &FakeWriter::default(),
        )
        .expect("run");
        let summary = run.summary_json();
        assert_eq!(summary["recorded"], 0);
        assert_eq!(summary["skipped"][0]["ticker"], "SHORT");
        assert_eq!(summary["skipped"][0]["stage"], "GROUND_TRUTH_RESOLVED");
        assert_eq!(summary["target_month"], "2025-01");
    }
}
