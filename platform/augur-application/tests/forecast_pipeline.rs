use augur_application::config::{load_config, Config};
use augur_application::forecasting::run_forecast;
use augur_application::validation::validate;
use augur_domain::repositories::param_cache::ParamCacheRepository;
use augur_infrastructure::artifacts::FilesystemForecastWriter;
use augur_infrastructure::market_data::prices::CsvPriceRepository;
use augur_infrastructure::persistence::param_cache::JsonParamCacheRepository;
use chrono::NaiveDate;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_dir(name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("augur_{name}_{}_{}", std::process::id(), now));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// 40 daily rows of a linear trend ending 2024-12-31 plus one January row,
/// and a ticker with only a handful of rows.
fn write_prices(path: &Path) {
    let mut csv = String::from("Date,Open,High,Low,Close,Volume,Ticker,Industry_Tag\n");
    let start = NaiveDate::from_ymd_opt(2024, 11, 22).expect("date");
    for i in 0..40 {
        let date = start + chrono::Duration::days(i);
        let close = 100.0 + i as f64;
        writeln!(
            csv,
            "{date} 00:00:00-05:00,{},{},{},{close},{},TEST,technology",
            close - 0.5,
            close + 1.0,
            close - 1.0,
            1_000_000 + i * 10
        )
        .expect("write row");
    }
    csv.push_str("2025-01-02 00:00:00-05:00,139.5,141,139,140,1000400,TEST,technology\n");
    for day in 26..31 {
        writeln!(csv, "2024-12-{day},50,51,49,50.5,1000,TINY,retail").expect("write row");
    }
    csv.push_str("2025-01-03,50,51,49,51,1000,TINY,retail\n");
    fs::write(path, csv).expect("write prices");
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("augur.toml");
    let contents = format!(
        r#"
[run]
tickers = ["TEST", "TINY", "TEST"]
target_month = "2025-01"
seed = 11

[paths]
prices_csv = "{prices}"
param_cache = "{cache}"
forecast_out = "{out}"

[windows]
length = 6
eval_fraction = 0.2

[training]
epochs = 100
learning_rate = 0.01

[tuning]
trials = 3
startup_trials = 2
units_min = 4
units_max = 12
batch_size_min = 4
batch_size_max = 8
"#,
        prices = dir.join("prices.csv").display(),
        cache = dir.join("outputs").join("param_cache.json").display(),
        out = dir.join("outputs").join("forecast_results.json").display(),
    );
    fs::write(&path, contents).expect("write config");
    path
}

fn run(config: &Config) -> augur_application::forecasting::ForecastRun {
    let prices = CsvPriceRepository::new(&config.paths.prices_csv);
    let cache = JsonParamCacheRepository::new(&config.paths.param_cache);
    let writer = FilesystemForecastWriter::new(&config.paths.forecast_out);
    run_forecast(config, &prices, &cache, &writer).expect("forecast run")
}

#[test]
fn forecast_run_persists_cache_and_results_and_reuses_them() {
    let dir = unique_dir("pipeline");
    write_prices(&dir.join("prices.csv"));
    let config = load_config(&write_config(&dir)).expect("config");

    let first = run(&config);
    assert!(first.is_persisted(), "{:?}", first.persistence_errors);
    assert_eq!(first.stats.tickers, 2);
    assert_eq!(first.forecasts.len(), 1);
    assert_eq!(first.skipped.len(), 1);
    assert_eq!(first.skipped[0].ticker, "TINY");
    assert_eq!(first.skipped[0].kind, "insufficient_history");

    let results: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&config.paths.forecast_out).expect("read results"),
    )
    .expect("results json");
    let test = &results["TEST"];
    assert_eq!(test["actual_price"], 140.0);
    assert_eq!(test["target_date"], "2025-01-02");
    for label in ["LSTM", "MLP"] {
        let forecast = test[label]["forecast"].as_f64().expect("forecast");
        assert!(
            (forecast - 140.0).abs() <= 0.03 * 140.0,
            "{label} forecast {forecast}"
        );
        let rmse = test[label]["rmse"].as_f64().expect("rmse");
        assert!((rmse - (forecast - 140.0).abs()).abs() < 1e-9);
    }
    assert!(results.get("TINY").is_none());

    let cache = JsonParamCacheRepository::new(&config.paths.param_cache)
        .load()
        .expect("cache");
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.tickers().collect::<Vec<_>>(), vec!["TEST"]);

    let second = run(&config);
    assert_eq!(second.stats.tuning_trials, 0);
    assert_eq!(second.stats.cache_hits, 2);
    assert_eq!(second.forecasts, first.forecasts);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn unreadable_cache_aborts_the_run() {
    let dir = unique_dir("pipeline_bad_cache");
    write_prices(&dir.join("prices.csv"));
    let config = load_config(&write_config(&dir)).expect("config");
    fs::create_dir_all(dir.join("outputs")).expect("outputs");
    fs::write(&config.paths.param_cache, "[1, 2").expect("corrupt cache");

    let err = run_forecast(
        &config,
        &CsvPriceRepository::new(&config.paths.prices_csv),
        &JsonParamCacheRepository::new(&config.paths.param_cache),
        &FilesystemForecastWriter::new(&config.paths.forecast_out),
    )
    .expect_err("corrupt cache is fatal");
    assert!(err.contains("failed to load parameter cache"));
    assert!(!Path::new(&config.paths.forecast_out).exists());
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn malformed_rows_of_one_ticker_leave_the_others_forecastable() {
    let dir = unique_dir("pipeline_bad_rows");
    let prices_path = dir.join("prices.csv");
    write_prices(&prices_path);
    let mut csv = fs::read_to_string(&prices_path).expect("read prices");
    csv.push_str("2024-12-30,1,1,1,1,,MSFT,technology\n");
    csv.push_str("2025-01-02,oops,1,1,1,1,MSFT,technology\n");
    fs::write(&prices_path, csv).expect("write prices");

    let mut config = load_config(&write_config(&dir)).expect("config");
    config.run.tickers = vec!["TEST".to_string(), "MSFT".to_string()];
    let outcome = run(&config);

    assert!(outcome.forecasts.contains_key("TEST"));
    assert!(!outcome.forecasts.contains_key("MSFT"));
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].ticker, "MSFT");

    let report = validate(&config, &CsvPriceRepository::new(&config.paths.prices_csv), false)
        .expect("report");
    assert_eq!(report["tickers"]["MSFT"]["quality"]["invalid_numeric"], 2);
    assert_eq!(report["tickers"]["TEST"]["status"], "ok");
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn non_integer_cached_values_fail_only_their_ticker() {
    let dir = unique_dir("pipeline_opaque_cache");
    write_prices(&dir.join("prices.csv"));
    let config = load_config(&write_config(&dir)).expect("config");
    fs::create_dir_all(dir.join("outputs")).expect("outputs");
    fs::write(
        &config.paths.param_cache,
        r#"{"TEST": {"lstm": {"units": 6, "batch_size": 4, "dropout": 0.2},
                     "mlp": {"units": 6, "batch_size": 4.5}},
            "OTHER": {"gru": {"units": 1.5}}}"#,
    )
    .expect("write cache");

    let outcome = run(&config);
    assert!(outcome.forecasts.is_empty());
    let test = outcome
        .skipped
        .iter()
        .find(|skip| skip.ticker == "TEST")
        .expect("TEST skipped");
    assert_eq!(test.kind, "training_failure");
    assert!(test.reason.contains("batch_size"), "{}", test.reason);
    assert_eq!(outcome.stats.tuning_trials, 0);

    let saved: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&config.paths.param_cache).expect("read cache"),
    )
    .expect("cache json");
    assert_eq!(saved["TEST"]["lstm"]["dropout"], serde_json::json!(0.2));
    assert_eq!(saved["OTHER"]["gru"]["units"], serde_json::json!(1.5));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn validation_reads_the_same_inputs() {
    let dir = unique_dir("pipeline_validate");
    write_prices(&dir.join("prices.csv"));
    let config = load_config(&write_config(&dir)).expect("config");
    let prices = CsvPriceRepository::new(&config.paths.prices_csv);

    let report = validate(&config, &prices, false).expect("report");
    assert_eq!(report["tickers"]["TEST"]["status"], "ok");
    assert_eq!(report["tickers"]["TEST"]["history_rows"], 40);
    assert_eq!(report["tickers"]["TINY"]["status"], "insufficient_history");

    let err = validate(&config, &prices, true).expect_err("strict");
    assert!(err.starts_with("strict validation failed"));
    let _ = fs::remove_dir_all(dir);
}
