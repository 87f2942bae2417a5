use crate::config::{validate_config, Config};
use augur_domain::repositories::prices::{PriceQuery, PriceRepository};
use augur_domain::services::data_quality::DataQualityReport;
use augur_domain::services::sequences::minimum_rows;
use std::time::Instant;
use tracing::info_span;

/// Checks that every configured ticker can be forecast for the target month
/// without training anything.
pub fn validate(
    config: &Config,
    prices: &dyn PriceRepository,
    strict: bool,
) -> Result<serde_json::Value, String> {
    validate_config(config)?;
    let target_month = config.target_month()?;
    let _span = info_span!("validate", strict = strict, target_month = %target_month).entered();

    let requested = config.tickers();
    let stage_start = Instant::now();
    let table = prices
        .load_prices(&PriceQuery {
            tickers: requested.clone(),
        })
        .map_err(|err| format!("failed to load prices: {err}"))?;
    metrics::histogram!("augur.validate.load_prices_ms")
        .record(stage_start.elapsed().as_millis() as f64);

    let window = config.window_config();
    let required = minimum_rows(&window);
    let tickers = if requested.is_empty() {
        table.series.keys().cloned().collect()
    } else {
        requested
    };

    let mut failing = Vec::new();
    let mut reports = serde_json::Map::new();
    for ticker in &tickers {
        let Some(series) = table.get(ticker) else {
            failing.push(ticker.clone());
            reports.insert(ticker.clone(), serde_json::json!({ "status": "missing" }));
            continue;
        };

        let history_rows = series.history_before(target_month.first_day()).len();
        let windows = history_rows.saturating_sub(window.length);
        let truth = series.ground_truth(target_month);
        let status = match truth {
            None => "ground_truth_missing",
            Some(_) if history_rows < required => "insufficient_history",
            Some(_) => "ok",
        };
        if status != "ok" {
            failing.push(ticker.clone());
        }
        metrics::counter!("augur.validate.tickers_total", "status" => status).increment(1);

        reports.insert(
            ticker.clone(),
            serde_json::json!({
                "status": status,
                "sector": series.sector(),
                "history_rows": history_rows,
                "required_rows": required,
                "windows": windows,
                "ground_truth": truth.map(|t| serde_json::json!({
                    "date": t.date.to_string(),
                    "close": t.close,
                })),
                "quality": table.reports.get(ticker).map(quality_json),
            }),
        );
    }

    if strict && !failing.is_empty() {
        return Err(format!(
            "strict validation failed: {} ticker(s) not forecastable ({})",
            failing.len(),
            failing.join(", ")
        ));
    }

    Ok(serde_json::json!({
        "target_month": target_month.to_string(),
        "window_length": window.length,
        "tickers": reports,
        "failing": failing,
        "strict": strict,
    }))
}

fn quality_json(report: &DataQualityReport) -> serde_json::Value {
    serde_json::json!({
        "rows": report.rows,
        "duplicates": report.duplicates,
        "out_of_order": report.out_of_order,
        "invalid_close": report.invalid_close,
        "invalid_numeric": report.invalid_numeric,
        "invalid_date": report.invalid_date,
        "first_date": report.first_date.map(|d| d.to_string()),
        "last_date": report.last_date.map(|d| d.to_string()),
        "first_duplicate": report.first_duplicate.map(|d| d.to_string()),
        "first_invalid_close": report.first_invalid_close.map(|d| d.to_string()),
        "first_invalid_numeric": report.first_invalid_numeric.map(|d| d.to_string()),
    })
}
