use super::cache::SharedParamCache;
use super::ForecastPlan;
use augur_domain::errors::ForecastError;
use augur_domain::repositories::prices::PriceTable;
use augur_domain::services::evaluation::{score_forecast, select_best};
use augur_domain::services::models::{train_and_predict, Deadline};
use augur_domain::services::sequences::{build_windows, WindowedDataset};
use augur_domain::services::tuning::optimize_family;
use augur_domain::value_objects::forecast::ForecastRecord;
use augur_domain::value_objects::hyperparams::HyperparamSet;
use augur_domain::value_objects::model_family::ModelFamily;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Lifecycle of one ticker inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerStage {
    Pending,
    GroundTruthResolved,
    WindowsBuilt,
    ParamsCached,
    ParamsTuned,
    Trained,
    Evaluated,
    Recorded,
    Skipped,
}

impl fmt::Display for TickerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TickerStage::Pending => "PENDING",
            TickerStage::GroundTruthResolved => "GROUND_TRUTH_RESOLVED",
            TickerStage::WindowsBuilt => "WINDOWS_BUILT",
            TickerStage::ParamsCached => "PARAMS_CACHED",
            TickerStage::ParamsTuned => "PARAMS_TUNED",
            TickerStage::Trained => "TRAINED",
            TickerStage::Evaluated => "EVALUATED",
            TickerStage::Recorded => "RECORDED",
            TickerStage::Skipped => "SKIPPED",
        };
        f.write_str(label)
    }
}

/// Tuning work done for one family of one ticker.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TuningWork {
    pub(crate) trials: usize,
    pub(crate) failed_trials: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct TickerReport {
    pub(crate) record: ForecastRecord,
    pub(crate) cache_hits: usize,
    pub(crate) tuned: Vec<TuningWork>,
}

#[derive(Debug, Clone)]
pub(crate) struct TickerFailure {
    /// Last stage reached before the failure.
    pub(crate) stage: TickerStage,
    pub(crate) error: ForecastError,
    pub(crate) tuned: Vec<TuningWork>,
}

pub(crate) struct TickerOutcome {
    pub(crate) ticker: String,
    pub(crate) result: Result<TickerReport, TickerFailure>,
}

struct Progress<'a> {
    ticker: &'a str,
    stage: TickerStage,
    cache_hits: usize,
    tuned: Vec<TuningWork>,
}

impl Progress<'_> {
    fn advance(&mut self, next: TickerStage) {
        tracing::debug!(ticker = self.ticker, from = %self.stage, to = %next, "ticker stage");
        self.stage = next;
    }
}

pub(crate) fn process_ticker(
    ticker: &str,
    table: &PriceTable,
    plan: &ForecastPlan,
    cache: &SharedParamCache,
) -> TickerOutcome {
    let _span = tracing::info_span!("ticker", ticker = ticker).entered();
    let start = Instant::now();
    let deadline = plan.ticker_timeout.map(Deadline::after).unwrap_or_default();
    let mut progress = Progress {
        ticker,
        stage: TickerStage::Pending,
        cache_hits: 0,
        tuned: Vec::new(),
    };

    let result = run_stages(ticker, table, plan, cache, &deadline, &mut progress);
    let elapsed_ms = start.elapsed().as_millis() as f64;
    let result = match result {
        Ok(record) => {
            progress.advance(TickerStage::Recorded);
            metrics::counter!("augur.pipeline.tickers_total", "result" => "recorded", "kind" => "ok")
                .increment(1);
            tracing::info!(
                ticker,
                best_model = %record.best_model,
                actual_price = record.actual_price,
                elapsed_ms,
                "ticker recorded"
            );
            Ok(TickerReport {
                record,
                cache_hits: progress.cache_hits,
                tuned: progress.tuned,
            })
        }
        Err(error) => {
            let stage = progress.stage;
            progress.advance(TickerStage::Skipped);
            metrics::counter!(
                "augur.pipeline.tickers_total",
                "result" => "skipped",
                "kind" => error.kind()
            )
            .increment(1);
            tracing::warn!(
                ticker,
                stage = %stage,
                kind = error.kind(),
                cause = %error,
                "ticker skipped"
            );
            Err(TickerFailure {
                stage,
                error,
                tuned: progress.tuned,
            })
        }
    };
    metrics::histogram!("augur.pipeline.ticker_ms").record(elapsed_ms);

    TickerOutcome {
        ticker: ticker.to_string(),
        result,
    }
}

fn run_stages(
    ticker: &str,
    table: &PriceTable,
    plan: &ForecastPlan,
    cache: &SharedParamCache,
    deadline: &Deadline,
    progress: &mut Progress<'_>,
) -> Result<ForecastRecord, ForecastError> {
    let month = plan.target_month;
    let missing = || ForecastError::GroundTruthMissing {
        month: month.to_string(),
    };
    let series = table.get(ticker).ok_or_else(missing)?;
    let truth = series.ground_truth(month).ok_or_else(missing)?;
    progress.advance(TickerStage::GroundTruthResolved);

    // Both families are windowed before any tuning so a short history never
    // reaches the cache.
    let history = series.history_before(month.first_day());
    let datasets = ModelFamily::ALL
        .into_iter()
        .map(|family| build_windows(&history, family, &plan.windows))
        .collect::<Result<Vec<_>, _>>()?;
    progress.advance(TickerStage::WindowsBuilt);

    let mut families = BTreeMap::new();
    let mut window_end = None;
    for dataset in &datasets {
        let family = dataset.family;
        let params = resolve_params(ticker, dataset, plan, cache, deadline, progress)?;

        let training = plan.training_for(ticker, family);
        let (x, y) = dataset
            .all_windows()
            .map_err(ForecastError::TrainingFailure)?;
        let fit_start = Instant::now();
        let forecast = train_and_predict(
            family,
            &params,
            &x,
            &y,
            &dataset.x_latest,
            &dataset.scaler,
            &training,
            deadline,
        )?;
        metrics::histogram!("augur.training.fit_ms", "family" => family.label())
            .record(fit_start.elapsed().as_millis() as f64);
        tracing::debug!(ticker, family = %family, %params, forecast, "model trained");

        families.insert(family, score_forecast(truth.close, forecast));
        window_end = Some(dataset.latest_date);
        progress.advance(TickerStage::Trained);
    }

    let best_model = select_best(&families);
    progress.advance(TickerStage::Evaluated);

    Ok(ForecastRecord {
        target_date: truth.date,
        actual_price: truth.close,
        window_end: window_end.unwrap_or(truth.date),
        families,
        best_model,
    })
}

fn resolve_params(
    ticker: &str,
    dataset: &WindowedDataset,
    plan: &ForecastPlan,
    cache: &SharedParamCache,
    deadline: &Deadline,
    progress: &mut Progress<'_>,
) -> Result<HyperparamSet, ForecastError> {
    let family = dataset.family;
    if let Some(params) = cache.get(ticker, family) {
        metrics::counter!("augur.params.cache_total", "family" => family.label(), "result" => "hit")
            .increment(1);
        tracing::debug!(ticker, family = %family, %params, "parameter cache hit");
        progress.cache_hits += 1;
        progress.advance(TickerStage::ParamsCached);
        return Ok(params);
    }
    metrics::counter!("augur.params.cache_total", "family" => family.label(), "result" => "miss")
        .increment(1);

    let search_start = Instant::now();
    let tuned = optimize_family(
        family,
        dataset,
        &plan.space,
        &plan.tuning_for(ticker, family),
        &plan.training_for(ticker, family),
        deadline,
    );
    metrics::histogram!("augur.tuning.search_ms", "family" => family.label())
        .record(search_start.elapsed().as_millis() as f64);
    let outcome = tuned?;

    let failed: Vec<_> = outcome.failed_trials().collect();
    for trial in &failed {
        tracing::warn!(
            ticker,
            family = %family,
            trial = trial.number,
            params = %trial.params,
            cause = trial.error.as_deref().unwrap_or("unknown"),
            "tuning trial failed"
        );
    }
    metrics::counter!("augur.tuning.trials_total", "family" => family.label())
        .increment(outcome.trials.len() as u64);
    progress.tuned.push(TuningWork {
        trials: outcome.trials.len(),
        failed_trials: failed.len(),
    });
    tracing::info!(
        ticker,
        family = %family,
        params = %outcome.best,
        loss = outcome.best_loss,
        trials = outcome.trials.len(),
        "hyperparameters tuned"
    );

    let params = cache.insert_if_absent(ticker, family, outcome.best);
    progress.advance(TickerStage::ParamsTuned);
    Ok(params)
}
