use crate::errors::ForecastError;
use crate::services::models::{evaluate_candidate, Deadline, TrainingConfig};
use crate::services::sequences::WindowedDataset;
use crate::value_objects::hyperparams::{HyperparamSet, BATCH_SIZE, UNITS};
use crate::value_objects::model_family::ModelFamily;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

/// Inclusive integer bounds of one hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    fn width(&self) -> f64 {
        (self.max - self.min) as f64
    }

    fn clamp(&self, value: f64) -> i64 {
        (value.round() as i64).clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchSpace {
    params: BTreeMap<String, IntRange>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, range: IntRange) -> Self {
        self.params.insert(name.to_string(), range);
        self
    }

    /// The space searched for both model families.
    pub fn units_and_batch(units: IntRange, batch_size: IntRange) -> Self {
        Self::new().with(UNITS, units).with(BATCH_SIZE, batch_size)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, IntRange)> {
        self.params.iter().map(|(name, range)| (name.as_str(), *range))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.params.is_empty() {
            return Err("search space is empty".to_string());
        }
        for (name, range) in &self.params {
            if range.min > range.max {
                return Err(format!(
                    "search range for {name} is empty ({}..={})",
                    range.min, range.max
                ));
            }
        }
        Ok(())
    }

    pub fn contains(&self, candidate: &HyperparamSet) -> bool {
        self.params.iter().all(|(name, range)| {
            candidate
                .get(name)
                .is_some_and(|value| range.contains(value))
        })
    }
}

/// One evaluated candidate. `loss` is `None` when scoring failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub number: usize,
    pub params: HyperparamSet,
    pub loss: Option<f64>,
    pub error: Option<String>,
}

impl Trial {
    pub fn is_complete(&self) -> bool {
        self.loss.is_some_and(f64::is_finite)
    }
}

/// Chooses the next candidate given every trial so far.
pub trait SearchStrategy {
    fn propose(&mut self, space: &SearchSpace, history: &[Trial]) -> HyperparamSet;
}

/// Scores a candidate; lower is better.
pub trait Objective {
    fn score(&mut self, candidate: &HyperparamSet) -> Result<f64, String>;
}

impl<F> Objective for F
where
    F: FnMut(&HyperparamSet) -> Result<f64, String>,
{
    fn score(&mut self, candidate: &HyperparamSet) -> Result<f64, String> {
        self(candidate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningSettings {
    pub trials: usize,
    /// Random trials before the density model kicks in.
    pub startup_trials: usize,
    pub seed: u64,
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            trials: 10,
            startup_trials: 4,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuningOutcome {
    pub best: HyperparamSet,
    pub best_loss: f64,
    pub trials: Vec<Trial>,
}

impl TuningOutcome {
    pub fn failed_trials(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter().filter(|trial| !trial.is_complete())
    }
}

/// Sequential search: propose, score, repeat. Returns the best trial that
/// was actually evaluated; ties keep the earlier trial.
pub fn optimize(
    space: &SearchSpace,
    strategy: &mut dyn SearchStrategy,
    objective: &mut dyn Objective,
    trials: usize,
    deadline: &Deadline,
) -> Result<TuningOutcome, ForecastError> {
    space.validate().map_err(ForecastError::TuningFailure)?;
    if trials == 0 {
        return Err(ForecastError::TuningFailure(
            "trial budget is zero".to_string(),
        ));
    }

    let mut history: Vec<Trial> = Vec::with_capacity(trials);
    for number in 0..trials {
        deadline.check().map_err(ForecastError::TuningFailure)?;
        let params = strategy.propose(space, &history);
        let (loss, error) = if !space.contains(&params) {
            (None, Some(format!("candidate {params} is outside the search space")))
        } else {
            match objective.score(&params) {
                Ok(loss) if loss.is_finite() => (Some(loss), None),
                Ok(loss) => (None, Some(format!("loss is not finite ({loss})"))),
                Err(err) => {
                    if deadline.is_expired() {
                        return Err(ForecastError::TuningFailure(err));
                    }
                    (None, Some(err))
                }
            }
        };
        history.push(Trial {
            number,
            params,
            loss,
            error,
        });
    }

    let mut best: Option<(&Trial, f64)> = None;
    for trial in &history {
        let Some(loss) = trial.loss.filter(|loss| loss.is_finite()) else {
            continue;
        };
        if best.map_or(true, |(_, best_loss)| loss < best_loss) {
            best = Some((trial, loss));
        }
    }

    match best {
        Some((trial, best_loss)) => Ok(TuningOutcome {
            best: trial.params.clone(),
            best_loss,
            trials: history,
        }),
        None => {
            let last_error = history
                .iter()
                .rev()
                .find_map(|trial| trial.error.clone())
                .unwrap_or_else(|| "no error recorded".to_string());
            Err(ForecastError::TuningFailure(format!(
                "all {trials} trials failed (last: {last_error})"
            )))
        }
    }
}

/// Tree-structured Parzen style search over integer ranges.
///
/// The first `startup_trials` proposals are uniform. Afterwards completed
/// trials are split into the best `gamma` quantile and the rest; candidates
/// are sampled around good trials and the one maximising the good/bad
/// density ratio is proposed.
#[derive(Debug, Clone)]
pub struct ParzenSearch {
    rng: StdRng,
    startup_trials: usize,
    gamma: f64,
    candidates: usize,
}

impl ParzenSearch {
    pub fn new(seed: u64, startup_trials: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            startup_trials: startup_trials.max(1),
            gamma: 0.25,
            candidates: 24,
        }
    }

    fn sample_uniform(&mut self, space: &SearchSpace) -> HyperparamSet {
        let values = space
            .params()
            .map(|(name, range)| (name.to_string(), self.rng.gen_range(range.min..=range.max)))
            .collect();
        HyperparamSet::from_map(values)
    }
}

fn bandwidth(range: IntRange, observations: usize) -> f64 {
    (range.width() * 0.25 / (observations.max(1) as f64).powf(0.2)).max(0.5)
}

/// Parzen density of `candidate` under `trials`, mixed with a uniform prior.
fn density(space: &SearchSpace, candidate: &HyperparamSet, trials: &[&Trial]) -> f64 {
    let prior: f64 = space
        .params()
        .map(|(_, range)| 1.0 / (range.width() + 1.0))
        .product();
    let kernels: f64 = trials
        .iter()
        .map(|trial| {
            space
                .params()
                .map(|(name, range)| {
                    let sigma = bandwidth(range, trials.len());
                    let x = candidate.get(name).unwrap_or(range.min) as f64;
                    let mu = trial.params.get(name).unwrap_or(range.min) as f64;
                    let z = (x - mu) / sigma;
                    (-0.5 * z * z).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt())
                })
                .product::<f64>()
        })
        .sum();
    (kernels + prior) / (trials.len() as f64 + 1.0)
}

impl SearchStrategy for ParzenSearch {
    fn propose(&mut self, space: &SearchSpace, history: &[Trial]) -> HyperparamSet {
        let mut completed: Vec<&Trial> = history.iter().filter(|t| t.is_complete()).collect();
        if completed.len() < self.startup_trials {
            return self.sample_uniform(space);
        }
        completed.sort_by(|a, b| {
            a.loss
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.loss.unwrap_or(f64::INFINITY))
                .then(a.number.cmp(&b.number))
        });
        let n_good = ((completed.len() as f64 * self.gamma).ceil() as usize).max(1);
        let (good, bad) = completed.split_at(n_good);

        let mut best: Option<(HyperparamSet, f64, bool)> = None;
        for _ in 0..self.candidates {
            let anchor = good[self.rng.gen_range(0..good.len())];
            let mut values = BTreeMap::new();
            for (name, range) in space.params() {
                let mu = anchor.params.get(name).unwrap_or(range.min) as f64;
                let sigma = bandwidth(range, good.len());
                let sampled = Normal::new(mu, sigma)
                    .map(|normal| normal.sample(&mut self.rng))
                    .unwrap_or(mu);
                values.insert(name.to_string(), range.clamp(sampled));
            }
            let candidate = HyperparamSet::from_map(values);
            let score = density(space, &candidate, good).ln() - density(space, &candidate, bad).ln();
            let unseen = !history.iter().any(|trial| trial.params == candidate);

            let better = match &best {
                None => true,
                Some((_, best_score, best_unseen)) => {
                    (unseen && !best_unseen) || (unseen == *best_unseen && score > *best_score)
                }
            };
            if better {
                best = Some((candidate, score, unseen));
            }
        }

        match best {
            Some((candidate, _, _)) => candidate,
            None => self.sample_uniform(space),
        }
    }
}

/// Tunes one family on one ticker's windows: each trial trains on the train
/// split and is scored on the eval split.
pub fn optimize_family(
    family: ModelFamily,
    dataset: &WindowedDataset,
    space: &SearchSpace,
    settings: &TuningSettings,
    training: &TrainingConfig,
    deadline: &Deadline,
) -> Result<TuningOutcome, ForecastError> {
    if dataset.x_train.is_empty() {
        return Err(ForecastError::TuningFailure(
            "no training windows".to_string(),
        ));
    }
    let mut strategy = ParzenSearch::new(settings.seed, settings.startup_trials);
    let mut objective = |candidate: &HyperparamSet| -> Result<f64, String> {
        evaluate_candidate(
            family,
            candidate,
            (&dataset.x_train, &dataset.y_train),
            dataset.tuning_eval(),
            training,
            deadline,
        )
    };
    optimize(space, &mut strategy, &mut objective, settings.trials, deadline)
}
