pub mod adam;
pub mod lstm;
pub mod mlp;

use crate::errors::ForecastError;
use crate::services::scaling::MinMaxScaler;
use crate::services::sequences::WindowTensor;
use crate::value_objects::hyperparams::HyperparamSet;
use crate::value_objects::model_family::ModelFamily;
use lstm::LstmRegressor;
use mlp::MlpRegressor;
use ndarray::{Array1, Array2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Seeds weight init and batch shuffling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.01,
            seed: 42,
        }
    }
}

/// Cooperative wall-clock budget, checked between epochs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    pub fn check(&self) -> Result<(), String> {
        if self.is_expired() {
            return Err("deadline exceeded".to_string());
        }
        Ok(())
    }
}

/// A model that learns scaled next-close targets from windows.
pub trait Regressor {
    /// One optimizer step on a mini-batch; returns the batch MSE.
    fn train_batch(&mut self, x: &WindowTensor, y: &Array1<f64>) -> Result<f64, String>;
    fn predict(&self, x: &WindowTensor) -> Result<Array1<f64>, String>;
}

pub(crate) fn uniform_matrix(rng: &mut StdRng, rows: usize, cols: usize, limit: f64) -> Array2<f64> {
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((rows, cols), |_| dist.sample(rng))
}

pub(crate) fn glorot_uniform(rng: &mut StdRng, fan_out: usize, fan_in: usize) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    uniform_matrix(rng, fan_out, fan_in, limit)
}

/// Shuffled mini-batch training for a fixed number of epochs.
///
/// Returns the mean loss of the last epoch.
pub fn fit_regressor<R: Regressor + ?Sized>(
    model: &mut R,
    x: &WindowTensor,
    y: &Array1<f64>,
    batch_size: usize,
    training: &TrainingConfig,
    deadline: &Deadline,
) -> Result<f64, String> {
    if x.is_empty() {
        return Err("no training windows".to_string());
    }
    if x.len() != y.len() {
        return Err(format!(
            "{} training windows but {} targets",
            x.len(),
            y.len()
        ));
    }

    let batch_size = batch_size.clamp(1, x.len());
    let mut rng = StdRng::seed_from_u64(training.seed.wrapping_add(1));
    let mut order: Vec<usize> = (0..x.len()).collect();
    let mut epoch_loss = f64::NAN;

    for epoch in 0..training.epochs.max(1) {
        deadline.check()?;
        order.shuffle(&mut rng);
        let mut total = 0.0;
        for chunk in order.chunks(batch_size) {
            let x_batch = x.select(chunk);
            let y_batch = y.select(Axis(0), chunk);
            total += model.train_batch(&x_batch, &y_batch)? * chunk.len() as f64;
        }
        epoch_loss = total / x.len() as f64;
        if !epoch_loss.is_finite() {
            return Err(format!("loss diverged at epoch {epoch}"));
        }
    }
    Ok(epoch_loss)
}

/// A freshly initialized model of one family.
#[derive(Debug, Clone)]
pub enum Forecaster {
    Sequential(LstmRegressor),
    FeedForward(MlpRegressor),
}

impl Forecaster {
    /// Sizes the model from the windows it will be trained on.
    pub fn build(
        family: ModelFamily,
        hyperparams: &HyperparamSet,
        x: &WindowTensor,
        training: &TrainingConfig,
    ) -> Result<Self, String> {
        let units = hyperparams.units()?;
        let mut rng = StdRng::seed_from_u64(training.seed);
        match (family, x) {
            (ModelFamily::Sequential, WindowTensor::Sequence(x)) => {
                Ok(Forecaster::Sequential(LstmRegressor::new(
                    x.len_of(Axis(2)),
                    units,
                    training.learning_rate,
                    &mut rng,
                )))
            }
            (ModelFamily::FeedForward, WindowTensor::Flat(x)) => Ok(Forecaster::FeedForward(
                MlpRegressor::new(x.ncols(), units, training.learning_rate, &mut rng),
            )),
            (family, _) => Err(format!("{family} model cannot consume these windows")),
        }
    }
}

impl Regressor for Forecaster {
    fn train_batch(&mut self, x: &WindowTensor, y: &Array1<f64>) -> Result<f64, String> {
        match self {
            Forecaster::Sequential(model) => model.train_batch(x, y),
            Forecaster::FeedForward(model) => model.train_batch(x, y),
        }
    }

    fn predict(&self, x: &WindowTensor) -> Result<Array1<f64>, String> {
        match self {
            Forecaster::Sequential(model) => model.predict(x),
            Forecaster::FeedForward(model) => model.predict(x),
        }
    }
}

/// Trains a throwaway model and returns its MSE on the held-out windows,
/// in scaled units.
pub fn evaluate_candidate(
    family: ModelFamily,
    hyperparams: &HyperparamSet,
    (x_train, y_train): (&WindowTensor, &Array1<f64>),
    (x_eval, y_eval): (&WindowTensor, &Array1<f64>),
    training: &TrainingConfig,
    deadline: &Deadline,
) -> Result<f64, String> {
    let batch_size = hyperparams.batch_size()?;
    let mut model = Forecaster::build(family, hyperparams, x_train, training)?;
    fit_regressor(&mut model, x_train, y_train, batch_size, training, deadline)?;
    let predictions = model.predict(x_eval)?;
    if predictions.len() != y_eval.len() || y_eval.is_empty() {
        return Err("evaluation windows and targets do not line up".to_string());
    }
    let loss = (&predictions - y_eval).mapv(|d| d * d).sum() / y_eval.len() as f64;
    if !loss.is_finite() {
        return Err("evaluation loss is not finite".to_string());
    }
    Ok(loss)
}

/// Fits a fresh model and forecasts the close that follows `x_predict`,
/// in price units.
#[allow(clippy::too_many_arguments)]
pub fn train_and_predict(
    family: ModelFamily,
    hyperparams: &HyperparamSet,
    x_train: &WindowTensor,
    y_train: &Array1<f64>,
    x_predict: &WindowTensor,
    scaler: &MinMaxScaler,
    training: &TrainingConfig,
    deadline: &Deadline,
) -> Result<f64, ForecastError> {
    let batch_size = hyperparams
        .batch_size()
        .map_err(ForecastError::TrainingFailure)?;
    let mut model = Forecaster::build(family, hyperparams, x_train, training)
        .map_err(ForecastError::TrainingFailure)?;
    fit_regressor(&mut model, x_train, y_train, batch_size, training, deadline)
        .map_err(ForecastError::TrainingFailure)?;

    let scaled = model
        .predict(x_predict)
        .map_err(ForecastError::TrainingFailure)?
        .first()
        .copied()
        .ok_or_else(|| ForecastError::TrainingFailure("empty prediction".to_string()))?;
    let price = scaler.inverse_target(scaled);
    if !price.is_finite() {
        return Err(ForecastError::TrainingFailure(format!(
            "{family} forecast is not finite"
        )));
    }
    Ok(price)
}
