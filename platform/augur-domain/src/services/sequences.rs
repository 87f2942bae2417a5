use crate::errors::ForecastError;
use crate::services::scaling::{feature_matrix, MinMaxScaler, FEATURE_COUNT, TARGET_COLUMN};
use crate::value_objects::model_family::ModelFamily;
use crate::value_objects::price_bar::PriceSeries;
use chrono::NaiveDate;
use ndarray::{concatenate, s, Array1, Array2, Array3, Axis};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Rows per window.
    pub length: usize,
    /// Share of windows, taken from the end, held out for tuning.
    pub eval_fraction: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: 10,
            eval_fraction: 0.2,
        }
    }
}

/// A batch of windows shaped for one model family.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowTensor {
    /// `samples x steps x features`.
    Sequence(Array3<f64>),
    /// `samples x (steps * features)`, rows flattened step-major.
    Flat(Array2<f64>),
}

impl WindowTensor {
    pub fn len(&self) -> usize {
        match self {
            WindowTensor::Sequence(x) => x.len_of(Axis(0)),
            WindowTensor::Flat(x) => x.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> WindowTensor {
        match self {
            WindowTensor::Sequence(x) => WindowTensor::Sequence(x.select(Axis(0), indices)),
            WindowTensor::Flat(x) => WindowTensor::Flat(x.select(Axis(0), indices)),
        }
    }

    pub fn split_at(&self, index: usize) -> (WindowTensor, WindowTensor) {
        match self {
            WindowTensor::Sequence(x) => (
                WindowTensor::Sequence(x.slice(s![..index, .., ..]).to_owned()),
                WindowTensor::Sequence(x.slice(s![index.., .., ..]).to_owned()),
            ),
            WindowTensor::Flat(x) => (
                WindowTensor::Flat(x.slice(s![..index, ..]).to_owned()),
                WindowTensor::Flat(x.slice(s![index.., ..]).to_owned()),
            ),
        }
    }

    pub fn concat(&self, other: &WindowTensor) -> Result<WindowTensor, String> {
        match (self, other) {
            (WindowTensor::Sequence(a), WindowTensor::Sequence(b)) => {
                concatenate(Axis(0), &[a.view(), b.view()])
                    .map(WindowTensor::Sequence)
                    .map_err(|err| format!("failed to concatenate windows: {err}"))
            }
            (WindowTensor::Flat(a), WindowTensor::Flat(b)) => {
                concatenate(Axis(0), &[a.view(), b.view()])
                    .map(WindowTensor::Flat)
                    .map_err(|err| format!("failed to concatenate windows: {err}"))
            }
            _ => Err("cannot concatenate sequence and flat windows".to_string()),
        }
    }
}

/// Supervised windows of one ticker for one family. Targets are scaled
/// closes of the row following each window.
#[derive(Debug, Clone)]
pub struct WindowedDataset {
    pub family: ModelFamily,
    pub x_train: WindowTensor,
    pub y_train: Array1<f64>,
    pub x_eval: WindowTensor,
    pub y_eval: Array1<f64>,
    /// The last `length` rows of the history; has no target.
    pub x_latest: WindowTensor,
    pub latest_date: NaiveDate,
    pub scaler: MinMaxScaler,
}

impl WindowedDataset {
    /// Split used to score tuning trials; the train split when no window
    /// could be held out.
    pub fn tuning_eval(&self) -> (&WindowTensor, &Array1<f64>) {
        if self.x_eval.is_empty() {
            (&self.x_train, &self.y_train)
        } else {
            (&self.x_eval, &self.y_eval)
        }
    }

    /// Every window in chronological order, for the final fit.
    pub fn all_windows(&self) -> Result<(WindowTensor, Array1<f64>), String> {
        let x = self.x_train.concat(&self.x_eval)?;
        let y = concatenate(Axis(0), &[self.y_train.view(), self.y_eval.view()])
            .map_err(|err| format!("failed to concatenate targets: {err}"))?;
        Ok((x, y))
    }
}

pub fn minimum_rows(config: &WindowConfig) -> usize {
    config.length.max(1) + 1
}

pub fn build_windows(
    series: &PriceSeries,
    family: ModelFamily,
    config: &WindowConfig,
) -> Result<WindowedDataset, ForecastError> {
    let steps = config.length.max(1);
    let rows = series.len();
    let required = minimum_rows(config);
    if rows < required {
        return Err(ForecastError::InsufficientHistory { rows, required });
    }
    let latest_date = series.last_date().ok_or(ForecastError::InsufficientHistory {
        rows,
        required,
    })?;

    let raw = feature_matrix(series.bars());
    let scaler = MinMaxScaler::fit(&raw).map_err(ForecastError::TrainingFailure)?;
    let scaled = scaler.transform(&raw);

    let n_windows = rows - steps;
    let starts: Vec<usize> = (0..n_windows).collect();
    let x = shape_windows(&scaled, &starts, steps, family);
    let target = TARGET_COLUMN.index();
    let y = Array1::from_shape_fn(n_windows, |i| scaled[[i + steps, target]]);
    let x_latest = shape_windows(&scaled, &[rows - steps], steps, family);

    let fraction = if config.eval_fraction.is_finite() {
        config.eval_fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let n_eval = ((n_windows as f64 * fraction).floor() as usize).min(n_windows - 1);
    let split = n_windows - n_eval;
    let (x_train, x_eval) = x.split_at(split);

    Ok(WindowedDataset {
        family,
        x_train,
        y_train: y.slice(s![..split]).to_owned(),
        x_eval,
        y_eval: y.slice(s![split..]).to_owned(),
        x_latest,
        latest_date,
        scaler,
    })
}

fn shape_windows(
    scaled: &Array2<f64>,
    starts: &[usize],
    steps: usize,
    family: ModelFamily,
) -> WindowTensor {
    match family {
        ModelFamily::Sequential => WindowTensor::Sequence(Array3::from_shape_fn(
            (starts.len(), steps, FEATURE_COUNT),
            |(i, t, f)| scaled[[starts[i] + t, f]],
        )),
        ModelFamily::FeedForward => WindowTensor::Flat(Array2::from_shape_fn(
            (starts.len(), steps * FEATURE_COUNT),
            |(i, k)| scaled[[starts[i] + k / FEATURE_COUNT, k % FEATURE_COUNT]],
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::price_bar::PriceBar;

    fn series(rows: usize) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let bars = (0..rows)
            .map(|i| {
                let close = 100.0 + i as f64;
                PriceBar {
                    date: start + chrono::Duration::days(i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0 + 10.0 * i as f64,
                }
            })
            .collect();
        PriceSeries::new("TEST", None, bars).expect("series")
    }

    fn config(length: usize) -> WindowConfig {
        WindowConfig {
            length,
            eval_fraction: 0.2,
        }
    }

    #[test]
    fn sequential_windows_are_rank_three() {
        let dataset =
            build_windows(&series(40), ModelFamily::Sequential, &config(10)).expect("windows");
        let WindowTensor::Sequence(x_train) = &dataset.x_train else {
            panic!("expected sequence windows");
        };
        // 30 windows, 6 held out.
        assert_eq!(x_train.shape(), &[24, 10, FEATURE_COUNT]);
        assert_eq!(dataset.x_eval.len(), 6);
        assert_eq!(dataset.y_train.len(), 24);
        assert_eq!(dataset.y_eval.len(), 6);
        assert_eq!(dataset.x_latest.len(), 1);
    }

    #[test]
    fn feed_forward_windows_are_flattened() {
        let dataset =
            build_windows(&series(40), ModelFamily::FeedForward, &config(10)).expect("windows");
        let WindowTensor::Flat(x_train) = &dataset.x_train else {
            panic!("expected flat windows");
        };
        assert_eq!(x_train.shape(), &[24, 10 * FEATURE_COUNT]);

        // Step-major flattening: second step's close sits at FEATURE_COUNT + 3.
        let scaled_close_row1 = dataset
            .scaler
            .transform_row(ndarray::array![100.5, 102.0, 100.0, 101.0, 1010.0].view())[3];
        assert!((x_train[[0, FEATURE_COUNT + 3]] - scaled_close_row1).abs() < 1e-12);
    }

    #[test]
    fn targets_are_next_row_close() {
        let dataset =
            build_windows(&series(20), ModelFamily::Sequential, &config(5)).expect("windows");
        let WindowTensor::Sequence(x) = &dataset.x_train else {
            panic!("expected sequence windows");
        };
        // Linear closes: next close sits one scaled step above the last one.
        let step = 1.0 / 19.0;
        for i in 0..dataset.y_train.len() {
            let last_close = x[[i, 4, TARGET_COLUMN.index()]];
            assert!((dataset.y_train[i] - (last_close + step)).abs() < 1e-12);
        }
    }

    #[test]
    fn latest_window_ends_at_last_row() {
        let data = series(25);
        let dataset = build_windows(&data, ModelFamily::Sequential, &config(5)).expect("windows");
        assert_eq!(Some(dataset.latest_date), data.last_date());
        let WindowTensor::Sequence(x) = &dataset.x_latest else {
            panic!("expected sequence windows");
        };
        assert_eq!(x[[0, 4, TARGET_COLUMN.index()]], 1.0);
    }

    #[test]
    fn eval_split_is_chronologically_last() {
        let dataset =
            build_windows(&series(40), ModelFamily::Sequential, &config(10)).expect("windows");
        let max_train = dataset.y_train.iter().cloned().fold(f64::MIN, f64::max);
        let min_eval = dataset.y_eval.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max_train < min_eval);

        let (x_all, y_all) = dataset.all_windows().expect("all");
        assert_eq!(x_all.len(), 30);
        assert_eq!(y_all.len(), 30);
    }

    #[test]
    fn tuning_falls_back_to_train_split_when_eval_is_empty() {
        let dataset =
            build_windows(&series(8), ModelFamily::FeedForward, &config(5)).expect("windows");
        assert!(dataset.x_eval.is_empty());
        let (x, y) = dataset.tuning_eval();
        assert_eq!(x.len(), 3);
        assert_eq!(y.len(), 3);
    }

    #[test]
    fn short_series_is_insufficient_history() {
        for family in ModelFamily::ALL {
            let err = build_windows(&series(5), family, &config(10)).expect_err("short");
            assert_eq!(
                err,
                ForecastError::InsufficientHistory {
                    rows: 5,
                    required: 11
                }
            );
        }
        let err = build_windows(&series(10), ModelFamily::Sequential, &config(10))
            .expect_err("exactly window length");
        assert_eq!(err.kind(), "insufficient_history");
        build_windows(&series(11), ModelFamily::Sequential, &config(10)).expect("one window");
    }
}
