use crate::value_objects::price_bar::PriceBar;
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Feature columns, in the order they are laid out in every window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureColumn {
    Open,
    High,
    Low,
    Close,
    Volume,
}

pub const FEATURE_COLUMNS: [FeatureColumn; 5] = [
    FeatureColumn::Open,
    FeatureColumn::High,
    FeatureColumn::Low,
    FeatureColumn::Close,
    FeatureColumn::Volume,
];

pub const FEATURE_COUNT: usize = FEATURE_COLUMNS.len();

pub const TARGET_COLUMN: FeatureColumn = FeatureColumn::Close;

impl FeatureColumn {
    pub fn name(self) -> &'static str {
        match self {
            FeatureColumn::Open => "open",
            FeatureColumn::High => "high",
            FeatureColumn::Low => "low",
            FeatureColumn::Close => "close",
            FeatureColumn::Volume => "volume",
        }
    }

    pub fn index(self) -> usize {
        FEATURE_COLUMNS
            .iter()
            .position(|column| *column == self)
            .unwrap_or(0)
    }

    pub fn value(self, bar: &PriceBar) -> f64 {
        match self {
            FeatureColumn::Open => bar.open,
            FeatureColumn::High => bar.high,
            FeatureColumn::Low => bar.low,
            FeatureColumn::Close => bar.close,
            FeatureColumn::Volume => bar.volume,
        }
    }
}

/// `rows x FEATURE_COUNT` matrix in `FEATURE_COLUMNS` order.
pub fn feature_matrix(bars: &[PriceBar]) -> Array2<f64> {
    Array2::from_shape_fn((bars.len(), FEATURE_COUNT), |(row, col)| {
        FEATURE_COLUMNS[col].value(&bars[row])
    })
}

/// Per-column min-max scaler onto `[0, 1]`.
///
/// A constant column has its range treated as 1, so it scales to 0 and
/// inverts back exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    mins: Array1<f64>,
    ranges: Array1<f64>,
}

impl MinMaxScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self, String> {
        if data.nrows() == 0 {
            return Err("cannot fit scaler on an empty matrix".to_string());
        }
        if data.ncols() != FEATURE_COUNT {
            return Err(format!(
                "scaler expects {FEATURE_COUNT} columns, got {}",
                data.ncols()
            ));
        }
        if data.iter().any(|value| !value.is_finite()) {
            return Err("cannot fit scaler on non-finite values".to_string());
        }

        let mins = data.fold_axis(Axis(0), f64::INFINITY, |acc, value| acc.min(*value));
        let maxs = data.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, value| acc.max(*value));
        let ranges = (&maxs - &mins).mapv(|range| if range == 0.0 { 1.0 } else { range });
        Ok(Self { mins, ranges })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.mins) / &self.ranges
    }

    pub fn transform_row(&self, row: ArrayView1<'_, f64>) -> Array1<f64> {
        (&row - &self.mins) / &self.ranges
    }

    pub fn inverse_transform(&self, data: &Array2<f64>) -> Array2<f64> {
        data * &self.ranges + &self.mins
    }

    pub fn inverse_transform_row(&self, row: ArrayView1<'_, f64>) -> Array1<f64> {
        &row * &self.ranges + &self.mins
    }

    /// Maps a scaled target back to price units by inverting a full feature
    /// row that carries `scaled` in the target column and zeros elsewhere.
    pub fn inverse_target(&self, scaled: f64) -> f64 {
        let mut row = Array1::zeros(FEATURE_COUNT);
        row[TARGET_COLUMN.index()] = scaled;
        self.inverse_transform_row(row.view())[TARGET_COLUMN.index()]
    }
}
