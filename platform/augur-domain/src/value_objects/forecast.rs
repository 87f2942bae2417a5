use crate::value_objects::model_family::ModelFamily;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One family's forecast scored against the ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FamilyForecast {
    pub forecast: f64,
    pub mse: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BestModel {
    Family(ModelFamily),
    /// A family result was missing or not finite.
    Undetermined,
}

const UNDETERMINED: &str = "undetermined";

impl fmt::Display for BestModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BestModel::Family(family) => f.write_str(family.label()),
            BestModel::Undetermined => f.write_str(UNDETERMINED),
        }
    }
}

impl From<BestModel> for String {
    fn from(value: BestModel) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for BestModel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == UNDETERMINED {
            return Ok(BestModel::Undetermined);
        }
        ModelFamily::ALL
            .into_iter()
            .find(|family| family.label() == value)
            .map(BestModel::Family)
            .ok_or_else(|| format!("unknown best_model: {value}"))
    }
}

/// Per-ticker output of a forecasting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    /// Date of the ground-truth observation.
    pub target_date: NaiveDate,
    pub actual_price: f64,
    /// Last date of the window the forecast was made from.
    pub window_end: NaiveDate,
    #[serde(flatten)]
    pub families: BTreeMap<ModelFamily, FamilyForecast>,
    pub best_model: BestModel,
}

impl ForecastRecord {
    pub fn family(&self, family: ModelFamily) -> Option<&FamilyForecast> {
        self.families.get(&family)
    }
}

/// Ticker -> record. Tickers that were skipped are simply absent.
pub type ForecastSet = BTreeMap<String, ForecastRecord>;
