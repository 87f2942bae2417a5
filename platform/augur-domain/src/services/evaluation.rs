use crate::value_objects::forecast::{BestModel, FamilyForecast};
use crate::value_objects::model_family::ModelFamily;
use std::collections::BTreeMap;

pub fn score_forecast(actual: f64, forecast: f64) -> FamilyForecast {
    let mse = (forecast - actual).powi(2);
    FamilyForecast {
        forecast,
        mse,
        rmse: mse.sqrt(),
    }
}

/// Lowest RMSE wins; an exact tie goes to the family listed first.
/// Any missing family or non-finite RMSE leaves the choice undetermined.
pub fn select_best(results: &BTreeMap<ModelFamily, FamilyForecast>) -> BestModel {
    let mut best: Option<(ModelFamily, f64)> = None;
    for family in ModelFamily::ALL {
        let Some(result) = results.get(&family) else {
            return BestModel::Undetermined;
        };
        if !result.rmse.is_finite() {
            return BestModel::Undetermined;
        }
        if best.map_or(true, |(_, rmse)| result.rmse < rmse) {
            best = Some((family, result.rmse));
        }
    }
    best.map_or(BestModel::Undetermined, |(family, _)| BestModel::Family(family))
}
