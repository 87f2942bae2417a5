use augur_domain::errors::ForecastError;
use augur_domain::services::evaluation::{score_forecast, select_best};
use augur_domain::services::scaling::{feature_matrix, MinMaxScaler, TARGET_COLUMN};
use augur_domain::services::sequences::{build_windows, WindowConfig, WindowTensor};
use augur_domain::services::tuning::{IntRange, ParzenSearch, SearchSpace, SearchStrategy, Trial};
use augur_domain::value_objects::forecast::BestModel;
use augur_domain::value_objects::hyperparams::UNITS;
use augur_domain::value_objects::model_family::ModelFamily;
use augur_domain::value_objects::price_bar::{PriceBar, PriceSeries};
use chrono::NaiveDate;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn series(closes: &[f64]) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).expect("date");
    let bars = closes
        .iter()
        .enumerate()
        .map(|(idx, close)| PriceBar {
            date: start + chrono::Duration::days(idx as i64),
            open: close * 0.99,
            high: close * 1.01,
            low: close * 0.98,
            close: *close,
            volume: 1_000.0 + idx as f64,
        })
        .collect();
    PriceSeries::new("PROP", None, bars).expect("series")
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn scaler_round_trips_every_row(closes in prop::collection::vec(0.01f64..10_000.0, 2..80)) {
        let data = series(&closes);
        let raw = feature_matrix(data.bars());
        let scaler = MinMaxScaler::fit(&raw).expect("fit");
        let scaled = scaler.transform(&raw);
        prop_assert!(scaled.iter().all(|v| (-1e-9..=1.0 + 1e-9).contains(v)));

        let restored = scaler.inverse_transform(&scaled);
        for (a, b) in restored.iter().zip(raw.iter()) {
            prop_assert!((a - b).abs() <= 1e-9 * b.abs().max(1.0));
        }
        for (row, close) in scaled.rows().into_iter().zip(closes.iter()) {
            let back = scaler.inverse_target(row[TARGET_COLUMN.index()]);
            prop_assert!((back - close).abs() <= 1e-9 * close.abs().max(1.0));
        }
    }

    #[test]
    fn window_counts_follow_series_length(
        closes in prop::collection::vec(1.0f64..500.0, 1..60),
        length in 1usize..12,
        eval_fraction in 0.0f64..0.9,
    ) {
        let data = series(&closes);
        let config = WindowConfig { length, eval_fraction };
        for family in ModelFamily::ALL {
            match build_windows(&data, family, &config) {
                Ok(dataset) => {
                    let windows = closes.len() - length;
                    prop_assert_eq!(dataset.x_train.len() + dataset.x_eval.len(), windows);
                    prop_assert!(!dataset.x_train.is_empty());
                    prop_assert_eq!(dataset.y_train.len(), dataset.x_train.len());
                    prop_assert_eq!(dataset.x_latest.len(), 1);
                    let sequence = matches!(dataset.x_latest, WindowTensor::Sequence(_));
                    prop_assert_eq!(sequence, family == ModelFamily::Sequential);
                }
                Err(ForecastError::InsufficientHistory { rows, required }) => {
                    prop_assert!(closes.len() <= length);
                    prop_assert_eq!(rows, closes.len());
                    prop_assert_eq!(required, length + 1);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn parzen_proposals_stay_in_bounds(
        min in 1i64..50,
        span in 0i64..100,
        losses in prop::collection::vec(0.0f64..10.0, 0..12),
        seed in any::<u64>(),
    ) {
        let range = IntRange::new(min, min + span);
        let space = SearchSpace::new().with(UNITS, range);
        let mut strategy = ParzenSearch::new(seed, 3);
        let mut history = Vec::new();
        for (number, loss) in losses.iter().enumerate() {
            let params = strategy.propose(&space, &history);
            prop_assert!(space.contains(&params));
            history.push(Trial { number, params, loss: Some(*loss), error: None });
        }
        let params = strategy.propose(&space, &history);
        prop_assert!(space.contains(&params));
    }

    #[test]
    fn selector_picks_lowest_rmse(lstm in -50.0f64..50.0, mlp in -50.0f64..50.0) {
        let mut results = BTreeMap::new();
        results.insert(ModelFamily::Sequential, score_forecast(100.0, 100.0 + lstm));
        results.insert(ModelFamily::FeedForward, score_forecast(100.0, 100.0 + mlp));
        let expected = if results[&ModelFamily::FeedForward].rmse < results[&ModelFamily::Sequential].rmse {
            ModelFamily::FeedForward
        } else {
            ModelFamily::Sequential
        };
        prop_assert_eq!(select_best(&results), BestModel::Family(expected));
        prop_assert!(results.values().all(|r| r.rmse >= 0.0));
    }
}
