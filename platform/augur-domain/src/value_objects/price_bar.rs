use crate::value_objects::target_month::TargetMonth;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily observation of a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Observation used as the ground truth of a forecast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruth {
    pub date: NaiveDate,
    pub close: f64,
}

/// Daily bars of one ticker, strictly increasing by date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    ticker: String,
    sector: Option<String>,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(
        ticker: impl Into<String>,
        sector: Option<String>,
        bars: Vec<PriceBar>,
    ) -> Result<Self, String> {
        let ticker = ticker.into();
        for pair in bars.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(format!(
                    "price series for {ticker} is not strictly increasing at {} -> {}",
                    pair[0].date, pair[1].date
                ));
            }
        }
        Ok(Self {
            ticker,
            sector,
            bars,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn sector(&self) -> Option<&str> {
        self.sector.as_deref()
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|bar| bar.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|bar| bar.date)
    }

    /// Bars dated strictly before `cutoff`.
    pub fn history_before(&self, cutoff: NaiveDate) -> PriceSeries {
        let end = self.bars.partition_point(|bar| bar.date < cutoff);
        PriceSeries {
            ticker: self.ticker.clone(),
            sector: self.sector.clone(),
            bars: self.bars[..end].to_vec(),
        }
    }

    /// Last close observed inside `month`.
    pub fn ground_truth(&self, month: TargetMonth) -> Option<GroundTruth> {
        self.bars
            .iter()
            .rev()
            .find(|bar| month.contains(bar.date))
            .map(|bar| GroundTruth {
                date: bar.date,
                close: bar.close,
            })
    }
}
