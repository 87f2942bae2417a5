use crate::services::data_quality::DataQualityReport;
use crate::value_objects::price_bar::PriceSeries;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct PriceQuery {
    /// Tickers to load; an empty list loads every ticker in the source.
    pub tickers: Vec<String>,
}

/// Cleaned series per ticker plus the quality report of each one.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    pub series: BTreeMap<String, PriceSeries>,
    pub reports: BTreeMap<String, DataQualityReport>,
}

impl PriceTable {
    pub fn get(&self, ticker: &str) -> Option<&PriceSeries> {
        self.series.get(ticker)
    }
}

pub trait PriceRepository {
    fn load_prices(&self, query: &PriceQuery) -> Result<PriceTable, String>;
}
