use crate::artifacts::record_read_metrics;
use augur_domain::repositories::prices::{PriceQuery, PriceRepository, PriceTable};
use augur_domain::services::data_quality::data_quality_from_rows;
use augur_domain::value_objects::price_bar::{PriceBar, PriceSeries};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

const REQUIRED_COLUMNS: [&str; 7] = [
    "date", "ticker", "open", "high", "low", "close", "volume",
];
const SECTOR_COLUMN: &str = "industry_tag";

/// Reads the cleaned multi-ticker price CSV.
#[derive(Debug, Clone)]
pub struct CsvPriceRepository {
    path: PathBuf,
}

impl CsvPriceRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PriceRepository for CsvPriceRepository {
    fn load_prices(&self, query: &PriceQuery) -> Result<PriceTable, String> {
        let start = Instant::now();
        let result = load_prices_csv(&self.path, query);
        record_read_metrics("prices_csv", start, &result);
        result
    }
}

/// Lowercases and snake-cases a header: `Industry Tag` -> `industry_tag`.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

struct Columns {
    date: usize,
    ticker: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    sector: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord, path: &Path) -> Result<Self, String> {
        let names: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let mut positions = [0usize; REQUIRED_COLUMNS.len()];
        let mut missing = Vec::new();
        for (slot, name) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            match find(name) {
                Some(position) => *slot = position,
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(format!(
                "price CSV {} is missing columns: {}",
                path.display(),
                missing.join(", ")
            ));
        }
        let [date, ticker, open, high, low, close, volume] = positions;
        Ok(Self {
            date,
            ticker,
            open,
            high,
            low,
            close,
            volume,
            sector: find(SECTOR_COLUMN),
        })
    }
}

#[derive(Default)]
struct TickerRows {
    sector: Option<String>,
    bars: Vec<PriceBar>,
    invalid_numeric: Vec<NaiveDate>,
    invalid_date: usize,
}

pub fn load_prices_csv(path: &Path, query: &PriceQuery) -> Result<PriceTable, String> {
    let file = File::open(path)
        .map_err(|err| format!("failed to open price CSV {}: {}", path.display(), err))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|err| format!("failed to read CSV header {}: {}", path.display(), err))?
        .clone();
    let columns = Columns::resolve(&headers, path)?;
    let wanted: HashSet<&str> = query.tickers.iter().map(String::as_str).collect();

    let mut by_ticker: BTreeMap<String, TickerRows> = BTreeMap::new();
    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        let record = result.map_err(|err| format!("failed to parse CSV row {line}: {err}"))?;
        let ticker = field(&record, columns.ticker);
        if ticker.is_empty() || (!wanted.is_empty() && !wanted.contains(ticker)) {
            continue;
        }

        // Bad rows are dropped and counted per ticker; they never fail the file.
        let rows = by_ticker.entry(ticker.to_string()).or_default();
        let date = match parse_date(field(&record, columns.date)) {
            Ok(date) => date,
            Err(err) => {
                tracing::debug!(line, ticker = %ticker, error = %err, "dropping price row");
                rows.invalid_date += 1;
                continue;
            }
        };
        let [open, high, low, volume] = match numeric_fields(&record, &columns) {
            Ok(values) => values,
            Err(err) => {
                tracing::debug!(line, ticker = %ticker, error = %err, "dropping price row");
                rows.invalid_numeric.push(date);
                continue;
            }
        };
        // An unparseable close is scored as an invalid close below.
        let close = field(&record, columns.close).parse::<f64>().unwrap_or(f64::NAN);

        if rows.sector.is_none() {
            rows.sector = columns
                .sector
                .map(|column| field(&record, column))
                .filter(|sector| !sector.is_empty())
                .map(str::to_string);
        }
        rows.bars.push(PriceBar {
            date,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    let mut table = PriceTable::default();
    for (ticker, rows) in by_ticker {
        let observations: Vec<(NaiveDate, f64)> =
            rows.bars.iter().map(|bar| (bar.date, bar.close)).collect();
        let mut report = data_quality_from_rows(&observations);
        report.invalid_numeric = rows.invalid_numeric.len();
        report.first_invalid_numeric = rows.invalid_numeric.first().copied();
        report.invalid_date = rows.invalid_date;
        if report.duplicates > 0 || report.out_of_order > 0 || report.rejected() > 0 {
            tracing::warn!(
                ticker = %ticker,
                duplicates = report.duplicates,
                out_of_order = report.out_of_order,
                invalid_close = report.invalid_close,
                invalid_numeric = report.invalid_numeric,
                invalid_date = report.invalid_date,
                "price rows cleaned"
            );
        }

        // Later rows win on duplicate dates.
        let mut by_date: BTreeMap<NaiveDate, PriceBar> = BTreeMap::new();
        for bar in rows.bars {
            if bar.close.is_finite() && bar.close > 0.0 {
                by_date.insert(bar.date, bar);
            }
        }
        let series =
            PriceSeries::new(ticker.as_str(), rows.sector, by_date.into_values().collect())?;
        table.reports.insert(ticker.clone(), report);
        table.series.insert(ticker, series);
    }

    tracing::info!(
        path = %path.display(),
        tickers = table.series.len(),
        rows = table.series.values().map(PriceSeries::len).sum::<usize>(),
        "price CSV loaded"
    );
    Ok(table)
}

fn field(record: &csv::StringRecord, column: usize) -> &str {
    record.get(column).unwrap_or("")
}

/// Open, high, low and volume, each of which must be a finite number.
fn numeric_fields(record: &csv::StringRecord, columns: &Columns) -> Result<[f64; 4], String> {
    let mut values = [0.0; 4];
    let named = [
        (columns.open, "open"),
        (columns.high, "high"),
        (columns.low, "low"),
        (columns.volume, "volume"),
    ];
    for (slot, (column, name)) in values.iter_mut().zip(named) {
        let raw = field(record, column);
        *slot = raw
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| format!("invalid {name} value '{raw}'"))?;
    }
    Ok(values)
}

/// Accepts RFC3339, `YYYY-MM-DD HH:MM:SS±HH:MM`, `YYYY-MM-DD HH:MM:SS` and
/// `YYYY-MM-DD`; offset-aware values are converted to UTC first.
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc).date_naive());
    }
    for format in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Ok(dt.with_timezone(&Utc).date_naive());
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    Err(format!("unsupported date format: {value}"))
}
