use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNITS: &str = "units";
pub const BATCH_SIZE: &str = "batch_size";

/// A single cached hyperparameter. Integers stay integers on disk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Real(f64),
}

impl ParamValue {
    /// Whole-valued reals count as integers; fractional or huge ones do not.
    pub fn as_integer(self) -> Option<i64> {
        match self {
            ParamValue::Integer(value) => Some(value),
            ParamValue::Real(value)
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 =>
            {
                Some(value as i64)
            }
            ParamValue::Real(_) => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Integer(value) => write!(f, "{value}"),
            ParamValue::Real(value) => write!(f, "{value}"),
        }
    }
}

/// Hyperparameters chosen for one (ticker, family) pair.
///
/// Values are kept as loaded; only the accessors the models read check them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperparamSet(BTreeMap<String, ParamValue>);

impl HyperparamSet {
    pub fn new(units: i64, batch_size: i64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(UNITS.to_string(), ParamValue::Integer(units));
        values.insert(BATCH_SIZE.to_string(), ParamValue::Integer(batch_size));
        Self(values)
    }

    pub fn from_map(values: BTreeMap<String, i64>) -> Self {
        Self(
            values
                .into_iter()
                .map(|(name, value)| (name, ParamValue::Integer(value)))
                .collect(),
        )
    }

    /// Integer view of `name`; `None` when absent or not whole.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(|value| value.as_integer())
    }

    pub fn units(&self) -> Result<usize, String> {
        self.positive(UNITS)
    }

    pub fn batch_size(&self) -> Result<usize, String> {
        self.positive(BATCH_SIZE)
    }

    fn positive(&self, name: &str) -> Result<usize, String> {
        let raw = self
            .0
            .get(name)
            .ok_or_else(|| format!("missing hyperparameter {name}"))?;
        let value = raw
            .as_integer()
            .ok_or_else(|| format!("hyperparameter {name} must be an integer (got {raw})"))?;
        if value < 1 {
            return Err(format!("hyperparameter {name} must be >= 1 (got {value})"));
        }
        usize::try_from(value).map_err(|err| format!("hyperparameter {name} out of range: {err}"))
    }
}

impl std::fmt::Display for HyperparamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}
