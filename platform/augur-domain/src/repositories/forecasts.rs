use crate::value_objects::forecast::ForecastSet;

pub trait ForecastWriter {
    /// Replaces any previously written forecast set.
    fn write_forecasts(&self, forecasts: &ForecastSet) -> Result<(), String>;
}
