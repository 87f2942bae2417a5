pub mod config;
pub mod forecasting;
pub mod validation;
