pub mod data_quality;
pub mod evaluation;
pub mod models;
pub mod scaling;
pub mod sequences;
pub mod tuning;
