pub mod forecasts;
pub mod param_cache;
pub mod prices;
