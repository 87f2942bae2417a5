pub mod forecast;
pub mod hyperparams;
pub mod model_family;
pub mod parameter_cache;
pub mod price_bar;
pub mod target_month;
