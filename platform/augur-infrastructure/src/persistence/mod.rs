pub mod param_cache;
