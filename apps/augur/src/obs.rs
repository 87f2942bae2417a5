use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logs go to stderr; stdout carries the JSON result line only.
pub fn init_tracing(format: LogFormat) -> Result<(), String> {
    let filter = std::env::var("AUGUR_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .map_err(|err| format!("invalid log filter: {err}"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| format!("failed to install tracing subscriber: {err}"))
}

/// Resolves the exporter address from the flag, then `AUGUR_METRICS_ADDR`.
pub fn resolve_metrics_addr(flag: Option<&str>) -> Result<Option<SocketAddr>, String> {
    let raw = match flag {
        Some(value) => Some(value.to_string()),
        None => std::env::var("AUGUR_METRICS_ADDR").ok(),
    };
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|err| format!("invalid metrics address '{raw}' (expected host:port): {err}"))
}

#[cfg(feature = "prometheus")]
pub fn init_metrics(addr: Option<SocketAddr>) -> Result<Option<SocketAddr>, String> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let Some(addr) = addr else {
        return Ok(None);
    };
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("failed to install prometheus exporter: {err}"))?;

    tracing::info!(metrics_addr = %addr, "prometheus metrics exporter enabled");
    Ok(Some(addr))
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(addr: Option<SocketAddr>) -> Result<Option<SocketAddr>, String> {
    if let Some(addr) = addr {
        tracing::warn!(metrics_addr = %addr, "built without prometheus support, ignoring");
    }
    Ok(None)
}
