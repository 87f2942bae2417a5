use augur::headless::{self, HeadlessArgs, HeadlessMode};
use augur::obs::{self, LogFormat};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "augur")]
#[command(about = "Per-ticker LSTM/MLP price forecasting with cached hyperparameters.", version)]
struct Cli {
    /// forecast | validate | show-config
    #[arg(long, value_enum, default_value_t = Mode::Forecast)]
    mode: Mode,

    /// Config file path (TOML). If omitted, uses env AUGUR_CONFIG, then built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated tickers, overriding run.tickers.
    #[arg(long, value_delimiter = ',')]
    tickers: Option<Vec<String>>,

    /// Target month as YYYY-MM, overriding run.target_month.
    #[arg(long)]
    target_month: Option<String>,

    /// Worker threads for ticker processing, overriding run.parallelism.
    #[arg(long)]
    parallelism: Option<usize>,

    /// Fail validation when any ticker cannot be forecast (validate mode only).
    #[arg(long)]
    strict: bool,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    log_format: Format,

    /// Prometheus listener (host:port). If omitted, uses env AUGUR_METRICS_ADDR.
    #[arg(long)]
    metrics_addr: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    Forecast,
    Validate,
    ShowConfig,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Format {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let log_format = match cli.log_format {
        Format::Text => LogFormat::Text,
        Format::Json => LogFormat::Json,
    };
    if let Err(err) = obs::init_tracing(log_format) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) =
        obs::resolve_metrics_addr(cli.metrics_addr.as_deref()).and_then(obs::init_metrics)
    {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let mode = match cli.mode {
        Mode::Forecast => HeadlessMode::Forecast,
        Mode::Validate => HeadlessMode::Validate,
        Mode::ShowConfig => HeadlessMode::ShowConfig,
    };
    let config_path = cli.config.or_else(|| {
        std::env::var("AUGUR_CONFIG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    });

    let result = headless::run_headless(HeadlessArgs {
        mode,
        config_path,
        strict: cli.strict,
        tickers: cli.tickers,
        target_month: cli.target_month,
        parallelism: cli.parallelism,
    });

    match result {
        Ok(json) => {
            println!(
                "{}",
                serde_json::to_string(&json)
                    .unwrap_or_else(|_| "{\"status\":\"error\",\"error\":\"json\"}".to_string())
            );
            std::process::exit(headless::exit_code_for_report(&json));
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(headless::exit_code_for_error(&err));
        }
    }
}
