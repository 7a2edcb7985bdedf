use std::process;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use waitroom::transport::{ServerConfig, serve};
use waitroom::{AdmissionConfig, AdmissionController, cleanup_interval_from_env};

const ENV_HOST: &str = "WAITROOM_HOST";
const ENV_PORT: &str = "WAITROOM_PORT";

#[derive(Debug, Default, PartialEq)]
struct Args {
    host: Option<String>,
    port: Option<u16>,
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("WAITROOM_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "waitroom={level},waitroom_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                parsed.host = Some(args.get(i).ok_or("--host requires a value")?.clone());
            }
            "--port" => {
                i += 1;
                let raw = args.get(i).ok_or("--port requires a value")?;
                parsed.port = Some(
                    raw.parse()
                        .map_err(|e| format!("invalid port '{raw}': {e}"))?,
                );
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

/// Flags win over environment variables, which win over defaults.
fn server_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig {
        cleanup_interval: cleanup_interval_from_env()?,
        ..ServerConfig::default()
    };

    if let Some(host) = args.host.or_else(|| std::env::var(ENV_HOST).ok()) {
        config.host = host;
    }
    match args.port {
        Some(port) => config.port = port,
        None => {
            if let Ok(raw) = std::env::var(ENV_PORT) {
                config.port = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid value for {ENV_PORT}: {raw:?}"))?;
            }
        }
    }

    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let admission = AdmissionConfig::from_env()?;
    let server = server_config(args)?;

    info!(
        capacity_limit = admission.capacity_limit,
        activity_seconds = admission.activity_window.as_secs(),
        expiration_seconds = admission.expiration.as_secs(),
        rolling_expiration = admission.rolling_expiration,
        keep_idle_slots = admission.keep_idle_slots,
        cleanup_interval_seconds = server.cleanup_interval.as_secs(),
        "Admission configured"
    );

    let controller = Arc::new(AdmissionController::new(admission)?);
    serve(server, controller, CancellationToken::new()).await
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("Usage: waitroom-server [--host <addr>] [--port <port>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --host <addr>    Bind address [env: {ENV_HOST}] [default: 0.0.0.0]");
            eprintln!("  --port <port>    Bind port [env: {ENV_PORT}] [default: 5000]");
            process::exit(2);
        }
    };

    init_tracing();
    info!("waitroom {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Server failed");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
