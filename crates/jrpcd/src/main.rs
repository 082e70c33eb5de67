use std::{net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{anyhow, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use rustls::crypto::{ring::default_provider, CryptoProvider};
use tokio::signal;
use tracing::{error, info};

use jrpcd_core::{
    backend::parse_backends,
    cache::CacheStore,
    config::{Config, LogLevel, DEFAULT_LISTEN, DEFAULT_LOG_LEVEL},
    proxy::ProxyEngine,
    route::build_routes,
};

use jrpcd::{http, logging};

/// JSON-RPC cache and router.
#[derive(Debug, Parser)]
#[command(name = "jrpcd", about = "JSON RPC cache and router", disable_help_subcommand = true)]
struct Cli {
    /// Listen for RPC requests on the given interface
    #[arg(short = 'l', long, env = "LISTEN", default_value = DEFAULT_LISTEN, value_name = "INTERFACE")]
    listen: String,

    /// File containing an SSL certificate
    #[arg(short = 'C', long, env = "CERTFILE", value_name = "FILE")]
    certfile: Option<PathBuf>,

    /// File containing the private key for the SSL certificate
    #[arg(short = 'K', long, env = "KEYFILE", value_name = "FILE")]
    keyfile: Option<PathBuf>,

    /// Output log info to the given file
    #[arg(long, env = "LOGFILE", value_name = "FILE")]
    logfile: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "LOGLEVEL", default_value = DEFAULT_LOG_LEVEL, value_name = "LEVEL")]
    loglevel: String,

    /// Cache RPC results in the given path
    #[arg(short = 'd', long, env = "CACHEDIR", value_name = "PATH")]
    cachedir: Option<PathBuf>,

    /// Add a JSON RPC backend, as [name=]URL
    #[arg(short = 'b', long, env = "BACKEND", value_name = "BACKEND")]
    backend: Vec<String>,

    /// Add a route, as BACKENDS=match:PATTERN or BACKENDS=METHOD,METHOD,...
    #[arg(short = 'r', long, env = "ROUTE", value_name = "ROUTE")]
    route: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level: LogLevel = cli.loglevel.parse()?;
    let backends = parse_backends(&cli.backend)?;
    let routes = build_routes(&cli.route, &backends)?;

    let config = Config {
        listen: cli.listen,
        certfile: cli.certfile,
        keyfile: cli.keyfile,
        logfile: cli.logfile,
        log_level,
        cache_dir: cli.cachedir,
        backends,
        routes,
    };
    config.validate().context("invalid config")?;

    let _log_guard = logging::init(config.log_level, config.logfile.as_deref());

    CryptoProvider::install_default(default_provider())
        .map_err(|_| anyhow!("failed to install TLS crypto provider"))?;

    let cache = match &config.cache_dir {
        Some(dir) => CacheStore::open(dir)
            .with_context(|| format!("failed to open cache at {}", dir.display()))?,
        None => CacheStore::disabled(),
    };

    let engine = Arc::new(ProxyEngine::new(config.routes.clone(), cache)?);
    let app = http::app(engine);

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen interface: {}", config.listen))?;

    info!(address = %addr, "listening for JSON RPC");

    if let (Some(certfile), Some(keyfile)) = (&config.certfile, &config.keyfile) {
        let tls = RustlsConfig::from_pem_file(certfile, keyfile)
            .await
            .context("failed to load TLS certificate")?;

        let handle = axum_server::Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown_signal().await;
                handle.graceful_shutdown(None);
            }
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("server error")?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
