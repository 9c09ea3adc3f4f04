use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lanpulse::config::AppConfig;
use lanpulse::engine::MonitoringEngine;
use lanpulse::probe::IcmpPinger;
use lanpulse::store::DataStore;
use lanpulse::ws;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<String>,
}

fn init_logging(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    match log_dir {
        Some(dir) => {
            let file_appender = rolling::daily(dir, "lanpulse.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = Args::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let _log_guard = init_logging(config.log_dir.as_deref());

    let pinger = match IcmpPinger::new() {
        Ok(pinger) => Arc::new(pinger),
        Err(e) => {
            error!(error = %e, "Cannot open ICMP socket (missing CAP_NET_RAW?), exiting.");
            std::process::exit(1);
        }
    };

    let store = match DataStore::open(&config.data_file) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, path = %config.data_file, "Cannot open data store, exiting.");
            std::process::exit(1);
        }
    };

    let listen_address = args
        .listen
        .clone()
        .unwrap_or_else(|| config.listen_address.clone());

    let engine = Arc::new(MonitoringEngine::new(config, store, pinger));
    engine.start();

    let app = ws::router(Arc::clone(&engine));
    let listener = match tokio::net::TcpListener::bind(&listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, address = %listen_address, "Cannot bind listen address, exiting.");
            engine.shutdown().await;
            std::process::exit(1);
        }
    };
    info!(address = %listen_address, "lanpulse listening.");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error.");
    }

    engine.shutdown().await;
    info!("Shutdown complete.");
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to listen for ctrl-c, shutting down immediately.");
        return;
    }
    info!("Ctrl-C received, shutting down.");
}
