mod api;
mod cli;
mod config;
mod core;
mod logger;
mod services;
mod utils;

use std::net::SocketAddr;

use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    web: bool,
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = parse_args(std::env::args().skip(1));

    let cfg = match config::Config::init_global() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = logger::init_logger(cfg) {
        eprintln!("Failed to init logger: {err}");
        std::process::exit(1);
    }

    services::settings::init_global();

    if !args.web {
        cli::run().await;
        return;
    }

    cfg.print();

    let app = api::router();
    let addr = SocketAddr::new(
        cfg.host.parse().unwrap_or_else(|_| "0.0.0.0".parse().unwrap()),
        args.port.unwrap_or(cfg.port),
    );
    info!("Server running on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!("Failed to bind: {err}");
            std::process::exit(1);
        }
    };

    let server = axum::serve(listener, app);
    if let Err(err) = server.with_graceful_shutdown(shutdown_signal()).await {
        error!("Server error: {err}");
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> CliArgs {
    let mut parsed = CliArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--web" => parsed.web = true,
            "--port" => {
                parsed.port = args.next().and_then(|v| v.parse().ok());
            }
            other => {
                eprintln!("Ignoring unknown argument: {other}");
            }
        }
    }
    parsed
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}
