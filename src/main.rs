use std::path::{Path, PathBuf};

use clap::Parser;
use iyo_gateway::{AppState, build_app, config::GatewayConfig, observability};

#[derive(Parser, Debug)]
#[command(version, about = "OAuth2 authorization gateway", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "iyo-gateway.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the gateway server (default)
    Serve,
    /// Validate the configuration file and exit
    Check,
}

fn load_config(path: &Path) -> GatewayConfig {
    match GatewayConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(&args.config).await,
        Command::Check => run_check(&args.config),
    }
}

fn run_check(path: &Path) {
    let config = load_config(path);
    if let Err(e) = AppState::new(config.clone()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    println!(
        "Configuration OK: {} protected path(s), callback at {}",
        config.oauth.protect.len(),
        config.oauth.callback_path().unwrap_or_default()
    );
}

async fn run_server(path: &Path) {
    let config = load_config(path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    tracing::info!(config = %path.display(), "Starting iyo-gateway");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = match AppState::new(config).and_then(build_app) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
