use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use efbridge::config::{default_config_path, Config};
use efbridge::server::{self, AppState};
use efbridge::sso::chrome::ChromeLauncher;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "efbridge")]
#[command(about = "Bridges identity-provider logins into learning-platform sessions")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Listen port (overrides SERVER_PORT, PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("efbridge=info,tower_http=info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load_or_default(&cli.config)?;
    config.apply_env()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    tracing::info!(
        config = %cli.config.display(),
        identity = %config.identity.base_url,
        platform = %config.platform.base_url,
        "configuration loaded"
    );

    let launcher = Arc::new(ChromeLauncher::new(
        config.browser.clone(),
        config.sso.navigation_timeout,
    ));
    let app = server::router(AppState::from_config(&config, launcher));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
