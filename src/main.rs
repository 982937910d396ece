use clap::Parser;
use sider_proxy::config::config_search_paths;
use sider_proxy::{build_router, AppState, ProviderClient, ProxyConfig, SessionTracker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "sider-proxy",
    about = "Anthropic- and OpenAI-compatible gateway in front of the Sider chat API",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sider_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    info!("sider-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:     {}", config.provider.base_url);
    info!("  History:      {}", config.provider.conversation_url);
    info!("  Chat timeout: {}s", config.timeouts.chat_secs);
    info!(
        "  Env token:    {} ({})",
        config.provider.token_env,
        if config.env_token().is_some() { "set" } else { "unset" }
    );

    let sessions = Arc::new(SessionTracker::new(config.sessions.continuous_cid.clone()));
    spawn_sweeper(sessions.clone(), config.cleanup_interval(), config.session_max_age());

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;
    let client = ProviderClient::new(http, &config, sessions);

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
    });

    let app = build_router(state);
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  Messages API:         POST /v1/messages");
    info!("  Chat Completions API: POST /v1/chat/completions");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop idle conversations from the tracker.
fn spawn_sweeper(sessions: Arc<SessionTracker>, every: Duration, max_age: Duration) {
    if max_age.is_zero() {
        info!("Session expiry disabled");
        return;
    }
    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(every));
        // the first tick fires immediately
        ticks.next().await;
        while ticks.next().await.is_some() {
            let removed = sessions.sweep_expired(max_age);
            if removed > 0 {
                info!(removed, remaining = sessions.len(), "Swept expired sessions");
            } else {
                debug!(remaining = sessions.len(), "Session sweep found nothing to remove");
            }
        }
    });
}
