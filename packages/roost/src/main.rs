use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use console_stream::{ConsoleMux, RetryPolicy, WebSocketTransport};
use panel_client::PanelClient;

mod authz;
mod config;
mod error;
mod handlers;
mod panel;
mod render;
mod session;
mod watchdog;

use crate::config::{
    AdminFileConfig, FileConfig, ManagedInstance, SessionConfig, WatchdogConfig,
};
use crate::panel::PanelApi;
use crate::session::SessionManager;
use crate::watchdog::{AlertSink, LogSink, Watchdog, WebhookSink};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "roost")]
#[command(about = "Streaming console and control sessions for panel-managed instances")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config.toml
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service in the foreground
    Serve(ServeArgs),

    /// One-shot status of a managed instance
    Status(StatusArgs),

    /// List every server the panel knows (requires the application key)
    Servers,
}

#[derive(Parser)]
struct ServeArgs {
    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the HTTP surface (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct StatusArgs {
    /// Instance id as the panel knows it
    instance_id: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub sessions: SessionManager,
    pub panel: Arc<dyn PanelApi>,
    pub mux: ConsoleMux,
    pub admin: AdminFileConfig,
}

fn load_file_config(path: &PathBuf) -> Result<FileConfig> {
    let fc: FileConfig = config::load_config(path)
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    anyhow::ensure!(
        !fc.panel.base_url.is_empty(),
        "panel.base_url is not configured (config.toml or ROOST_PANEL__BASE_URL)"
    );
    anyhow::ensure!(
        !fc.panel.client_key.is_empty(),
        "panel.client_key is not configured (config.toml or ROOST_PANEL__CLIENT_KEY)"
    );
    Ok(fc)
}

fn build_panel(fc: &FileConfig) -> Result<Arc<PanelClient>> {
    Ok(Arc::new(PanelClient::new(
        &fc.panel.base_url,
        &fc.panel.client_key,
        fc.panel.application_key.clone(),
    )?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_server(args, &cli.config).await,
        Commands::Status(args) => status_command(&cli.config, &args.instance_id).await,
        Commands::Servers => servers_command(&cli.config).await,
    }
}

async fn run_server(args: ServeArgs, config_path: &PathBuf) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "roost=debug,console_stream=debug,panel_client=debug,tower_http=debug,info"
    } else {
        "roost=info,console_stream=info,panel_client=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Roost - fleet console for panel-managed instances");

    let fc = load_file_config(config_path)?;
    let panel = build_panel(&fc)?;
    if !panel.has_application_key() {
        warn!("Application API key not configured; panel-wide listing is disabled");
    }

    let instances: Vec<ManagedInstance> =
        fc.instances.iter().map(ManagedInstance::from_file).collect();
    if instances.is_empty() {
        warn!("No managed instances configured; the fleet is empty");
    } else {
        info!(instances = instances.len(), "Managed fleet loaded");
    }

    let mux = ConsoleMux::new(
        Arc::clone(&panel) as Arc<dyn console_stream::CredentialIssuer>,
        Arc::new(WebSocketTransport),
        RetryPolicy::default(),
    );
    let panel_api: Arc<dyn PanelApi> = Arc::clone(&panel) as Arc<dyn PanelApi>;

    let sessions = SessionManager::new(
        Arc::clone(&panel_api),
        mux.clone(),
        SessionConfig::from_file(&fc.session),
        fc.admin.clone(),
        instances.clone(),
    );

    let watchdog_cfg = WatchdogConfig::from_file(&fc.watchdog);
    let watchdog_handle = if watchdog_cfg.enabled {
        let sink: Arc<dyn AlertSink> = match &watchdog_cfg.alert_webhook {
            Some(url) => Arc::new(WebhookSink::new(url.clone())),
            None => {
                warn!("No alert webhook configured; offline alerts go to the log only");
                Arc::new(LogSink)
            }
        };
        Some(
            Watchdog::new(
                Arc::clone(&panel_api),
                sink,
                instances,
                watchdog_cfg.sweep_interval,
            )
            .spawn(),
        )
    } else {
        info!("Fleet watchdog disabled by configuration");
        None
    };

    let state = AppState {
        sessions: sessions.clone(),
        panel: panel_api,
        mux,
        admin: fc.admin.clone(),
    };

    let app = handlers::api_router()
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let host = args.host.unwrap_or(fc.server.host);
    let port = args.port.unwrap_or(fc.server.port);
    let addr = format!("{host}:{port}").parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Roost listening on http://{}", listener.local_addr()?);

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    if let Some(handle) = watchdog_handle {
        handle.abort();
    }
    info!("Terminating control sessions...");
    sessions.shutdown();

    info!("Shutdown complete");
    server_result
}

async fn status_command(config_path: &PathBuf, instance_id: &str) -> Result<()> {
    let fc = load_file_config(config_path)?;
    let panel = build_panel(&fc)?;
    let snapshot = panel
        .fetch_resources(instance_id)
        .await
        .with_context(|| format!("Failed to fetch resources for {instance_id}"))?;

    println!("{instance_id}: {}", snapshot.state);
    println!("  cpu:     {}", render::format_percent(snapshot.cpu_percent));
    println!("  memory:  {}", render::format_bytes(snapshot.memory_bytes));
    println!("  disk:    {}", render::format_bytes(snapshot.disk_bytes));
    println!("  players: {}", snapshot.connection_count);
    Ok(())
}

async fn servers_command(config_path: &PathBuf) -> Result<()> {
    let fc = load_file_config(config_path)?;
    let panel = build_panel(&fc)?;
    let servers = panel
        .list_servers()
        .await
        .context("Failed to list servers (is panel.application_key configured?)")?;

    for server in &servers {
        let flag = if server.suspended { " [suspended]" } else { "" };
        println!(
            "{}  {}  mem {} MB  disk {} MB{}",
            server.identifier, server.name, server.memory_limit_mb, server.disk_limit_mb, flag
        );
    }
    println!("{} servers", servers.len());
    Ok(())
}
