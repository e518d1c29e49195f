use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxmon::alerting::{AlertSender, WebhookSender};
use proxmon::cache::TtlCache;
use proxmon::db;
use proxmon::server::config::AppConfig;
use proxmon::services::ingest_service::IngestService;
use proxmon::web::{self, AppState};

#[derive(Parser)]
#[command(name = "proxmon-server", about = "Proxmox fleet backup/health/replication monitor")]
struct Cli {
    /// Path to the TOML configuration file (default: $MONITOR_CFG or config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(|| {
        PathBuf::from(env::var("MONITOR_CFG").unwrap_or_else(|_| "config.toml".to_string()))
    });

    let mut config = AppConfig::load(&config_path)?;
    config.apply_env();
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }

    let pool = db::connect(&config.database.path).await?;

    let alerts: Option<Arc<dyn AlertSender>> = config
        .alerts
        .webhook_url
        .clone()
        .map(|url| Arc::new(WebhookSender::new(url)) as Arc<dyn AlertSender>);
    if alerts.is_none() {
        info!("no alert webhook configured, backup failure alerts disabled");
    }

    let ingest = IngestService::new(pool.clone(), config.retention.policy(), alerts);

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let state = Arc::new(AppState {
        pool,
        config: Arc::new(config),
        ingest,
        summaries_cache: TtlCache::new(),
    });

    web::run_http_server(state, addr).await
}
