use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tapheart_engine::GameConfig;
use tapheart_server::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tapheart-server", about = "Idle tapper progression server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:39333")]
    addr: SocketAddr,
    /// SQLite database path (default: ~/.tapheart/tapheart.db).
    #[arg(long)]
    db: Option<PathBuf>,
    /// YAML game config; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Extra browser origin allowed by CORS. Repeatable.
    #[arg(long = "allow-origin")]
    allow_origin: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let db_path = args.db.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tapheart")
            .join("tapheart.db")
    });
    let config = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };

    tracing::info!(db = %db_path.display(), "opening game store");
    let state = AppState::open(db_path, config, args.allow_origin)?;
    tapheart_server::serve(args.addr, state).await
}
