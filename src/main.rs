use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use meta_publisher::filehost::{FileHostClient, FileHostService};
use meta_publisher::graph::{GraphClient, GraphService};
use meta_publisher::storage::{StorageClient, StorageService};
use meta_publisher::{api, config, db, runner};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Process one batch of due units and exit instead of serving triggers
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/publisher.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let graph: Arc<dyn GraphService> = Arc::new(GraphClient::from_config(&cfg)?);
    let filehost: Arc<dyn FileHostService> = Arc::new(FileHostClient::from_config(&cfg)?);
    let storage: Arc<dyn StorageService> = Arc::new(StorageClient::from_config(&cfg)?);

    if args.once {
        let report = runner::process_due(
            &pool,
            graph.as_ref(),
            filehost.as_ref(),
            storage.as_ref(),
            cfg.app.batch_cap,
        )
        .await?;
        info!(processed = report.processed, "batch complete");
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let ctx = api::AppContext {
        pool,
        graph,
        filehost,
        storage,
        trigger_secret: cfg.app.trigger_secret.clone(),
        batch_cap: cfg.app.batch_cap,
    };
    let app = api::router(ctx);

    let listener = tokio::net::TcpListener::bind(&cfg.app.listen_addr).await?;
    info!(addr = %cfg.app.listen_addr, "serving publish triggers");
    axum::serve(listener, app).await?;

    Ok(())
}
