use anyhow::{Context, Result};
use clap::Parser;
use coviddash::{config, covid, news, scheduler, store, web};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Seed the dashboard from a daily-records CSV export before serving
    #[arg(long)]
    seed_csv: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store = Arc::new(store::Store::open(cfg.store_path()).await?);
    init_tracing(&store).await;

    if let Some(path) = &args.seed_csv {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let rows = covid::parse_csv(&text);
        let snapshot = covid::snapshot_from_csv(&rows, &cfg.covid.local_area, &cfg.covid.nation);
        store.apply_covid(snapshot).await?;
        info!(path = %path.display(), "seeded covid statistics from csv");
    }

    let covid_client = Arc::new(covid::CovidClient::new());
    let news_client = Arc::new(news::NewsClient::new());
    let sched = scheduler::Scheduler::new(
        store.clone(),
        covid_client,
        news_client,
        scheduler::Settings::from(&cfg),
    );
    tokio::spawn(sched.run());

    let app = web::router(store);
    let listener = tokio::net::TcpListener::bind(&cfg.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.listen))?;
    info!(listen = %cfg.server.listen, "serving dashboard");
    axum::serve(listener, app).await?;

    Ok(())
}

/// The document's `log_level` field is the default filter; `RUST_LOG` wins.
async fn init_tracing(store: &store::Store) {
    let log_level = store.snapshot().await.log_level;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
