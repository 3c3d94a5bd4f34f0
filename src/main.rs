use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use article_harvester::campaign::{BatchThrottle, CampaignRunner, TokioSleeper};
use article_harvester::config::Config;
use article_harvester::db::Database;
use article_harvester::fetcher::HttpArticleFetcher;
use article_harvester::http::build_client;
use article_harvester::scheduler::StartOutcome;
use article_harvester::search::PortalClient;
use article_harvester::service::Harvester;
use article_harvester::web::{self, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting article-harvester");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        portal = %config.portal_search_url,
        article_host = %config.article_host,
        "Configuration loaded"
    );

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    // One cookie-keeping session for both the portal and the article site
    let client = build_client(config.request_timeout)?;
    let search_url =
        Url::parse(&config.portal_search_url).context("Invalid portal search URL")?;

    let runner = Arc::new(CampaignRunner::new(
        db.clone(),
        Arc::new(PortalClient::new(client.clone(), search_url)),
        Arc::new(HttpArticleFetcher::new(client)),
        config.link_rules(),
        config.runner_settings(),
        Arc::new(BatchThrottle::new(config.batch_settings())),
    ));

    let harvester = Arc::new(Harvester::with_runner(
        &config,
        db,
        runner,
        Arc::new(TokioSleeper),
    ));

    if config.autostart {
        let interval_hours = config.schedule_interval.as_secs() / 3600;
        match harvester.start(
            config.schedule_keywords.clone(),
            interval_hours,
            config.max_articles_per_keyword,
        )? {
            StartOutcome::Started => info!(
                keywords = config.schedule_keywords.len(),
                interval_hours,
                "Scheduler autostarted"
            ),
            StartOutcome::AlreadyRunning | StartOutcome::StillStopping => {}
        }
    }

    let state = AppState {
        harvester: Arc::clone(&harvester),
        config: Arc::new(config),
    };
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(state).await {
            error!("Web server error: {e:#}");
        }
    });

    shutdown_signal().await;

    info!("Shutting down...");

    web_handle.abort();
    harvester.shutdown().await;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,article_harvester=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
