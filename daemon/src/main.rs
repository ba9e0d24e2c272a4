mod logging;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use logging::init_logging;
use sleuth_classifier::Settings;
use sleuth_classifier::db::postgres::{self, PgCatalogueStore, PgTransientStore};
use sleuth_classifier::engine::Engine;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "sleuth-daemon",
    version,
    about = "Poll the transients database and classify new transients"
)]
struct Cli {
    #[arg(long, env = "CLASSIFIER_SETTINGS")]
    settings: PathBuf,
    #[arg(long, env = "TRANSIENTS_DATABASE_URL")]
    transients_url: Option<String>,
    #[arg(long, env = "CATALOGUES_DATABASE_URL")]
    catalogues_url: Option<String>,
    /// Classify everything pending, then exit.
    #[arg(long, default_value_t = false)]
    once: bool,
    #[arg(long, default_value_t = false)]
    validate_config: bool,
    /// Tracing filter directives; overrides `RUST_LOG`.
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(cli.log_filter.as_deref())?;
    info!(
        stage = "startup",
        event = "startup.begin",
        settings_path = %cli.settings.display(),
        "sleuth-daemon process starting"
    );

    let settings = load_settings(&cli)?;

    let catalogues_url = settings
        .databases
        .catalogues_url
        .clone()
        .context("no catalogues database URL configured")?;
    let transients_url = settings
        .databases
        .transients_url
        .clone()
        .unwrap_or_else(|| catalogues_url.clone());
    let source = settings
        .transients
        .clone()
        .context("settings have no [transients] section")?;

    let connect_start = Instant::now();
    info!(stage = "startup", event = "db.connect.begin", "connecting to databases");
    let catalogue_pool = postgres::connect(&catalogues_url, settings.databases.max_connections)
        .await
        .context("failed to connect to the catalogues database")?;
    let transient_pool = if transients_url == catalogues_url {
        catalogue_pool.clone()
    } else {
        postgres::connect(&transients_url, settings.databases.max_connections)
            .await
            .context("failed to connect to the transients database")?
    };
    info!(
        stage = "startup",
        event = "db.connect.end",
        result = "ok",
        duration_ms = connect_start.elapsed().as_millis() as u64,
        "databases ready"
    );

    let store = PgTransientStore::new(transient_pool, source)?;
    let engine = Engine::new(PgCatalogueStore::new(catalogue_pool), settings)
        .await
        .context("runtime validation failed")?;

    if cli.validate_config {
        info!(
            stage = "startup",
            event = "startup.validate_only.exit",
            result = "ok",
            "configuration and runtime validation passed"
        );
        return Ok(());
    }

    postgres::run_migrations(store.pool())
        .await
        .context("failed to migrate the results tables")?;

    if cli.once {
        info!(stage = "startup", event = "startup.mode", mode = "once", "running once");
        let reports = engine.run_until_drained(&store, false, |_| Ok(())).await?;
        info!(
            stage = "shutdown",
            event = "shutdown.complete",
            batches = reports.len(),
            classified = reports.iter().map(|r| r.classified).sum::<usize>(),
            orphans = reports.iter().map(|r| r.orphans).sum::<usize>(),
            "pending transients classified"
        );
        return Ok(());
    }

    info!(stage = "startup", event = "startup.mode", mode = "forever", "running continuously");
    engine.run_forever(&store, shutdown_signal()).await
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let load_start = Instant::now();
    info!(
        stage = "startup",
        event = "config.load.begin",
        settings_path = %cli.settings.display(),
        "loading settings file"
    );
    let mut settings = match Settings::load(&cli.settings) {
        Ok(settings) => settings,
        Err(err) => {
            error!(
                stage = "startup",
                event = "config.load.end",
                result = "fail",
                duration_ms = load_start.elapsed().as_millis() as u64,
                error = %format!("{err:#}"),
                "settings load failed"
            );
            return Err(err);
        }
    };
    settings.apply_database_overrides(cli.transients_url.clone(), cli.catalogues_url.clone());

    if let Err(err) = settings.validate_config() {
        error!(
            stage = "startup",
            event = "config.validate.end",
            result = "fail",
            duration_ms = load_start.elapsed().as_millis() as u64,
            error = %format!("{err:#}"),
            "settings validation failed"
        );
        return Err(err);
    }
    info!(
        stage = "startup",
        event = "config.load.end",
        result = "ok",
        searches = settings.searches.len(),
        duration_ms = load_start.elapsed().as_millis() as u64,
        "settings loaded and validated"
    );
    Ok(settings)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(?err, "failed to listen for CTRL+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => tracing::warn!(?err, "failed to listen for TERM signal"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(stage = "shutdown", event = "shutdown.signal", "shutdown signal received");
}
