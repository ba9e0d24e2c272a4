use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use sleuth_types::Transient;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::coords::{parse_dec, parse_ra};
use crate::db::TransientStore;
use crate::db::postgres::{self, PgCatalogueStore, PgTransientStore};
use crate::engine::{ClassifiedBatch, Engine};
use crate::output;
use crate::ranker::RankOptions;
use crate::settings::Settings;
use crate::utils;

#[derive(Debug, Parser)]
#[command(
    name = "transient-classifier",
    version,
    about = "Crossmatch transients against reference catalogues and classify them"
)]
pub struct Cli {
    /// Path to the TOML settings file.
    #[arg(long, env = "CLASSIFIER_SETTINGS")]
    pub settings: PathBuf,
    /// Overrides `databases.transients_url`.
    #[arg(long, env = "TRANSIENTS_DATABASE_URL")]
    pub transients_url: Option<String>,
    /// Overrides `databases.catalogues_url`.
    #[arg(long, env = "CATALOGUES_DATABASE_URL")]
    pub catalogues_url: Option<String>,
    /// Increase logging verbosity (use -vv for trace level).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify a single sky position without touching the transients database.
    Match(MatchArgs),
    /// Classify pending transients from the configured transients table.
    Classify(ClassifyArgs),
    /// Check settings, catalogue helper tables and results-table migrations.
    Validate,
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    /// Right ascension in decimal degrees or sexagesimal hours.
    #[arg(long, allow_hyphen_values = true)]
    pub ra: String,
    /// Declination in decimal degrees or sexagesimal degrees.
    #[arg(long, allow_hyphen_values = true)]
    pub dec: String,
    #[arg(long)]
    pub name: Option<String>,
    /// Keep only the top-ranked crossmatch.
    #[arg(long, default_value_t = false)]
    pub lite: bool,
    /// Directory where JSON artifacts will be written.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Write results back to the transients database.
    #[arg(long, default_value_t = false)]
    pub update: bool,
    /// Stop after the first batch.
    #[arg(long, default_value_t = false)]
    pub one_run: bool,
    #[arg(long, default_value_t = false)]
    pub lite: bool,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose)?;

    let settings = load_settings(&cli)?;
    let catalogues_url = settings
        .databases
        .catalogues_url
        .clone()
        .context("no catalogues database URL: set databases.catalogues_url or --catalogues-url")?;
    let catalogue_pool = postgres::connect(&catalogues_url, settings.databases.max_connections)
        .await
        .context("failed to connect to the catalogues database")?;

    match cli.command {
        Command::Match(args) => run_match(args, catalogue_pool, settings).await,
        Command::Classify(args) => run_classify(args, catalogue_pool, settings).await,
        Command::Validate => run_validate(catalogue_pool, settings).await,
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let started = Instant::now();
    let mut settings = Settings::load(&cli.settings)?;
    settings.apply_database_overrides(cli.transients_url.clone(), cli.catalogues_url.clone());
    settings.validate_config()?;
    info!(
        stage = "startup",
        event = "config.load.end",
        result = "ok",
        settings_path = %cli.settings.display(),
        searches = settings.searches.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "settings loaded"
    );
    Ok(settings)
}

async fn run_match(args: MatchArgs, catalogue_pool: PgPool, settings: Settings) -> Result<()> {
    let ra = parse_ra(&args.ra)?;
    let dec = parse_dec(&args.dec)?;
    let mut transient = Transient::new(0, ra, dec);
    if let Some(name) = args.name {
        transient = transient.with_name(name);
    }

    let engine = Engine::new(PgCatalogueStore::new(catalogue_pool), settings)
        .await?
        .with_options(RankOptions { lite: args.lite });
    let batch = engine.match_single(transient).await?;

    print_to_stdout(&batch)?;
    if let Some(dir) = &args.output_dir {
        write_artifacts(dir, &batch)?;
    }
    Ok(())
}

async fn run_classify(
    args: ClassifyArgs,
    catalogue_pool: PgPool,
    settings: Settings,
) -> Result<()> {
    let transients = connect_transients(&settings, &catalogue_pool).await?;
    let engine = Engine::new(PgCatalogueStore::new(catalogue_pool), settings)
        .await?
        .with_options(RankOptions { lite: args.lite });

    if !args.update {
        let Some(batch) = engine.run_batch(&transients, false).await? else {
            println!("no transients waiting for classification");
            return Ok(());
        };
        print_to_stdout(&batch)?;
        if let Some(dir) = &args.output_dir {
            write_artifacts(dir, &batch)?;
        }
        return Ok(());
    }

    postgres::run_migrations(transients.pool())
        .await
        .context("failed to migrate the results tables")?;

    let mut batch_number = 0usize;
    let reports = engine
        .run_until_drained(&transients, args.one_run, |batch| {
            batch_number += 1;
            match &args.output_dir {
                Some(dir) => write_artifacts(&dir.join(format!("batch-{batch_number:04}")), batch),
                None => Ok(()),
            }
        })
        .await?;

    let classified: usize = reports.iter().map(|r| r.classified).sum();
    let orphans: usize = reports.iter().map(|r| r.orphans).sum();
    info!(
        stage = "classify",
        batches = reports.len(),
        classified,
        orphans,
        "classification complete"
    );
    Ok(())
}

async fn run_validate(catalogue_pool: PgPool, settings: Settings) -> Result<()> {
    let transients = match settings.transients {
        Some(_) => Some(connect_transients(&settings, &catalogue_pool).await?),
        None => None,
    };
    let engine = Engine::new(PgCatalogueStore::new(catalogue_pool), settings).await?;
    info!(
        stage = "validate",
        searches = engine.settings().searches.len(),
        "catalogue views match the search algorithm"
    );

    let Some(transients) = transients else {
        warn!(stage = "validate", "no [transients] section; skipping transient source checks");
        return Ok(());
    };

    let pending = transients
        .count_pending()
        .await
        .context("transients.pending_query failed")?;
    let unapplied = postgres::pending_migrations(transients.pool()).await?;
    if !unapplied.is_empty() {
        warn!(
            stage = "validate",
            versions = ?unapplied,
            "results-table migrations not yet applied; they run on the next update"
        );
    }
    info!(stage = "validate", result = "ok", pending, "validation passed");
    Ok(())
}

/// Reuses the catalogue pool when both databases share a URL.
async fn connect_transients(settings: &Settings, catalogue_pool: &PgPool) -> Result<PgTransientStore> {
    let Some(source) = settings.transients.clone() else {
        bail!("settings have no [transients] section");
    };
    let pool = match (
        settings.databases.transients_url.as_deref(),
        settings.databases.catalogues_url.as_deref(),
    ) {
        (None, _) => catalogue_pool.clone(),
        (Some(transients), Some(catalogues)) if transients == catalogues => catalogue_pool.clone(),
        (Some(url), _) => postgres::connect(url, settings.databases.max_connections)
            .await
            .context("failed to connect to the transients database")?,
    };
    Ok(PgTransientStore::new(pool, source)?)
}

fn print_to_stdout(batch: &ClassifiedBatch) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    output::print_batch(&mut out, batch)?;
    out.flush()?;
    Ok(())
}

fn write_artifacts(dir: &Path, batch: &ClassifiedBatch) -> Result<()> {
    let dir = utils::resolve_path(dir)?;
    output::write_artifacts(&dir, batch)?;
    info!(output = %dir.display(), "artifacts written");
    Ok(())
}
