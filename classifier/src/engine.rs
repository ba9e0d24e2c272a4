use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures::FutureExt;
use sleuth_types::{Crossmatch, Transient, TransientId};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::annotation::apply_annotations;
use crate::column_map::ColumnMaps;
use crate::conesearch::CatalogueSession;
use crate::db::{CatalogueStore, StreamQueryLog, TransientStore};
use crate::ranker::{RankOptions, RankedBatch, rank_classifications};
use crate::refresh::{CatalogueRefresher, refresh_batch};
use crate::search::run_search_algorithm;
use crate::settings::Settings;

/// Everything one worker needs; no state is shared mutably between workers.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub batch: Vec<Transient>,
    pub settings: Arc<Settings>,
    pub column_maps: Arc<ColumnMaps>,
}

impl WorkerTask {
    pub async fn run<S: CatalogueSession + ?Sized>(&self, session: &mut S) -> Result<Vec<Crossmatch>> {
        let outcome =
            run_search_algorithm(session, &self.batch, &self.settings, &self.column_maps).await?;
        Ok(outcome.matches)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub transients: usize,
    pub classified: usize,
    pub orphans: usize,
    pub crossmatch_rows: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
pub struct ClassifiedBatch {
    pub transients: Vec<Transient>,
    pub ranked: RankedBatch,
    pub report: BatchReport,
}

pub struct Engine<C: CatalogueStore> {
    catalogues: C,
    settings: Arc<Settings>,
    column_maps: Arc<ColumnMaps>,
    semaphore: Arc<Semaphore>,
    refresher: Option<Arc<dyn CatalogueRefresher>>,
    options: RankOptions,
}

impl<C> Engine<C>
where
    C: CatalogueStore + StreamQueryLog,
{
    /// Loads the column maps once and checks every search against them.
    pub async fn new(catalogues: C, settings: Settings) -> Result<Self> {
        let column_maps = catalogues
            .column_maps()
            .await
            .context("failed to load catalogue column maps")?;
        column_maps
            .check_searches(&settings)
            .context("search algorithm does not match the catalogue views")?;

        info!(
            stage = "startup",
            views = column_maps.len(),
            searches = settings.searches.len(),
            max_workers = settings.batch.max_workers,
            "engine ready"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(settings.batch.max_workers)),
            catalogues,
            settings: Arc::new(settings),
            column_maps: Arc::new(column_maps),
            refresher: None,
            options: RankOptions::default(),
        })
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn CatalogueRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_options(mut self, options: RankOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Splits the batch into mini-batches and runs them on bounded workers.
    ///
    /// Results come back in mini-batch order. The first failing worker
    /// aborts the remaining ones.
    pub async fn crossmatch(&self, transients: &[Transient]) -> Result<Vec<Crossmatch>> {
        let mut handles = Vec::new();
        for chunk in transients.chunks(self.settings.batch.mini_batch_size) {
            let task = WorkerTask {
                batch: chunk.to_vec(),
                settings: Arc::clone(&self.settings),
                column_maps: Arc::clone(&self.column_maps),
            };
            let catalogues = self.catalogues.clone();
            let semaphore = Arc::clone(&self.semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow!("worker pool closed"))?;
                let mut session = catalogues
                    .session()
                    .await
                    .context("failed to open catalogue session")?;
                task.run(&mut session).await
            }));
        }

        let mut matches = Vec::new();
        let mut handles = handles.into_iter();
        while let Some(handle) = handles.next() {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => Err(anyhow!("crossmatch worker panicked or was cancelled: {err}")),
            };
            match result {
                Ok(found) => matches.extend(found),
                Err(err) => {
                    for remaining in handles {
                        remaining.abort();
                    }
                    return Err(err.context("crossmatch worker failed"));
                }
            }
        }
        Ok(matches)
    }

    /// Crossmatch, rank, absolute magnitudes and annotation for one batch.
    pub async fn classify(
        &self,
        transients: Vec<Transient>,
        peak_magnitudes: &HashMap<TransientId, f64>,
    ) -> Result<ClassifiedBatch> {
        let started = Instant::now();
        let raw = self.crossmatch(&transients).await?;

        let mut ranked = rank_classifications(&transients, raw, self.options);
        apply_absolute_magnitudes(&mut ranked.crossmatches, peak_magnitudes);
        apply_annotations(&mut ranked.classifications, &ranked.crossmatches);

        let orphans = ranked
            .classifications
            .iter()
            .filter(|c| c.is_orphan())
            .count();
        let report = BatchReport {
            transients: transients.len(),
            classified: ranked.classifications.len() - orphans,
            orphans,
            crossmatch_rows: ranked.crossmatches.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        Ok(ClassifiedBatch {
            transients,
            ranked,
            report,
        })
    }

    /// Classifies one coordinate without touching the transients database.
    pub async fn match_single(&self, transient: Transient) -> Result<ClassifiedBatch> {
        self.classify(vec![transient], &HashMap::new()).await
    }

    /// Classifies the next batch of pending transients, if any.
    pub async fn run_batch<T: TransientStore + ?Sized>(
        &self,
        store: &T,
        persist: bool,
    ) -> Result<Option<ClassifiedBatch>> {
        let started = Instant::now();
        let pending = store
            .count_pending()
            .await
            .context("failed to count pending transients")?;
        if pending == 0 {
            info!(stage = "batch", pending, "no transients waiting for classification");
            return Ok(None);
        }

        let transients = store
            .fetch_pending(self.settings.batch.large_batch_size)
            .await
            .context("failed to fetch pending transients")?;
        if transients.is_empty() {
            warn!(
                stage = "batch",
                pending,
                "pending transients have no usable coordinates; nothing to classify"
            );
            return Ok(None);
        }
        info!(
            stage = "batch",
            event = "batch.begin",
            pending,
            batch_size = transients.len(),
            "classifying batch"
        );

        if let Some(refresh) = &self.settings.stream_refresh {
            refresh_batch(
                &self.catalogues,
                self.refresher.as_deref(),
                &transients,
                refresh,
                Utc::now(),
            )
            .await?;
        }

        let ids: Vec<TransientId> = transients.iter().map(|t| t.id).collect();
        let peaks = store
            .peak_magnitudes(&ids)
            .await
            .context("failed to fetch peak magnitudes")?;

        let mut batch = self.classify(transients, &peaks).await?;

        if persist {
            store
                .write_results(&batch.ranked.classifications, &batch.ranked.crossmatches)
                .await
                .context("failed to write classification results")?;
        }
        batch.report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            stage = "batch",
            event = "batch.end",
            result = "ok",
            persisted = persist,
            transients = batch.report.transients,
            classified = batch.report.classified,
            orphans = batch.report.orphans,
            crossmatch_rows = batch.report.crossmatch_rows,
            duration_ms = batch.report.duration_ms,
            "batch classified"
        );
        Ok(Some(batch))
    }

    /// Persists batch after batch until nothing is pending, or after the
    /// first batch when `one_run` is set.
    pub async fn run_until_drained<T, F>(
        &self,
        store: &T,
        one_run: bool,
        mut on_batch: F,
    ) -> Result<Vec<BatchReport>>
    where
        T: TransientStore + ?Sized,
        F: FnMut(&ClassifiedBatch) -> Result<()>,
    {
        let mut reports = Vec::new();
        while let Some(batch) = self.run_batch(store, true).await? {
            on_batch(&batch)?;
            reports.push(batch.report);
            if one_run {
                break;
            }
        }
        Ok(reports)
    }

    /// Polls for pending transients until `shutdown` resolves. A failed batch
    /// is logged and retried on the next poll.
    pub async fn run_forever<T, S>(&self, store: &T, shutdown: S) -> Result<()>
    where
        T: TransientStore + ?Sized,
        S: Future<Output = ()>,
    {
        let poll_interval = self.settings.batch.poll_interval;
        info!(
            stage = "startup",
            event = "startup.ready",
            mode = "forever",
            poll_interval_secs = poll_interval.as_secs(),
            "classifier polling for transients"
        );

        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        loop {
            if (&mut shutdown).now_or_never().is_some() {
                break;
            }

            let idle = match self.run_batch(store, true).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(err) => {
                    error!(
                        stage = "batch",
                        event = "batch.end",
                        result = "fail",
                        error = %format!("{err:#}"),
                        "batch classification failed"
                    );
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = &mut shutdown => break,
            }
        }

        info!(stage = "shutdown", event = "shutdown.complete", "classifier stopped");
        Ok(())
    }
}

/// Transient absolute magnitude from its peak magnitude and each match's
/// best distance modulus.
pub fn apply_absolute_magnitudes(
    crossmatches: &mut [Crossmatch],
    peak_magnitudes: &HashMap<TransientId, f64>,
) {
    for crossmatch in crossmatches.iter_mut() {
        let Some(peak) = peak_magnitudes.get(&crossmatch.transient_object_id) else {
            continue;
        };
        crossmatch.transient_abs_mag = crossmatch
            .best_distance_modulus()
            .map(|modulus| peak - modulus);
    }
}
