//! Plans cone queries against an external stream catalogue for a batch.

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sleuth_types::Transient;
use tracing::{info, warn};

use crate::coords::angular_separation;
use crate::db::{StreamQuery, StreamQueryLog};
use crate::settings::StreamRefreshSettings;

/// Fetches external catalogue rows around the given cones.
#[async_trait]
pub trait CatalogueRefresher: Send + Sync {
    async fn refresh(&self, cones: &[(f64, f64)], radius_arcsec: f64) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPlan {
    pub cones: Vec<(f64, f64)>,
    pub radius_arcsec: f64,
    pub already_covered: usize,
}

/// Drops points inside a recent query and merges the rest into cones.
///
/// A point counts as covered when a first-pass cone around it fits entirely
/// inside an earlier query. A survivor within `search_radius -
/// first_pass_radius` of an existing cone centre joins that cone; otherwise it
/// becomes a new centre.
pub fn plan_refresh(
    points: &[(f64, f64)],
    history: &[StreamQuery],
    settings: &StreamRefreshSettings,
) -> RefreshPlan {
    let first_pass = settings.first_pass_radius_arcsec;

    let mut by_dec: Vec<&StreamQuery> = history.iter().collect();
    by_dec.sort_by(|a, b| a.dec.total_cmp(&b.dec));
    let widest_deg = history
        .iter()
        .map(|q| q.radius_arcsec)
        .fold(0.0_f64, f64::max)
        / 3600.0;

    let survivors: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|&(ra, dec)| {
            let start = by_dec.partition_point(|q| q.dec < dec - widest_deg);
            !by_dec[start..]
                .iter()
                .take_while(|q| q.dec <= dec + widest_deg)
                .any(|q| angular_separation(ra, dec, q.ra, q.dec) + first_pass < q.radius_arcsec)
        })
        .collect();
    let already_covered = points.len() - survivors.len();

    let cones = seed_cones(&survivors, settings.search_radius_arcsec - first_pass);

    RefreshPlan {
        cones,
        radius_arcsec: settings.search_radius_arcsec,
        already_covered,
    }
}

/// Greedy grouping around seed points. Membership is measured from the seed,
/// so a chain of close points cannot stretch one cone past its radius.
fn seed_cones(points: &[(f64, f64)], radius_arcsec: f64) -> Vec<(f64, f64)> {
    let mut centres: Vec<(f64, f64)> = Vec::new();
    for &(ra, dec) in points {
        let joined = centres
            .iter()
            .any(|&(cra, cdec)| angular_separation(ra, dec, cra, cdec) < radius_arcsec);
        if !joined {
            centres.push((ra, dec));
        }
    }
    centres
}

/// Runs the refresh step for one batch and returns the number of cones queried.
pub async fn refresh_batch<L: StreamQueryLog + ?Sized>(
    log: &L,
    refresher: Option<&dyn CatalogueRefresher>,
    transients: &[Transient],
    settings: &StreamRefreshSettings,
    now: DateTime<Utc>,
) -> Result<usize> {
    let Some(refresher) = refresher else {
        warn!(
            stage = "refresh",
            transients = transients.len(),
            "no catalogue refresher configured; skipping stream refresh"
        );
        return Ok(0);
    };

    let started = Instant::now();
    info!(stage = "refresh", event = "refresh.begin", transients = transients.len());

    let window = chrono::Duration::from_std(settings.refresh_interval)
        .context("stream_refresh.refresh_interval is out of range")?;
    let history = log
        .recent_queries(now - window)
        .await
        .context("failed to read stream query history")?;

    let points: Vec<(f64, f64)> = transients.iter().map(|t| (t.ra, t.dec)).collect();
    let plan = plan_refresh(&points, &history, settings);

    if !plan.cones.is_empty() {
        refresher
            .refresh(&plan.cones, plan.radius_arcsec)
            .await
            .context("catalogue refresh failed")?;

        let queries: Vec<StreamQuery> = plan
            .cones
            .iter()
            .map(|&(ra, dec)| StreamQuery {
                ra,
                dec,
                radius_arcsec: plan.radius_arcsec,
                queried_at: now,
            })
            .collect();
        log.record_queries(&queries)
            .await
            .context("failed to record stream queries")?;
    }

    info!(
        stage = "refresh",
        event = "refresh.end",
        result = "ok",
        cones = plan.cones.len(),
        already_covered = plan.already_covered,
        duration_ms = started.elapsed().as_millis() as u64
    );
    Ok(plan.cones.len())
}
