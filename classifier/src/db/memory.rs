//! In-memory stores backing the async tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sleuth_types::{Classification, Crossmatch, Transient, TransientId};

use crate::column_map::{ColumnMap, ColumnMaps};
use crate::conesearch::{CatalogueRow, CatalogueSession, ConeMatch, ConeSearchRequest, match_rows};
use crate::db::{CatalogueStore, StreamQuery, StreamQueryLog, TransientStore};
use crate::error::{ClassifierError, ClassifierResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogue {
    pub maps: Vec<ColumnMap>,
    pub views: HashMap<String, Arc<Vec<CatalogueRow>>>,
    pub history: Arc<Mutex<Vec<StreamQuery>>>,
}

impl MemoryCatalogue {
    pub fn add_view(&mut self, map: ColumnMap, rows: Vec<CatalogueRow>) {
        self.views.insert(map.view_name.clone(), Arc::new(rows));
        self.maps.push(map);
    }

    pub fn open(&self) -> MemorySession {
        MemorySession {
            views: self.views.clone(),
        }
    }

    pub fn recorded_queries(&self) -> Vec<StreamQuery> {
        self.history.lock().expect("history lock").clone()
    }
}

#[async_trait]
impl CatalogueStore for MemoryCatalogue {
    type Session = MemorySession;

    async fn column_maps(&self) -> ClassifierResult<ColumnMaps> {
        Ok(ColumnMaps::new(self.maps.iter().cloned()))
    }

    async fn session(&self) -> ClassifierResult<MemorySession> {
        Ok(self.open())
    }
}

#[async_trait]
impl StreamQueryLog for MemoryCatalogue {
    async fn recent_queries(&self, since: DateTime<Utc>) -> ClassifierResult<Vec<StreamQuery>> {
        Ok(self
            .recorded_queries()
            .into_iter()
            .filter(|query| query.queried_at > since)
            .collect())
    }

    async fn record_queries(&self, queries: &[StreamQuery]) -> ClassifierResult<()> {
        self.history
            .lock()
            .expect("history lock")
            .extend_from_slice(queries);
        Ok(())
    }
}

pub struct MemorySession {
    views: HashMap<String, Arc<Vec<CatalogueRow>>>,
}

#[async_trait]
impl CatalogueSession for MemorySession {
    async fn conesearch(
        &mut self,
        map: &ColumnMap,
        request: &ConeSearchRequest<'_>,
    ) -> ClassifierResult<Vec<ConeMatch>> {
        let rows = self.views.get(&map.view_name).ok_or_else(|| {
            ClassifierError::config(format!("unknown catalogue view '{}'", map.view_name))
        })?;
        let candidates: Vec<CatalogueRow> = rows
            .iter()
            .filter(|row| request.accepts(row))
            .cloned()
            .collect();
        Ok(match_rows(
            request.points,
            &candidates,
            request.radius_arcsec,
            request.nearest_only,
        ))
    }
}

#[derive(Debug, Default)]
pub struct MemoryTransients {
    pub pending: Mutex<Vec<Transient>>,
    pub peaks: HashMap<TransientId, f64>,
    pub classifications: Mutex<HashMap<TransientId, Classification>>,
    pub crossmatches: Mutex<Vec<Crossmatch>>,
}

impl MemoryTransients {
    pub fn with_pending(transients: Vec<Transient>) -> Self {
        Self {
            pending: Mutex::new(transients),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TransientStore for MemoryTransients {
    async fn count_pending(&self) -> ClassifierResult<i64> {
        Ok(self.pending.lock().expect("pending lock").len() as i64)
    }

    async fn fetch_pending(&self, limit: usize) -> ClassifierResult<Vec<Transient>> {
        let pending = self.pending.lock().expect("pending lock");
        Ok(pending.iter().take(limit).cloned().collect())
    }

    async fn peak_magnitudes(
        &self,
        ids: &[TransientId],
    ) -> ClassifierResult<HashMap<TransientId, f64>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.peaks.get(id).map(|mag| (*id, *mag)))
            .collect())
    }

    async fn write_results(
        &self,
        classifications: &[Classification],
        crossmatches: &[Crossmatch],
    ) -> ClassifierResult<()> {
        let ids: Vec<TransientId> = classifications
            .iter()
            .map(|c| c.transient_object_id)
            .collect();

        let mut stored = self.crossmatches.lock().expect("crossmatch lock");
        stored.retain(|row| !ids.contains(&row.transient_object_id));
        stored.extend_from_slice(crossmatches);

        let mut verdicts = self.classifications.lock().expect("classification lock");
        for classification in classifications {
            verdicts.insert(classification.transient_object_id, classification.clone());
        }

        self.pending
            .lock()
            .expect("pending lock")
            .retain(|t| !ids.contains(&t.id));
        Ok(())
    }
}
