#[cfg(test)]
pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sleuth_types::{Classification, Crossmatch, Transient, TransientId};

use crate::column_map::ColumnMaps;
use crate::conesearch::CatalogueSession;
use crate::error::ClassifierResult;

/// Read-only access to the reference catalogues.
#[async_trait]
pub trait CatalogueStore: Clone + Send + Sync + 'static {
    type Session: CatalogueSession + 'static;

    async fn column_maps(&self) -> ClassifierResult<ColumnMaps>;

    /// Opens a session owned by a single worker.
    async fn session(&self) -> ClassifierResult<Self::Session>;
}

/// Source of pending transients and sink for classification results.
#[async_trait]
pub trait TransientStore: Send + Sync {
    async fn count_pending(&self) -> ClassifierResult<i64>;

    async fn fetch_pending(&self, limit: usize) -> ClassifierResult<Vec<Transient>>;

    /// Peak observed magnitude per transient; ids without one are absent.
    async fn peak_magnitudes(
        &self,
        ids: &[TransientId],
    ) -> ClassifierResult<HashMap<TransientId, f64>>;

    /// Replaces any earlier results for the transients in one transaction.
    async fn write_results(
        &self,
        classifications: &[Classification],
        crossmatches: &[Crossmatch],
    ) -> ClassifierResult<()>;
}

/// A cone already queried against an external stream catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamQuery {
    pub ra: f64,
    pub dec: f64,
    pub radius_arcsec: f64,
    pub queried_at: DateTime<Utc>,
}

#[async_trait]
pub trait StreamQueryLog: Send + Sync {
    async fn recent_queries(&self, since: DateTime<Utc>) -> ClassifierResult<Vec<StreamQuery>>;

    async fn record_queries(&self, queries: &[StreamQuery]) -> ClassifierResult<()>;
}

pub fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quotes an identifier already checked by [`is_valid_identifier`].
pub fn quote_ident(value: &str) -> String {
    format!("\"{value}\"")
}
