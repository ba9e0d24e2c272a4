//! Conesearch contract shared by every catalogue backend.

use async_trait::async_trait;
use sleuth_types::{Band, Photometry};

use crate::column_map::ColumnMap;
use crate::coords::angular_separation;
use crate::error::ClassifierResult;

/// Magnitude window applied inside the conesearch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnitudeLimits {
    pub band: Band,
    /// Keep rows with `mag < brighter_than`.
    pub brighter_than: Option<f64>,
    /// Keep rows with `mag > fainter_than`.
    pub fainter_than: Option<f64>,
    pub admit_missing: bool,
}

impl MagnitudeLimits {
    pub fn admits(&self, mag: Option<f64>) -> bool {
        match mag {
            None => self.admit_missing,
            Some(mag) => {
                self.brighter_than.is_none_or(|limit| mag < limit)
                    && self.fainter_than.is_none_or(|limit| mag > limit)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConeSearchRequest<'a> {
    /// Query points as (ra, dec) in decimal degrees.
    pub points: &'a [(f64, f64)],
    pub radius_arcsec: f64,
    pub magnitude: Option<MagnitudeLimits>,
    pub require_distance_info: bool,
    pub nearest_only: bool,
}

impl ConeSearchRequest<'_> {
    /// Row-level filters, for backends that cannot push them into a query.
    pub fn accepts(&self, row: &CatalogueRow) -> bool {
        if self.require_distance_info && !row.has_distance_info() {
            return false;
        }
        self.magnitude
            .is_none_or(|limits| limits.admits(row.photometry.value(limits.band)))
    }
}

/// Catalogue row with its columns resolved to semantic fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogueRow {
    pub object_id: String,
    pub ra: f64,
    pub dec: f64,
    pub subtype: Option<String>,
    pub z: Option<f64>,
    pub photo_z: Option<f64>,
    pub photo_z_err: Option<f64>,
    pub distance_mpc: Option<f64>,
    pub semi_major_arcsec: Option<f64>,
    pub photometry: Photometry,
}

impl CatalogueRow {
    pub fn has_distance_info(&self) -> bool {
        self.z.is_some()
            || self.photo_z.is_some()
            || self.distance_mpc.is_some()
            || self.semi_major_arcsec.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConeMatch {
    /// Position of the query point in the request.
    pub index: usize,
    pub separation_arcsec: f64,
    pub row: CatalogueRow,
}

/// One open connection to the catalogues store. Sessions are never shared
/// between workers.
#[async_trait]
pub trait CatalogueSession: Send {
    async fn conesearch(
        &mut self,
        map: &ColumnMap,
        request: &ConeSearchRequest<'_>,
    ) -> ClassifierResult<Vec<ConeMatch>>;
}

/// Pairs candidate rows with query points by exact separation.
///
/// Output is grouped by query index and ordered by separation within each
/// group; equal separations keep candidate order.
pub fn match_rows(
    points: &[(f64, f64)],
    rows: &[CatalogueRow],
    radius_arcsec: f64,
    nearest_only: bool,
) -> Vec<ConeMatch> {
    let mut matches = Vec::new();
    for (index, (ra, dec)) in points.iter().enumerate() {
        let mut hits: Vec<(f64, &CatalogueRow)> = rows
            .iter()
            .map(|row| (angular_separation(*ra, *dec, row.ra, row.dec), row))
            .filter(|(sep, _)| *sep <= radius_arcsec)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        if nearest_only {
            hits.truncate(1);
        }
        matches.extend(hits.into_iter().map(|(separation_arcsec, row)| ConeMatch {
            index,
            separation_arcsec,
            row: row.clone(),
        }));
    }
    matches
}
