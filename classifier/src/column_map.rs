//! Semantic column names for each catalogue view.
//!
//! Maps are read from three helper tables in the catalogues database:
//! `tcs_helper_catalogue_tables_info` (one row per ingested table with its
//! catalogue kind and object-type accuracy), `tcs_helper_catalogue_views_info`
//! (one row per searchable view with its column names) and
//! `tcs_helper_catalogue_band_columns` (band value/error columns per view).

use std::collections::{BTreeMap, HashMap};

use sleuth_types::{Band, CatalogueKind};

use crate::db::is_valid_identifier;
use crate::error::{ClassifierError, ClassifierResult};
use crate::settings::Settings;

pub const FINE_HTM_LEVEL: u8 = 16;
pub const COARSE_HTM_LEVEL: u8 = 13;

#[derive(Debug, Clone, PartialEq)]
pub struct BandColumns {
    pub value: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    pub view_id: i32,
    pub view_name: String,
    pub table_id: i32,
    pub table_name: String,
    pub description: Option<String>,
    pub kind: CatalogueKind,
    /// Static object type of every row in the view, e.g. "galaxy" or "star".
    pub object_type: Option<String>,
    pub object_type_accuracy: f64,
    pub object_id_col: String,
    pub ra_col: String,
    pub dec_col: String,
    pub subtype_col: Option<String>,
    pub redshift_col: Option<String>,
    pub photo_z_col: Option<String>,
    pub photo_z_err_col: Option<String>,
    pub distance_col: Option<String>,
    pub semi_major_col: Option<String>,
    pub semi_major_to_arcsec: f64,
    pub bands: BTreeMap<Band, BandColumns>,
}

impl ColumnMap {
    /// Distance tables (`_d_` views) are indexed one HTM level coarser.
    pub fn htm_level(&self) -> u8 {
        if self.view_name.contains("_d_") {
            COARSE_HTM_LEVEL
        } else {
            FINE_HTM_LEVEL
        }
    }

    pub fn htm_column(&self) -> String {
        format!("htm{}id", self.htm_level())
    }

    pub fn band(&self, band: Band) -> Option<&BandColumns> {
        self.bands.get(&band)
    }

    /// Columns whose presence marks a row as carrying distance information.
    pub fn distance_info_columns(&self) -> Vec<&str> {
        [
            &self.redshift_col,
            &self.photo_z_col,
            &self.distance_col,
            &self.semi_major_col,
        ]
        .into_iter()
        .filter_map(|col| col.as_deref())
        .collect()
    }

    /// Human label used in annotations.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.table_name)
    }

    pub fn validate(&self) -> ClassifierResult<()> {
        let mut columns: Vec<&str> = vec![
            self.view_name.as_str(),
            self.object_id_col.as_str(),
            self.ra_col.as_str(),
            self.dec_col.as_str(),
        ];
        columns.extend(
            [
                &self.subtype_col,
                &self.redshift_col,
                &self.photo_z_col,
                &self.photo_z_err_col,
                &self.distance_col,
                &self.semi_major_col,
            ]
            .into_iter()
            .filter_map(|col| col.as_deref()),
        );
        for cols in self.bands.values() {
            columns.push(&cols.value);
            if let Some(err) = &cols.error {
                columns.push(err);
            }
        }

        if let Some(bad) = columns.into_iter().find(|col| !is_valid_identifier(col)) {
            return Err(ClassifierError::config(format!(
                "view '{}' maps an invalid column name '{bad}'",
                self.view_name
            )));
        }
        if self.semi_major_to_arcsec <= 0.0 {
            return Err(ClassifierError::config(format!(
                "view '{}' has a non-positive semi-major axis conversion",
                self.view_name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnMaps {
    by_view: HashMap<String, ColumnMap>,
}

impl ColumnMaps {
    pub fn new(maps: impl IntoIterator<Item = ColumnMap>) -> Self {
        Self {
            by_view: maps
                .into_iter()
                .map(|map| (map.view_name.clone(), map))
                .collect(),
        }
    }

    pub fn get(&self, view: &str) -> ClassifierResult<&ColumnMap> {
        self.by_view
            .get(view)
            .ok_or_else(|| ClassifierError::config(format!("unknown catalogue view '{view}'")))
    }

    pub fn len(&self) -> usize {
        self.by_view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_view.is_empty()
    }

    /// Every configured search must point at a known view whose magnitude
    /// columns cover the bands its brightness blocks filter on.
    pub fn check_searches(&self, settings: &Settings) -> ClassifierResult<()> {
        for search in &settings.searches {
            let map = self.get(&search.database_table)?;
            map.validate()?;
            for rule in [&search.bright, &search.faint, &search.general]
                .into_iter()
                .flatten()
            {
                if let Some(band) = rule.mag_band {
                    if map.band(band).is_none() {
                        return Err(ClassifierError::config(format!(
                            "search '{}' filters on band {band} but view '{}' has no column for it",
                            search.name, map.view_name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_column_map(view_name: &str, kind: CatalogueKind, accuracy: f64) -> ColumnMap {
    let mut bands = BTreeMap::new();
    for (band, value, error) in [
        (Band::R, "r_mag", Some("r_mag_err")),
        (Band::B, "b_mag", None),
        (Band::GaiaG, "g_mag", None),
        (Band::Unknown, "unk_mag", None),
    ] {
        bands.insert(
            band,
            BandColumns {
                value: value.to_string(),
                error: error.map(str::to_string),
            },
        );
    }

    ColumnMap {
        view_id: 1,
        view_name: view_name.to_string(),
        table_id: 1,
        table_name: view_name.to_string(),
        description: None,
        kind,
        object_type: Some("galaxy".to_string()),
        object_type_accuracy: accuracy,
        object_id_col: "name".to_string(),
        ra_col: "raDeg".to_string(),
        dec_col: "decDeg".to_string(),
        subtype_col: Some("subtype".to_string()),
        redshift_col: Some("z".to_string()),
        photo_z_col: Some("photo_z".to_string()),
        photo_z_err_col: Some("photo_z_err".to_string()),
        distance_col: Some("dist_mpc".to_string()),
        semi_major_col: Some("major_dim".to_string()),
        semi_major_to_arcsec: 60.0,
        bands,
    }
}
