use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type TransientId = i64;

/// Predicted type assigned to transients without a surviving match.
pub const ORPHAN: &str = "ORPHAN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transient {
    pub id: TransientId,
    pub ra: f64,
    pub dec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Transient {
    pub fn new(id: TransientId, ra: f64, dec: f64) -> Self {
        Self {
            id,
            ra,
            dec,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Classification reliability tier; lower tiers are more confident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    Synonym,
    Association,
    Annotation,
}

impl Reliability {
    /// Phase order of the search algorithm.
    pub const PHASES: [Reliability; 3] = [
        Reliability::Synonym,
        Reliability::Association,
        Reliability::Annotation,
    ];

    pub fn tier(self) -> u8 {
        match self {
            Reliability::Synonym => 1,
            Reliability::Association => 2,
            Reliability::Annotation => 3,
        }
    }

    pub fn from_tier(tier: i64) -> Option<Self> {
        match tier {
            1 => Some(Reliability::Synonym),
            2 => Some(Reliability::Association),
            3 => Some(Reliability::Annotation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reliability::Synonym => "synonym",
            Reliability::Association => "association",
            Reliability::Annotation => "annotation",
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessFilter {
    Bright,
    Faint,
    General,
}

impl BrightnessFilter {
    pub const ALL: [BrightnessFilter; 3] = [
        BrightnessFilter::Bright,
        BrightnessFilter::Faint,
        BrightnessFilter::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BrightnessFilter::Bright => "bright",
            BrightnessFilter::Faint => "faint",
            BrightnessFilter::General => "general",
        }
    }
}

impl fmt::Display for BrightnessFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue family, recorded alongside each catalogue table when it is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogueKind {
    Ned,
    Sdss,
    Milliquas,
    Veron,
    #[serde(rename = "2mass")]
    TwoMass,
    Gaia,
    Ps1,
    Gsc,
    Glade,
    Other,
}

impl CatalogueKind {
    /// Unrecognised labels fall back to `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "ned" => CatalogueKind::Ned,
            "sdss" => CatalogueKind::Sdss,
            "milliquas" => CatalogueKind::Milliquas,
            "veron" => CatalogueKind::Veron,
            "2mass" => CatalogueKind::TwoMass,
            "gaia" => CatalogueKind::Gaia,
            "ps1" => CatalogueKind::Ps1,
            "gsc" => CatalogueKind::Gsc,
            "glade" => CatalogueKind::Glade,
            _ => CatalogueKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogueKind::Ned => "ned",
            CatalogueKind::Sdss => "sdss",
            CatalogueKind::Milliquas => "milliquas",
            CatalogueKind::Veron => "veron",
            CatalogueKind::TwoMass => "2mass",
            CatalogueKind::Gaia => "gaia",
            CatalogueKind::Ps1 => "ps1",
            CatalogueKind::Gsc => "gsc",
            CatalogueKind::Glade => "glade",
            CatalogueKind::Other => "other",
        }
    }

    /// Sort key for merged search-name tokens: NED, SDSS and MILLIQUAS lead.
    pub fn token_priority(self) -> u8 {
        match self {
            CatalogueKind::Ned => 0,
            CatalogueKind::Sdss => 1,
            CatalogueKind::Milliquas => 2,
            _ => 3,
        }
    }
}

/// Photometric bands, declared in merge preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "R")]
    R,
    #[serde(rename = "_r")]
    SdssR,
    #[serde(rename = "G")]
    GaiaG,
    #[serde(rename = "V")]
    V,
    #[serde(rename = "_g")]
    SdssG,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "I")]
    I,
    #[serde(rename = "_i")]
    SdssI,
    #[serde(rename = "_z")]
    SdssZ,
    #[serde(rename = "J")]
    J,
    #[serde(rename = "H")]
    H,
    #[serde(rename = "K")]
    K,
    #[serde(rename = "U")]
    U,
    #[serde(rename = "_u")]
    SdssU,
    #[serde(rename = "_y")]
    Ps1Y,
    #[serde(rename = "W1")]
    W1,
    #[serde(rename = "unkMag")]
    Unknown,
}

impl Band {
    pub const PREFERENCE: [Band; 17] = [
        Band::R,
        Band::SdssR,
        Band::GaiaG,
        Band::V,
        Band::SdssG,
        Band::B,
        Band::I,
        Band::SdssI,
        Band::SdssZ,
        Band::J,
        Band::H,
        Band::K,
        Band::U,
        Band::SdssU,
        Band::Ps1Y,
        Band::W1,
        Band::Unknown,
    ];

    /// Label used in settings files and helper tables.
    pub fn label(self) -> &'static str {
        match self {
            Band::R => "R",
            Band::SdssR => "_r",
            Band::GaiaG => "G",
            Band::V => "V",
            Band::SdssG => "_g",
            Band::B => "B",
            Band::I => "I",
            Band::SdssI => "_i",
            Band::SdssZ => "_z",
            Band::J => "J",
            Band::H => "H",
            Band::K => "K",
            Band::U => "U",
            Band::SdssU => "_u",
            Band::Ps1Y => "_y",
            Band::W1 => "W1",
            Band::Unknown => "unkMag",
        }
    }

    /// Filter name shown to people; empty for the unknown band.
    pub fn filter_name(self) -> &'static str {
        match self {
            Band::Unknown => "",
            other => other.label().trim_start_matches('_'),
        }
    }

    /// Column stem in the crossmatch results table.
    pub fn result_column(self) -> &'static str {
        match self {
            Band::R => "mag_r",
            Band::SdssR => "mag_sdss_r",
            Band::GaiaG => "mag_gaia_g",
            Band::V => "mag_v",
            Band::SdssG => "mag_sdss_g",
            Band::B => "mag_b",
            Band::I => "mag_i",
            Band::SdssI => "mag_sdss_i",
            Band::SdssZ => "mag_sdss_z",
            Band::J => "mag_j",
            Band::H => "mag_h",
            Band::K => "mag_k",
            Band::U => "mag_u",
            Band::SdssU => "mag_sdss_u",
            Band::Ps1Y => "mag_ps1_y",
            Band::W1 => "mag_w1",
            Band::Unknown => "mag_unknown",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Band::PREFERENCE
            .into_iter()
            .find(|band| band.label() == trimmed)
            .ok_or_else(|| format!("unknown photometric band '{trimmed}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Magnitude {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

impl Magnitude {
    pub fn new(value: f64, error: Option<f64>) -> Self {
        Self { value, error }
    }

    /// True when this measurement should replace `current` in a merge.
    pub fn improves_on(&self, current: &Magnitude) -> bool {
        match (self.error, current.error) {
            (Some(candidate), Some(existing)) => candidate < existing,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Photometry(BTreeMap<Band, Magnitude>);

impl Photometry {
    pub fn get(&self, band: Band) -> Option<&Magnitude> {
        self.0.get(&band)
    }

    pub fn value(&self, band: Band) -> Option<f64> {
        self.0.get(&band).map(|mag| mag.value)
    }

    pub fn insert(&mut self, band: Band, magnitude: Magnitude) {
        self.0.insert(band, magnitude);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Band, &Magnitude)> {
        self.0.iter().map(|(band, mag)| (*band, mag))
    }

    /// Folds `other` in band by band, keeping the better-constrained value.
    pub fn merge_from(&mut self, other: &Photometry) {
        for (band, candidate) in other.iter() {
            match self.0.get(&band) {
                None => {
                    self.0.insert(band, *candidate);
                }
                Some(current) if candidate.improves_on(current) => {
                    self.0.insert(band, *candidate);
                }
                Some(_) => {}
            }
        }
    }

    /// First populated band in preference order.
    pub fn preferred(&self) -> Option<(Band, Magnitude)> {
        Band::PREFERENCE
            .into_iter()
            .find_map(|band| self.0.get(&band).map(|mag| (band, *mag)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceFlag {
    #[serde(rename = "dd")]
    Direct,
    #[serde(rename = "sz")]
    SpecZ,
    #[serde(rename = "pz")]
    PhotoZ,
}

impl DistanceFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceFlag::Direct => "dd",
            DistanceFlag::SpecZ => "sz",
            DistanceFlag::PhotoZ => "pz",
        }
    }
}

/// One transient/catalogue-source pairing.
///
/// Raw matches come straight out of a catalogue search and have no rank.
/// Merged matches (one per 1" cluster) carry `rank`; constituent rows of a
/// multi-member cluster carry `merged_rank` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossmatch {
    pub transient_object_id: TransientId,
    pub catalogue_object_id: String,
    pub catalogue_table_id: i32,
    pub catalogue_table_name: String,
    pub catalogue_view_id: i32,
    pub catalogue_view_name: String,
    pub catalogue_kind: CatalogueKind,
    pub catalogue_object_type: Option<String>,
    pub catalogue_object_subtype: Option<String>,
    pub object_type_accuracy: f64,
    pub search_name: String,
    pub reliability: Reliability,
    pub association_type: String,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub separation_arcsec: f64,
    pub north_separation_arcsec: f64,
    pub east_separation_arcsec: f64,
    pub original_search_radius_arcsec: Option<f64>,
    pub major_axis_arcsec: Option<f64>,
    pub photometry: Photometry,
    /// Spectroscopic redshift.
    pub z: Option<f64>,
    pub photo_z: Option<f64>,
    pub photo_z_err: Option<f64>,
    /// Redshift-derived quantities (spec-z when present, else photo-z).
    pub distance: Option<f64>,
    pub distance_modulus: Option<f64>,
    pub scale: Option<f64>,
    pub direct_distance: Option<f64>,
    pub direct_distance_modulus: Option<f64>,
    pub direct_distance_scale: Option<f64>,
    pub physical_separation_kpc: Option<f64>,
    pub rank: Option<u32>,
    pub rank_score: Option<f64>,
    pub merged_rank: Option<u32>,
    pub best_distance: Option<f64>,
    pub best_distance_flag: Option<DistanceFlag>,
    pub best_distance_source: Option<String>,
    pub transient_abs_mag: Option<f64>,
}

impl Crossmatch {
    pub fn has_spec_z(&self) -> bool {
        self.z.is_some_and(|z| z > 0.0)
    }

    pub fn has_usable_photo_z(&self) -> bool {
        self.photo_z.is_some_and(|z| z > 0.0)
    }

    /// Direct-distance scale wins over the redshift-derived one.
    pub fn best_scale(&self) -> Option<f64> {
        self.direct_distance_scale.or(self.scale)
    }

    pub fn best_distance_modulus(&self) -> Option<f64> {
        self.direct_distance_modulus.or(self.distance_modulus)
    }

    pub fn refresh_physical_separation(&mut self) {
        self.physical_separation_kpc = self
            .best_scale()
            .map(|scale| scale * self.separation_arcsec);
    }
}

/// Final verdict for one transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub transient_object_id: TransientId,
    pub classification: String,
    pub annotation: Option<String>,
    pub summary: Option<String>,
    pub separation_arcsec: Option<f64>,
}

impl Classification {
    pub fn new(transient_object_id: TransientId, classification: impl Into<String>) -> Self {
        Self {
            transient_object_id,
            classification: classification.into(),
            annotation: None,
            summary: None,
            separation_arcsec: None,
        }
    }

    pub fn orphan(transient_object_id: TransientId) -> Self {
        Self::new(transient_object_id, ORPHAN)
    }

    pub fn is_orphan(&self) -> bool {
        self.classification == ORPHAN
    }

    /// Predicted type followed by the annotation when one exists.
    pub fn to_list(&self) -> Vec<String> {
        let mut list = vec![self.classification.clone()];
        if let Some(annotation) = &self.annotation {
            list.push(annotation.clone());
        }
        list
    }
}
