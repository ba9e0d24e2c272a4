//! Runs one configured search against one catalogue view.

use std::collections::HashSet;

use sleuth_types::{
    Band, BrightnessFilter, CatalogueKind, Crossmatch, Reliability, Transient, TransientId,
};
use tracing::debug;

use crate::column_map::{ColumnMap, ColumnMaps};
use crate::conesearch::{CatalogueSession, ConeMatch, ConeSearchRequest, MagnitudeLimits};
use crate::coords::separations;
use crate::cosmology::{direct_distance, standard_redshift_distance};
use crate::error::ClassifierResult;
use crate::settings::{BrightnessRule, SearchParams, Settings};

/// Hard ceiling on bright-star associations, in arcsec.
pub const BRIGHT_STAR_MAX_SEPARATION: f64 = 20.0;
/// Direct-distance physical matches further than this are rejected.
pub const DIRECT_DISTANCE_MAX_SEPARATION: f64 = 300.0;
/// NED axis measurements are trusted only for sources brighter than this.
pub const NED_AXIS_MAG_LIMIT: f64 = 20.0;

/// One search, restricted to one brightness block and one phase.
#[derive(Debug, Clone, Copy)]
pub struct SearchPass<'a> {
    pub search: &'a SearchParams,
    pub filter: BrightnessFilter,
    pub phase: Reliability,
}

impl<'a> SearchPass<'a> {
    pub fn rule(&self) -> Option<&'a BrightnessRule> {
        self.search.rule(self.filter)
    }

    pub fn association_type(&self) -> Option<&'a str> {
        self.rule().and_then(|rule| rule.association_type(self.phase))
    }
}

/// Which physical criterion accepted a match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhysicalRule {
    MajorAxis { radius_arcsec: f64 },
    DirectDistance { radius_arcsec: f64 },
    RedshiftDistance { radius_arcsec: f64 },
}

impl PhysicalRule {
    fn radius_arcsec(self) -> f64 {
        match self {
            PhysicalRule::MajorAxis { radius_arcsec }
            | PhysicalRule::DirectDistance { radius_arcsec }
            | PhysicalRule::RedshiftDistance { radius_arcsec } => radius_arcsec,
        }
    }

    /// Search-name suffix naming the accepting rule.
    fn label(self, stretch: f64) -> String {
        match self {
            PhysicalRule::MajorAxis { .. } => format!("(within {stretch} * major axis)"),
            PhysicalRule::DirectDistance { .. } => "(direct distance)".to_string(),
            PhysicalRule::RedshiftDistance { .. } => "(redshift distance)".to_string(),
        }
    }
}

pub struct CatalogueCrossmatcher<'a, S: CatalogueSession + ?Sized> {
    session: &'a mut S,
    settings: &'a Settings,
    column_maps: &'a ColumnMaps,
}

impl<'a, S: CatalogueSession + ?Sized> CatalogueCrossmatcher<'a, S> {
    pub fn new(session: &'a mut S, settings: &'a Settings, column_maps: &'a ColumnMaps) -> Self {
        Self {
            session,
            settings,
            column_maps,
        }
    }

    /// Physical when the block (or its search) declares a physical radius.
    pub async fn run(
        &mut self,
        transients: &[Transient],
        pass: SearchPass<'_>,
    ) -> ClassifierResult<Vec<Crossmatch>> {
        match pass.search.physical_radius_for(pass.filter) {
            Some(radius_kpc) => self.physical_crossmatch(transients, pass, radius_kpc).await,
            None => self.angular_crossmatch(transients, pass, false).await,
        }
    }

    pub async fn angular_crossmatch(
        &mut self,
        transients: &[Transient],
        pass: SearchPass<'_>,
        physical_search: bool,
    ) -> ClassifierResult<Vec<Crossmatch>> {
        let Some(association_type) = pass.association_type() else {
            return Ok(Vec::new());
        };
        if transients.is_empty() {
            return Ok(Vec::new());
        }

        let map = self.column_maps.get(&pass.search.database_table)?;
        let radius_arcsec = match pass.phase {
            Reliability::Synonym => self.settings.synonym_radius_arcsec,
            _ => pass.search.angular_radius_arcsec,
        };
        let points: Vec<(f64, f64)> = transients.iter().map(|t| (t.ra, t.dec)).collect();
        let request = ConeSearchRequest {
            points: &points,
            radius_arcsec,
            magnitude: magnitude_limits(pass.search, pass.filter),
            require_distance_info: physical_search,
            nearest_only: false,
        };

        let hits = self.session.conesearch(map, &request).await?;
        let hit_count = hits.len();

        let search_name = format!(
            "{} {}",
            pass.search.name,
            if physical_search { "physical" } else { "angular" }
        );
        let nearest_only = pass.search.match_nearest_source_only && !physical_search;
        let mut seen: HashSet<usize> = HashSet::new();
        let mut matches = Vec::new();
        for hit in hits {
            let index = hit.index;
            let Some(transient) = transients.get(index) else {
                continue;
            };
            let crossmatch = build_crossmatch(
                transient,
                hit,
                map,
                pass.phase,
                association_type,
                &search_name,
                radius_arcsec,
            );

            if !passes_post_filters(&crossmatch, pass, physical_search) {
                continue;
            }
            if nearest_only && !seen.insert(index) {
                continue;
            }
            matches.push(crossmatch);
        }

        debug!(
            search = %pass.search.name,
            filter = %pass.filter,
            phase = %pass.phase,
            transients = transients.len(),
            candidates = hit_count,
            matches = matches.len(),
            "angular crossmatch complete"
        );

        Ok(matches)
    }

    pub async fn physical_crossmatch(
        &mut self,
        transients: &[Transient],
        pass: SearchPass<'_>,
        radius_kpc: f64,
    ) -> ClassifierResult<Vec<Crossmatch>> {
        let candidates = self.angular_crossmatch(transients, pass, true).await?;
        let candidate_count = candidates.len();
        let stretch = self.settings.galaxy_radius_stretch_factor;

        let mut accepted: Vec<Crossmatch> = candidates
            .into_iter()
            .filter_map(|mut crossmatch| {
                let rule = physical_acceptance(&crossmatch, pass.search, radius_kpc, stretch)?;
                crossmatch.original_search_radius_arcsec = Some(rule.radius_arcsec());
                crossmatch.search_name = format!("{} {}", crossmatch.search_name, rule.label(stretch));
                Some(crossmatch)
            })
            .collect();

        accepted.sort_by(|a, b| {
            let a = a.physical_separation_kpc.unwrap_or(f64::INFINITY);
            let b = b.physical_separation_kpc.unwrap_or(f64::INFINITY);
            a.total_cmp(&b)
        });

        if pass.search.match_nearest_source_only {
            let mut seen: HashSet<TransientId> = HashSet::new();
            accepted.retain(|crossmatch| seen.insert(crossmatch.transient_object_id));
        }

        debug!(
            search = %pass.search.name,
            filter = %pass.filter,
            phase = %pass.phase,
            radius_kpc,
            candidates = candidate_count,
            matches = accepted.len(),
            "physical crossmatch complete"
        );

        Ok(accepted)
    }
}

/// Magnitude window for a brightness block.
///
/// Faint blocks keep sources fainter than their limit, bright blocks keep
/// sources brighter than theirs, and general blocks keep the range between
/// the sibling limits (sources without a magnitude included).
pub fn magnitude_limits(search: &SearchParams, filter: BrightnessFilter) -> Option<MagnitudeLimits> {
    match filter {
        BrightnessFilter::Faint => {
            let rule = search.faint.as_ref()?;
            Some(MagnitudeLimits {
                band: rule.mag_band?,
                brighter_than: None,
                fainter_than: Some(rule.mag_limit?),
                admit_missing: false,
            })
        }
        BrightnessFilter::Bright => {
            let rule = search.bright.as_ref()?;
            Some(MagnitudeLimits {
                band: rule.mag_band?,
                brighter_than: Some(rule.mag_limit?),
                fainter_than: None,
                admit_missing: false,
            })
        }
        BrightnessFilter::General => {
            let bright_limit = search.bright.as_ref().and_then(|rule| rule.mag_limit);
            let faint_limit = search.faint.as_ref().and_then(|rule| rule.mag_limit);
            if bright_limit.is_none() && faint_limit.is_none() {
                return None;
            }
            Some(MagnitudeLimits {
                band: general_band(search)?,
                brighter_than: faint_limit,
                fainter_than: bright_limit,
                admit_missing: true,
            })
        }
    }
}

fn general_band(search: &SearchParams) -> Option<Band> {
    [&search.general, &search.faint, &search.bright]
        .into_iter()
        .flatten()
        .find_map(|rule| rule.mag_band)
}

/// Exclusion radius around a bright star of the given magnitude.
pub fn bright_star_radius(mag: f64) -> f64 {
    10f64.powf(-0.2 * mag + 3.7)
}

/// Association radius around a galaxy of the given magnitude.
pub fn galaxy_association_radius(mag: f64) -> f64 {
    10f64.powf((25.0 - mag) / 6.0)
}

pub fn passes_bright_star_cut(separation_arcsec: f64, mag: Option<f64>) -> bool {
    mag.is_some_and(|mag| {
        separation_arcsec < bright_star_radius(mag)
            && separation_arcsec < BRIGHT_STAR_MAX_SEPARATION
    })
}

fn passes_post_filters(crossmatch: &Crossmatch, pass: SearchPass<'_>, physical_search: bool) -> bool {
    let search = pass.search;
    if search.galaxy_like {
        return true;
    }

    match pass.filter {
        BrightnessFilter::Bright => {
            let band = search.bright.as_ref().and_then(|rule| rule.mag_band);
            let mag = band.and_then(|band| crossmatch.photometry.value(band));
            passes_bright_star_cut(crossmatch.separation_arcsec, mag)
        }
        BrightnessFilter::General if !physical_search => {
            let Some(mag) = general_band(search).and_then(|band| crossmatch.photometry.value(band))
            else {
                return true;
            };
            let bright_limit = search.bright.as_ref().and_then(|rule| rule.mag_limit);
            let faint_limit = search.faint.as_ref().and_then(|rule| rule.mag_limit);
            bright_limit.is_none_or(|limit| mag > limit)
                && faint_limit.is_none_or(|limit| mag < limit)
                && crossmatch.separation_arcsec < galaxy_association_radius(mag)
        }
        _ => true,
    }
}

/// Decides whether an angular candidate is a physical match.
///
/// A trusted semi-major axis decides on its own; otherwise a direct distance
/// decides, and only then a redshift distance.
pub fn physical_acceptance(
    crossmatch: &Crossmatch,
    search: &SearchParams,
    radius_kpc: f64,
    stretch_factor: f64,
) -> Option<PhysicalRule> {
    let separation = crossmatch.separation_arcsec;

    if search.within_semi_major_axis {
        if let Some(axis) = crossmatch.major_axis_arcsec {
            let trusted = crossmatch.catalogue_kind != CatalogueKind::Ned
                || crossmatch
                    .photometry
                    .value(Band::Unknown)
                    .is_some_and(|mag| mag < NED_AXIS_MAG_LIMIT);
            if trusted {
                let radius_arcsec = axis * stretch_factor;
                return (separation < radius_arcsec)
                    .then_some(PhysicalRule::MajorAxis { radius_arcsec });
            }
        }
    }

    let physical_kpc = crossmatch.physical_separation_kpc?;
    if let Some(scale) = crossmatch.direct_distance_scale {
        return (physical_kpc < radius_kpc && separation <= DIRECT_DISTANCE_MAX_SEPARATION).then_some(
            PhysicalRule::DirectDistance {
                radius_arcsec: radius_kpc / scale,
            },
        );
    }
    let scale = crossmatch.scale?;
    (physical_kpc < radius_kpc).then_some(PhysicalRule::RedshiftDistance {
        radius_arcsec: radius_kpc / scale,
    })
}

/// Turns a conesearch hit into a fully populated raw match.
fn build_crossmatch(
    transient: &Transient,
    hit: ConeMatch,
    map: &ColumnMap,
    phase: Reliability,
    association_type: &str,
    search_name: &str,
    radius_arcsec: f64,
) -> Crossmatch {
    let row = hit.row;
    let (_, north, east) = separations(transient.ra, transient.dec, row.ra, row.dec);

    let redshift_estimate = row
        .z
        .filter(|z| *z > 0.0)
        .or(row.photo_z.filter(|z| *z > 0.0))
        .map(standard_redshift_distance);
    let direct_estimate = row.distance_mpc.filter(|d| *d > 0.0).map(direct_distance);

    let mut crossmatch = Crossmatch {
        transient_object_id: transient.id,
        catalogue_object_id: row.object_id,
        catalogue_table_id: map.table_id,
        catalogue_table_name: map.table_name.clone(),
        catalogue_view_id: map.view_id,
        catalogue_view_name: map.view_name.clone(),
        catalogue_kind: map.kind,
        catalogue_object_type: map.object_type.clone(),
        catalogue_object_subtype: row.subtype,
        object_type_accuracy: map.object_type_accuracy,
        search_name: search_name.to_string(),
        reliability: phase,
        association_type: association_type.to_string(),
        ra_deg: row.ra,
        dec_deg: row.dec,
        separation_arcsec: hit.separation_arcsec,
        north_separation_arcsec: north,
        east_separation_arcsec: east,
        original_search_radius_arcsec: Some(radius_arcsec),
        major_axis_arcsec: row.semi_major_arcsec,
        photometry: row.photometry,
        z: row.z,
        photo_z: row.photo_z,
        photo_z_err: row.photo_z_err,
        distance: redshift_estimate.map(|d| d.distance_mpc),
        distance_modulus: redshift_estimate.map(|d| d.distance_modulus),
        scale: redshift_estimate.map(|d| d.scale_kpc_per_arcsec),
        direct_distance: direct_estimate.map(|d| d.distance_mpc),
        direct_distance_modulus: direct_estimate.map(|d| d.distance_modulus),
        direct_distance_scale: direct_estimate.map(|d| d.scale_kpc_per_arcsec),
        physical_separation_kpc: None,
        rank: None,
        rank_score: None,
        merged_rank: None,
        best_distance: None,
        best_distance_flag: None,
        best_distance_source: None,
        transient_abs_mag: None,
    };
    crossmatch.refresh_physical_separation();
    crossmatch
}

#[cfg(test)]
pub(crate) mod tests {
    use sleuth_types::Magnitude;

    use super::*;
    use crate::column_map::test_column_map;
    use crate::conesearch::CatalogueRow;
    use crate::db::memory::MemoryCatalogue;
    use crate::settings::settings_from_toml;

    pub(crate) const SETTINGS: &str = r#"
        synonym_radius_arcsec = 1.0
        galaxy_radius_stretch_factor = 1.5

        [[search]]
        name = "ned galaxy"
        database_table = "tcs_view_galaxy_ned"
        angular_radius_arcsec = 120
        physical_radius_kpc = 50
        within_semi_major_axis = true
        [search.general]
        synonym = "SN"
        association = "SN"

        [[search]]
        name = "gaia star"
        database_table = "tcs_view_star_gaia"
        angular_radius_arcsec = 30
        match_nearest_source_only = true
        galaxy_like = false
        [search.bright]
        mag_column = "G"
        mag_limit = 16
        association = "BS"
        [search.faint]
        mag_column = "G"
        mag_limit = 21
        annotation = "VS"
        [search.general]
        mag_column = "G"
        association = "VS"
    "#;

    pub(crate) fn row(id: &str, ra: f64, dec: f64) -> CatalogueRow {
        CatalogueRow {
            object_id: id.to_string(),
            ra,
            dec,
            ..CatalogueRow::default()
        }
    }

    pub(crate) fn with_mag(mut row: CatalogueRow, band: Band, mag: f64) -> CatalogueRow {
        row.photometry.insert(band, Magnitude::new(mag, None));
        row
    }

    fn catalogue(rows_ned: Vec<CatalogueRow>, rows_gaia: Vec<CatalogueRow>) -> MemoryCatalogue {
        let mut store = MemoryCatalogue::default();
        store.add_view(
            test_column_map("tcs_view_galaxy_ned", CatalogueKind::Ned, 3.0),
            rows_ned,
        );
        store.add_view(
            test_column_map("tcs_view_star_gaia", CatalogueKind::Gaia, 1.0),
            rows_gaia,
        );
        store
    }

    fn pass<'a>(settings: &'a Settings, name: &str, filter: BrightnessFilter, phase: Reliability) -> SearchPass<'a> {
        SearchPass {
            search: settings.search(name).expect("search"),
            filter,
            phase,
        }
    }

    #[test]
    fn bright_star_cut_boundary() {
        let mag = 15.0;
        let boundary = bright_star_radius(mag);
        assert!((boundary - 5.011_872).abs() < 1e-5);
        assert!(passes_bright_star_cut(boundary - 0.001, Some(mag)));
        assert!(!passes_bright_star_cut(boundary + 0.001, Some(mag)));
        assert!(!passes_bright_star_cut(21.0, Some(5.0)));
        assert!(!passes_bright_star_cut(1.0, None));
    }

    #[test]
    fn galaxy_radius_formula() {
        assert!((galaxy_association_radius(18.0) - 14.677_99).abs() < 1e-4);
    }

    #[test]
    fn magnitude_limits_per_block() {
        let settings = settings_from_toml(SETTINGS);
        let search = settings.search("gaia star").expect("search");

        let bright = magnitude_limits(search, BrightnessFilter::Bright).expect("bright");
        assert_eq!(bright.brighter_than, Some(16.0));
        assert_eq!(bright.fainter_than, None);

        let faint = magnitude_limits(search, BrightnessFilter::Faint).expect("faint");
        assert_eq!(faint.fainter_than, Some(21.0));

        let general = magnitude_limits(search, BrightnessFilter::General).expect("general");
        assert_eq!(general.fainter_than, Some(16.0));
        assert_eq!(general.brighter_than, Some(21.0));
        assert!(general.admit_missing);

        let ned = settings.search("ned galaxy").expect("search");
        assert!(magnitude_limits(ned, BrightnessFilter::General).is_none());
    }

    #[tokio::test]
    async fn bright_star_pass_applies_cut_and_reliability() {
        let settings = settings_from_toml(SETTINGS);
        let maps = settings_maps();
        let store = catalogue(
            vec![],
            vec![
                // 3.6" from the transient, mag 14 allows ~7.9"
                with_mag(row("close-bright", 150.0, 20.001), Band::GaiaG, 14.0),
                // 10.8", outside the radius for mag 14
                with_mag(row("far-bright", 150.0, 20.003), Band::GaiaG, 14.0),
            ],
        );
        let transients = [Transient::new(1, 150.0, 20.0)];
        let mut session = store.open();
        let mut matcher = CatalogueCrossmatcher::new(&mut session, &settings, &maps);

        let matches = matcher
            .run(
                &transients,
                pass(&settings, "gaia star", BrightnessFilter::Bright, Reliability::Association),
            )
            .await
            .expect("crossmatch");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].catalogue_object_id, "close-bright");
        assert_eq!(matches[0].reliability, Reliability::Association);
        assert_eq!(matches[0].association_type, "BS");
        assert_eq!(matches[0].search_name, "gaia star angular");
        assert!(matches[0].north_separation_arcsec > 0.0);
    }

    #[tokio::test]
    async fn general_pass_applies_galaxy_cut() {
        let settings = settings_from_toml(SETTINGS);
        let maps = settings_maps();
        let store = catalogue(
            vec![],
            vec![
                // mag 20 → radius ~6.8"; 3.6" kept
                with_mag(row("kept", 150.0, 20.001), Band::GaiaG, 20.0),
                // mag 20 at 10.8" rejected
                with_mag(row("too-far", 150.0, 20.003), Band::GaiaG, 20.0),
                // no magnitude at all is kept
                row("no-mag", 150.0, 19.998),
            ],
        );
        let transients = [Transient::new(1, 150.0, 20.0)];
        let mut session = store.open();
        let mut matcher = CatalogueCrossmatcher::new(&mut session, &settings, &maps);
        let search = settings.search("gaia star").expect("search");

        let matches = matcher
            .angular_crossmatch(
                &transients,
                SearchPass {
                    search,
                    filter: BrightnessFilter::General,
                    phase: Reliability::Association,
                },
                false,
            )
            .await
            .expect("crossmatch");

        // nearest-only keeps the closest surviving source
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].catalogue_object_id, "kept");
    }

    #[tokio::test]
    async fn synonym_pass_uses_synonym_radius() {
        let settings = settings_from_toml(SETTINGS);
        let maps = settings_maps();
        let mut exact = row("NGC 1", 10.0, -5.0);
        exact.z = Some(0.01);
        let mut near = row("NGC 2", 10.0, -5.0005);
        near.z = Some(0.01);
        let store = catalogue(vec![exact, near], vec![]);
        let transients = [Transient::new(9, 10.0, -5.0)];
        let mut session = store.open();
        let mut matcher = CatalogueCrossmatcher::new(&mut session, &settings, &maps);

        let matches = matcher
            .run(
                &transients,
                pass(&settings, "ned galaxy", BrightnessFilter::General, Reliability::Synonym),
            )
            .await
            .expect("crossmatch");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].catalogue_object_id, "NGC 1");
        assert_eq!(matches[0].reliability, Reliability::Synonym);
        assert_eq!(matches[0].physical_separation_kpc, Some(0.0));
    }

    #[tokio::test]
    async fn physical_pass_sorts_by_kpc_and_rejects_distant() {
        let settings = settings_from_toml(SETTINGS);
        let maps = settings_maps();
        // z = 0.1 → 1.844 kpc/"; 20" ≈ 37 kpc, 10" ≈ 18 kpc, 36" ≈ 66 kpc
        let mut a = row("A", 30.0, 0.0 + 20.0 / 3600.0);
        a.z = Some(0.1);
        let mut b = row("B", 30.0, 0.0 + 10.0 / 3600.0);
        b.z = Some(0.1);
        let mut c = row("C", 30.0, 0.0 - 36.0 / 3600.0);
        c.z = Some(0.1);
        let no_distance = row("D", 30.0, 0.0 + 5.0 / 3600.0);
        let store = catalogue(vec![a, b, c, no_distance], vec![]);
        let transients = [Transient::new(3, 30.0, 0.0)];
        let mut session = store.open();
        let mut matcher = CatalogueCrossmatcher::new(&mut session, &settings, &maps);

        let matches = matcher
            .run(
                &transients,
                pass(&settings, "ned galaxy", BrightnessFilter::General, Reliability::Association),
            )
            .await
            .expect("crossmatch");

        let ids: Vec<&str> = matches.iter().map(|m| m.catalogue_object_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert!(matches[0].search_name.ends_with("(redshift distance)"));
        let radius = matches[0].original_search_radius_arcsec.expect("radius");
        assert!((radius - 50.0 / 1.8443).abs() < 0.05);
    }

    #[test]
    fn direct_distance_scale_wins() {
        let settings = settings_from_toml(SETTINGS);
        let map = test_column_map("tcs_view_galaxy_ned", CatalogueKind::Ned, 3.0);
        let mut hit_row = row("G", 10.0, 10.0 + 10.0 / 3600.0);
        hit_row.z = Some(0.1);
        hit_row.distance_mpc = Some(20.6264806);
        let hit = ConeMatch {
            index: 0,
            separation_arcsec: 10.0,
            row: hit_row,
        };
        let crossmatch = build_crossmatch(
            &Transient::new(1, 10.0, 10.0),
            hit,
            &map,
            Reliability::Association,
            "SN",
            "ned galaxy angular",
            120.0,
        );

        assert!(crossmatch.scale.is_some());
        let kpc = crossmatch.physical_separation_kpc.expect("physical separation");
        assert!((kpc - 1.0).abs() < 1e-9);

        let search = settings.search("ned galaxy").expect("search");
        let rule = physical_acceptance(&crossmatch, search, 50.0, 1.5).expect("accepted");
        assert!(matches!(rule, PhysicalRule::DirectDistance { .. }));
    }

    #[test]
    fn trusted_major_axis_decides_alone() {
        let settings = settings_from_toml(SETTINGS);
        let search = settings.search("ned galaxy").expect("search");
        let map = test_column_map("tcs_view_galaxy_ned", CatalogueKind::Ned, 3.0);
        let mut hit_row = with_mag(row("G", 10.0, 10.0), Band::Unknown, 15.0);
        hit_row.semi_major_arcsec = Some(4.0);
        hit_row.z = Some(0.1);
        let build = |sep: f64, hit_row: CatalogueRow| {
            build_crossmatch(
                &Transient::new(1, 10.0, 10.0),
                ConeMatch {
                    index: 0,
                    separation_arcsec: sep,
                    row: hit_row,
                },
                &map,
                Reliability::Association,
                "SN",
                "ned galaxy physical",
                120.0,
            )
        };

        let inside = build(5.0, hit_row.clone());
        let rule = physical_acceptance(&inside, search, 50.0, 1.5).expect("major axis rule");
        assert!(matches!(rule, PhysicalRule::MajorAxis { .. }));
        assert_eq!(rule.label(1.5), "(within 1.5 * major axis)");

        // 7" > 4" * 1.5, and redshift distance is not consulted
        let outside = build(7.0, hit_row.clone());
        assert_eq!(physical_acceptance(&outside, search, 50.0, 1.5), None);

        // faint NED source: axis untrusted, falls through to redshift
        let mut faint = hit_row;
        faint.photometry = Default::default();
        faint.photometry.insert(Band::Unknown, Magnitude::new(21.0, None));
        let untrusted = build(7.0, faint);
        assert!(matches!(
            physical_acceptance(&untrusted, search, 50.0, 1.5),
            Some(PhysicalRule::RedshiftDistance { .. })
        ));
    }

    fn settings_maps() -> ColumnMaps {
        ColumnMaps::new([
            test_column_map("tcs_view_galaxy_ned", CatalogueKind::Ned, 3.0),
            test_column_map("tcs_view_star_gaia", CatalogueKind::Gaia, 1.0),
        ])
    }
}
