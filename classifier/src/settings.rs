use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use humantime::parse_duration;
use serde::Deserialize;
use sleuth_types::{Band, BrightnessFilter, Reliability};

use crate::db::is_valid_identifier;

#[derive(Debug, Clone)]
pub struct Settings {
    pub synonym_radius_arcsec: f64,
    pub galaxy_radius_stretch_factor: f64,
    pub databases: DatabaseSettings,
    pub transients: Option<TransientSource>,
    pub batch: BatchSettings,
    pub stream_refresh: Option<StreamRefreshSettings>,
    pub searches: Vec<SearchParams>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub transients_url: Option<String>,
    pub catalogues_url: Option<String>,
    pub max_connections: u32,
}

/// Where pending transients come from and where verdicts are written back.
#[derive(Debug, Clone)]
pub struct TransientSource {
    pub table: String,
    pub id_column: String,
    pub classification_column: String,
    /// Must return `id`, `ra`, `dec` and optionally `name` columns.
    pub pending_query: String,
    /// Must return `id` and `mag` columns.
    pub peak_magnitude_query: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub large_batch_size: usize,
    pub mini_batch_size: usize,
    pub max_workers: usize,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamRefreshSettings {
    pub search_radius_arcsec: f64,
    pub first_pass_radius_arcsec: f64,
    pub refresh_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub name: String,
    pub database_table: String,
    pub angular_radius_arcsec: f64,
    pub physical_radius_kpc: Option<f64>,
    pub match_nearest_source_only: bool,
    pub within_semi_major_axis: bool,
    pub galaxy_like: bool,
    pub bright: Option<BrightnessRule>,
    pub faint: Option<BrightnessRule>,
    pub general: Option<BrightnessRule>,
}

#[derive(Debug, Clone, Default)]
pub struct BrightnessRule {
    pub mag_band: Option<Band>,
    pub mag_limit: Option<f64>,
    pub physical_radius_kpc: Option<f64>,
    pub synonym: Option<String>,
    pub association: Option<String>,
    pub annotation: Option<String>,
}

impl BrightnessRule {
    /// Association type this block contributes for a phase, if any.
    pub fn association_type(&self, phase: Reliability) -> Option<&str> {
        match phase {
            Reliability::Synonym => self.synonym.as_deref(),
            Reliability::Association => self.association.as_deref(),
            Reliability::Annotation => self.annotation.as_deref(),
        }
    }
}

impl SearchParams {
    pub fn rule(&self, filter: BrightnessFilter) -> Option<&BrightnessRule> {
        match filter {
            BrightnessFilter::Bright => self.bright.as_ref(),
            BrightnessFilter::Faint => self.faint.as_ref(),
            BrightnessFilter::General => self.general.as_ref(),
        }
    }

    pub fn physical_radius_for(&self, filter: BrightnessFilter) -> Option<f64> {
        self.rule(filter)
            .and_then(|rule| rule.physical_radius_kpc)
            .or(self.physical_radius_kpc)
    }
}

#[derive(Debug, Deserialize)]
struct FileSettings {
    synonym_radius_arcsec: Option<f64>,
    galaxy_radius_stretch_factor: Option<f64>,
    #[serde(default)]
    databases: RawDatabaseSettings,
    transients: Option<RawTransientSource>,
    #[serde(default)]
    batch: RawBatchSettings,
    stream_refresh: Option<RawStreamRefreshSettings>,
    #[serde(rename = "search", default)]
    searches: Vec<RawSearchParams>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabaseSettings {
    transients_url: Option<String>,
    catalogues_url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTransientSource {
    table: String,
    id_column: Option<String>,
    classification_column: Option<String>,
    pending_query: String,
    peak_magnitude_query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBatchSettings {
    large_batch_size: Option<usize>,
    mini_batch_size: Option<usize>,
    max_workers: Option<usize>,
    poll_interval: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStreamRefreshSettings {
    search_radius_arcsec: f64,
    first_pass_radius_arcsec: f64,
    refresh_interval: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSearchParams {
    name: String,
    database_table: String,
    angular_radius_arcsec: f64,
    physical_radius_kpc: Option<f64>,
    #[serde(default)]
    match_nearest_source_only: bool,
    #[serde(default)]
    within_semi_major_axis: bool,
    galaxy_like: Option<bool>,
    bright: Option<RawBrightnessRule>,
    faint: Option<RawBrightnessRule>,
    general: Option<RawBrightnessRule>,
}

#[derive(Debug, Deserialize)]
struct RawBrightnessRule {
    mag_column: Option<String>,
    mag_limit: Option<f64>,
    physical_radius_kpc: Option<f64>,
    synonym: Option<String>,
    association: Option<String>,
    annotation: Option<String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;

        let parsed: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML {}", path.display()))?;

        Self::from_raw(parsed)
    }

    fn from_raw(raw: FileSettings) -> Result<Self> {
        if raw.searches.is_empty() {
            bail!("settings must include at least one [[search]] entry");
        }

        let synonym_radius_arcsec = raw
            .synonym_radius_arcsec
            .ok_or_else(|| anyhow!("synonym_radius_arcsec is required"))?;
        let galaxy_radius_stretch_factor = raw
            .galaxy_radius_stretch_factor
            .ok_or_else(|| anyhow!("galaxy_radius_stretch_factor is required"))?;

        let databases = DatabaseSettings {
            transients_url: raw.databases.transients_url,
            catalogues_url: raw.databases.catalogues_url,
            max_connections: raw.databases.max_connections.unwrap_or(10).max(1),
        };

        let transients = raw.transients.map(|source| TransientSource {
            table: source.table,
            id_column: source.id_column.unwrap_or_else(|| "id".to_string()),
            classification_column: source
                .classification_column
                .unwrap_or_else(|| "classification".to_string()),
            pending_query: source.pending_query,
            peak_magnitude_query: source.peak_magnitude_query,
        });

        let batch = BatchSettings {
            large_batch_size: raw.batch.large_batch_size.unwrap_or(50_000),
            mini_batch_size: raw.batch.mini_batch_size.unwrap_or(100),
            max_workers: raw.batch.max_workers.unwrap_or_else(default_worker_count).max(1),
            poll_interval: parse_duration_string(
                raw.batch.poll_interval.as_deref().unwrap_or("5m"),
                "batch.poll_interval",
            )?,
        };

        let stream_refresh = raw
            .stream_refresh
            .map(|refresh| -> Result<StreamRefreshSettings> {
                Ok(StreamRefreshSettings {
                    search_radius_arcsec: refresh.search_radius_arcsec,
                    first_pass_radius_arcsec: refresh.first_pass_radius_arcsec,
                    refresh_interval: parse_duration_string(
                        refresh.refresh_interval.as_deref().unwrap_or("90days"),
                        "stream_refresh.refresh_interval",
                    )?,
                })
            })
            .transpose()?;

        let searches = raw
            .searches
            .into_iter()
            .map(build_search)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            synonym_radius_arcsec,
            galaxy_radius_stretch_factor,
            databases,
            transients,
            batch,
            stream_refresh,
            searches,
        })
    }

    pub fn validate_config(&self) -> Result<()> {
        if self.searches.is_empty() {
            bail!("settings must include at least one [[search]] entry");
        }
        if self.synonym_radius_arcsec <= 0.0 {
            bail!("synonym_radius_arcsec must be greater than zero");
        }
        if self.galaxy_radius_stretch_factor <= 0.0 {
            bail!("galaxy_radius_stretch_factor must be greater than zero");
        }
        if self.batch.large_batch_size == 0 || self.batch.mini_batch_size == 0 {
            bail!("batch sizes must be greater than zero");
        }

        if let Some(source) = &self.transients {
            for (field, value) in [
                ("transients.table", &source.table),
                ("transients.id_column", &source.id_column),
                ("transients.classification_column", &source.classification_column),
            ] {
                if !is_valid_identifier(value) {
                    bail!("{field} must be a plain SQL identifier, got '{value}'");
                }
            }
            if source.pending_query.trim().is_empty() {
                bail!("transients.pending_query must not be empty");
            }
        }

        if let Some(refresh) = &self.stream_refresh {
            if refresh.first_pass_radius_arcsec <= 0.0
                || refresh.first_pass_radius_arcsec >= refresh.search_radius_arcsec
            {
                bail!(
                    "stream_refresh.first_pass_radius_arcsec must be positive and below search_radius_arcsec"
                );
            }
        }

        let mut seen = HashSet::new();
        for search in &self.searches {
            if search.name.trim().is_empty() {
                bail!("search.name must not be empty");
            }
            if !seen.insert(search.name.as_str()) {
                bail!("duplicate search name '{}'", search.name);
            }
            if !is_valid_identifier(&search.database_table) {
                bail!(
                    "search '{}' has an invalid database_table '{}'",
                    search.name,
                    search.database_table
                );
            }
            if search.angular_radius_arcsec <= 0.0 {
                bail!(
                    "search '{}' angular_radius_arcsec must be greater than zero",
                    search.name
                );
            }

            let mut any_rule = false;
            for filter in BrightnessFilter::ALL {
                let Some(rule) = search.rule(filter) else {
                    continue;
                };
                any_rule = true;

                if Reliability::PHASES
                    .iter()
                    .all(|phase| rule.association_type(*phase).is_none())
                {
                    bail!(
                        "search '{}' {filter} block declares no synonym, association or annotation type",
                        search.name
                    );
                }
                if filter != BrightnessFilter::General
                    && (rule.mag_band.is_none() || rule.mag_limit.is_none())
                {
                    bail!(
                        "search '{}' {filter} block requires mag_column and mag_limit",
                        search.name
                    );
                }
                if search
                    .physical_radius_for(filter)
                    .is_some_and(|radius| radius <= 0.0)
                {
                    bail!(
                        "search '{}' physical radius must be greater than zero",
                        search.name
                    );
                }
            }
            if !any_rule {
                bail!(
                    "search '{}' must define at least one of bright, faint or general",
                    search.name
                );
            }

            let bright = search.bright.as_ref().and_then(|rule| rule.mag_limit);
            let faint = search.faint.as_ref().and_then(|rule| rule.mag_limit);
            if let (Some(bright), Some(faint)) = (bright, faint) {
                if bright >= faint {
                    bail!(
                        "search '{}' bright mag_limit ({bright}) must be below faint mag_limit ({faint})",
                        search.name
                    );
                }
            }
        }

        Ok(())
    }

    /// CLI flags and environment variables take precedence over the file.
    pub fn apply_database_overrides(
        &mut self,
        transients_url: Option<String>,
        catalogues_url: Option<String>,
    ) {
        if transients_url.is_some() {
            self.databases.transients_url = transients_url;
        }
        if catalogues_url.is_some() {
            self.databases.catalogues_url = catalogues_url;
        }
    }

    pub fn search(&self, name: &str) -> Option<&SearchParams> {
        self.searches.iter().find(|search| search.name == name)
    }
}

fn build_search(raw: RawSearchParams) -> Result<SearchParams> {
    let context = format!("search '{}'", raw.name);
    let galaxy_like = raw
        .galaxy_like
        .unwrap_or_else(|| raw.name.to_ascii_lowercase().contains("galaxy"));

    Ok(SearchParams {
        bright: raw
            .bright
            .map(|rule| build_rule(rule, &format!("{context}.bright")))
            .transpose()?,
        faint: raw
            .faint
            .map(|rule| build_rule(rule, &format!("{context}.faint")))
            .transpose()?,
        general: raw
            .general
            .map(|rule| build_rule(rule, &format!("{context}.general")))
            .transpose()?,
        name: raw.name,
        database_table: raw.database_table,
        angular_radius_arcsec: raw.angular_radius_arcsec,
        physical_radius_kpc: raw.physical_radius_kpc,
        match_nearest_source_only: raw.match_nearest_source_only,
        within_semi_major_axis: raw.within_semi_major_axis,
        galaxy_like,
    })
}

fn build_rule(raw: RawBrightnessRule, context: &str) -> Result<BrightnessRule> {
    let mag_band = raw
        .mag_column
        .as_deref()
        .map(|label| {
            label
                .parse::<Band>()
                .map_err(|err| anyhow!("{context}.mag_column: {err}"))
        })
        .transpose()?;

    Ok(BrightnessRule {
        mag_band,
        mag_limit: raw.mag_limit,
        physical_radius_kpc: raw.physical_radius_kpc,
        synonym: normalize_type(raw.synonym),
        association: normalize_type(raw.association),
        annotation: normalize_type(raw.annotation),
    })
}

fn normalize_type(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_duration_string(value: &str, field: &str) -> Result<Duration> {
    let duration = parse_duration(value)
        .with_context(|| format!("invalid duration for {field}: '{value}'"))?;

    if duration.is_zero() {
        return Err(anyhow!("duration for {field} must be greater than zero"));
    }

    Ok(duration)
}

/// One core stays free for the orchestrator.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
pub(crate) fn settings_from_toml(raw: &str) -> Settings {
    let parsed: FileSettings = toml::from_str(raw).expect("parse settings");
    Settings::from_raw(parsed).expect("normalize settings")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        synonym_radius_arcsec = 0.5
        galaxy_radius_stretch_factor = 1.2

        [[search]]
        name = "ned spec galaxy"
        database_table = "tcs_view_galaxy_ned_spec"
        angular_radius_arcsec = 60

        [search.general]
        association = "SN"
    "#;

    #[test]
    fn parses_minimal_settings() {
        let parsed: FileSettings = toml::from_str(MINIMAL).expect("parse settings");
        let settings = Settings::from_raw(parsed).expect("normalize");

        assert_eq!(settings.searches.len(), 1);
        assert!(settings.searches[0].galaxy_like);
        assert_eq!(settings.batch.mini_batch_size, 100);
        assert_eq!(settings.batch.large_batch_size, 50_000);
        assert_eq!(settings.batch.poll_interval, Duration::from_secs(300));
        assert!(settings.batch.max_workers >= 1);
        assert!(settings.transients.is_none());
        settings.validate_config().expect("valid");
    }

    #[test]
    fn requires_synonym_radius() {
        let raw = r#"
            galaxy_radius_stretch_factor = 1.2

            [[search]]
            name = "x"
            database_table = "t"
            angular_radius_arcsec = 1
            [search.general]
            association = "SN"
        "#;
        let parsed: FileSettings = toml::from_str(raw).expect("parse settings");
        let err = Settings::from_raw(parsed).expect_err("should fail");
        assert!(err.to_string().contains("synonym_radius_arcsec"));
    }

    #[test]
    fn rejects_unknown_band() {
        let raw = r#"
            synonym_radius_arcsec = 0.5
            galaxy_radius_stretch_factor = 1.2

            [[search]]
            name = "stars"
            database_table = "tcs_view_star_gaia"
            angular_radius_arcsec = 10
            [search.bright]
            mag_column = "Q"
            mag_limit = 16
            association = "BS"
        "#;
        let parsed: FileSettings = toml::from_str(raw).expect("parse settings");
        let err = Settings::from_raw(parsed).expect_err("should fail");
        assert!(format!("{err:#}").contains("unknown photometric band"));
    }

    #[test]
    fn bright_block_needs_limit() {
        let raw = r#"
            synonym_radius_arcsec = 0.5
            galaxy_radius_stretch_factor = 1.2

            [[search]]
            name = "stars"
            database_table = "tcs_view_star_gaia"
            angular_radius_arcsec = 10
            [search.bright]
            mag_column = "G"
            annotation = "BS"
        "#;
        let settings = settings_from_toml(raw);
        let err = settings.validate_config().expect_err("should fail");
        assert!(err.to_string().contains("mag_column and mag_limit"));
    }

    #[test]
    fn rejects_inverted_limits() {
        let raw = r#"
            synonym_radius_arcsec = 0.5
            galaxy_radius_stretch_factor = 1.2

            [[search]]
            name = "stars"
            database_table = "tcs_view_star_gaia"
            angular_radius_arcsec = 10
            [search.bright]
            mag_column = "G"
            mag_limit = 19
            association = "BS"
            [search.faint]
            mag_column = "G"
            mag_limit = 16
            association = "VS"
        "#;
        let settings = settings_from_toml(raw);
        let err = settings.validate_config().expect_err("should fail");
        assert!(err.to_string().contains("must be below faint"));
    }

    #[test]
    fn rejects_duplicate_names_and_bad_tables() {
        let raw = r#"
            synonym_radius_arcsec = 0.5
            galaxy_radius_stretch_factor = 1.2

            [[search]]
            name = "a"
            database_table = "view; drop table x"
            angular_radius_arcsec = 10
            [search.general]
            association = "SN"
        "#;
        let err = settings_from_toml(raw)
            .validate_config()
            .expect_err("should fail");
        assert!(err.to_string().contains("invalid database_table"));

        let raw = r#"
            synonym_radius_arcsec = 0.5
            galaxy_radius_stretch_factor = 1.2

            [[search]]
            name = "a"
            database_table = "v1"
            angular_radius_arcsec = 10
            [search.general]
            association = "SN"

            [[search]]
            name = "a"
            database_table = "v2"
            angular_radius_arcsec = 10
            [search.general]
            association = "SN"
        "#;
        let err = settings_from_toml(raw)
            .validate_config()
            .expect_err("should fail");
        assert!(err.to_string().contains("duplicate search name"));
    }

    #[test]
    fn block_physical_radius_overrides_search() {
        let raw = r#"
            synonym_radius_arcsec = 0.5
            galaxy_radius_stretch_factor = 1.2

            [[search]]
            name = "glade galaxies"
            database_table = "tcs_view_galaxy_glade"
            angular_radius_arcsec = 120
            physical_radius_kpc = 50
            [search.general]
            association = "SN"
            [search.faint]
            mag_column = "B"
            mag_limit = 21
            physical_radius_kpc = 20
            annotation = "SN"
        "#;
        let settings = settings_from_toml(raw);
        let search = &settings.searches[0];
        assert_eq!(search.physical_radius_for(BrightnessFilter::General), Some(50.0));
        assert_eq!(search.physical_radius_for(BrightnessFilter::Faint), Some(20.0));
        assert_eq!(search.faint.as_ref().and_then(|r| r.mag_band), Some(Band::B));
    }

    #[test]
    fn parses_stream_refresh_and_transients() {
        let raw = r#"
            synonym_radius_arcsec = 0.5
            galaxy_radius_stretch_factor = 1.2

            [transients]
            table = "transients"
            id_column = "transient_object_id"
            pending_query = "SELECT id, ra, dec FROM transients WHERE classification IS NULL"

            [stream_refresh]
            search_radius_arcsec = 900
            first_pass_radius_arcsec = 200
            refresh_interval = "2days"

            [batch]
            poll_interval = "0s"

            [[search]]
            name = "a"
            database_table = "v1"
            angular_radius_arcsec = 10
            [search.general]
            association = "SN"
        "#;
        let parsed: FileSettings = toml::from_str(raw).expect("parse settings");
        let err = Settings::from_raw(parsed).expect_err("zero poll interval");
        assert!(err.to_string().contains("greater than zero"));

        let raw = raw.replace("poll_interval = \"0s\"", "poll_interval = \"30s\"");
        let settings = settings_from_toml(&raw);
        let refresh = settings.stream_refresh.as_ref().expect("refresh");
        assert_eq!(refresh.refresh_interval, Duration::from_secs(2 * 86_400));
        let source = settings.transients.as_ref().expect("transients");
        assert_eq!(source.classification_column, "classification");
        assert_eq!(source.id_column, "transient_object_id");
        settings.validate_config().expect("valid");
    }
}
