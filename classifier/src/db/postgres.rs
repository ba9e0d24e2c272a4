use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sleuth_types::{Band, CatalogueKind, Classification, Crossmatch, Magnitude, Photometry, Transient, TransientId};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use tracing::debug;

use crate::column_map::{BandColumns, ColumnMap, ColumnMaps};
use crate::conesearch::{
    CatalogueRow, CatalogueSession, ConeMatch, ConeSearchRequest, MagnitudeLimits, match_rows,
};
use crate::db::{
    CatalogueStore, StreamQuery, StreamQueryLog, TransientStore, is_valid_identifier, quote_ident,
};
use crate::error::{ClassifierError, ClassifierResult};
use crate::htm::{cone_ranges, merge_ranges};
use crate::settings::TransientSource;

const INSERT_BATCH_SIZE: usize = 1000;
const MAX_RANGES_PER_QUERY: usize = 4000;

pub async fn connect(url: &str, max_connections: u32) -> ClassifierResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Creates or upgrades the results tables in the transients database.
pub async fn run_migrations(pool: &PgPool) -> ClassifierResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Bundled migration versions the transients database has not applied yet.
pub async fn pending_migrations(pool: &PgPool) -> ClassifierResult<Vec<i64>> {
    let migrator = sqlx::migrate!("./migrations");
    let tracked: bool = sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
        .fetch_one(pool)
        .await?;
    let applied: HashSet<i64> = if tracked {
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    Ok(migrator
        .iter()
        .map(|migration| migration.version)
        .filter(|version| !applied.contains(version))
        .collect())
}

#[derive(Clone)]
pub struct PgCatalogueStore {
    pool: PgPool,
}

impl PgCatalogueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ViewInfoRow {
    view_id: i32,
    view_name: String,
    table_id: i32,
    table_name: String,
    description: Option<String>,
    catalogue_kind: Option<String>,
    object_type: Option<String>,
    object_type_accuracy: Option<f64>,
    object_id_col: String,
    ra_col: String,
    dec_col: String,
    subtype_col: Option<String>,
    redshift_col: Option<String>,
    photo_z_col: Option<String>,
    photo_z_err_col: Option<String>,
    distance_col: Option<String>,
    semi_major_col: Option<String>,
    semi_major_to_arcsec: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct BandColumnRow {
    view_id: i32,
    band: String,
    value_column: String,
    error_column: Option<String>,
}

#[async_trait]
impl CatalogueStore for PgCatalogueStore {
    type Session = PgCatalogueSession;

    async fn column_maps(&self) -> ClassifierResult<ColumnMaps> {
        let views: Vec<ViewInfoRow> = sqlx::query_as(
            r#"
            SELECT
                v.id AS view_id,
                v.view_name,
                t.id AS table_id,
                t.table_name,
                t.description,
                t.catalogue_kind,
                v.object_type,
                CAST(t.object_type_accuracy AS DOUBLE PRECISION) AS object_type_accuracy,
                v.object_id_col,
                v.ra_col,
                v.dec_col,
                v.subtype_col,
                v.redshift_col,
                v.photo_z_col,
                v.photo_z_err_col,
                v.distance_col,
                v.semi_major_col,
                CAST(v.semi_major_to_arcsec AS DOUBLE PRECISION) AS semi_major_to_arcsec
            FROM tcs_helper_catalogue_views_info v
            JOIN tcs_helper_catalogue_tables_info t ON t.id = v.table_id
            ORDER BY v.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let band_rows: Vec<BandColumnRow> = sqlx::query_as(
            "SELECT view_id, band, value_column, error_column FROM tcs_helper_catalogue_band_columns",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut bands: HashMap<i32, BTreeMap<Band, BandColumns>> = HashMap::new();
        for row in band_rows {
            let band = row.band.parse::<Band>().map_err(|err| {
                ClassifierError::config(format!("view id {}: {err}", row.view_id))
            })?;
            bands.entry(row.view_id).or_default().insert(
                band,
                BandColumns {
                    value: row.value_column,
                    error: row.error_column,
                },
            );
        }

        let maps = views
            .into_iter()
            .map(|view| {
                let map = ColumnMap {
                    bands: bands.remove(&view.view_id).unwrap_or_default(),
                    view_id: view.view_id,
                    view_name: view.view_name,
                    table_id: view.table_id,
                    table_name: view.table_name,
                    description: view.description,
                    kind: view
                        .catalogue_kind
                        .as_deref()
                        .map(CatalogueKind::from_label)
                        .unwrap_or(CatalogueKind::Other),
                    object_type: view.object_type,
                    object_type_accuracy: view.object_type_accuracy.unwrap_or(0.0),
                    object_id_col: view.object_id_col,
                    ra_col: view.ra_col,
                    dec_col: view.dec_col,
                    subtype_col: view.subtype_col,
                    redshift_col: view.redshift_col,
                    photo_z_col: view.photo_z_col,
                    photo_z_err_col: view.photo_z_err_col,
                    distance_col: view.distance_col,
                    semi_major_col: view.semi_major_col,
                    semi_major_to_arcsec: view.semi_major_to_arcsec.unwrap_or(1.0),
                };
                map.validate()?;
                Ok(map)
            })
            .collect::<ClassifierResult<Vec<_>>>()?;

        debug!(views = maps.len(), "loaded catalogue column maps");
        Ok(ColumnMaps::new(maps))
    }

    async fn session(&self) -> ClassifierResult<PgCatalogueSession> {
        let conn = self.pool.acquire().await?;
        Ok(PgCatalogueSession { conn })
    }
}

#[async_trait]
impl StreamQueryLog for PgCatalogueStore {
    async fn recent_queries(&self, since: DateTime<Utc>) -> ClassifierResult<Vec<StreamQuery>> {
        let rows: Vec<(f64, f64, f64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT ra_deg, dec_deg, radius_arcsec, queried_at
            FROM tcs_helper_ned_query_history
            WHERE queried_at > $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ra, dec, radius_arcsec, queried_at)| StreamQuery {
                ra,
                dec,
                radius_arcsec,
                queried_at,
            })
            .collect())
    }

    async fn record_queries(&self, queries: &[StreamQuery]) -> ClassifierResult<()> {
        for chunk in queries.chunks(INSERT_BATCH_SIZE) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO tcs_helper_ned_query_history (ra_deg, dec_deg, radius_arcsec, queried_at) ",
            );
            qb.push_values(chunk, |mut b, query| {
                b.push_bind(query.ra)
                    .push_bind(query.dec)
                    .push_bind(query.radius_arcsec)
                    .push_bind(query.queried_at);
            });
            qb.build().execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// One pooled connection, owned by a single worker for its lifetime.
pub struct PgCatalogueSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl CatalogueSession for PgCatalogueSession {
    async fn conesearch(
        &mut self,
        map: &ColumnMap,
        request: &ConeSearchRequest<'_>,
    ) -> ClassifierResult<Vec<ConeMatch>> {
        map.validate()?;
        let level = map.htm_level();
        let ranges = merge_ranges(
            request
                .points
                .iter()
                .flat_map(|(ra, dec)| cone_ranges(*ra, *dec, request.radius_arcsec, level))
                .collect(),
        );
        if ranges.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        for chunk in ranges.chunks(MAX_RANGES_PER_QUERY) {
            let mut qb = conesearch_query(map, chunk, request)?;
            let fetched = qb.build().fetch_all(&mut *self.conn).await?;
            for row in &fetched {
                if let Some(row) = decode_row(map, row)? {
                    rows.push(row);
                }
            }
        }

        debug!(
            view = %map.view_name,
            points = request.points.len(),
            ranges = ranges.len(),
            candidates = rows.len(),
            "conesearch"
        );

        Ok(match_rows(
            request.points,
            &rows,
            request.radius_arcsec,
            request.nearest_only,
        ))
    }
}

fn conesearch_query<'a>(
    map: &ColumnMap,
    ranges: &[(u64, u64)],
    request: &ConeSearchRequest<'_>,
) -> ClassifierResult<QueryBuilder<'a, Postgres>> {
    let mut qb = QueryBuilder::new(select_list(map));
    let htm_column = map.htm_column();

    qb.push(" WHERE (");
    for (i, (start, end)) in ranges.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(format!("{htm_column} BETWEEN "))
            .push_bind(*start as i64)
            .push(" AND ")
            .push_bind(*end as i64);
    }
    qb.push(")");

    if let Some(limits) = request.magnitude {
        push_magnitude_predicate(&mut qb, map, limits)?;
    }
    if request.require_distance_info {
        push_distance_predicate(&mut qb, map);
    }
    Ok(qb)
}

fn select_list(map: &ColumnMap) -> String {
    let mut columns = vec![
        format!("CAST({} AS TEXT) AS object_id", quote_ident(&map.object_id_col)),
        numeric(Some(&map.ra_col), "ra"),
        numeric(Some(&map.dec_col), "dec_deg"),
        match &map.subtype_col {
            Some(col) => format!("CAST({} AS TEXT) AS subtype", quote_ident(col)),
            None => "CAST(NULL AS TEXT) AS subtype".to_string(),
        },
        numeric(map.redshift_col.as_deref(), "z"),
        numeric(map.photo_z_col.as_deref(), "photo_z"),
        numeric(map.photo_z_err_col.as_deref(), "photo_z_err"),
        numeric(map.distance_col.as_deref(), "distance_mpc"),
        numeric(map.semi_major_col.as_deref(), "semi_major"),
    ];
    for (i, cols) in map.bands.values().enumerate() {
        columns.push(numeric(Some(&cols.value), &format!("band_{i}_value")));
        columns.push(numeric(cols.error.as_deref(), &format!("band_{i}_error")));
    }

    format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_ident(&map.view_name)
    )
}

fn numeric(column: Option<&str>, alias: &str) -> String {
    match column {
        Some(col) => format!("CAST({} AS DOUBLE PRECISION) AS {alias}", quote_ident(col)),
        None => format!("CAST(NULL AS DOUBLE PRECISION) AS {alias}"),
    }
}

fn push_magnitude_predicate(
    qb: &mut QueryBuilder<'_, Postgres>,
    map: &ColumnMap,
    limits: MagnitudeLimits,
) -> ClassifierResult<()> {
    let columns = map.band(limits.band).ok_or_else(|| {
        ClassifierError::config(format!(
            "view '{}' has no column for band {}",
            map.view_name, limits.band
        ))
    })?;
    let col = quote_ident(&columns.value);

    qb.push(" AND (");
    if limits.admit_missing {
        qb.push(format!("{col} IS NULL OR "));
    }
    qb.push("(TRUE");
    if let Some(limit) = limits.brighter_than {
        qb.push(format!(" AND {col} < ")).push_bind(limit);
    }
    if let Some(limit) = limits.fainter_than {
        qb.push(format!(" AND {col} > ")).push_bind(limit);
    }
    qb.push("))");
    Ok(())
}

fn push_distance_predicate(qb: &mut QueryBuilder<'_, Postgres>, map: &ColumnMap) {
    let columns = map.distance_info_columns();
    if columns.is_empty() {
        qb.push(" AND FALSE");
        return;
    }
    let checks: Vec<String> = columns
        .iter()
        .map(|col| format!("{} IS NOT NULL", quote_ident(col)))
        .collect();
    qb.push(format!(" AND ({})", checks.join(" OR ")));
}

fn decode_row(map: &ColumnMap, row: &PgRow) -> ClassifierResult<Option<CatalogueRow>> {
    let ra: Option<f64> = row.try_get("ra")?;
    let dec: Option<f64> = row.try_get("dec_deg")?;
    let (Some(ra), Some(dec)) = (ra, dec) else {
        return Ok(None);
    };

    let mut photometry = Photometry::default();
    for (i, band) in map.bands.keys().enumerate() {
        let value: Option<f64> = row.try_get(format!("band_{i}_value").as_str())?;
        let error: Option<f64> = row.try_get(format!("band_{i}_error").as_str())?;
        if let Some(value) = value {
            photometry.insert(*band, Magnitude::new(value, error));
        }
    }

    let object_id: Option<String> = row.try_get("object_id")?;
    let semi_major: Option<f64> = row.try_get("semi_major")?;
    Ok(Some(CatalogueRow {
        object_id: object_id.unwrap_or_default(),
        ra,
        dec,
        subtype: row.try_get("subtype")?,
        z: row.try_get("z")?,
        photo_z: row.try_get("photo_z")?,
        photo_z_err: row.try_get("photo_z_err")?,
        distance_mpc: row.try_get("distance_mpc")?,
        semi_major_arcsec: semi_major.map(|axis| axis * map.semi_major_to_arcsec),
        photometry,
    }))
}

#[derive(Clone)]
pub struct PgTransientStore {
    pool: PgPool,
    source: TransientSource,
}

impl PgTransientStore {
    pub fn new(pool: PgPool, source: TransientSource) -> ClassifierResult<Self> {
        for ident in [&source.table, &source.id_column, &source.classification_column] {
            if !is_valid_identifier(ident) {
                return Err(ClassifierError::config(format!(
                    "transient source identifier '{ident}' is not a plain SQL identifier"
                )));
            }
        }
        Ok(Self { pool, source })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransientStore for PgTransientStore {
    async fn count_pending(&self) -> ClassifierResult<i64> {
        let sql = format!(
            r#"SELECT COUNT(*) FROM ({}) AS p WHERE p.ra IS NOT NULL AND p."dec" IS NOT NULL"#,
            self.source.pending_query
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn fetch_pending(&self, limit: usize) -> ClassifierResult<Vec<Transient>> {
        let sql = format!(
            r#"
            SELECT
                CAST(p.id AS BIGINT),
                CAST(p.ra AS DOUBLE PRECISION),
                CAST(p."dec" AS DOUBLE PRECISION),
                to_jsonb(p) ->> 'name'
            FROM ({}) AS p
            WHERE p.ra IS NOT NULL AND p."dec" IS NOT NULL
            LIMIT $1
            "#,
            self.source.pending_query
        );
        let rows: Vec<(i64, f64, f64, Option<String>)> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, ra, dec, name)| Transient { id, ra, dec, name })
            .collect())
    }

    async fn peak_magnitudes(
        &self,
        ids: &[TransientId],
    ) -> ClassifierResult<HashMap<TransientId, f64>> {
        let Some(query) = &self.source.peak_magnitude_query else {
            return Ok(HashMap::new());
        };
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            r#"
            SELECT CAST(p.id AS BIGINT), CAST(p.mag AS DOUBLE PRECISION)
            FROM ({query}) AS p
            WHERE p.id = ANY($1) AND p.mag IS NOT NULL
            "#
        );
        let rows: Vec<(i64, f64)> = sqlx::query_as(&sql)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn write_results(
        &self,
        classifications: &[Classification],
        crossmatches: &[Crossmatch],
    ) -> ClassifierResult<()> {
        let classifications = dedup_classifications(classifications);
        if classifications.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = classifications
            .iter()
            .map(|c| c.transient_object_id)
            .collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM transient_crossmatches WHERE transient_object_id = ANY($1)")
            .bind(&ids)
            .execute(tx.as_mut())
            .await?;
        insert_crossmatches(&mut tx, crossmatches).await?;
        upsert_classifications(&mut tx, &classifications).await?;
        self.update_source_table(&mut tx, &classifications).await?;

        tx.commit().await?;
        Ok(())
    }
}

impl PgTransientStore {
    async fn update_source_table(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        classifications: &[&Classification],
    ) -> ClassifierResult<()> {
        let sql = format!(
            r#"
            UPDATE {table} AS t
            SET {column} = v.classification
            FROM UNNEST($1::BIGINT[], $2::TEXT[]) AS v(id, classification)
            WHERE t.{id} = v.id
            "#,
            table = quote_ident(&self.source.table),
            column = quote_ident(&self.source.classification_column),
            id = quote_ident(&self.source.id_column),
        );
        let ids: Vec<i64> = classifications
            .iter()
            .map(|c| c.transient_object_id)
            .collect();
        let types: Vec<String> = classifications
            .iter()
            .map(|c| c.classification.clone())
            .collect();

        sqlx::query(&sql)
            .bind(ids)
            .bind(types)
            .execute(tx.as_mut())
            .await?;
        Ok(())
    }
}

fn dedup_classifications(classifications: &[Classification]) -> Vec<&Classification> {
    let mut seen = HashSet::with_capacity(classifications.len());
    let mut deduped = Vec::with_capacity(classifications.len());

    for classification in classifications {
        if seen.insert(classification.transient_object_id) {
            deduped.push(classification);
        }
    }

    deduped
}

async fn insert_crossmatches(
    tx: &mut Transaction<'_, Postgres>,
    crossmatches: &[Crossmatch],
) -> ClassifierResult<()> {
    for chunk in crossmatches.chunks(INSERT_BATCH_SIZE) {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"INSERT INTO transient_crossmatches (
                transient_object_id, catalogue_object_id, catalogue_table_id,
                catalogue_table_name, catalogue_view_name, catalogue_object_type,
                catalogue_object_subtype, search_name, classification_reliability,
                association_type, ra_deg, dec_deg, separation_arcsec,
                north_separation_arcsec, east_separation_arcsec, physical_separation_kpc,
                original_search_radius_arcsec, major_axis_arcsec, z, photo_z, photo_z_err,
                distance, distance_modulus, scale, direct_distance, direct_distance_modulus,
                direct_distance_scale, best_distance, best_distance_flag,
                best_distance_source, rank, rank_score, merged_rank, transient_abs_mag,
                photometry
            ) "#,
        );
        qb.push_values(chunk, |mut b, m| {
            b.push_bind(m.transient_object_id)
                .push_bind(&m.catalogue_object_id)
                .push_bind(m.catalogue_table_id)
                .push_bind(&m.catalogue_table_name)
                .push_bind(&m.catalogue_view_name)
                .push_bind(&m.catalogue_object_type)
                .push_bind(&m.catalogue_object_subtype)
                .push_bind(&m.search_name)
                .push_bind(i16::from(m.reliability.tier()))
                .push_bind(&m.association_type)
                .push_bind(m.ra_deg)
                .push_bind(m.dec_deg)
                .push_bind(m.separation_arcsec)
                .push_bind(m.north_separation_arcsec)
                .push_bind(m.east_separation_arcsec)
                .push_bind(m.physical_separation_kpc)
                .push_bind(m.original_search_radius_arcsec)
                .push_bind(m.major_axis_arcsec)
                .push_bind(m.z)
                .push_bind(m.photo_z)
                .push_bind(m.photo_z_err)
                .push_bind(m.distance)
                .push_bind(m.distance_modulus)
                .push_bind(m.scale)
                .push_bind(m.direct_distance)
                .push_bind(m.direct_distance_modulus)
                .push_bind(m.direct_distance_scale)
                .push_bind(m.best_distance)
                .push_bind(m.best_distance_flag.map(|flag| flag.as_str()))
                .push_bind(&m.best_distance_source)
                .push_bind(m.rank.map(|rank| rank as i32))
                .push_bind(m.rank_score)
                .push_bind(m.merged_rank.map(|rank| rank as i32))
                .push_bind(m.transient_abs_mag)
                .push_bind(Json(&m.photometry));
        });

        qb.build().execute(tx.as_mut()).await?;
    }
    Ok(())
}

async fn upsert_classifications(
    tx: &mut Transaction<'_, Postgres>,
    classifications: &[&Classification],
) -> ClassifierResult<()> {
    for chunk in classifications.chunks(INSERT_BATCH_SIZE) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO transient_classifications (transient_object_id, classification, annotation, summary, separation_arcsec) ",
        );
        qb.push_values(chunk.iter().copied(), |mut b, c| {
            b.push_bind(c.transient_object_id)
                .push_bind(&c.classification)
                .push_bind(&c.annotation)
                .push_bind(&c.summary)
                .push_bind(c.separation_arcsec);
        });
        qb.push(
            r#" ON CONFLICT (transient_object_id) DO UPDATE SET
                classification = EXCLUDED.classification,
                annotation = EXCLUDED.annotation,
                summary = EXCLUDED.summary,
                separation_arcsec = EXCLUDED.separation_arcsec,
                classified_at = now()"#,
        );

        qb.build().execute(tx.as_mut()).await?;
    }
    Ok(())
}
