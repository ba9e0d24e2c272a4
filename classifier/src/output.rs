use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sleuth_types::{Classification, Crossmatch, Transient, TransientId};

use crate::engine::ClassifiedBatch;

/// Writes `classifications.json` and `crossmatches.json` for one batch.
pub fn write_artifacts(output_dir: &Path, batch: &ClassifiedBatch) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    write_array_file(output_dir.join("classifications.json"), |writer| {
        write_elements(writer, &batch.ranked.classifications)
    })?;
    write_array_file(output_dir.join("crossmatches.json"), |writer| {
        write_elements(writer, &batch.ranked.crossmatches)
    })?;

    Ok(())
}

fn write_elements<T: Serialize>(writer: &mut dyn Write, items: &[T]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        serde_json::to_writer(&mut *writer, item)?;
    }
    Ok(())
}

fn write_array_file<F>(path: impl AsRef<Path>, mut write_fn: F) -> Result<()>
where
    F: FnMut(&mut dyn Write) -> Result<()>,
{
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(b"[")
        .with_context(|| format!("failed to start {}", path.display()))?;
    write_fn(&mut writer)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer
        .write_all(b"]")
        .with_context(|| format!("failed to finalize {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    Ok(())
}

/// Plain-text verdict table followed by the ranked crossmatches.
pub fn print_batch(out: &mut dyn Write, batch: &ClassifiedBatch) -> Result<()> {
    writeln!(
        out,
        "{:<12} {:<16} {:<15} {:>9}  {}",
        "transient", "name", "classification", "sep (\")", "summary"
    )?;
    for classification in &batch.ranked.classifications {
        writeln!(out, "{}", classification_row(classification, &batch.transients))?;
    }

    if batch.ranked.crossmatches.is_empty() {
        return Ok(());
    }

    writeln!(out)?;
    writeln!(
        out,
        "{:<12} {:>4} {:<24} {:<28} {:<6} {:>9} {:>9} {:>10}  {}",
        "transient", "rank", "catalogue", "object", "type", "sep (\")", "kpc", "score", "search"
    )?;
    for crossmatch in &batch.ranked.crossmatches {
        writeln!(out, "{}", crossmatch_row(crossmatch))?;
    }
    Ok(())
}

fn transient_name(id: TransientId, transients: &[Transient]) -> &str {
    transients
        .iter()
        .find(|t| t.id == id)
        .and_then(|t| t.name.as_deref())
        .unwrap_or("-")
}

fn classification_row(classification: &Classification, transients: &[Transient]) -> String {
    format!(
        "{:<12} {:<16} {:<15} {:>9}  {}",
        classification.transient_object_id,
        transient_name(classification.transient_object_id, transients),
        classification.classification,
        optional(classification.separation_arcsec, 2),
        classification.summary.as_deref().unwrap_or("-"),
    )
}

fn crossmatch_row(m: &Crossmatch) -> String {
    let rank = match (m.rank, m.merged_rank) {
        (Some(rank), _) => rank.to_string(),
        (None, Some(merged)) => format!("({merged})"),
        (None, None) => "-".to_string(),
    };
    format!(
        "{:<12} {:>4} {:<24} {:<28} {:<6} {:>9.2} {:>9} {:>10}  {}",
        m.transient_object_id,
        rank,
        truncate(&m.catalogue_table_name, 24),
        truncate(&m.catalogue_object_id, 28),
        m.association_type,
        m.separation_arcsec,
        optional(m.physical_separation_kpc, 2),
        optional(m.rank_score, 3),
        m.search_name,
    )
}

fn optional(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        value.chars().take(width - 1).chain(['~']).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sleuth_types::Reliability;
    use tempfile::tempdir;

    use super::*;
    use crate::ranker::RankedBatch;
    use crate::ranker::tests::raw;

    fn batch() -> ClassifiedBatch {
        let mut top = raw(7, "NGC 1", Reliability::Association, "SN", 2.5);
        top.rank = Some(1);
        top.rank_score = Some(2012.0);
        let mut verdict = Classification::new(7, "SN");
        verdict.summary = Some("2.5\" from galaxy in tcs_cat_ned".to_string());
        verdict.separation_arcsec = Some(2.5);

        ClassifiedBatch {
            transients: vec![
                Transient::new(7, 10.0, 10.0).with_name("AT2024abc"),
                Transient::new(8, 20.0, 20.0),
            ],
            ranked: RankedBatch {
                classifications: vec![verdict, Classification::orphan(8)],
                crossmatches: vec![top],
            },
            ..ClassifiedBatch::default()
        }
    }

    #[test]
    fn artifacts_are_json_arrays() {
        let dir = tempdir().expect("tempdir");
        write_artifacts(dir.path(), &batch()).expect("write artifacts");

        let raw = fs::read_to_string(dir.path().join("classifications.json")).expect("read");
        let classifications: Vec<Classification> = serde_json::from_str(&raw).expect("parse");
        assert_eq!(classifications, batch().ranked.classifications);

        let raw = fs::read_to_string(dir.path().join("crossmatches.json")).expect("read");
        let crossmatches: Vec<Crossmatch> = serde_json::from_str(&raw).expect("parse");
        assert_eq!(crossmatches.len(), 1);
        assert_eq!(crossmatches[0].catalogue_object_id, "NGC 1");
    }

    #[test]
    fn table_lists_every_transient() {
        let mut out = Vec::new();
        print_batch(&mut out, &batch()).expect("print");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[1].starts_with("7            AT2024abc        SN"));
        assert!(lines[1].ends_with("2.5\" from galaxy in tcs_cat_ned"));
        assert!(lines[2].starts_with("8            -                ORPHAN"));
        assert!(lines[5].contains("NGC 1"));
        assert!(lines[5].contains("2012.000"));
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("tcs_view_galaxy_ned_d_spec_v14", 10), "tcs_view_~");
        assert_eq!(truncate("short", 10), "short");
    }
}
