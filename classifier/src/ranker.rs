//! Merges duplicate matches, scores them and picks a classification.

use std::collections::{HashMap, HashSet};

use sleuth_types::{Classification, Crossmatch, DistanceFlag, Reliability, Transient, TransientId};

use crate::clustering::cluster;

/// Matches of one transient closer than this are the same source.
pub const MERGE_RADIUS_ARCSEC: f64 = 1.0;

/// Earlier entries win classification ties between equally accurate catalogues.
pub const TYPE_PRIORITY: [&str; 6] = ["AGN", "CV", "NT", "SN", "VS", "BS"];

const TRANSIENT_HOST_TYPES: [&str; 3] = ["SN", "NT", "AGN"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RankOptions {
    /// Keep only the top-ranked row per transient.
    pub lite: bool,
}

#[derive(Debug, Default)]
pub struct RankedBatch {
    /// One entry per input transient, in input order.
    pub classifications: Vec<Classification>,
    pub crossmatches: Vec<Crossmatch>,
}

impl RankedBatch {
    pub fn top_match(&self, id: TransientId) -> Option<&Crossmatch> {
        self.crossmatches
            .iter()
            .find(|m| m.transient_object_id == id && m.rank == Some(1))
    }
}

pub fn rank_classifications(
    transients: &[Transient],
    raw: Vec<Crossmatch>,
    options: RankOptions,
) -> RankedBatch {
    let mut by_transient: HashMap<TransientId, Vec<Crossmatch>> = HashMap::new();
    for crossmatch in raw {
        by_transient
            .entry(crossmatch.transient_object_id)
            .or_default()
            .push(crossmatch);
    }

    let mut batch = RankedBatch::default();
    let mut seen = HashSet::with_capacity(transients.len());
    for transient in transients {
        if !seen.insert(transient.id) {
            continue;
        }
        let Some(matches) = by_transient.remove(&transient.id) else {
            batch.classifications.push(Classification::orphan(transient.id));
            continue;
        };

        let ranked = rank_transient(matches, options);
        if let Some(top) = ranked.first() {
            let mut classification = Classification::new(transient.id, top.association_type.clone());
            classification.separation_arcsec = Some(top.separation_arcsec);
            batch.classifications.push(classification);
        }
        batch.crossmatches.extend(ranked);
    }

    batch
}

/// Ranked rows for one transient: each distinct match followed by the
/// constituents of its cluster.
fn rank_transient(matches: Vec<Crossmatch>, options: RankOptions) -> Vec<Crossmatch> {
    let points: Vec<(f64, f64)> = matches.iter().map(|m| (m.ra_deg, m.dec_deg)).collect();
    let groups = cluster(&points, MERGE_RADIUS_ARCSEC);

    let mut distinct: Vec<(Crossmatch, Vec<usize>)> = groups
        .into_iter()
        .filter_map(|group| {
            let members: Vec<&Crossmatch> = group.iter().map(|i| &matches[*i]).collect();
            let mut merged = merge_cluster(&members)?;
            merged.rank_score = Some(rank_score(&merged));
            Some((merged, group))
        })
        .collect();

    distinct.sort_by(|(a, _), (b, _)| {
        let a = a.rank_score.unwrap_or(f64::INFINITY);
        let b = b.rank_score.unwrap_or(f64::INFINITY);
        a.total_cmp(&b)
    });

    let mut rows = Vec::new();
    for (position, (mut merged, group)) in distinct.into_iter().enumerate() {
        let rank = position as u32 + 1;
        merged.rank = Some(rank);
        let score = merged.rank_score;
        if options.lite {
            if rank == 1 {
                rows.push(merged);
            }
            continue;
        }
        rows.push(merged);

        if group.len() > 1 {
            let mut seen: HashSet<(&str, &str)> = HashSet::new();
            for index in &group {
                let member = &matches[*index];
                let key = (
                    member.catalogue_table_name.as_str(),
                    member.catalogue_object_id.as_str(),
                );
                if !seen.insert(key) {
                    continue;
                }
                let mut constituent = member.clone();
                constituent.rank = None;
                constituent.merged_rank = Some(rank);
                constituent.rank_score = score;
                rows.push(constituent);
            }
        }
    }
    rows
}

fn type_priority(association_type: &str) -> usize {
    TYPE_PRIORITY
        .iter()
        .position(|t| *t == association_type)
        .unwrap_or(TYPE_PRIORITY.len())
}

/// True when `candidate` should replace `best` as the cluster's classification.
fn upgrades(best: &Crossmatch, candidate: &Crossmatch) -> bool {
    if candidate.reliability == Reliability::Annotation {
        return false;
    }
    if best.reliability == Reliability::Annotation {
        return true;
    }
    if candidate.reliability > best.reliability {
        return false;
    }
    candidate.object_type_accuracy > best.object_type_accuracy
        || (candidate.object_type_accuracy == best.object_type_accuracy
            && type_priority(&candidate.association_type) < type_priority(&best.association_type))
}

/// Most accurate member carrying the given value; the first wins ties.
fn most_accurate<'a>(
    members: &[&'a Crossmatch],
    has_value: impl Fn(&Crossmatch) -> bool,
) -> Option<&'a Crossmatch> {
    let mut best: Option<&Crossmatch> = None;
    for member in members.iter().copied().filter(|m| has_value(m)) {
        if best.is_none_or(|current| member.object_type_accuracy > current.object_type_accuracy) {
            best = Some(member);
        }
    }
    best
}

/// Folds one cluster into a single record seeded from its first member.
pub fn merge_cluster(members: &[&Crossmatch]) -> Option<Crossmatch> {
    let (seed, rest) = members.split_first()?;
    let mut merged = (*seed).clone();
    merged.rank = None;
    merged.merged_rank = None;

    let mut classifier: &Crossmatch = seed;
    let mut closest: &Crossmatch = seed;
    for &member in rest {
        merged.photometry.merge_from(&member.photometry);
        if upgrades(classifier, member) {
            classifier = member;
        }
        if member.separation_arcsec < closest.separation_arcsec {
            closest = member;
        }
    }

    merge_search_names(&mut merged, members);

    merged.association_type = classifier.association_type.clone();
    merged.reliability = classifier.reliability;
    merged.object_type_accuracy = classifier.object_type_accuracy;
    merged.catalogue_object_type = classifier.catalogue_object_type.clone();
    merged.catalogue_object_subtype = classifier.catalogue_object_subtype.clone();

    merged.separation_arcsec = closest.separation_arcsec;
    merged.north_separation_arcsec = closest.north_separation_arcsec;
    merged.east_separation_arcsec = closest.east_separation_arcsec;
    merged.ra_deg = closest.ra_deg;
    merged.dec_deg = closest.dec_deg;

    let photo_z = most_accurate(members, |m| m.photo_z.is_some());
    let spec_z = most_accurate(members, |m| m.z.is_some());
    let direct = most_accurate(members, |m| m.direct_distance.is_some());

    if let Some(source) = photo_z {
        merged.photo_z = source.photo_z;
        merged.photo_z_err = source.photo_z_err;
        copy_redshift_distance(&mut merged, source);
    }
    if let Some(source) = spec_z {
        merged.z = source.z;
        copy_redshift_distance(&mut merged, source);
    }
    if let Some(source) = direct {
        merged.direct_distance = source.direct_distance;
        merged.direct_distance_modulus = source.direct_distance_modulus;
        merged.direct_distance_scale = source.direct_distance_scale;
    }
    merged.refresh_physical_separation();

    let (distance, flag, source) = match (direct, spec_z, photo_z) {
        (Some(src), _, _) => (src.direct_distance, Some(DistanceFlag::Direct), Some(src)),
        (None, Some(src), _) if src.distance.is_some() => {
            (src.distance, Some(DistanceFlag::SpecZ), Some(src))
        }
        (None, _, Some(src)) if src.distance.is_some() => {
            (src.distance, Some(DistanceFlag::PhotoZ), Some(src))
        }
        _ => (None, None, None),
    };
    merged.best_distance = distance;
    merged.best_distance_flag = flag;
    merged.best_distance_source = source.map(|src| src.catalogue_view_name.clone());

    Some(merged)
}

fn copy_redshift_distance(merged: &mut Crossmatch, source: &Crossmatch) {
    if source.distance.is_some() {
        merged.distance = source.distance;
        merged.distance_modulus = source.distance_modulus;
        merged.scale = source.scale;
    }
}

/// Uppercased first words of the members' search names, NED, SDSS and
/// MILLIQUAS first.
fn merge_search_names(merged: &mut Crossmatch, members: &[&Crossmatch]) {
    let mut tokens: Vec<(u8, String, &Crossmatch)> = Vec::new();
    for member in members {
        let token = member
            .search_name
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_uppercase();
        if tokens.iter().any(|(_, existing, _)| *existing == token) {
            continue;
        }
        tokens.push((member.catalogue_kind.token_priority(), token, member));
    }
    tokens.sort_by_key(|(priority, _, _)| *priority);

    if tokens.len() > 1 {
        merged.search_name = "multiple".to_string();
        merged.catalogue_table_name = tokens
            .iter()
            .map(|(_, token, _)| token.as_str())
            .collect::<Vec<_>>()
            .join("/");
        let leader = tokens[0].2;
        merged.catalogue_object_id = leader.catalogue_object_id.clone();
        merged.catalogue_kind = leader.catalogue_kind;
        merged.catalogue_table_id = leader.catalogue_table_id;
        merged.catalogue_view_id = leader.catalogue_view_id;
        merged.catalogue_view_name = leader.catalogue_view_name.clone();
    }
}

/// Lower is better. Reliability dominates through the x1000 term.
pub fn rank_score(m: &Crossmatch) -> f64 {
    let tier = f64::from(m.reliability.tier()) * 1000.0;
    let sep = m.separation_arcsec;
    let sep_term = (sep / 60.0).min(100.0);
    let host_type = TRANSIENT_HOST_TYPES.contains(&m.association_type.as_str());

    if let Some(kpc) = m.physical_separation_kpc {
        if m.has_spec_z() || !m.has_usable_photo_z() {
            return tier + 2.0 - (50.0 - kpc) + sep_term;
        }
        if host_type {
            return tier + 5.0 - (50.0 - kpc) + sep_term;
        }
    }

    match m.association_type.as_str() {
        _ if host_type => tier + 2.0 + sep_term,
        "CV" | "VS" => tier + sep + 2.0,
        "BS" => tier + sep,
        _ => tier + 10.0 + sep_term,
    }
}
