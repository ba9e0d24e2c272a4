//! Human-readable annotation and summary for a transient's best match.

use std::collections::HashMap;

use sleuth_types::{CatalogueKind, Classification, Crossmatch, Reliability, TransientId};

use crate::coords::{dec_to_sexagesimal, ra_to_sexagesimal};

pub const ORPHAN_ANNOTATION: &str =
    "The transient location is not matched against any known catalogued source";
pub const ORPHAN_SUMMARY: &str = "No catalogued match";

/// Subtypes specific enough to replace the view's object type.
const SPECIFIC_SUBTYPES: [&str; 12] = [
    "uvs", "radios", "xray", "qso", "irs", "uves", "viss", "hii", "gclstr", "ggroup", "gpair",
    "gtrpl",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub annotation: String,
    pub summary: String,
}

/// Fills annotation, summary and separation from each transient's rank-1 row.
pub fn apply_annotations(classifications: &mut [Classification], crossmatches: &[Crossmatch]) {
    let top: HashMap<TransientId, &Crossmatch> = crossmatches
        .iter()
        .filter(|m| m.rank == Some(1))
        .map(|m| (m.transient_object_id, m))
        .collect();

    for classification in classifications.iter_mut() {
        if classification.is_orphan() {
            classification.annotation = Some(ORPHAN_ANNOTATION.to_string());
            classification.summary = Some(ORPHAN_SUMMARY.to_string());
            continue;
        }
        if let Some(best) = top.get(&classification.transient_object_id) {
            let rendered = annotate(best);
            classification.annotation = Some(rendered.annotation);
            classification.summary = Some(rendered.summary);
            classification.separation_arcsec = Some(best.separation_arcsec);
        }
    }
}

pub fn annotate(m: &Crossmatch) -> Annotation {
    let object_type = object_type_label(m);
    let catalogue = &m.catalogue_table_name;
    let catalogue_phrase = if catalogue.to_lowercase().contains("catalogue") {
        catalogue.clone()
    } else {
        format!("{catalogue} catalogue")
    };

    let verb = match m.reliability {
        Reliability::Synonym => "synonymous",
        Reliability::Association | Reliability::Annotation => "possibly associated",
    };

    let annotation = format!(
        "The transient is {verb} with <em>{}</em>; {} {object_type} found in the {catalogue_phrase}. It's located {}.{}",
        object_link(m),
        magnitude_phrase(m),
        location_phrase(m, &object_type),
        distance_sentence(m),
    );
    let summary = format!(
        "{:.1}\" from {object_type} in {catalogue}",
        m.separation_arcsec
    );

    Annotation {
        annotation,
        summary,
    }
}

fn object_type_label(m: &Crossmatch) -> String {
    let subtype = m
        .catalogue_object_subtype
        .as_deref()
        .map(str::to_lowercase)
        .filter(|subtype| SPECIFIC_SUBTYPES.contains(&subtype.as_str()));
    let raw = subtype
        .or_else(|| m.catalogue_object_type.clone())
        .unwrap_or_else(|| "unknown".to_string());

    match raw.as_str() {
        "star" => "stellar source".to_string(),
        "agn" => "AGN".to_string(),
        "cb" => "CV".to_string(),
        "unknown" => "unclassified source".to_string(),
        _ => raw,
    }
}

fn object_link(m: &Crossmatch) -> String {
    let id = &m.catalogue_object_id;
    match m.catalogue_kind {
        CatalogueKind::Ned => format!(
            "<a href=\"https://ned.ipac.caltech.edu/cgi-bin/objsearch?objname={}&extend=no\">{id}</a>",
            id.replace(' ', "+")
        ),
        CatalogueKind::Sdss => {
            let name = format!(
                "SDSS J{}{}",
                ra_to_sexagesimal(m.ra_deg),
                dec_to_sexagesimal(m.dec_deg)
            );
            format!(
                "<a href=\"http://skyserver.sdss.org/dr12/en/tools/explore/Summary.aspx?id={id}\">{name}</a>"
            )
        }
        CatalogueKind::Milliquas => format!(
            "<a href=\"https://heasarc.gsfc.nasa.gov/db-perl/W3Browse/w3table.pl?tablehead=name%3Dheasarc_milliquas&Action=Start+Search&bparam_name=%3D%22{}%22\">{id}</a>",
            id.replace(' ', "+")
        ),
        _ => id.clone(),
    }
}

/// "an R=18.00 mag" style phrase, or "an unknown-mag".
fn magnitude_phrase(m: &Crossmatch) -> String {
    let Some((band, mag)) = m.photometry.preferred() else {
        return "an unknown-mag".to_string();
    };
    let filter = band.filter_name();
    let article = match filter.chars().next() {
        Some(first) if matches!(first.to_ascii_lowercase(), 'r' | 'i' | 'h') => "an",
        Some(_) => "a",
        None if matches!(mag.value.trunc() as i64, 8 | 11 | 18) => "an",
        None => "a",
    };
    if filter.is_empty() {
        format!("{article} {:.2} mag", mag.value)
    } else {
        format!("{article} {filter}={:.2} mag", mag.value)
    }
}

fn location_phrase(m: &Crossmatch, object_type: &str) -> String {
    let physical = m
        .physical_separation_kpc
        .map(|kpc| format!(" ({kpc:.1} Kpc)"))
        .unwrap_or_default();

    if m.reliability == Reliability::Synonym {
        return format!(
            "{:.1}\"{physical} from the {object_type} core",
            m.separation_arcsec
        );
    }

    // Offsets describe the transient relative to the catalogue source.
    let north_south = if m.north_separation_arcsec > 0.0 { "S" } else { "N" };
    let east_west = if m.east_separation_arcsec > 0.0 { "W" } else { "E" };
    format!(
        "{:.2}\" {north_south}, {:.2}\" {east_west}{physical} from the {object_type} centre",
        m.north_separation_arcsec.abs(),
        m.east_separation_arcsec.abs()
    )
    .replace("unclassified", "object's")
}

fn distance_phrase(m: &Crossmatch) -> Option<String> {
    if let Some(distance) = m.direct_distance {
        let redshift = m.z.map(|z| format!(" (z={z:.3})")).unwrap_or_default();
        return Some(format!("distance of {distance:.1} Mpc{redshift}"));
    }
    if let Some(z) = m.z {
        return Some(format!("z={z:.3}"));
    }
    let photo_z = m.photo_z?;
    let error = m
        .photo_z_err
        .map(|err| format!(" (&plusmn{err:.3})"))
        .unwrap_or_default();
    Some(format!("photoZ={photo_z:.3}{error}"))
}

fn distance_sentence(m: &Crossmatch) -> String {
    let Some(distance) = distance_phrase(m) else {
        return String::new();
    };
    if let Some(abs_mag) = m.transient_abs_mag {
        return format!(" A host {distance} implies a transient <em>M =</em> {abs_mag:.2}.");
    }
    match m.best_distance_modulus() {
        Some(dmod) => format!(" A host {distance} implies a <em>m - M =</em> {dmod:.2}."),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sleuth_types::{Band, Magnitude};

    use super::*;
    use crate::ranker::tests::{raw, with_spec_z};

    #[test]
    fn synonym_annotation() {
        let mut m = with_spec_z(raw(1, "NGC 4993", Reliability::Synonym, "SN", 0.4), 0.0098, 42.2, 0.2);
        m.photometry.insert(Band::B, Magnitude::new(13.32, Some(0.1)));
        m.rank = Some(1);
        let rendered = annotate(&m);

        assert_eq!(
            rendered.annotation,
            "The transient is synonymous with <em><a href=\"https://ned.ipac.caltech.edu/cgi-bin/objsearch?objname=NGC+4993&extend=no\">NGC 4993</a></em>; \
             a B=13.32 mag galaxy found in the tcs_cat_ned catalogue. \
             It's located 0.4\" (0.1 Kpc) from the galaxy core. \
             A host z=0.010 implies a <em>m - M =</em> 33.13."
        );
        assert_eq!(rendered.summary, "0.4\" from galaxy in tcs_cat_ned");
    }

    #[test]
    fn association_location_and_abs_mag() {
        let mut m = raw(2, "J1", Reliability::Association, "SN", 3.0);
        m.catalogue_kind = CatalogueKind::Other;
        m.catalogue_table_name = "GLADE catalogue".to_string();
        m.catalogue_object_type = Some("unknown".to_string());
        m.north_separation_arcsec = 2.5;
        m.east_separation_arcsec = -1.25;
        m.direct_distance = Some(40.0);
        m.direct_distance_modulus = Some(33.01);
        m.z = Some(0.009);
        m.transient_abs_mag = Some(-16.456);
        m.photometry.insert(Band::R, Magnitude::new(18.0, None));
        let rendered = annotate(&m);

        assert_eq!(
            rendered.annotation,
            "The transient is possibly associated with <em>J1</em>; \
             an R=18.00 mag unclassified source found in the GLADE catalogue. \
             It's located 2.50\" S, 1.25\" E from the object's source centre. \
             A host distance of 40.0 Mpc (z=0.009) implies a transient <em>M =</em> -16.46."
        );
        assert_eq!(rendered.summary, "3.0\" from unclassified source in GLADE catalogue");
    }

    #[test]
    fn magnitude_articles() {
        let mut m = raw(1, "x", Reliability::Annotation, "VS", 1.0);
        assert_eq!(magnitude_phrase(&m), "an unknown-mag");
        m.photometry.insert(Band::Unknown, Magnitude::new(18.4, None));
        assert_eq!(magnitude_phrase(&m), "an 18.40 mag");
        m.photometry.insert(Band::GaiaG, Magnitude::new(14.0, None));
        assert_eq!(magnitude_phrase(&m), "a G=14.00 mag");
        m.photometry.insert(Band::SdssI, Magnitude::new(14.0, None));
        assert_eq!(magnitude_phrase(&m), "a G=14.00 mag");
        m.photometry.insert(Band::SdssR, Magnitude::new(15.5, None));
        assert_eq!(magnitude_phrase(&m), "an r=15.50 mag");
    }

    #[test]
    fn subtype_and_type_normalisation() {
        let mut m = raw(1, "x", Reliability::Association, "AGN", 1.0);
        m.catalogue_object_type = Some("agn".to_string());
        assert_eq!(object_type_label(&m), "AGN");
        m.catalogue_object_subtype = Some("QSO".to_string());
        assert_eq!(object_type_label(&m), "qso");
        m.catalogue_object_subtype = Some("Sy1".to_string());
        m.catalogue_object_type = Some("star".to_string());
        assert_eq!(object_type_label(&m), "stellar source");
        m.catalogue_object_type = Some("cb".to_string());
        assert_eq!(object_type_label(&m), "CV");
    }

    #[test]
    fn sdss_names_use_sexagesimal_position() {
        let mut m = raw(1, "1237668", Reliability::Association, "SN", 1.0);
        m.catalogue_kind = CatalogueKind::Sdss;
        m.ra_deg = 197.448_75;
        m.dec_deg = -23.383_83;
        assert_eq!(
            object_link(&m),
            "<a href=\"http://skyserver.sdss.org/dr12/en/tools/explore/Summary.aspx?id=1237668\">SDSS J130947.70-232301.8</a>"
        );
    }

    #[test]
    fn orphans_get_fixed_text() {
        let mut classifications = vec![Classification::orphan(5), Classification::new(6, "SN")];
        let mut top = raw(6, "NGC 1", Reliability::Association, "SN", 2.0);
        top.rank = Some(1);
        apply_annotations(&mut classifications, &[top]);

        assert_eq!(classifications[0].annotation.as_deref(), Some(ORPHAN_ANNOTATION));
        assert_eq!(classifications[0].summary.as_deref(), Some(ORPHAN_SUMMARY));
        assert_eq!(classifications[0].to_list().len(), 2);
        assert!(classifications[1]
            .annotation
            .as_deref()
            .is_some_and(|a| a.starts_with("The transient is possibly associated")));
        assert_eq!(classifications[1].separation_arcsec, Some(2.0));
    }
}
