//! Sky-coordinate helpers: separations and sexagesimal conversion.

use crate::error::{ClassifierError, ClassifierResult};

const ARCSEC_PER_DEGREE: f64 = 3600.0;

/// Great-circle separation in arcsec (Vincenty form, stable at all scales).
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    let delta_ra = ra2 - ra1;
    let (sin_dra, cos_dra) = delta_ra.sin_cos();
    let (sin_d1, cos_d1) = dec1.sin_cos();
    let (sin_d2, cos_d2) = dec2.sin_cos();

    let num1 = cos_d2 * sin_dra;
    let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra;
    let denominator = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;

    num1.hypot(num2).atan2(denominator).to_degrees() * ARCSEC_PER_DEGREE
}

/// Total, north and east separation of point 2 relative to point 1, in arcsec.
///
/// Positive north means point 2 lies north of point 1; positive east means
/// point 2 lies east of point 1.
pub fn separations(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> (f64, f64, f64) {
    let total = angular_separation(ra1, dec1, ra2, dec2);
    let north = (dec2 - dec1) * ARCSEC_PER_DEGREE;

    let mut delta_ra = ra2 - ra1;
    if delta_ra > 180.0 {
        delta_ra -= 360.0;
    } else if delta_ra < -180.0 {
        delta_ra += 360.0;
    }
    let east = delta_ra * dec1.to_radians().cos() * ARCSEC_PER_DEGREE;

    (total, north, east)
}

pub fn validate_coordinates(ra: f64, dec: f64) -> ClassifierResult<()> {
    if !ra.is_finite() || !(0.0..360.0).contains(&ra) {
        return Err(ClassifierError::Coordinates(format!(
            "ra {ra} outside [0, 360)"
        )));
    }
    if !dec.is_finite() || !(-90.0..=90.0).contains(&dec) {
        return Err(ClassifierError::Coordinates(format!(
            "dec {dec} outside [-90, 90]"
        )));
    }
    Ok(())
}

/// Accepts decimal degrees or `hh:mm:ss.s` (also space separated).
pub fn parse_ra(value: &str) -> ClassifierResult<f64> {
    let trimmed = value.trim();
    let ra = match trimmed.parse::<f64>() {
        Ok(deg) => deg,
        Err(_) => {
            let (sign, parts) = split_sexagesimal(trimmed)?;
            if sign < 0.0 {
                return Err(ClassifierError::Coordinates(format!(
                    "negative right ascension '{trimmed}'"
                )));
            }
            (parts[0] + parts[1] / 60.0 + parts[2] / 3600.0) * 15.0
        }
    };
    validate_coordinates(ra, 0.0)?;
    Ok(ra)
}

/// Accepts decimal degrees or `[+-]dd:mm:ss.s` (also space separated).
pub fn parse_dec(value: &str) -> ClassifierResult<f64> {
    let trimmed = value.trim();
    let dec = match trimmed.parse::<f64>() {
        Ok(deg) => deg,
        Err(_) => {
            let (sign, parts) = split_sexagesimal(trimmed)?;
            sign * (parts[0] + parts[1] / 60.0 + parts[2] / 3600.0)
        }
    };
    validate_coordinates(0.0, dec)?;
    Ok(dec)
}

fn split_sexagesimal(value: &str) -> ClassifierResult<(f64, [f64; 3])> {
    let (sign, body) = match value.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, value.strip_prefix('+').unwrap_or(value)),
    };

    let fields: Vec<&str> = body
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() != 3 {
        return Err(ClassifierError::Coordinates(format!(
            "cannot parse sexagesimal coordinate '{value}'"
        )));
    }

    let mut parts = [0.0; 3];
    for (slot, field) in parts.iter_mut().zip(&fields) {
        *slot = field.parse::<f64>().map_err(|_| {
            ClassifierError::Coordinates(format!("cannot parse sexagesimal coordinate '{value}'"))
        })?;
    }
    if parts[1] >= 60.0 || parts[2] >= 60.0 {
        return Err(ClassifierError::Coordinates(format!(
            "minutes and seconds must be below 60 in '{value}'"
        )));
    }

    Ok((sign, parts))
}

/// `hhmmss.ss` with no delimiter.
pub fn ra_to_sexagesimal(ra: f64) -> String {
    let total_centiseconds = (ra.rem_euclid(360.0) / 15.0 * 360_000.0).round() as i64;
    let total_centiseconds = total_centiseconds % (24 * 360_000);
    let hours = total_centiseconds / 360_000;
    let minutes = (total_centiseconds % 360_000) / 6_000;
    let centis = total_centiseconds % 6_000;
    format!("{hours:02}{minutes:02}{:02}.{:02}", centis / 100, centis % 100)
}

/// `+ddmmss.s` with no delimiter.
pub fn dec_to_sexagesimal(dec: f64) -> String {
    let sign = if dec < 0.0 { '-' } else { '+' };
    let total_deciseconds = (dec.abs() * 36_000.0).round() as i64;
    let degrees = total_deciseconds / 36_000;
    let minutes = (total_deciseconds % 36_000) / 600;
    let decis = total_deciseconds % 600;
    format!("{sign}{degrees:02}{minutes:02}{:02}.{}", decis / 10, decis % 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn separation_along_meridian() {
        let sep = angular_separation(10.0, 0.0, 10.0, 1.0);
        assert!(close(sep, 3600.0, 1e-6));
        assert!(close(angular_separation(45.0, 30.0, 45.0, 30.0), 0.0, 1e-9));
    }

    #[test]
    fn separation_across_ra_wrap() {
        let sep = angular_separation(359.9, 0.0, 0.1, 0.0);
        assert!(close(sep, 720.0, 1e-6));
        let (_, north, east) = separations(359.9, 0.0, 0.1, 0.0);
        assert!(close(north, 0.0, 1e-9));
        assert!(close(east, 720.0, 1e-6));
    }

    #[test]
    fn north_east_signs() {
        let (total, north, east) = separations(150.0, 20.0, 150.001, 19.999);
        assert!(north < 0.0);
        assert!(east > 0.0);
        assert!(close(total, north.hypot(east), 0.01));
    }

    #[test]
    fn parses_sexagesimal_and_decimal() {
        assert!(close(parse_ra("08:57:57.19").unwrap(), 134.488291, 1e-5));
        assert!(close(parse_dec("-12 30 00").unwrap(), -12.5, 1e-9));
        assert!(close(parse_dec("+05:00:36").unwrap(), 5.01, 1e-9));
        assert!(close(parse_ra("134.5").unwrap(), 134.5, 1e-12));
    }

    #[test]
    fn rejects_bad_coordinates() {
        assert!(parse_ra("361").is_err());
        assert!(parse_dec("91").is_err());
        assert!(parse_ra("12:75:00").is_err());
        assert!(parse_dec("abc").is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn formats_sexagesimal_names() {
        assert_eq!(ra_to_sexagesimal(134.488291), "085757.19");
        assert_eq!(dec_to_sexagesimal(-12.5), "-123000.0");
        assert_eq!(dec_to_sexagesimal(5.01), "+050036.0");
    }
}
