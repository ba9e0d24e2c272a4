//! Hierarchical Triangular Mesh: trixel ids and cone covers.
//!
//! Ids follow the usual HTM numbering: the eight root trixels are 8..=15
//! (S0..S3, N0..N3) and each subdivision appends two bits.

use std::f64::consts::FRAC_PI_2;

type Vec3 = [f64; 3];

const VERTICES: [Vec3; 6] = [
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, -1.0],
];

const ROOTS: [(u64, [usize; 3]); 8] = [
    (8, [1, 5, 2]),
    (9, [2, 5, 3]),
    (10, [3, 5, 4]),
    (11, [4, 5, 1]),
    (12, [1, 0, 4]),
    (13, [4, 0, 3]),
    (14, [3, 0, 2]),
    (15, [2, 0, 1]),
];

/// Depth of the deepest index column any catalogue carries.
pub const MAX_LEVEL: u8 = 20;

#[derive(Debug, Clone, Copy)]
struct Trixel {
    id: u64,
    corners: [Vec3; 3],
}

impl Trixel {
    fn roots() -> impl Iterator<Item = Trixel> {
        ROOTS.iter().map(|(id, idx)| Trixel {
            id: *id,
            corners: [VERTICES[idx[0]], VERTICES[idx[1]], VERTICES[idx[2]]],
        })
    }

    fn children(&self) -> [Trixel; 4] {
        let [v0, v1, v2] = self.corners;
        let w0 = normalize(add(v1, v2));
        let w1 = normalize(add(v0, v2));
        let w2 = normalize(add(v0, v1));
        let base = self.id << 2;
        [
            Trixel { id: base, corners: [v0, w2, w1] },
            Trixel { id: base | 1, corners: [v1, w0, w2] },
            Trixel { id: base | 2, corners: [v2, w1, w0] },
            Trixel { id: base | 3, corners: [w0, w1, w2] },
        ]
    }

    /// Smallest signed edge distance; non-negative when the point is inside.
    fn containment(&self, p: Vec3) -> f64 {
        let [v0, v1, v2] = self.corners;
        dot(cross(v0, v1), p)
            .min(dot(cross(v1, v2), p))
            .min(dot(cross(v2, v0), p))
    }

    fn bounding_cap(&self) -> (Vec3, f64) {
        let [v0, v1, v2] = self.corners;
        let centre = normalize(add(add(v0, v1), v2));
        let radius = self
            .corners
            .iter()
            .map(|v| angle(centre, *v))
            .fold(0.0_f64, f64::max);
        (centre, radius)
    }
}

enum Overlap {
    Outside,
    Partial,
    Inside,
}

struct Cone {
    centre: Vec3,
    radius: f64,
    cos_radius: f64,
}

impl Cone {
    fn overlap(&self, trixel: &Trixel) -> Overlap {
        let (cap_centre, cap_radius) = trixel.bounding_cap();
        if angle(cap_centre, self.centre) > self.radius + cap_radius + 1e-12 {
            return Overlap::Outside;
        }
        if self.radius < FRAC_PI_2
            && trixel
                .corners
                .iter()
                .all(|v| dot(*v, self.centre) >= self.cos_radius)
        {
            return Overlap::Inside;
        }
        Overlap::Partial
    }
}

pub fn radec_to_vector(ra: f64, dec: f64) -> [f64; 3] {
    let (sin_ra, cos_ra) = ra.to_radians().sin_cos();
    let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
    [cos_dec * cos_ra, cos_dec * sin_ra, sin_dec]
}

/// Trixel id containing the point at the given depth.
pub fn lookup_id(ra: f64, dec: f64, level: u8) -> u64 {
    let p = radec_to_vector(ra, dec);
    let mut current = best_containing(Trixel::roots(), p);
    for _ in 0..level.min(MAX_LEVEL) {
        current = best_containing(current.children().into_iter(), p);
    }
    current.id
}

fn best_containing(candidates: impl Iterator<Item = Trixel>, p: Vec3) -> Trixel {
    let mut best: Option<(f64, Trixel)> = None;
    for trixel in candidates {
        let score = trixel.containment(p);
        if best.as_ref().is_none_or(|(current, _)| score > *current) {
            best = Some((score, trixel));
        }
    }
    // Every candidate list is non-empty.
    best.map(|(_, trixel)| trixel).unwrap_or(Trixel {
        id: 8,
        corners: [VERTICES[1], VERTICES[5], VERTICES[2]],
    })
}

/// Inclusive id ranges at `level` whose trixels may intersect the cone.
///
/// The cover is conservative: every point inside the cone has an id inside
/// one of the ranges, but a range can include points outside the cone.
pub fn cone_ranges(ra: f64, dec: f64, radius_arcsec: f64, level: u8) -> Vec<(u64, u64)> {
    let level = level.min(MAX_LEVEL);
    let radius = (radius_arcsec / 3600.0).to_radians();
    let cone = Cone {
        centre: radec_to_vector(ra, dec),
        radius,
        cos_radius: radius.cos(),
    };
    let depth = cover_depth(radius, level);

    let mut ranges = Vec::new();
    for root in Trixel::roots() {
        collect(&cone, root, 0, depth, level, &mut ranges);
    }
    merge_ranges(ranges)
}

/// Depth at which trixels are about the size of the cone.
fn cover_depth(radius: f64, level: u8) -> u8 {
    if radius <= 0.0 {
        return level;
    }
    let depth = (FRAC_PI_2 / radius).log2().ceil() + 1.0;
    depth.clamp(0.0, level as f64) as u8
}

fn collect(cone: &Cone, trixel: Trixel, depth: u8, target: u8, level: u8, out: &mut Vec<(u64, u64)>) {
    match cone.overlap(&trixel) {
        Overlap::Outside => {}
        Overlap::Inside => out.push(expand(trixel.id, depth, level)),
        Overlap::Partial if depth >= target => out.push(expand(trixel.id, depth, level)),
        Overlap::Partial => {
            for child in trixel.children() {
                collect(cone, child, depth + 1, target, level, out);
            }
        }
    }
}

fn expand(id: u64, depth: u8, level: u8) -> (u64, u64) {
    let shift = 2 * u32::from(level - depth);
    (id << shift, ((id + 1) << shift) - 1)
}

pub fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: Vec3) -> Vec3 {
    let norm = dot(v, v).sqrt();
    [v[0] / norm, v[1] / norm, v[2] / norm]
}

fn angle(a: Vec3, b: Vec3) -> f64 {
    let c = cross(a, b);
    dot(c, c).sqrt().atan2(dot(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(ranges: &[(u64, u64)], id: u64) -> bool {
        ranges.iter().any(|(start, end)| (*start..=*end).contains(&id))
    }

    #[test]
    fn root_trixels_by_hemisphere() {
        assert_eq!(lookup_id(45.0, -30.0, 0), 8);
        assert_eq!(lookup_id(135.0, -30.0, 0), 9);
        assert_eq!(lookup_id(45.0, 30.0, 0), 15);
        assert_eq!(lookup_id(315.0, 30.0, 0), 12);
    }

    #[test]
    fn deeper_ids_descend_from_parents() {
        let (ra, dec) = (201.365, -43.019);
        let fine = lookup_id(ra, dec, 16);
        let coarse = lookup_id(ra, dec, 13);
        assert_eq!(fine >> 6, coarse);
        assert!((8u64 << 32..16u64 << 32).contains(&fine));
    }

    #[test]
    fn cover_contains_points_inside_cone() {
        let (ra, dec, radius) = (150.1, 2.2, 30.0);
        let ranges = cone_ranges(ra, dec, radius, 16);
        for (dra, ddec) in [(0.0, 0.0), (0.005, 0.0), (-0.004, 0.005), (0.0, -0.008)] {
            let id = lookup_id(ra + dra, dec + ddec, 16);
            assert!(covered(&ranges, id), "offset ({dra}, {ddec}) not covered");
        }
        let far = lookup_id(ra + 1.0, dec, 16);
        assert!(!covered(&ranges, far));
    }

    #[test]
    fn cover_near_pole_and_wrap() {
        let ranges = cone_ranges(359.999, 89.99, 60.0, 13);
        assert!(covered(&ranges, lookup_id(0.001, 89.995, 13)));
        assert!(covered(&ranges, lookup_id(180.0, 89.9999, 13)));
    }

    #[test]
    fn merges_adjacent_ranges() {
        let merged = merge_ranges(vec![(10, 12), (1, 3), (4, 6), (13, 20), (30, 31)]);
        assert_eq!(merged, vec![(1, 6), (10, 20), (30, 31)]);
    }
}
