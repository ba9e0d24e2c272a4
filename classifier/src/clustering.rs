//! Single-linkage grouping of sky positions.

use crate::coords::angular_separation;

/// Groups points whose chains of pairwise separations stay within
/// `radius_arcsec`.
///
/// Groups are ordered by their first member and members keep input order,
/// so the first index of each group is its seed.
pub fn cluster(points: &[(f64, f64)], radius_arcsec: f64) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(points.len());
    let radius_deg = radius_arcsec / 3600.0;

    let mut by_dec: Vec<usize> = (0..points.len()).collect();
    by_dec.sort_by(|a, b| points[*a].1.total_cmp(&points[*b].1));

    for (pos, &i) in by_dec.iter().enumerate() {
        let (ra_i, dec_i) = points[i];
        for &j in &by_dec[pos + 1..] {
            let (ra_j, dec_j) = points[j];
            if dec_j - dec_i > radius_deg {
                break;
            }
            if angular_separation(ra_i, dec_i, ra_j, dec_j) <= radius_arcsec {
                sets.union(i, j);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot_for_root: Vec<Option<usize>> = vec![None; points.len()];
    for index in 0..points.len() {
        let root = sets.find(index);
        match slot_for_root[root] {
            Some(slot) => groups[slot].push(index),
            None => {
                slot_for_root[root] = Some(groups.len());
                groups.push(vec![index]);
            }
        }
    }
    groups
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn chains_link_transitively() {
        // 0.8" steps: 0-1 and 1-2 linked, 0-2 (1.6") only through 1
        let step = 0.8 / 3600.0;
        let points = [
            (10.0, 0.0),
            (10.0, step),
            (10.0, 2.0 * step),
            (10.0, 1.0),
        ];
        assert_eq!(cluster(&points, 1.0), vec![vec![0, 1, 2], vec![3]]);
    }

    #[test]
    fn group_order_follows_first_member() {
        let d = 0.5 / 3600.0;
        let points = [(50.0, 5.0), (10.0, 0.0), (50.0, 5.0 + d), (10.0, d)];
        assert_eq!(cluster(&points, 1.0), vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn clustering_is_idempotent() {
        let d = 0.3 / 3600.0;
        let points = [
            (120.0, -30.0),
            (120.0, -30.0 + d),
            (120.0 + 2.0 / 3600.0, -30.0),
            (121.0, -30.0),
        ];
        let groups = cluster(&points, 1.0);
        let seeds: Vec<(f64, f64)> = groups.iter().map(|g| points[g[0]]).collect();
        let again = cluster(&seeds, 1.0);
        assert_eq!(again.len(), groups.len());
        assert!(again.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn empty_input() {
        assert!(cluster(&[], 1.0).is_empty());
    }
}
