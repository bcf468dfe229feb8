// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Maximum-consensus inlier selection on the match rigidity graph.
//!
//! Under rigid motion the pairwise 3D distances between matched points
//! are preserved. Two matches are compatible when the distance between
//! their reference points agrees with the distance between their target
//! points; the largest mutually compatible set is approximated by a
//! greedy maximum clique.
//!
//! The adjacency matrix is stored as packed 64-bit rows so that the
//! induced-subgraph degrees needed by the greedy selection reduce to
//! masked popcounts.

use crate::core::estimate::matching::FeatureMatch;
use crate::misc::type_aliases::Float;

/// Indices of the matches selected by the greedy maximum clique of the
/// rigidity graph. Deterministic: ties in degree break by ascending
/// match index.
pub fn max_consensus_clique(matches: &[FeatureMatch], inlier_threshold: Float) -> Vec<usize> {
    let n = matches.len();
    if n == 0 {
        return Vec::new();
    }
    let words = n.div_ceil(64);

    // Dense adjacency: compatible(i, j) per the rigidity test.
    let mut adjacency = vec![0u64; n * words];
    for i in 0..n {
        for j in (i + 1)..n {
            let ref_distance = (matches[i].ref_xyz - matches[j].ref_xyz).norm();
            let target_distance = (matches[i].target_xyz - matches[j].target_xyz).norm();
            if (ref_distance - target_distance).abs() < inlier_threshold {
                adjacency[i * words + j / 64] |= 1u64 << (j % 64);
                adjacency[j * words + i / 64] |= 1u64 << (i % 64);
            }
        }
    }
    let row = |i: usize| &adjacency[i * words..(i + 1) * words];
    let masked_degree = |i: usize, mask: &[u64]| -> u32 {
        row(i)
            .iter()
            .zip(mask.iter())
            .map(|(&r, &m)| (r & m).count_ones())
            .sum()
    };

    // All vertices are candidates for the seed, which is the vertex of
    // highest degree in the full graph.
    let mut mask = vec![u64::MAX; words];
    if n % 64 != 0 {
        mask[words - 1] = (1u64 << (n % 64)) - 1;
    }
    let mut best = 0usize;
    let mut best_degree = masked_degree(0, &mask);
    for i in 1..n {
        let degree = masked_degree(i, &mask);
        if degree > best_degree {
            best = i;
            best_degree = degree;
        }
    }

    let mut clique = Vec::new();
    loop {
        clique.push(best);
        // Restrict the candidates to the neighbours of the new member.
        let best_row: Vec<u64> = row(best).to_vec();
        for (m, r) in mask.iter_mut().zip(best_row.iter()) {
            *m &= r;
        }
        mask[best / 64] &= !(1u64 << (best % 64));

        // Next member: highest degree within the induced subgraph.
        let mut found = false;
        let mut next = 0usize;
        let mut next_degree = 0u32;
        for word_index in 0..words {
            let mut word = mask[word_index];
            while word != 0 {
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                let i = word_index * 64 + bit;
                let degree = masked_degree(i, &mask);
                if !found || degree > next_degree {
                    found = true;
                    next = i;
                    next_degree = degree;
                }
            }
        }
        if !found {
            break;
        }
        best = next;
    }

    clique.sort_unstable();
    clique
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::misc::type_aliases::{Iso3, Point3, Vec2, Vec3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn gen_match(ref_xyz: Point3, target_xyz: Point3) -> FeatureMatch {
        FeatureMatch {
            ref_id: 0,
            target_id: 0,
            distance: 0,
            level: 0,
            ref_xyz,
            target_xyz,
            target_uv_level: Vec2::zeros(),
            target_uv_base: Vec2::zeros(),
            in_clique: false,
            inlier: false,
            reprojection_error: 0.0,
        }
    }

    #[test]
    fn empty_input_gives_empty_clique() {
        assert!(max_consensus_clique(&[], 0.1).is_empty());
    }

    #[test]
    fn single_match_is_its_own_clique() {
        let m = gen_match(Point3::new(0.0, 0.0, 1.0), Point3::new(0.0, 0.0, 1.0));
        assert_eq!(max_consensus_clique(&[m], 0.1), vec![0]);
    }

    #[test]
    fn rigidly_moved_points_form_one_clique() {
        let mut rng = StdRng::seed_from_u64(7);
        let motion = Iso3::new(Vec3::new(0.1, -0.05, 0.2), Vec3::new(0.0, 0.05, 0.02));
        let mut matches = Vec::new();
        for _ in 0..80 {
            let p = Point3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(1.0..5.0),
            );
            matches.push(gen_match(p, motion * p));
        }
        let clique = max_consensus_clique(&matches, 0.1);
        assert_eq!(clique.len(), 80);
    }

    #[test]
    fn outliers_are_rejected() {
        let mut rng = StdRng::seed_from_u64(11);
        let motion = Iso3::new(Vec3::new(0.05, 0.0, 0.1), Vec3::zeros());
        let mut matches = Vec::new();
        for _ in 0..40 {
            let p = Point3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(1.0..5.0),
            );
            matches.push(gen_match(p, motion * p));
        }
        // Ten gross outliers with corrupted target positions.
        let num_inliers = matches.len();
        for _ in 0..10 {
            let p = Point3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(1.0..5.0),
            );
            let corrupted = motion * p
                + Vec3::new(
                    rng.gen_range(0.5..1.5),
                    rng.gen_range(0.5..1.5),
                    rng.gen_range(0.5..1.5),
                );
            matches.push(gen_match(p, corrupted));
        }
        let clique = max_consensus_clique(&matches, 0.1);
        // All ground-truth inliers survive, at most 5% outliers slip in.
        for index in 0..num_inliers {
            assert!(clique.contains(&index), "missing inlier {}", index);
        }
        let outliers_kept = clique.iter().filter(|&&i| i >= num_inliers).count();
        assert!(outliers_kept * 20 <= clique.len(), "{} outliers", outliers_kept);
    }

    #[test]
    fn tie_break_is_deterministic() {
        // Two disconnected compatible pairs: the greedy pick must take
        // the pair with the lowest index when degrees tie.
        let a0 = gen_match(Point3::new(0.0, 0.0, 1.0), Point3::new(0.0, 0.0, 1.0));
        let a1 = gen_match(Point3::new(1.0, 0.0, 1.0), Point3::new(1.0, 0.0, 1.0));
        let b0 = gen_match(Point3::new(0.0, 5.0, 1.0), Point3::new(0.0, 0.0, 9.0));
        let b1 = gen_match(Point3::new(3.0, 5.0, 1.0), Point3::new(0.0, 3.0, 9.0));
        let matches = vec![a0, a1, b0, b1];
        let clique = max_consensus_clique(&matches, 0.1);
        assert_eq!(clique, vec![0, 1]);
    }
}
