// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Grid-based non-maximum suppression of corner detections.
//!
//! The image is partitioned into fixed-size rectangular buckets and only
//! the strongest corners of each bucket survive. This enforces a spatial
//! distribution of the keypoints, which conditions the pose estimation
//! better than keeping the globally strongest corners.

use crate::core::features::fast::Corner;

/// Keeps the best corners of each spatial bucket.
#[derive(Debug, Clone)]
pub struct GridFilter {
    bucket_width: usize,
    bucket_height: usize,
    max_keypoints_per_bucket: usize,
}

impl GridFilter {
    pub fn new(bucket_width: usize, bucket_height: usize, max_keypoints_per_bucket: usize) -> Self {
        assert!(bucket_width > 0 && bucket_height > 0);
        Self {
            bucket_width,
            bucket_height,
            max_keypoints_per_bucket,
        }
    }

    /// Filter corners in place. Within each bucket the
    /// `max_keypoints_per_bucket` highest-scoring corners are kept, ties
    /// broken by `(y, x)` ascending. The surviving set is returned in
    /// `(y, x)` scan order.
    pub fn filter(&self, corners: &mut Vec<Corner>, image_width: usize) {
        let buckets_per_row = image_width.div_ceil(self.bucket_width).max(1);

        // Sort by (bucket, -score, y, x) then keep a per-bucket count.
        corners.sort_unstable_by(|a, b| {
            self.bucket_index(a, buckets_per_row)
                .cmp(&self.bucket_index(b, buckets_per_row))
                .then(b.score.cmp(&a.score))
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });

        let mut kept = 0usize;
        let mut current_bucket = usize::MAX;
        let mut in_bucket = 0usize;
        for i in 0..corners.len() {
            let bucket = self.bucket_index(&corners[i], buckets_per_row);
            if bucket != current_bucket {
                current_bucket = bucket;
                in_bucket = 0;
            }
            if in_bucket < self.max_keypoints_per_bucket {
                corners[kept] = corners[i];
                kept += 1;
                in_bucket += 1;
            }
        }
        corners.truncate(kept);

        // Deterministic output order, independent of the bucket layout.
        corners.sort_unstable_by(|a, b| a.y.cmp(&b.y).then(a.x.cmp(&b.x)));
    }

    fn bucket_index(&self, corner: &Corner, buckets_per_row: usize) -> usize {
        (corner.y / self.bucket_height) * buckets_per_row + corner.x / self.bucket_width
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    fn corner(x: usize, y: usize, score: i32) -> Corner {
        Corner { x, y, score }
    }

    #[test]
    fn keeps_top_scorers_per_bucket() {
        let filter = GridFilter::new(10, 10, 2);
        let mut corners = vec![
            corner(1, 1, 5),
            corner(2, 2, 9),
            corner(3, 3, 7),
            corner(4, 4, 1),
            // second bucket
            corner(15, 1, 3),
        ];
        filter.filter(&mut corners, 20);
        assert_eq!(corners.len(), 3);
        assert!(corners.contains(&corner(2, 2, 9)));
        assert!(corners.contains(&corner(3, 3, 7)));
        assert!(corners.contains(&corner(15, 1, 3)));
    }

    #[test]
    fn ties_break_by_scan_order() {
        let filter = GridFilter::new(10, 10, 1);
        let mut corners = vec![corner(5, 7, 4), corner(3, 2, 4), corner(6, 2, 4)];
        filter.filter(&mut corners, 10);
        assert_eq!(corners, vec![corner(3, 2, 4)]);
    }

    #[test]
    fn output_is_scan_ordered() {
        let filter = GridFilter::new(8, 8, 25);
        let mut corners = vec![
            corner(12, 3, 1),
            corner(2, 9, 8),
            corner(4, 3, 2),
            corner(1, 3, 9),
        ];
        filter.filter(&mut corners, 16);
        let positions: Vec<(usize, usize)> = corners.iter().map(|c| (c.y, c.x)).collect();
        assert_eq!(positions, vec![(3, 1), (3, 4), (3, 12), (9, 2)]);
    }

    #[test]
    fn bucket_occupancy_never_exceeds_limit() {
        let filter = GridFilter::new(4, 4, 3);
        let mut corners = Vec::new();
        for y in 0..8 {
            for x in 0..8 {
                corners.push(corner(x, y, (x * y) as i32));
            }
        }
        filter.filter(&mut corners, 8);
        let mut per_bucket = std::collections::HashMap::new();
        for c in &corners {
            *per_bucket.entry((c.x / 4, c.y / 4)).or_insert(0usize) += 1;
        }
        assert!(per_bucket.values().all(|&n| n <= 3));
        assert_eq!(corners.len(), 12);
    }
}
