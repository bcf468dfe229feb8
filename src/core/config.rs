// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration of the visual odometry engine.
//!
//! All knobs are read once at construction. Out-of-range values are not
//! an error: they are replaced by their default with a logged warning,
//! so a misconfigured application still produces estimates.

use crate::misc::type_aliases::Float;

/// Configuration of the odometry engine. See each field for its default.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Side of the square descriptor window, also the keypoint border
    /// margin (default 9).
    pub feature_window_size: usize,
    /// Number of pyramid levels, level 0 being full resolution (default 3).
    pub num_pyramid_levels: usize,
    /// Set-point of the adaptive threshold controller, in pixels per
    /// feature (default 250).
    pub target_pixels_per_feature: usize,
    /// Initial FAST threshold, clamped to `[5, 70]` afterwards (default 20).
    pub fast_threshold: i32,
    /// Enable the proportional controller on the FAST threshold
    /// (default true).
    pub use_adaptive_threshold: bool,
    /// Gain of the proportional controller (default 0.005).
    pub fast_threshold_adaptive_gain: Float,
    /// Seed the motion estimate with a rotation estimated by coarse
    /// image alignment (default true).
    pub use_homography_initialization: bool,
    /// Minimum inlier count below which the reference frame is replaced
    /// (default 150).
    pub ref_frame_change_threshold: usize,
    /// Enable grid non-maximum suppression (default true).
    pub use_bucketing: bool,
    /// Bucket width in pixels (default 80).
    pub bucket_width: usize,
    /// Bucket height in pixels (default 80).
    pub bucket_height: usize,
    /// Corners kept per bucket (default 25).
    pub max_keypoints_per_bucket: usize,
    /// Normalize image intensities before feature detection (default false).
    pub use_image_normalization: bool,
    /// Reprojection error above which an inlier is discarded, in pixels
    /// (default 1.5).
    pub inlier_max_reprojection_error: Float,
    /// Pairwise 3D distance discrepancy below which two matches are
    /// considered rigidly consistent, in meters (default 0.1).
    pub clique_inlier_threshold: Float,
    /// Minimum number of matches for a valid estimate (default 10).
    pub min_features_for_estimate: usize,
    /// Mean reprojection error above which the estimate is declared
    /// invalid, in pixels (default 10.0).
    pub max_mean_reprojection_error: Float,
    /// Refine matched feature positions by patch alignment (default true).
    pub use_subpixel_refinement: bool,
    /// Half side of the square search window for feature matching, in
    /// pixels (default 25).
    pub feature_search_window: usize,
    /// Write refined match positions back into the target frame
    /// (default false).
    pub update_target_features_with_refined: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feature_window_size: 9,
            num_pyramid_levels: 3,
            target_pixels_per_feature: 250,
            fast_threshold: 20,
            use_adaptive_threshold: true,
            fast_threshold_adaptive_gain: 0.005,
            use_homography_initialization: true,
            ref_frame_change_threshold: 150,
            use_bucketing: true,
            bucket_width: 80,
            bucket_height: 80,
            max_keypoints_per_bucket: 25,
            use_image_normalization: false,
            inlier_max_reprojection_error: 1.5,
            clique_inlier_threshold: 0.1,
            min_features_for_estimate: 10,
            max_mean_reprojection_error: 10.0,
            use_subpixel_refinement: true,
            feature_search_window: 25,
            update_target_features_with_refined: false,
        }
    }
}

impl Config {
    /// Replace out-of-range values by their default, logging a warning
    /// for each replacement.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        macro_rules! check {
            ($field:ident, $valid:expr) => {
                if !$valid(self.$field) {
                    log::warn!(
                        "invalid value {:?} for {}, using default {:?}",
                        self.$field,
                        stringify!($field),
                        defaults.$field
                    );
                    self.$field = defaults.$field;
                }
            };
        }
        check!(feature_window_size, |v: usize| v >= 3 && v % 2 == 1);
        check!(num_pyramid_levels, |v: usize| v >= 1 && v <= 8);
        check!(target_pixels_per_feature, |v: usize| v >= 1);
        check!(fast_threshold, |v: i32| (1..=255).contains(&v));
        check!(fast_threshold_adaptive_gain, |v: Float| v.is_finite()
            && v >= 0.0);
        check!(bucket_width, |v: usize| v >= 1);
        check!(bucket_height, |v: usize| v >= 1);
        check!(max_keypoints_per_bucket, |v: usize| v >= 1);
        check!(inlier_max_reprojection_error, |v: Float| v.is_finite()
            && v > 0.0);
        check!(clique_inlier_threshold, |v: Float| v.is_finite() && v > 0.0);
        check!(min_features_for_estimate, |v: usize| v >= 3);
        check!(max_mean_reprojection_error, |v: Float| v.is_finite()
            && v > 0.0);
        check!(feature_search_window, |v: usize| v >= 1);
        self
    }
}

// TESTS #############################################################
