// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A fully prepared odometry frame: the image pyramid, the keypoints of
//! every level and their 3D back-projections.

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::features::grid::GridFilter;
use crate::core::multires;
use crate::core::normalize::normalize_image;
use crate::core::pyramid::{Keypoint, PyramidLevel};
use crate::misc::type_aliases::{Float, Point3, Vec2};

/// Source of 3D measurements for image points (stereo disparity, RGB-D
/// depth map, ...). Coordinates are full-resolution pixels; `level`
/// tells the source which pyramid scale the query originates from.
pub trait DepthSource {
    /// Back-project an image point. `None` when no depth is available.
    fn get_xyz(&self, u: Float, v: Float, level: usize) -> Option<Point3>;

    /// Give the source a chance to improve a matched point's 3D position
    /// (e.g. by disparity refinement). Returns false when it declines.
    fn refine_xyz(&self, keypoint: &Keypoint, point: &mut Point3) -> bool;

    /// Cheap predicate: is depth available around this image point?
    fn have_xyz(&self, u: Float, v: Float, level: usize) -> bool;
}

/// Image pyramid and per-level feature data of one frame.
///
/// Three frames exist per odometry engine (reference, previous and
/// current); the driver rotates them by index permutation so the
/// buffers themselves never move.
pub struct OdometryFrame {
    intrinsics: Intrinsics,
    levels: Vec<PyramidLevel>,
    /// Start of each level's keypoint range in the flat track-id space.
    level_offsets: Vec<usize>,
    num_keypoints: usize,
    num_detected_keypoints: usize,
    gauss_workspace: Vec<u16>,
    use_image_normalization: bool,
}

impl OdometryFrame {
    pub fn new(intrinsics: &Intrinsics, config: &Config) -> Self {
        let grid_filter = if config.use_bucketing {
            Some(GridFilter::new(
                config.bucket_width,
                config.bucket_height,
                config.max_keypoints_per_bucket,
            ))
        } else {
            None
        };
        let levels = (0..config.num_pyramid_levels)
            .map(|k| {
                PyramidLevel::new(
                    intrinsics.width >> k,
                    intrinsics.height >> k,
                    k,
                    config.feature_window_size,
                    grid_filter.clone(),
                )
            })
            .collect();
        Self {
            intrinsics: intrinsics.clone(),
            levels,
            level_offsets: vec![0; config.num_pyramid_levels + 1],
            num_keypoints: 0,
            num_detected_keypoints: 0,
            gauss_workspace: vec![0; multires::workspace_len(intrinsics.width, intrinsics.height)],
            use_image_normalization: config.use_image_normalization,
        }
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, k: usize) -> &PyramidLevel {
        &self.levels[k]
    }

    /// Total keypoints across levels, after grid filtering.
    pub fn num_keypoints(&self) -> usize {
        self.num_keypoints
    }

    /// Raw FAST detections across levels, before grid filtering. This is
    /// the signal driving the adaptive threshold controller.
    pub fn num_detected_keypoints(&self) -> usize {
        self.num_detected_keypoints
    }

    /// Keypoint by flat track id, in `(level, detection index)` order.
    pub fn keypoint(&self, track_id: usize) -> &Keypoint {
        let level = self.level_of_track_id(track_id);
        &self.levels[level].keypoints()[track_id - self.level_offsets[level]]
    }

    /// Descriptor bytes of a keypoint by flat track id.
    pub fn keypoint_descriptor(&self, track_id: usize) -> &[u8] {
        let kp = self.keypoint(track_id);
        self.levels[kp.level].descriptor(kp.descriptor_index)
    }

    /// Overwrite a keypoint's refined position, at its own level scale.
    pub(crate) fn set_keypoint_position(&mut self, track_id: usize, position: Vec2) {
        let level = self.level_of_track_id(track_id);
        let offset = self.level_offsets[level];
        let kp = &mut self.levels[level].keypoints_mut()[track_id - offset];
        kp.u = position.x;
        kp.v = position.y;
    }

    fn level_of_track_id(&self, track_id: usize) -> usize {
        debug_assert!(track_id < self.num_keypoints);
        self.level_offsets
            .windows(2)
            .position(|w| track_id < w[1])
            .expect("track id out of range")
    }

    /// Build the frame from a grayscale image: pyramid construction,
    /// feature detection on every level and 3D back-projection.
    pub fn prepare(&mut self, gray: &[u8], fast_threshold: i32, depth_source: &dyn DepthSource) {
        assert_eq!(gray.len(), self.intrinsics.width * self.intrinsics.height);

        // Level 0 from the caller's buffer, then Gaussian-down the rest.
        self.levels[0].image_mut().fill_from(gray);
        if self.use_image_normalization {
            normalize_image(self.levels[0].image_mut());
        }
        for k in 1..self.levels.len() {
            let (head, tail) = self.levels.split_at_mut(k);
            multires::gaussian_down(
                head[k - 1].image(),
                tail[0].image_mut(),
                &mut self.gauss_workspace,
            );
        }

        // Features per level, then flatten into the track-id space.
        self.num_detected_keypoints = 0;
        let mut offset = 0;
        for (k, level) in self.levels.iter_mut().enumerate() {
            level.detect_features(fast_threshold);
            self.num_detected_keypoints += level.num_detected_keypoints();
            self.level_offsets[k] = offset;
            for (index, kp) in level.keypoints_mut().iter_mut().enumerate() {
                kp.track_id = offset + index;
            }
            offset += level.num_keypoints();
        }
        self.level_offsets[self.levels.len()] = offset;
        self.num_keypoints = offset;

        // Lift every keypoint to 3D through the depth source.
        for level in self.levels.iter_mut() {
            let scale = level.level();
            for kp in level.keypoints_mut() {
                let u = kp.u * (1usize << scale) as Float;
                let v = kp.v * (1usize << scale) as Float;
                match depth_source.get_xyz(u, v, scale) {
                    Some(xyz)
                        if xyz.x.is_finite() && xyz.y.is_finite() && xyz.z.is_finite() =>
                    {
                        kp.xyz = xyz;
                        kp.has_depth = true;
                    }
                    _ => {
                        kp.xyz = Point3::origin();
                        kp.has_depth = false;
                    }
                }
            }
        }
    }
}

// TESTS #############################################################
