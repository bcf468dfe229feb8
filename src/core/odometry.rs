// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The visual odometry driver: owns the reference, previous and current
//! frames, runs the per-frame estimation pipeline and accumulates the
//! global pose.
//!
//! Frame-to-frame motion is primarily estimated against a reference
//! frame that only changes when tracking against it degrades. When the
//! estimation against the reference fails but the one against the
//! previous frame succeeds, the engine falls back to it and promotes
//! the current frame to reference.

use nalgebra::Translation3;
use thiserror::Error;

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::estimate::MotionEstimator;
use crate::core::frame::{DepthSource, OdometryFrame};
use crate::core::homography::HomographyEstimator;
use crate::math::so3;
use crate::misc::helper::clamp_i32;
use crate::misc::type_aliases::{Float, Iso3, Mat3, Mat6, Quat, Vec3};

/// FAST threshold clamp range of the adaptive controller.
const FAST_THRESHOLD_MIN: i32 = 5;
const FAST_THRESHOLD_MAX: i32 = 70;

/// Pyramid level at which the initial rotation is estimated. When the
/// pyramid has fewer levels, the coarsest one is downsampled further to
/// reach this scale.
const INITIAL_ROTATION_PYRAMID_LEVEL: usize = 4;

/// Construction errors of the odometry engine.
#[derive(Debug, Error)]
pub enum OdometryError {
    #[error("invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),
    #[error("frame buffer has {actual} bytes, expected {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },
}

/// Frame-to-frame visual odometry engine.
pub struct VisualOdometry {
    config: Config,
    intrinsics: Intrinsics,
    frames: Vec<OdometryFrame>,
    ref_index: usize,
    prev_index: usize,
    cur_index: usize,
    estimator: MotionEstimator,

    fast_threshold: i32,
    change_reference_frames: bool,
    frame_count: usize,

    /// World pose accumulator (world <- current camera).
    pose: Iso3,
    /// Transform mapping reference-frame coordinates into previous-frame
    /// coordinates.
    ref_to_prev: Iso3,
    /// Motion of the current camera relative to the previous one.
    motion_estimate: Iso3,
    motion_covariance: Mat6,
    /// Last homography estimated by the initial rotation stage, in
    /// full-resolution pixel coordinates.
    initial_homography: Mat3,
}

impl VisualOdometry {
    /// Build an engine for the given camera. The configuration is
    /// validated field by field; out-of-range values fall back to their
    /// default with a logged warning.
    pub fn new(intrinsics: &Intrinsics, config: Config) -> Result<Self, OdometryError> {
        if intrinsics.width == 0 || intrinsics.height == 0 {
            return Err(OdometryError::InvalidIntrinsics(format!(
                "zero image dimensions {}x{}",
                intrinsics.width, intrinsics.height
            )));
        }
        if intrinsics.focal.0 <= 0.0 || intrinsics.focal.1 <= 0.0 {
            return Err(OdometryError::InvalidIntrinsics(format!(
                "non-positive focal length ({}, {})",
                intrinsics.focal.0, intrinsics.focal.1
            )));
        }
        let config = config.validated();
        let frames = (0..3)
            .map(|_| OdometryFrame::new(intrinsics, &config))
            .collect();
        let estimator = MotionEstimator::new(&config);
        let fast_threshold = clamp_i32(config.fast_threshold, FAST_THRESHOLD_MIN, FAST_THRESHOLD_MAX);
        Ok(Self {
            intrinsics: intrinsics.clone(),
            frames,
            ref_index: 0,
            prev_index: 1,
            cur_index: 2,
            estimator,
            fast_threshold,
            change_reference_frames: false,
            frame_count: 0,
            pose: Iso3::identity(),
            ref_to_prev: Iso3::identity(),
            motion_estimate: Iso3::identity(),
            motion_covariance: Mat6::identity(),
            initial_homography: Mat3::identity(),
            config,
        })
    }

    /// Ingest one grayscale frame. `gray` is `width * height` row-major
    /// bytes; `depth_source` provides 3D lookups for the same image.
    pub fn process_frame(
        &mut self,
        gray: &[u8],
        depth_source: &dyn DepthSource,
    ) -> Result<(), OdometryError> {
        let expected = self.intrinsics.width * self.intrinsics.height;
        if gray.len() != expected {
            return Err(OdometryError::FrameSizeMismatch {
                expected,
                actual: gray.len(),
            });
        }

        // Rotate the frame handles: on a reference change the current
        // frame becomes the new reference, otherwise it becomes the
        // previous frame. The buffers never move.
        if self.change_reference_frames {
            std::mem::swap(&mut self.ref_index, &mut self.cur_index);
            self.ref_to_prev = Iso3::identity();
        } else {
            std::mem::swap(&mut self.prev_index, &mut self.cur_index);
        }
        let changed_reference_frames = self.change_reference_frames;
        self.change_reference_frames = false;
        self.motion_estimate = Iso3::identity();

        self.frames[self.cur_index].prepare(gray, self.fast_threshold, depth_source);

        if self.config.use_adaptive_threshold {
            self.adapt_fast_threshold();
        }

        self.frame_count += 1;
        if self.frame_count < 2 {
            // Bootstrap: nothing to match against yet.
            self.change_reference_frames = true;
            return Ok(());
        }

        let initial_rotation = if self.config.use_homography_initialization {
            // After a reference change the former current frame lives in
            // the reference slot.
            let previous_index = if changed_reference_frames {
                self.ref_index
            } else {
                self.prev_index
            };
            self.estimate_initial_rotation(previous_index, self.cur_index)
        } else {
            Quat::identity()
        };

        // Predicted pose of the current camera in the reference frame:
        // the accumulated reference-to-previous transform, rotated by
        // the estimated inter-frame rotation.
        let rotation_seed = Iso3::from_parts(Translation3::identity(), initial_rotation);
        let predicted_to_reference = self.ref_to_prev.inverse() * rotation_seed;
        // The estimator's transform runs the other way, mapping
        // reference coordinates into the current frame.
        self.estimator.estimate(
            &self.frames[self.ref_index],
            &self.frames[self.cur_index],
            depth_source,
            &predicted_to_reference.inverse(),
            &Mat6::identity(),
        );

        if self.estimator.is_valid() {
            // Pose of the current camera expressed in the reference frame.
            let to_reference = self.estimator.motion().inverse();
            self.motion_estimate = self.ref_to_prev * to_reference;
            self.motion_covariance = self.estimator.covariance();
            self.ref_to_prev = to_reference.inverse();
            self.pose *= self.motion_estimate;
        } else if !changed_reference_frames {
            // Estimation against the reference failed: try the previous
            // frame instead. The predicted pose of the current camera in
            // the previous frame is the inter-frame rotation alone.
            log::debug!("estimation against reference frame failed, trying previous frame");
            let rotation_seed = Iso3::from_parts(Translation3::identity(), initial_rotation);
            self.estimator.estimate(
                &self.frames[self.prev_index],
                &self.frames[self.cur_index],
                depth_source,
                &rotation_seed.inverse(),
                &Mat6::identity(),
            );
            if self.estimator.is_valid() {
                self.motion_estimate = self.estimator.motion().inverse();
                self.motion_covariance = self.estimator.covariance();
                self.pose *= self.motion_estimate;
                self.change_reference_frames = true;
            }
        }

        if self.config.update_target_features_with_refined && self.estimator.is_valid() {
            for (track_id, position) in self.estimator.refined_target_positions() {
                self.frames[self.cur_index].set_keypoint_position(track_id, position);
            }
        }

        // Re-anchor when tracking against the reference degrades.
        if !self.estimator.is_valid()
            || self.estimator.num_inliers() < self.config.ref_frame_change_threshold
        {
            self.change_reference_frames = true;
        }
        if self.change_reference_frames {
            log::debug!("changing reference frames");
        }
        Ok(())
    }

    /// Estimate the rotation between two frames by aligning their coarse
    /// images with a homography, then reading small-angle roll, pitch
    /// and yaw off its entries.
    fn estimate_initial_rotation(&mut self, previous_index: usize, current_index: usize) -> Quat {
        let num_levels = self.frames[previous_index].num_levels();
        let level = INITIAL_ROTATION_PYRAMID_LEVEL.min(num_levels - 1);
        let downsample = INITIAL_ROTATION_PYRAMID_LEVEL - level;

        let mut estimator = HomographyEstimator::default();
        estimator.set_template_image(self.frames[previous_index].level(level).image(), downsample);
        estimator.set_test_image(self.frames[current_index].level(level).image(), downsample);
        let (h, _rms) = estimator.track(Mat3::identity(), 8);

        if !h.iter().all(|v| v.is_finite()) {
            log::debug!("coarse image alignment produced a degenerate homography");
            self.initial_homography = Mat3::identity();
            return Quat::identity();
        }

        // Scale back to full-resolution coordinates.
        let scale = (1usize << INITIAL_ROTATION_PYRAMID_LEVEL) as Float;
        let scaling = Mat3::from_diagonal(&Vec3::new(scale, scale, 1.0));
        let scaling_inv = Mat3::from_diagonal(&Vec3::new(1.0 / scale, 1.0 / scale, 1.0));
        let h = scaling * h * scaling_inv;
        self.initial_homography = h;

        let fx = self.intrinsics.focal.0;
        let roll = (h[(1, 2)] / fx).clamp(-1.0, 1.0).asin();
        let pitch = -(h[(0, 2)] / fx).clamp(-1.0, 1.0).asin();
        let yaw = -h[(1, 0)].atan2(h[(0, 0)]);
        so3::from_rpy(Vec3::new(roll, pitch, yaw))
    }

    /// Proportional control of the FAST threshold toward the target
    /// feature density.
    fn adapt_fast_threshold(&mut self) {
        let target = (self.intrinsics.width * self.intrinsics.height
            / self.config.target_pixels_per_feature) as i32;
        let detected = self.frames[self.cur_index].num_detected_keypoints() as i32;
        let error = detected - target;
        let adjustment =
            (Float::from(error) * self.config.fast_threshold_adaptive_gain).round() as i32;
        self.fast_threshold = clamp_i32(
            self.fast_threshold + adjustment,
            FAST_THRESHOLD_MIN,
            FAST_THRESHOLD_MAX,
        );
    }

    // ACCESSORS #####################################################

    /// Accumulated pose (world <- current camera).
    pub fn pose(&self) -> Iso3 {
        self.pose
    }

    /// Motion of the current camera relative to the previous frame's
    /// camera, from the last `process_frame` call.
    pub fn motion_estimate(&self) -> Iso3 {
        self.motion_estimate
    }

    /// Covariance of the last motion estimate on se(3).
    pub fn motion_covariance(&self) -> Mat6 {
        self.motion_covariance
    }

    /// True when the next frame will replace the reference frame.
    pub fn change_reference_frame_flag(&self) -> bool {
        self.change_reference_frames
    }

    /// Inlier count of the last motion estimation.
    pub fn num_inliers(&self) -> usize {
        self.estimator.num_inliers()
    }

    /// Current FAST threshold of the adaptive controller.
    pub fn fast_threshold(&self) -> i32 {
        self.fast_threshold
    }

    /// Transform mapping reference-frame coordinates into previous-frame
    /// coordinates.
    pub fn ref_to_prev(&self) -> Iso3 {
        self.ref_to_prev
    }

    /// Homography of the last initial-rotation estimation, scaled to
    /// full-resolution pixel coordinates.
    pub fn initial_homography_estimate(&self) -> Mat3 {
        self.initial_homography
    }

    pub fn reference_frame(&self) -> &OdometryFrame {
        &self.frames[self.ref_index]
    }

    pub fn current_frame(&self) -> &OdometryFrame {
        &self.frames[self.cur_index]
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::pyramid::Keypoint;
    use crate::misc::type_aliases::Point3;

    struct FlatDepth {
        intrinsics: Intrinsics,
        depth: Float,
    }

    impl DepthSource for FlatDepth {
        fn get_xyz(&self, u: Float, v: Float, _level: usize) -> Option<Point3> {
            let (fx, fy) = self.intrinsics.focal;
            let (cx, cy) = self.intrinsics.principal_point;
            Some(Point3::new(
                (u - cx) * self.depth / fx,
                (v - cy) * self.depth / fy,
                self.depth,
            ))
        }

        fn refine_xyz(&self, _keypoint: &Keypoint, _point: &mut Point3) -> bool {
            false
        }

        fn have_xyz(&self, _u: Float, _v: Float, _level: usize) -> bool {
            true
        }
    }

    fn gen_intrinsics() -> Intrinsics {
        Intrinsics {
            width: 320,
            height: 240,
            focal: (200.0, 200.0),
            principal_point: (159.5, 119.5),
            distortion: [0.0; 5],
        }
    }

    fn squares_image(width: usize, height: usize) -> Vec<u8> {
        let mut pixels = vec![90u8; width * height];
        for sy in (16..height - 24).step_by(20) {
            for sx in (16..width - 24).step_by(20) {
                let value = 130 + ((sx * 13 + sy * 7) % 100) as u8;
                for y in sy..sy + 5 {
                    for x in sx..sx + 5 {
                        pixels[y * width + x] = value;
                    }
                }
            }
        }
        pixels
    }

    #[test]
    fn construction_rejects_degenerate_intrinsics() {
        let mut intrinsics = gen_intrinsics();
        intrinsics.width = 0;
        assert!(VisualOdometry::new(&intrinsics, Config::default()).is_err());

        let mut intrinsics = gen_intrinsics();
        intrinsics.focal = (0.0, 200.0);
        assert!(VisualOdometry::new(&intrinsics, Config::default()).is_err());
    }

    #[test]
    fn frame_size_mismatch_is_reported() {
        let intrinsics = gen_intrinsics();
        let mut vo = VisualOdometry::new(&intrinsics, Config::default()).unwrap();
        let depth = FlatDepth {
            intrinsics: intrinsics.clone(),
            depth: 2.0,
        };
        let result = vo.process_frame(&[0u8; 16], &depth);
        assert!(matches!(
            result,
            Err(OdometryError::FrameSizeMismatch { .. })
        ));
    }

    #[test]
    fn bootstrap_frame_requests_a_reference_change() {
        let intrinsics = gen_intrinsics();
        let mut vo = VisualOdometry::new(&intrinsics, Config::default()).unwrap();
        let depth = FlatDepth {
            intrinsics: intrinsics.clone(),
            depth: 2.0,
        };
        vo.process_frame(&squares_image(320, 240), &depth).unwrap();
        assert!(vo.change_reference_frame_flag());
        assert_eq!(vo.pose(), Iso3::identity());
    }

    #[test]
    fn adaptive_threshold_stays_clamped() {
        let intrinsics = gen_intrinsics();
        let config = Config {
            fast_threshold: 5,
            use_adaptive_threshold: true,
            fast_threshold_adaptive_gain: 10.0,
            ..Config::default()
        };
        let mut vo = VisualOdometry::new(&intrinsics, config).unwrap();
        let depth = FlatDepth {
            intrinsics: intrinsics.clone(),
            depth: 2.0,
        };
        // A rich image with an aggressive gain slams the threshold into
        // the clamp range.
        for _ in 0..3 {
            vo.process_frame(&squares_image(320, 240), &depth).unwrap();
            assert!(vo.fast_threshold() >= FAST_THRESHOLD_MIN);
            assert!(vo.fast_threshold() <= FAST_THRESHOLD_MAX);
        }
    }
}
