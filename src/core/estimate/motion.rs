// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rigid motion estimation between a reference and a target frame.
//!
//! The estimate is computed in four stages: candidate matching, optional
//! subpixel refinement of the matches, maximum-consensus inlier
//! selection on the rigidity graph, and Gauss-Newton refinement of the
//! SE(3) transform under the reprojection-error model. The resulting
//! transform maps reference-frame camera coordinates into target-frame
//! camera coordinates.

use itertools::izip;

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::estimate::clique::max_consensus_clique;
use crate::core::estimate::matching::{self, FeatureMatch};
use crate::core::frame::{DepthSource, OdometryFrame};
use crate::math::se3;
use crate::misc::type_aliases::{Float, Iso3, Mat6, Vec2, Vec6};

/// Result category of the last `estimate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEstimateStatus {
    /// No estimation has run yet.
    NoData,
    /// A valid motion estimate is available.
    Valid,
    /// Too few matches survived the consensus selection.
    InsufficientInliers,
    /// The normal equations could not be solved or the iterations
    /// diverged.
    OptimizationFailure,
    /// The refined estimate reprojects too poorly to be trusted.
    ReprojectionError,
}

/// Maximum Gauss-Newton iterations per refinement pass.
const MAX_GN_ITERATIONS: usize = 10;
/// Iterations stop when the update norm falls below this.
const GN_CONVERGENCE_EPSILON: Float = 1e-10;
/// Tolerated relative growth of the squared error between iterations.
const DIVERGENCE_TOLERANCE: Float = 1.001;

/// Estimates frame-to-frame motion. One instance is reused across
/// frames; it only borrows the two frames for the duration of a call.
pub struct MotionEstimator {
    inlier_max_reprojection_error: Float,
    clique_inlier_threshold: Float,
    min_features_for_estimate: usize,
    max_mean_reprojection_error: Float,
    use_subpixel_refinement: bool,
    feature_search_window: usize,
    feature_window_size: usize,
    update_target_features_with_refined: bool,

    matches: Vec<FeatureMatch>,
    motion: Iso3,
    covariance: Mat6,
    status: MotionEstimateStatus,
    num_inliers: usize,
    mean_reprojection_error: Float,
}

impl MotionEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            inlier_max_reprojection_error: config.inlier_max_reprojection_error,
            clique_inlier_threshold: config.clique_inlier_threshold,
            min_features_for_estimate: config.min_features_for_estimate,
            max_mean_reprojection_error: config.max_mean_reprojection_error,
            use_subpixel_refinement: config.use_subpixel_refinement,
            feature_search_window: config.feature_search_window,
            feature_window_size: config.feature_window_size,
            update_target_features_with_refined: config.update_target_features_with_refined,
            matches: Vec::new(),
            motion: Iso3::identity(),
            covariance: Mat6::identity(),
            status: MotionEstimateStatus::NoData,
            num_inliers: 0,
            mean_reprojection_error: 0.0,
        }
    }

    /// The transform mapping reference camera coordinates into target
    /// camera coordinates. Meaningful only when `is_valid()`.
    pub fn motion(&self) -> Iso3 {
        self.motion
    }

    /// 6x6 covariance of the motion estimate on se(3).
    pub fn covariance(&self) -> Mat6 {
        self.covariance
    }

    pub fn status(&self) -> MotionEstimateStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == MotionEstimateStatus::Valid
    }

    pub fn num_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn num_inliers(&self) -> usize {
        self.num_inliers
    }

    pub fn mean_reprojection_error(&self) -> Float {
        self.mean_reprojection_error
    }

    /// The matches of the last estimation, with their clique and inlier
    /// flags filled in.
    pub fn matches(&self) -> &[FeatureMatch] {
        &self.matches
    }

    /// Refined target positions `(track_id, position)` at keypoint level
    /// scale, for callers that want to write them back into the target
    /// frame.
    pub fn refined_target_positions(&self) -> Vec<(usize, Vec2)> {
        if !self.update_target_features_with_refined {
            return Vec::new();
        }
        self.matches
            .iter()
            .filter(|m| m.inlier)
            .map(|m| (m.target_id, m.target_uv_level))
            .collect()
    }

    /// Estimate the motion from `reference` to `target`, starting from
    /// `initial_motion`.
    pub fn estimate(
        &mut self,
        reference: &OdometryFrame,
        target: &OdometryFrame,
        depth_source: &dyn DepthSource,
        initial_motion: &Iso3,
        _initial_covariance: &Mat6,
    ) {
        let intrinsics = reference.intrinsics();
        self.motion = *initial_motion;
        self.covariance = Mat6::identity();
        self.num_inliers = 0;
        self.mean_reprojection_error = 0.0;

        let descriptor_len = reference
            .level(0)
            .descriptor_extractor()
            .descriptor_len();
        self.matches = matching::find_matches(
            reference,
            target,
            initial_motion,
            self.feature_search_window,
            descriptor_len,
        );

        if self.use_subpixel_refinement {
            for m in self.matches.iter_mut() {
                matching::refine_match(
                    reference,
                    target,
                    depth_source,
                    self.feature_window_size,
                    m,
                );
            }
        }

        if self.matches.len() < self.min_features_for_estimate {
            self.status = MotionEstimateStatus::InsufficientInliers;
            return;
        }

        // Consensus selection on the rigidity graph.
        let clique = max_consensus_clique(&self.matches, self.clique_inlier_threshold);
        for m in self.matches.iter_mut() {
            m.in_clique = false;
            m.inlier = false;
        }
        for &index in &clique {
            self.matches[index].in_clique = true;
            self.matches[index].inlier = true;
        }
        if clique.len() < self.min_features_for_estimate {
            self.status = MotionEstimateStatus::InsufficientInliers;
            log::debug!(
                "consensus clique too small: {} of {} matches",
                clique.len(),
                self.matches.len()
            );
            return;
        }

        // First refinement pass on the clique members.
        let mut motion = *initial_motion;
        let mut hessian = Mat6::identity();
        if !self.refine(intrinsics, &mut motion, &mut hessian) {
            self.status = MotionEstimateStatus::OptimizationFailure;
            return;
        }

        // Prune reprojection outliers and refine once more.
        self.update_reprojection_errors(intrinsics, &motion);
        for m in self.matches.iter_mut() {
            m.inlier = m.in_clique && m.reprojection_error <= self.inlier_max_reprojection_error;
        }
        let surviving = self.matches.iter().filter(|m| m.inlier).count();
        if surviving < self.min_features_for_estimate {
            self.status = MotionEstimateStatus::InsufficientInliers;
            return;
        }
        if !self.refine(intrinsics, &mut motion, &mut hessian) {
            self.status = MotionEstimateStatus::OptimizationFailure;
            return;
        }

        self.update_reprojection_errors(intrinsics, &motion);
        let mut error_sum = 0.0;
        let mut num_inliers = 0usize;
        for m in self.matches.iter().filter(|m| m.inlier) {
            error_sum += m.reprojection_error;
            num_inliers += 1;
        }
        let mean_error = error_sum / num_inliers as Float;
        if mean_error > self.max_mean_reprojection_error {
            self.status = MotionEstimateStatus::ReprojectionError;
            return;
        }

        // Covariance from the final Hessian, scaled by the residual
        // variance estimate.
        let dof = 2.0 * num_inliers as Float - 6.0;
        let mut squared_error_sum = 0.0;
        for m in self.matches.iter().filter(|m| m.inlier) {
            squared_error_sum += m.reprojection_error * m.reprojection_error;
        }
        let variance = if dof > 0.0 {
            squared_error_sum / dof
        } else {
            1.0
        };
        match hessian.try_inverse() {
            Some(inverse) => self.covariance = variance * inverse,
            None => {
                self.status = MotionEstimateStatus::OptimizationFailure;
                return;
            }
        }

        self.motion = motion;
        self.num_inliers = num_inliers;
        self.mean_reprojection_error = mean_error;
        self.status = MotionEstimateStatus::Valid;
    }

    /// Gauss-Newton iterations on the current inlier set. Returns false
    /// on a singular system or diverging residual.
    fn refine(&self, intrinsics: &Intrinsics, motion: &mut Iso3, hessian_out: &mut Mat6) -> bool {
        let points: Vec<_> = self
            .matches
            .iter()
            .filter(|m| m.inlier)
            .map(|m| (m.ref_xyz, m.target_uv_base))
            .collect();
        if points.is_empty() {
            return false;
        }

        let (fx, fy) = intrinsics.focal;
        let mut previous_error = Float::INFINITY;

        for _ in 0..MAX_GN_ITERATIONS {
            let mut hessian = Mat6::zeros();
            let mut gradient = Vec6::zeros();
            let mut squared_error = 0.0;

            for &(ref_xyz, observed) in &points {
                let q = *motion * ref_xyz;
                if q.z <= 1e-6 {
                    return false;
                }
                let iz = 1.0 / q.z;
                let iz2 = iz * iz;
                let projected = intrinsics.project(q);
                let residual = projected - observed;
                squared_error += residual.norm_squared();

                // Rows of d(projection) / d(twist) for the left update
                // exp(delta) * motion.
                let ju = Vec6::new(
                    fx * iz,
                    0.0,
                    -fx * q.x * iz2,
                    -fx * q.x * q.y * iz2,
                    fx * (1.0 + q.x * q.x * iz2),
                    -fx * q.y * iz,
                );
                let jv = Vec6::new(
                    0.0,
                    fy * iz,
                    -fy * q.y * iz2,
                    -fy * (1.0 + q.y * q.y * iz2),
                    fy * q.x * q.y * iz2,
                    fy * q.x * iz,
                );
                hessian += ju * ju.transpose() + jv * jv.transpose();
                gradient += ju * residual.x + jv * residual.y;
            }

            if squared_error > previous_error * DIVERGENCE_TOLERANCE + 1e-12 {
                return false;
            }
            previous_error = squared_error;
            *hessian_out = hessian;

            let delta = match hessian.cholesky() {
                Some(cholesky) => -cholesky.solve(&gradient),
                None => return false,
            };
            *motion = se3::exp(delta) * *motion;
            if delta.norm() < GN_CONVERGENCE_EPSILON {
                break;
            }
        }
        true
    }

    /// Recompute per-match reprojection errors of `motion` for the
    /// clique members.
    fn update_reprojection_errors(&mut self, intrinsics: &Intrinsics, motion: &Iso3) {
        let errors: Vec<Float> = self
            .matches
            .iter()
            .map(|m| {
                let q = *motion * m.ref_xyz;
                if q.z <= 1e-6 {
                    return Float::INFINITY;
                }
                (intrinsics.project(q) - m.target_uv_base).norm()
            })
            .collect();
        for (m, error) in izip!(self.matches.iter_mut(), errors) {
            m.reprojection_error = error;
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::misc::type_aliases::{Point3, Vec3};

    // The geometric core is exercised through synthetic matches here;
    // full-pipeline behaviour is covered by the integration scenarios.

    fn gen_intrinsics() -> Intrinsics {
        Intrinsics {
            width: 320,
            height: 240,
            focal: (200.0, 200.0),
            principal_point: (159.5, 119.5),
            distortion: [0.0; 5],
        }
    }

    fn synthetic_estimator(config: &Config) -> MotionEstimator {
        MotionEstimator::new(config)
    }

    fn synthetic_matches(
        intrinsics: &Intrinsics,
        motion: &Iso3,
        points: &[Point3],
    ) -> Vec<FeatureMatch> {
        points
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let q = motion * p;
                let uv = intrinsics.project(q);
                FeatureMatch {
                    ref_id: i,
                    target_id: i,
                    distance: 0,
                    level: 0,
                    ref_xyz: p,
                    target_xyz: q,
                    target_uv_level: Vec2::new(uv.x, uv.y),
                    target_uv_base: Vec2::new(uv.x, uv.y),
                    in_clique: true,
                    inlier: true,
                    reprojection_error: 0.0,
                }
            })
            .collect()
    }

    fn gen_points() -> Vec<Point3> {
        let mut points = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                points.push(Point3::new(
                    -1.0 + 0.4 * i as Float,
                    -0.8 + 0.4 * j as Float,
                    2.0 + 0.1 * ((i * 5 + j) % 7) as Float,
                ));
            }
        }
        points
    }

    #[test]
    fn gauss_newton_recovers_a_known_motion() {
        let intrinsics = gen_intrinsics();
        let truth = Iso3::new(Vec3::new(0.1, -0.04, 0.06), Vec3::new(0.01, -0.02, 0.015));
        let mut estimator = synthetic_estimator(&Config::default());
        estimator.matches = synthetic_matches(&intrinsics, &truth, &gen_points());

        let mut motion = Iso3::identity();
        let mut hessian = Mat6::identity();
        assert!(estimator.refine(&intrinsics, &mut motion, &mut hessian));

        let translation_error = (motion.translation.vector - truth.translation.vector).norm();
        let rotation_error = motion.rotation.angle_to(&truth.rotation);
        assert!(translation_error < 1e-6, "translation off by {}", translation_error);
        assert!(rotation_error < 1e-7, "rotation off by {}", rotation_error);
    }

    #[test]
    fn reprojection_errors_are_zero_for_the_true_motion() {
        let intrinsics = gen_intrinsics();
        let truth = Iso3::new(Vec3::new(0.02, 0.0, -0.03), Vec3::new(0.0, 0.01, 0.0));
        let mut estimator = synthetic_estimator(&Config::default());
        estimator.matches = synthetic_matches(&intrinsics, &truth, &gen_points());
        estimator.update_reprojection_errors(&intrinsics, &truth);
        for m in estimator.matches() {
            assert!(m.reprojection_error < 1e-9);
        }
    }

    #[test]
    fn singular_geometry_fails_gracefully() {
        // A single point cannot constrain six degrees of freedom.
        let intrinsics = gen_intrinsics();
        let truth = Iso3::identity();
        let mut estimator = synthetic_estimator(&Config::default());
        estimator.matches =
            synthetic_matches(&intrinsics, &truth, &[Point3::new(0.0, 0.0, 2.0)]);
        let mut motion = Iso3::identity();
        let mut hessian = Mat6::identity();
        assert!(!estimator.refine(&intrinsics, &mut motion, &mut hessian));
    }
}
