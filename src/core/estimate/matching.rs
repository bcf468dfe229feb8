// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Candidate feature matching between a reference and a target frame.
//!
//! Reference keypoints with depth are projected through the initial
//! motion estimate into the target frame; the best SAD candidate inside
//! a square search window at the same pyramid level is kept when the
//! preference is mutual.

use crate::core::features::descriptor;
use crate::core::frame::{DepthSource, OdometryFrame};
use crate::misc::type_aliases::{Float, Iso3, Point3, Vec2};

/// Reject matches with a mean SAD above this many gray levels per
/// descriptor byte. Loose on purpose: the rigidity clique is the real
/// outlier filter.
const MAX_SAD_PER_BYTE: u32 = 50;

/// A candidate correspondence between two frames.
#[derive(Debug, Clone)]
pub struct FeatureMatch {
    /// Track id in the reference frame.
    pub ref_id: usize,
    /// Track id in the target frame.
    pub target_id: usize,
    /// SAD descriptor distance.
    pub distance: u32,
    /// Pyramid level of both keypoints.
    pub level: usize,
    /// Reference 3D point, reference camera frame.
    pub ref_xyz: Point3,
    /// Target 3D point, target camera frame (refined when subpixel
    /// refinement ran).
    pub target_xyz: Point3,
    /// Refined target position at the keypoint's own level.
    pub target_uv_level: Vec2,
    /// Refined target position in full-resolution coordinates.
    pub target_uv_base: Vec2,
    /// Selected by the consensus clique.
    pub in_clique: bool,
    /// Survived the reprojection-error pruning.
    pub inlier: bool,
    /// Reprojection error of the final motion estimate, in pixels.
    pub reprojection_error: Float,
}

/// Project reference keypoints through `initial_motion` and pair them
/// with target keypoints by mutual best SAD. Both keypoints must carry
/// depth; the target 3D point still comes from the detection position
/// and is refined later.
pub fn find_matches(
    reference: &OdometryFrame,
    target: &OdometryFrame,
    initial_motion: &Iso3,
    search_window: usize,
    descriptor_len: usize,
) -> Vec<FeatureMatch> {
    let intrinsics = reference.intrinsics();
    let num_ref = reference.num_keypoints();
    let num_target = target.num_keypoints();
    let mut best_for_ref: Vec<Option<(usize, u32)>> = vec![None; num_ref];
    let mut best_for_target: Vec<Option<(usize, u32)>> = vec![None; num_target];
    let window = search_window as Float;

    for ref_id in 0..num_ref {
        let ref_kp = reference.keypoint(ref_id);
        if !ref_kp.has_depth {
            continue;
        }
        let predicted = *initial_motion * ref_kp.xyz;
        if predicted.z <= 0.0 {
            continue;
        }
        let uv = intrinsics.project(predicted);
        let scale = (1usize << ref_kp.level) as Float;
        let predicted_u = uv.x / scale;
        let predicted_v = uv.y / scale;
        let ref_descriptor = reference.keypoint_descriptor(ref_id);

        for target_kp in target.level(ref_kp.level).keypoints() {
            if !target_kp.has_depth {
                continue;
            }
            if (target_kp.u - predicted_u).abs() > window
                || (target_kp.v - predicted_v).abs() > window
            {
                continue;
            }
            let target_descriptor = target.keypoint_descriptor(target_kp.track_id);
            let distance = descriptor::sad(ref_descriptor, target_descriptor);
            if best_for_ref[ref_id].map_or(true, |(_, d)| distance < d) {
                best_for_ref[ref_id] = Some((target_kp.track_id, distance));
            }
            if best_for_target[target_kp.track_id].map_or(true, |(_, d)| distance < d) {
                best_for_target[target_kp.track_id] = Some((ref_id, distance));
            }
        }
    }

    let max_distance = MAX_SAD_PER_BYTE * descriptor_len as u32;
    let mut matches = Vec::new();
    for ref_id in 0..num_ref {
        let Some((target_id, distance)) = best_for_ref[ref_id] else {
            continue;
        };
        let mutual = best_for_target[target_id]
            .map(|(r, _)| r == ref_id)
            .unwrap_or(false);
        if !mutual || distance > max_distance {
            continue;
        }
        let ref_kp = reference.keypoint(ref_id);
        let target_kp = target.keypoint(target_id);
        matches.push(FeatureMatch {
            ref_id,
            target_id,
            distance,
            level: ref_kp.level,
            ref_xyz: ref_kp.xyz,
            target_xyz: target_kp.xyz,
            target_uv_level: Vec2::new(target_kp.u, target_kp.v),
            target_uv_base: Vec2::new(target_kp.base_u(), target_kp.base_v()),
            in_clique: false,
            inlier: false,
            reprojection_error: 0.0,
        });
    }
    matches
}

/// Refine a match's target position by translation-only ESM alignment of
/// the reference patch, then re-back-project its 3D point.
///
/// The reference patch around the reference keypoint is the template;
/// the target window slides until the intensity error stops improving.
pub fn refine_match(
    reference: &OdometryFrame,
    target: &OdometryFrame,
    depth_source: &dyn DepthSource,
    feature_window_size: usize,
    m: &mut FeatureMatch,
) {
    const MAX_ITERATIONS: usize = 5;
    const CONVERGENCE_EPSILON: Float = 1e-3;

    let ref_kp = reference.keypoint(m.ref_id);
    let ref_image = reference.level(m.level).image();
    let target_image = target.level(m.level).image();
    let radius = (feature_window_size / 2) as i32;

    // Template patch with a one-pixel apron for gradients.
    let side = (2 * radius + 3) as usize;
    let mut template = vec![0.0 as Float; side * side];
    for dy in 0..side {
        for dx in 0..side {
            let x = ref_kp.u + (dx as i32 - radius - 1) as Float;
            let y = ref_kp.v + (dy as i32 - radius - 1) as Float;
            match ref_image.interpolate(x, y) {
                Some(value) => template[dy * side + dx] = value,
                None => return,
            }
        }
    }

    let mut u = m.target_uv_level.x;
    let mut v = m.target_uv_level.y;
    let mut best_uv = (u, v);
    let mut best_error = Float::INFINITY;

    for _ in 0..MAX_ITERATIONS {
        // Target patch around the current estimate.
        let mut patch = vec![0.0 as Float; side * side];
        for dy in 0..side {
            for dx in 0..side {
                let x = u + (dx as i32 - radius - 1) as Float;
                let y = v + (dy as i32 - radius - 1) as Float;
                match target_image.interpolate(x, y) {
                    Some(value) => patch[dy * side + dx] = value,
                    None => return,
                }
            }
        }

        // 2x2 normal equations from the averaged gradients.
        let mut h00 = 0.0;
        let mut h01 = 0.0;
        let mut h11 = 0.0;
        let mut g0 = 0.0;
        let mut g1 = 0.0;
        let mut error_sum = 0.0;
        for dy in 1..side - 1 {
            for dx in 1..side - 1 {
                let i = dy * side + dx;
                let residual = patch[i] - template[i];
                let grad_x = 0.25
                    * (patch[i + 1] - patch[i - 1] + template[i + 1] - template[i - 1]);
                let grad_y = 0.25
                    * (patch[i + side] - patch[i - side] + template[i + side]
                        - template[i - side]);
                h00 += grad_x * grad_x;
                h01 += grad_x * grad_y;
                h11 += grad_y * grad_y;
                g0 += grad_x * residual;
                g1 += grad_y * residual;
                error_sum += residual * residual;
            }
        }
        if error_sum < best_error {
            best_error = error_sum;
            best_uv = (u, v);
        }

        let det = h00 * h11 - h01 * h01;
        if det.abs() < 1e-9 {
            break;
        }
        let du = -(h11 * g0 - h01 * g1) / det;
        let dv = -(h00 * g1 - h01 * g0) / det;
        u += du;
        v += dv;
        if du.hypot(dv) < CONVERGENCE_EPSILON {
            // Keep the converged position if it is at least as good.
            let (bu, bv) = best_uv;
            if (u - bu).hypot(v - bv) < 1.0 {
                best_uv = (u, v);
            }
            break;
        }
    }

    let (u, v) = best_uv;
    let scale = (1usize << m.level) as Float;
    m.target_uv_level = Vec2::new(u, v);
    m.target_uv_base = Vec2::new(u * scale, v * scale);

    // Update the 3D point: the depth source may refine it, otherwise
    // back-project the refined position.
    let mut refined_kp = *target.keypoint(m.target_id);
    refined_kp.u = u;
    refined_kp.v = v;
    let mut xyz = m.target_xyz;
    if depth_source.refine_xyz(&refined_kp, &mut xyz) {
        m.target_xyz = xyz;
    } else if depth_source.have_xyz(u * scale, v * scale, m.level) {
        if let Some(point) = depth_source.get_xyz(u * scale, v * scale, m.level) {
            if point.x.is_finite() && point.y.is_finite() && point.z.is_finite() {
                m.target_xyz = point;
            }
        }
    }
}

// TESTS #############################################################
