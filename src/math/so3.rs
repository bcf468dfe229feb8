// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rotations.
//!
//! Interesting reads:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Ethan Eade course on Lie Groups for 2D and 3D transformations:
//!     - details: <http://ethaneade.com/lie.pdf>
//!     - summary: <http://ethaneade.com/lie_groups.pdf>

use nalgebra::Quaternion;
use std::f64::consts::PI;

use crate::misc::type_aliases::{Float, Mat3, Quat, Vec3};

/// Threshold for using Taylor series in computations.
const EPSILON_TAYLOR_SERIES: Float = 1e-2;
const EPSILON_TAYLOR_SERIES_2: Float = EPSILON_TAYLOR_SERIES * EPSILON_TAYLOR_SERIES;
const _1_8: Float = 0.125;
const _1_48: Float = 1.0 / 48.0;

/// Hat operator.
/// Goes from so3 parameterization to so3 element (skew-symmetric matrix).
#[rustfmt::skip]
pub fn hat(w: Vec3) -> Mat3 {
    Mat3::new(
         0.0,  -w.z,   w.y,
         w.z,   0.0,  -w.x,
        -w.y,   w.x,   0.0,
    )
}

/// Squared hat operator (`hat_2(w) == hat(w) * hat(w)`).
/// Result is a symmetric matrix.
#[rustfmt::skip]
pub fn hat_2(w: Vec3) -> Mat3 {
    let w11 = w.x * w.x;
    let w12 = w.x * w.y;
    let w13 = w.x * w.z;
    let w22 = w.y * w.y;
    let w23 = w.y * w.z;
    let w33 = w.z * w.z;
    Mat3::new(
        -w22 - w33,     w12,           w13,
         w12,          -w11 - w33,     w23,
         w13,           w23,          -w11 - w22,
    )
}

/// Vee operator. Inverse of hat operator.
/// Warning! does not check that the given matrix is skew-symmetric.
pub fn vee(mat: Mat3) -> Vec3 {
    Vec3::new(mat.m32, mat.m13, mat.m21)
}

/// Convert roll, pitch, yaw angles to a unit quaternion.
/// ZYX convention: `R = Rz(yaw) * Ry(pitch) * Rx(roll)`.
pub fn from_rpy(rpy: Vec3) -> Quat {
    Quat::from_euler_angles(rpy.x, rpy.y, rpy.z)
}

/// Recover roll, pitch, yaw angles from a unit quaternion.
/// Inverse of [`from_rpy`] away from the pitch singularity.
pub fn to_rpy(rotation: Quat) -> Vec3 {
    let (roll, pitch, yaw) = rotation.euler_angles();
    Vec3::new(roll, pitch, yaw)
}

/// Compute the exponential map from Lie algebra so3 to Lie group SO3.
/// Goes from so3 parameterization to SO3 element (rotation).
pub fn exp(w: Vec3) -> Quat {
    let theta_2 = w.norm_squared();
    let real_factor;
    let imag_factor;
    if theta_2 < EPSILON_TAYLOR_SERIES_2 {
        real_factor = 1.0 - _1_8 * theta_2;
        imag_factor = 0.5 - _1_48 * theta_2;
    } else {
        let theta = theta_2.sqrt();
        let half_theta = 0.5 * theta;
        real_factor = half_theta.cos();
        imag_factor = half_theta.sin() / theta;
    }
    Quat::from_quaternion(Quaternion::from_parts(real_factor, imag_factor * w))
}

/// Compute the logarithm map from the Lie group SO3 to the Lie algebra so3.
/// Inverse of the exponential map.
pub fn log(rotation: Quat) -> Vec3 {
    let imag_vector = rotation.vector();
    let imag_norm_2 = imag_vector.norm_squared();
    let real_factor = rotation.scalar();
    if imag_norm_2 < EPSILON_TAYLOR_SERIES_2 {
        let theta_by_imag_norm = 2.0 / real_factor; // TAYLOR
        theta_by_imag_norm * imag_vector
    } else if real_factor.abs() < EPSILON_TAYLOR_SERIES {
        let imag_norm = imag_norm_2.sqrt();
        let alpha = real_factor.abs() / imag_norm;
        let theta = real_factor.signum() * (PI - 2.0 * alpha); // TAYLOR
        (theta / imag_norm) * imag_vector
    } else {
        let imag_norm = imag_norm_2.sqrt();
        let theta = 2.0 * (imag_norm / real_factor).atan();
        (theta / imag_norm) * imag_vector
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use quickcheck::TestResult;

    // Round-trip precision is limited by the Taylor branch used for
    // rotations close to half a turn.
    const EPSILON_ROUNDTRIP_APPROX: Float = 1e-5;

    #[test]
    fn exp_log_round_trip() {
        let w = Vec3::zeros();
        assert_eq!(w, log(exp(w)));
    }

    #[test]
    fn rpy_round_trip() {
        let rpy = Vec3::new(0.10, -0.25, 0.40);
        approx::assert_relative_eq!(rpy, to_rpy(from_rpy(rpy)), epsilon = 1e-12);
    }

    #[test]
    fn rpy_composes_in_zyx_order() {
        let q = from_rpy(Vec3::new(0.1, 0.2, 0.3));
        let composed = Quat::from_axis_angle(&Vec3::z_axis(), 0.3)
            * Quat::from_axis_angle(&Vec3::y_axis(), 0.2)
            * Quat::from_axis_angle(&Vec3::x_axis(), 0.1);
        approx::assert_relative_eq!(q, composed, epsilon = 1e-12);
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn hat_vee_roundtrip(x: Float, y: Float, z: Float) -> TestResult {
        if ![x, y, z].iter().all(|v| v.is_finite()) {
            return TestResult::discard();
        }
        let element = Vec3::new(x, y, z);
        TestResult::from_bool(element == vee(hat(element)))
    }

    #[quickcheck_macros::quickcheck]
    fn hat_2_ok(x: Float, y: Float, z: Float) -> TestResult {
        if ![x, y, z].iter().all(|v| v.is_finite() && v.abs() < 1e6) {
            return TestResult::discard();
        }
        let element = Vec3::new(x, y, z);
        TestResult::from_bool(hat_2(element) == hat(element) * hat(element))
    }

    #[quickcheck_macros::quickcheck]
    fn log_exp_round_trip(roll: Float, pitch: Float, yaw: Float) -> TestResult {
        if ![roll, pitch, yaw].iter().all(|v| v.is_finite()) {
            return TestResult::discard();
        }
        let rotation = gen_rotation(roll, pitch, yaw);
        TestResult::from_bool(approx::relative_eq!(
            rotation,
            exp(log(rotation)),
            epsilon = EPSILON_ROUNDTRIP_APPROX
        ))
    }

    // GENERATORS ####################################################

    fn gen_rotation(roll: Float, pitch: Float, yaw: Float) -> Quat {
        from_rpy(Vec3::new(roll, pitch, yaw))
    }
}
