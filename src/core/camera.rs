// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Camera intrinsic parameters and pinhole projection helpers.

use crate::misc::type_aliases::{Float, Mat3, Point2, Point3, Vec2};

/// Intrinsic parameters of a calibrated camera.
///
/// The odometry core operates on rectified images, so the distortion
/// coefficients are carried as calibration metadata only: projection and
/// back-projection below use the pinhole model.
#[derive(PartialEq, Debug, Clone)]
pub struct Intrinsics {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Focal lengths `(fx, fy)` in pixels.
    pub focal: (Float, Float),
    /// Principal point `(cx, cy)` in pixels.
    pub principal_point: (Float, Float),
    /// Radial and tangential distortion coefficients `[k1, k2, p1, p2, k3]`.
    pub distortion: [Float; 5],
}

impl Intrinsics {
    /// Calibration matrix K.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Mat3 {
        Mat3::new(
            self.focal.0, 0.0,          self.principal_point.0,
            0.0,          self.focal.1, self.principal_point.1,
            0.0,          0.0,          1.0,
        )
    }

    /// Project a 3D point in camera coordinates onto the image plane.
    /// The point must be in front of the camera (`z > 0`).
    pub fn project(&self, point: Point3) -> Vec2 {
        let iz = 1.0 / point.z;
        Vec2::new(
            self.focal.0 * point.x * iz + self.principal_point.0,
            self.focal.1 * point.y * iz + self.principal_point.1,
        )
    }

    /// Back-project an image point to camera coordinates at a given depth.
    pub fn back_project(&self, point: Point2, depth: Float) -> Point3 {
        let x = (point.x - self.principal_point.0) * depth / self.focal.0;
        let y = (point.y - self.principal_point.1) * depth / self.focal.1;
        Point3::new(x, y, depth)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn gen_intrinsics() -> Intrinsics {
        Intrinsics {
            width: 640,
            height: 480,
            focal: (500.0, 510.0),
            principal_point: (319.5, 239.5),
            distortion: [0.0; 5],
        }
    }

    #[test]
    fn project_back_project_round_trip() {
        let intrinsics = gen_intrinsics();
        let point = Point3::new(0.3, -0.2, 2.5);
        let uv = intrinsics.project(point);
        let back = intrinsics.back_project(Point2::new(uv.x, uv.y), point.z);
        assert_relative_eq!(point, back, epsilon = 1e-12);
    }

    #[test]
    fn principal_point_projects_from_optical_axis() {
        let intrinsics = gen_intrinsics();
        let uv = intrinsics.project(Point3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(uv.x, 319.5);
        assert_relative_eq!(uv.y, 239.5);
    }
}
