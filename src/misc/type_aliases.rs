// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Type aliases for common types used all over the code base.

use nalgebra as na;

pub type Float = f64;

pub type Point2 = na::Point2<Float>;
pub type Point3 = na::Point3<Float>;

pub type Vec2 = na::Vector2<Float>;
pub type Vec3 = na::Vector3<Float>;
pub type Vec6 = na::Vector6<Float>;
pub type Vec8 = na::SVector<Float, 8>;

pub type Mat2 = na::Matrix2<Float>;
pub type Mat3 = na::Matrix3<Float>;
pub type Mat4 = na::Matrix4<Float>;
pub type Mat6 = na::Matrix6<Float>;
pub type Mat8 = na::SMatrix<Float, 8, 8>;

pub type Iso3 = na::Isometry3<Float>;
pub type Quat = na::UnitQuaternion<Float>;
