// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sparse feature-based visual odometry for depth-augmented monocular
//! cameras (stereo, RGB-D, or any per-pixel depth source).
//!
//! Each incoming grayscale frame is expanded into a Gaussian image
//! pyramid, FAST keypoints with intensity-patch descriptors are
//! extracted on every level and lifted to 3D through a
//! [`DepthSource`](crate::core::frame::DepthSource), and the rigid
//! motion against a reference frame is estimated by descriptor
//! matching, maximum-consensus inlier selection and Gauss-Newton
//! refinement. The entry point is
//! [`VisualOdometry`](crate::core::odometry::VisualOdometry).

pub mod core;
pub mod math;
pub mod misc;
