// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core functionalities of the sparse visual odometry engine.

pub mod camera;
pub mod config;
pub mod estimate;
pub mod features;
pub mod frame;
pub mod homography;
pub mod image;
pub mod multires;
pub mod normalize;
pub mod odometry;
pub mod pyramid;
