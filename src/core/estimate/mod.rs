// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frame-to-frame motion estimation: matching, consensus, refinement.

pub mod clique;
pub mod matching;
pub mod motion;

pub use matching::FeatureMatch;
pub use motion::{MotionEstimateStatus, MotionEstimator};
