// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mathematical tools useful for the visual odometry core.

pub mod se3;
pub mod sl3;
pub mod so3;
