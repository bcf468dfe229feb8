// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for the 8-parameter homography updates
//! used by the coarse image alignment.
//!
//! The parameterization packs the entries of the 3x3 update matrix in
//! row-major order, skipping the bottom-right entry which stays zero:
//!
//! ```text
//! hat(d) = | d0  d1  d2 |
//!          | d3  d4  d5 |
//!          | d6  d7  0  |
//! ```

use crate::misc::type_aliases::{Mat3, Vec8};

/// Truncation threshold for the exponential series.
const EPSILON_SERIES: f64 = 1e-12;
const MAX_SERIES_TERMS: usize = 12;

/// Hat operator.
/// Goes from the 8-vector parameterization to the 3x3 algebra element.
#[rustfmt::skip]
pub fn hat(d: Vec8) -> Mat3 {
    Mat3::new(
        d[0], d[1], d[2],
        d[3], d[4], d[5],
        d[6], d[7], 0.0,
    )
}

/// Vee operator. Inverse of hat operator.
/// Warning! does not check that the bottom-right entry is zero.
pub fn vee(mat: Mat3) -> Vec8 {
    Vec8::from_column_slice(&[
        mat.m11, mat.m12, mat.m13, mat.m21, mat.m22, mat.m23, mat.m31, mat.m32,
    ])
}

/// Projective exponential: `exp(hat(d))` by truncated power series.
///
/// The updates produced by the alignment iterations are small, so the
/// series converges in a handful of terms.
pub fn exp(d: Vec8) -> Mat3 {
    let a = hat(d);
    let mut result = Mat3::identity();
    let mut term = Mat3::identity();
    for k in 1..=MAX_SERIES_TERMS {
        term = (term * a) / (k as f64);
        result += term;
        if term.norm() < EPSILON_SERIES {
            break;
        }
    }
    result
}

// TESTS #############################################################
