// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Subpixel refinement of corner positions.
//!
//! A 2D quadratic `s(dx, dy) = a dx^2 + b dy^2 + c dx dy + d dx + e dy + f`
//! is fitted to the 3x3 neighbourhood of the corner score field and the
//! corner is moved to the stationary point when it falls inside the
//! center pixel.

use crate::core::features::fast;
use crate::core::image::Image8;
use crate::misc::type_aliases::Float;

/// Determinant guard for the 2x2 Hessian inversion.
const MIN_HESSIAN_DET: Float = 1e-9;

/// Refine `(x, y)` on the score field of `img` at the given threshold.
/// Returns the refined coordinates, or the integer coordinates when the
/// fit is degenerate or the stationary point leaves the center pixel.
pub fn refine(img: &Image8, threshold: i32, x: usize, y: usize, center_score: i32) -> (Float, Float) {
    let integer = (x as Float, y as Float);

    let mut s = [[0.0 as Float; 3]; 3];
    for (dy, row) in s.iter_mut().enumerate() {
        for (dx, value) in row.iter_mut().enumerate() {
            *value = if (dx, dy) == (1, 1) {
                center_score as Float
            } else {
                fast::score_at(img, x + dx - 1, y + dy - 1, threshold) as Float
            };
        }
    }

    // Quadratic coefficients from finite differences.
    let a = 0.5 * (s[1][2] + s[1][0]) - s[1][1];
    let b = 0.5 * (s[2][1] + s[0][1]) - s[1][1];
    let c = 0.25 * (s[2][2] - s[2][0] - s[0][2] + s[0][0]);
    let d = 0.5 * (s[1][2] - s[1][0]);
    let e = 0.5 * (s[2][1] - s[0][1]);

    // Stationary point of the paraboloid: solve the 2x2 system
    //   | 2a  c | |dx|   |d|
    //   |  c 2b | |dy| = -|e|
    let det = 4.0 * a * b - c * c;
    if det.abs() < MIN_HESSIAN_DET {
        return integer;
    }
    let dx = (-2.0 * b * d + c * e) / det;
    let dy = (-2.0 * a * e + c * d) / det;

    if dx.abs() < 1.0 && dy.abs() < 1.0 {
        (x as Float + dx, y as Float + dy)
    } else {
        integer
    }
}

// TESTS #############################################################
