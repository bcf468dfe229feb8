// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gaussian downsampling for the generation of multi-resolution image data.
//!
//! The filter is the separable 5-tap binomial kernel `[1 4 6 4 1] / 16`,
//! applied horizontally then vertically, followed by a decimation that
//! keeps even rows and columns. Borders reflect (`index -1` reads
//! `index 1`). Arithmetic is fixed-point: the horizontal pass stores
//! unscaled 16-bit sums, and the single rounding divide `(acc + 128) >> 8`
//! happens after the vertical pass.

use crate::core::image::Image8;

/// The 5-tap binomial kernel, unscaled.
const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];

/// Length (in `u16` elements) of the workspace required by
/// [`gaussian_down`] for a `width x height` source.
pub fn workspace_len(width: usize, height: usize) -> usize {
    width * height
}

/// Reflect an out-of-range index into `[0, len)`.
#[inline]
fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let reflected = if index < 0 {
        -index
    } else if index >= len {
        2 * len - 2 - index
    } else {
        index
    };
    reflected.clamp(0, len - 1) as usize
}

/// Downsample `src` into `dst` with the 5-tap Gaussian kernel.
///
/// `dst` must be `(width / 2) x (height / 2)` (truncating division) and
/// `workspace` must hold at least [`workspace_len`] elements. The
/// workspace receives the horizontally filtered rows; the vertical pass
/// then only evaluates the decimated output positions.
pub fn gaussian_down(src: &Image8, dst: &mut Image8, workspace: &mut [u16]) {
    let width = src.width();
    let height = src.height();
    assert!(width >= 2 && height >= 2);
    assert_eq!(dst.width(), width / 2);
    assert_eq!(dst.height(), height / 2);
    assert!(workspace.len() >= workspace_len(width, height));

    // Horizontal pass. Max accumulator value is 255 * 16, well within u16.
    for y in 0..height {
        let row = src.row(y);
        let ws_row = &mut workspace[y * width..(y + 1) * width];
        for (x, ws) in ws_row.iter_mut().enumerate() {
            let mut acc = 0u32;
            for (k, &coef) in KERNEL.iter().enumerate() {
                let xx = reflect(x as isize + k as isize - 2, width);
                acc += coef * u32::from(row[xx]);
            }
            *ws = acc as u16;
        }
    }

    // Vertical pass on even rows and columns only.
    for yo in 0..dst.height() {
        let y = 2 * yo;
        for xo in 0..dst.width() {
            let x = 2 * xo;
            let mut acc = 0u32;
            for (k, &coef) in KERNEL.iter().enumerate() {
                let yy = reflect(y as isize + k as isize - 2, height);
                acc += coef * u32::from(workspace[yy * width + x]);
            }
            let value = (acc + 128) >> 8;
            dst.set(xo, yo, value.min(255) as u8);
        }
    }
}

// TESTS #############################################################
