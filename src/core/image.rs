// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Owned grayscale image buffer with an aligned row stride.
//!
//! All pixel buffers of the odometry pipeline share the same layout
//! contract: row-major `u8` data with `stride = round_up(width, 16)`.
//! The bytes between `width` and `stride` on each row are addressable
//! but carry no meaning. Descriptor extraction and the Gaussian
//! downsampling rely on this contract, so it is an invariant of the
//! type rather than a convention of its users.

use crate::misc::helper::round_up_to_multiple;
use crate::misc::type_aliases::Float;

/// Row alignment of image and descriptor buffers, in bytes.
pub const ALIGNMENT: usize = 16;

/// An owned 2D grayscale image with aligned row stride.
#[derive(Debug, Clone)]
pub struct Image8 {
    data: Vec<u8>,
    width: usize,
    height: usize,
    stride: usize,
}

impl Image8 {
    /// Allocate a zeroed image. The stride is `width` rounded up to the
    /// alignment.
    pub fn new(width: usize, height: usize) -> Self {
        let stride = round_up_to_multiple(width, ALIGNMENT);
        Self {
            data: vec![0; stride * height],
            width,
            height,
            stride,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Raw buffer, including the stride padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw buffer, including the stride padding.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The valid pixels of row `y`.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.stride + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.stride + x] = value;
    }

    /// Fill the image from a caller-supplied buffer, row by row.
    /// `src` is `width * height` tightly packed pixels.
    pub fn fill_from(&mut self, src: &[u8]) {
        assert_eq!(src.len(), self.width * self.height);
        for y in 0..self.height {
            let dst_start = y * self.stride;
            let src_start = y * self.width;
            self.data[dst_start..dst_start + self.width]
                .copy_from_slice(&src[src_start..src_start + self.width]);
        }
    }

    /// Bilinear interpolation at subpixel coordinates.
    /// Returns `None` outside of `[0, width - 1) x [0, height - 1)`.
    pub fn interpolate(&self, x: Float, y: Float) -> Option<Float> {
        let u = x.floor();
        let v = y.floor();
        if u >= 0.0 && u < (self.width - 1) as Float && v >= 0.0 && v < (self.height - 1) as Float {
            let u_0 = u as usize;
            let v_0 = v as usize;
            let vu_00 = Float::from(self.get(u_0, v_0));
            let vu_10 = Float::from(self.get(u_0, v_0 + 1));
            let vu_01 = Float::from(self.get(u_0 + 1, v_0));
            let vu_11 = Float::from(self.get(u_0 + 1, v_0 + 1));
            let a = x - u;
            let b = y - v;
            Some(
                (1.0 - b) * (1.0 - a) * vu_00
                    + b * (1.0 - a) * vu_10
                    + (1.0 - b) * a * vu_01
                    + b * a * vu_11,
            )
        } else {
            None
        }
    }
}

// TESTS #############################################################
