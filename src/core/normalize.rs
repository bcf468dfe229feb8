// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-place normalization of image intensities to mean 128 and
//! standard deviation 74.

use crate::core::image::Image8;
use crate::misc::type_aliases::Float;

const TARGET_MEAN: Float = 128.0;
const TARGET_STDDEV: Float = 74.0;

/// Remap every pixel with `p -> clamp((p - mean) * (74 / stddev) + 128)`.
/// A near-uniform image (`stddev < 1`) is filled with 128.
pub fn normalize_image(img: &mut Image8) {
    let width = img.width();
    let height = img.height();
    let num_pixels = (width * height) as Float;

    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    for y in 0..height {
        for &p in img.row(y) {
            sum += u64::from(p);
            sum_sq += u64::from(p) * u64::from(p);
        }
    }
    let mean = sum as Float / num_pixels;
    let variance = sum_sq as Float / num_pixels - mean * mean;
    let stddev = variance.max(0.0).sqrt();

    // Remap through a lookup table, one entry per possible intensity.
    let mut lut = [0u8; 256];
    if stddev < 1.0 {
        lut = [128u8; 256];
    } else {
        let gain = TARGET_STDDEV / stddev;
        for (p, entry) in lut.iter_mut().enumerate() {
            let remapped = (p as Float - mean) * gain + TARGET_MEAN;
            *entry = remapped.round().clamp(0.0, 255.0) as u8;
        }
    }

    for y in 0..height {
        for x in 0..width {
            let p = img.get(x, y);
            img.set(x, y, lut[p as usize]);
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    fn stats(img: &Image8) -> (Float, Float) {
        let n = (img.width() * img.height()) as Float;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for y in 0..img.height() {
            for &p in img.row(y) {
                sum += Float::from(p);
                sum_sq += Float::from(p) * Float::from(p);
            }
        }
        let mean = sum / n;
        (mean, (sum_sq / n - mean * mean).sqrt())
    }

    #[test]
    fn uniform_image_fills_with_128() {
        let mut img = Image8::new(8, 8);
        img.fill_from(&[77u8; 64]);
        normalize_image(&mut img);
        for y in 0..8 {
            assert!(img.row(y).iter().all(|&p| p == 128));
        }
    }

    #[test]
    fn normalized_statistics_match_targets() {
        let mut img = Image8::new(16, 16);
        let pixels: Vec<u8> = (0..256).map(|i| ((i * 7) % 120 + 40) as u8).collect();
        img.fill_from(&pixels);
        normalize_image(&mut img);
        let (mean, stddev) = stats(&img);
        assert!((mean - 128.0).abs() < 2.0, "mean = {}", mean);
        assert!((stddev - 74.0).abs() < 3.0, "stddev = {}", stddev);
    }

    #[test]
    fn extreme_values_are_clamped() {
        let mut img = Image8::new(4, 4);
        let mut pixels = [128u8; 16];
        pixels[0] = 0;
        pixels[1] = 255;
        img.fill_from(&pixels);
        normalize_image(&mut img);
        // No wrap-around: darkest pixel stays darkest.
        assert!(img.get(0, 0) < img.get(1, 0));
    }
}
