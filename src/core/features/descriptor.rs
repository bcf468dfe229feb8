// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Intensity patch descriptors.
//!
//! A descriptor is the square window of pixels around a keypoint,
//! normalized to mean 128 so that SAD comparisons are robust to global
//! brightness changes. The aligned variant samples at integer offsets,
//! the interpolated variant samples the same pattern bilinearly; the two
//! agree exactly at integer coordinates.

use crate::core::image::{Image8, ALIGNMENT};
use crate::misc::helper::round_up_to_multiple;
use crate::misc::type_aliases::Float;

/// Samples a fixed square pattern around a keypoint.
#[derive(Debug, Clone)]
pub struct DescriptorExtractor {
    /// `(dx, dy)` sampling offsets, row-major over the window.
    offsets: Vec<(i32, i32)>,
    descriptor_len: usize,
    descriptor_stride: usize,
}

impl DescriptorExtractor {
    /// The pattern is the full `window x window` square; `window` is the
    /// `feature-window-size` and should be odd.
    pub fn new(window: usize) -> Self {
        let radius = (window / 2) as i32;
        let mut offsets = Vec::with_capacity(window * window);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                offsets.push((dx, dy));
            }
        }
        let descriptor_len = offsets.len();
        Self {
            offsets,
            descriptor_len,
            descriptor_stride: round_up_to_multiple(descriptor_len, ALIGNMENT),
        }
    }

    /// Number of meaningful bytes per descriptor.
    pub fn descriptor_len(&self) -> usize {
        self.descriptor_len
    }

    /// Byte distance between consecutive descriptors in a packed buffer.
    pub fn descriptor_stride(&self) -> usize {
        self.descriptor_stride
    }

    /// Extract at integer coordinates.
    /// The caller guarantees the whole pattern is inside the image.
    pub fn extract_aligned(&self, img: &Image8, x: usize, y: usize, descriptor: &mut [u8]) {
        let mut samples = Vec::with_capacity(self.descriptor_len);
        for &(dx, dy) in &self.offsets {
            let px = (x as i32 + dx) as usize;
            let py = (y as i32 + dy) as usize;
            samples.push(Float::from(img.get(px, py)));
        }
        normalize_samples(&samples, descriptor);
    }

    /// Extract at subpixel coordinates with bilinear sampling.
    /// The caller guarantees the whole pattern interpolates inside the image.
    pub fn extract_interp(&self, img: &Image8, u: Float, v: Float, descriptor: &mut [u8]) {
        let mut samples = Vec::with_capacity(self.descriptor_len);
        for &(dx, dy) in &self.offsets {
            let sample = img
                .interpolate(u + Float::from(dx), v + Float::from(dy))
                .unwrap_or(0.0);
            samples.push(sample);
        }
        normalize_samples(&samples, descriptor);
    }
}

/// Write the samples shifted to mean 128 into the descriptor bytes.
fn normalize_samples(samples: &[Float], descriptor: &mut [u8]) {
    let mean = samples.iter().sum::<Float>() / samples.len() as Float;
    for (out, &sample) in descriptor.iter_mut().zip(samples.iter()) {
        *out = (sample - mean + 128.0).round().clamp(0.0, 255.0) as u8;
    }
}

/// Sum of absolute differences over the meaningful descriptor bytes.
pub fn sad(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| u32::from(x.abs_diff(y)))
        .sum()
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    fn textured_image(size: usize) -> Image8 {
        let mut img = Image8::new(size, size);
        let pixels: Vec<u8> = (0..size * size)
            .map(|i| ((i * 31 + i / size * 7) % 200) as u8)
            .collect();
        img.fill_from(&pixels);
        img
    }

    #[test]
    fn stride_is_aligned() {
        let extractor = DescriptorExtractor::new(9);
        assert_eq!(extractor.descriptor_len(), 81);
        assert_eq!(extractor.descriptor_stride(), 96);
    }

    #[test]
    fn aligned_and_interpolated_agree_at_integer_coordinates() {
        let img = textured_image(32);
        let extractor = DescriptorExtractor::new(9);
        let mut aligned = vec![0u8; extractor.descriptor_len()];
        let mut interp = vec![0u8; extractor.descriptor_len()];
        for &(x, y) in &[(10usize, 12usize), (15, 9), (20, 20)] {
            extractor.extract_aligned(&img, x, y, &mut aligned);
            extractor.extract_interp(&img, x as Float, y as Float, &mut interp);
            assert_eq!(aligned, interp, "mismatch at ({}, {})", x, y);
        }
    }

    #[test]
    fn descriptor_is_invariant_to_brightness_offset() {
        let size = 32;
        let img = textured_image(size);
        let mut brighter = Image8::new(size, size);
        let pixels: Vec<u8> = (0..size)
            .flat_map(|y| (0..size).map(move |x| (x, y)))
            .map(|(x, y)| img.get(x, y) + 20)
            .collect();
        brighter.fill_from(&pixels);

        let extractor = DescriptorExtractor::new(9);
        let mut a = vec![0u8; extractor.descriptor_len()];
        let mut b = vec![0u8; extractor.descriptor_len()];
        extractor.extract_aligned(&img, 14, 14, &mut a);
        extractor.extract_aligned(&brighter, 14, 14, &mut b);
        // A uniform offset cancels in the mean normalization (as long as
        // no sample saturates).
        assert_eq!(sad(&a, &b), 0);
    }

    #[test]
    fn sad_counts_absolute_differences() {
        assert_eq!(sad(&[10, 20, 30], &[12, 18, 30]), 4);
        assert_eq!(sad(&[0, 255], &[255, 0]), 510);
    }
}
