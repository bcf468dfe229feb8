// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FAST-9 corner detection.
//!
//! Reference: Rosten & Drummond,
//! "Machine learning for high-speed corner detection" (ECCV 2006).
//!
//! A pixel is a corner when at least 9 contiguous samples on the
//! 16-pixel Bresenham circle of radius 3 are all brighter or all darker
//! than the center by more than the threshold. The score assigned to
//! every pixel (corner or not) is the total contrast over the circle,
//! `sum(max(0, |sample - center| - threshold))`, which also serves as
//! the field for the subpixel refinement.

use crate::core::image::Image8;

/// Offsets of the Bresenham circle of radius 3, clockwise from 12 o'clock.
#[rustfmt::skip]
pub const CIRCLE: [(i32, i32); 16] = [
    ( 0, -3), ( 1, -3), ( 2, -2), ( 3, -1),
    ( 3,  0), ( 3,  1), ( 2,  2), ( 1,  3),
    ( 0,  3), (-1,  3), (-2,  2), (-3,  1),
    (-3,  0), (-3, -1), (-2, -2), (-1, -3),
];

/// Minimum number of contiguous circle samples on the same side.
const ARC_LENGTH: usize = 9;

/// A raw corner detection, prior to grid filtering and refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corner {
    pub x: usize,
    pub y: usize,
    pub score: i32,
}

/// Detect FAST-9 corners inside the rectangle
/// `[min_x, max_x] x [min_y, max_y]`, appending them to `corners` in
/// row-major scan order.
///
/// The caller guarantees that the rectangle keeps the circle inside the
/// image (the keypoint bounds used by the pyramid levels do).
pub fn detect(
    img: &Image8,
    threshold: i32,
    bounds: (usize, usize, usize, usize),
    corners: &mut Vec<Corner>,
) {
    let (min_x, min_y, max_x, max_y) = bounds;
    if max_x < min_x || max_y < min_y {
        return;
    }
    debug_assert!(min_x >= 3 && min_y >= 3);
    debug_assert!(max_x + 3 < img.width() && max_y + 3 < img.height());

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let center = i32::from(img.get(x, y));

            // Cardinal pre-test: a 9-arc always covers at least two of
            // the four cardinal samples.
            let p0 = i32::from(img.get(x, y - 3));
            let p4 = i32::from(img.get(x + 3, y));
            let p8 = i32::from(img.get(x, y + 3));
            let p12 = i32::from(img.get(x - 3, y));
            let brighter = (p0 > center + threshold) as u32
                + (p4 > center + threshold) as u32
                + (p8 > center + threshold) as u32
                + (p12 > center + threshold) as u32;
            let darker = (p0 < center - threshold) as u32
                + (p4 < center - threshold) as u32
                + (p8 < center - threshold) as u32
                + (p12 < center - threshold) as u32;
            if brighter < 2 && darker < 2 {
                continue;
            }

            let mut circle = [0i32; 16];
            for (sample, &(dx, dy)) in circle.iter_mut().zip(CIRCLE.iter()) {
                *sample =
                    i32::from(img.get((x as i32 + dx) as usize, (y as i32 + dy) as usize));
            }

            if is_corner(center, &circle, threshold) {
                let score = circle_score(center, &circle, threshold);
                corners.push(Corner { x, y, score });
            }
        }
    }
}

/// The score field value at a pixel: total contrast over the circle.
/// Defined for every pixel so the refinement can sample non-corners.
pub fn score_at(img: &Image8, x: usize, y: usize, threshold: i32) -> i32 {
    debug_assert!(x >= 3 && y >= 3 && x + 3 < img.width() && y + 3 < img.height());
    let center = i32::from(img.get(x, y));
    let mut circle = [0i32; 16];
    for (sample, &(dx, dy)) in circle.iter_mut().zip(CIRCLE.iter()) {
        *sample = i32::from(img.get((x as i32 + dx) as usize, (y as i32 + dy) as usize));
    }
    circle_score(center, &circle, threshold)
}

fn circle_score(center: i32, circle: &[i32; 16], threshold: i32) -> i32 {
    circle
        .iter()
        .map(|&sample| ((sample - center).abs() - threshold).max(0))
        .sum()
}

/// Contiguity test with wrap-around, by scanning a doubled sign array.
fn is_corner(center: i32, circle: &[i32; 16], threshold: i32) -> bool {
    let mut signs = [0i8; 32];
    for (i, &sample) in circle.iter().enumerate() {
        let diff = sample - center;
        let sign = if diff > threshold {
            1
        } else if diff < -threshold {
            -1
        } else {
            0
        };
        signs[i] = sign;
        signs[i + 16] = sign;
    }

    let mut run = 0usize;
    let mut previous = 0i8;
    for &sign in &signs {
        if sign != 0 && sign == previous {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = if sign == 0 { 0 } else { 1 };
            previous = sign;
        }
    }
    false
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    /// Uniform image with the full circle around (cx, cy) set to `ring`.
    fn ring_image(size: usize, background: u8, ring: u8) -> (Image8, usize, usize) {
        let mut img = Image8::new(size, size);
        img.fill_from(&vec![background; size * size]);
        let c = size / 2;
        for &(dx, dy) in &CIRCLE {
            img.set((c as i32 + dx) as usize, (c as i32 + dy) as usize, ring);
        }
        (img, c, c)
    }

    #[test]
    fn bright_ring_is_a_corner() {
        let (img, cx, cy) = ring_image(21, 50, 200);
        let mut corners = Vec::new();
        detect(&img, 30, (5, 5, 15, 15), &mut corners);
        assert!(corners.iter().any(|c| c.x == cx && c.y == cy));
    }

    #[test]
    fn dark_ring_is_a_corner() {
        let (img, cx, cy) = ring_image(21, 200, 40);
        let mut corners = Vec::new();
        detect(&img, 30, (5, 5, 15, 15), &mut corners);
        assert!(corners.iter().any(|c| c.x == cx && c.y == cy));
    }

    #[test]
    fn uniform_image_has_no_corner() {
        let mut img = Image8::new(21, 21);
        img.fill_from(&[128u8; 21 * 21]);
        let mut corners = Vec::new();
        detect(&img, 10, (5, 5, 15, 15), &mut corners);
        assert!(corners.is_empty());
    }

    #[test]
    fn threshold_rejects_low_contrast() {
        let (img, _, _) = ring_image(21, 100, 115);
        let mut low = Vec::new();
        detect(&img, 10, (5, 5, 15, 15), &mut low);
        let mut high = Vec::new();
        detect(&img, 20, (5, 5, 15, 15), &mut high);
        assert!(!low.is_empty());
        assert!(high.is_empty());
    }

    #[test]
    fn eight_contiguous_samples_are_not_enough() {
        let mut img = Image8::new(21, 21);
        img.fill_from(&[100u8; 21 * 21]);
        let c = 10i32;
        for &(dx, dy) in CIRCLE.iter().take(8) {
            img.set((c + dx) as usize, (c + dy) as usize, 200);
        }
        let mut corners = Vec::new();
        detect(&img, 20, (5, 5, 15, 15), &mut corners);
        assert!(!corners.iter().any(|k| k.x == 10 && k.y == 10));

        // One more sample completes the arc.
        let (dx, dy) = CIRCLE[8];
        img.set((c + dx) as usize, (c + dy) as usize, 200);
        let mut corners = Vec::new();
        detect(&img, 20, (5, 5, 15, 15), &mut corners);
        assert!(corners.iter().any(|k| k.x == 10 && k.y == 10));
    }

    #[test]
    fn score_grows_with_contrast() {
        let (img_low, cx, cy) = ring_image(21, 100, 150);
        let (img_high, _, _) = ring_image(21, 100, 250);
        let low = score_at(&img_low, cx, cy, 20);
        let high = score_at(&img_high, cx, cy, 20);
        assert!(high > low);
        // 16 samples, each contributing |diff| - threshold.
        assert_eq!(low, 16 * (50 - 20));
    }

    #[test]
    fn detection_respects_bounds() {
        let (img, _, _) = ring_image(31, 60, 220);
        let mut corners = Vec::new();
        detect(&img, 20, (9, 9, 20, 20), &mut corners);
        for c in &corners {
            assert!(c.x >= 9 && c.x <= 20);
            assert!(c.y >= 9 && c.y <= 20);
        }
    }
}
