// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One level of an odometry frame pyramid: the image at this scale,
//! the keypoints detected on it and their packed descriptors.

use crate::core::features::descriptor::DescriptorExtractor;
use crate::core::features::fast::{self, Corner};
use crate::core::features::grid::GridFilter;
use crate::core::features::subpixel;
use crate::core::image::Image8;
use crate::misc::type_aliases::{Float, Point3};

/// Initial keypoint capacity of each level.
const INITIAL_KEYPOINTS_CAPACITY: usize = 1500;

/// A keypoint of an odometry frame.
///
/// Coordinates `(u, v)` are subpixel positions at the keypoint's own
/// pyramid level; `base_u()`/`base_v()` rescale them to full-resolution
/// coordinates. The 3D point is in the camera frame and only valid when
/// `has_depth` is set.
#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    pub u: Float,
    pub v: Float,
    pub level: usize,
    pub score: Float,
    pub xyz: Point3,
    pub has_depth: bool,
    /// Index of the descriptor in the level's packed buffer.
    pub descriptor_index: usize,
    /// Index of this keypoint in the frame's flat list.
    pub track_id: usize,
}

impl Keypoint {
    pub fn base_u(&self) -> Float {
        self.u * (1usize << self.level) as Float
    }

    pub fn base_v(&self) -> Float {
        self.v * (1usize << self.level) as Float
    }
}

/// One pyramid level and its feature data.
pub struct PyramidLevel {
    image: Image8,
    level: usize,
    keypoint_min_x: usize,
    keypoint_min_y: usize,
    keypoint_max_x: usize,
    keypoint_max_y: usize,
    grid_filter: Option<GridFilter>,
    extractor: DescriptorExtractor,
    initial_corners: Vec<Corner>,
    num_detected: usize,
    keypoints: Vec<Keypoint>,
    keypoints_capacity: usize,
    descriptors: Vec<u8>,
}

impl PyramidLevel {
    pub fn new(
        width: usize,
        height: usize,
        level: usize,
        feature_window_size: usize,
        grid_filter: Option<GridFilter>,
    ) -> Self {
        let extractor = DescriptorExtractor::new(feature_window_size);
        let descriptors = vec![0; INITIAL_KEYPOINTS_CAPACITY * extractor.descriptor_stride()];
        Self {
            image: Image8::new(width, height),
            level,
            keypoint_min_x: feature_window_size,
            keypoint_min_y: feature_window_size,
            keypoint_max_x: width.saturating_sub(feature_window_size + 2),
            keypoint_max_y: height.saturating_sub(feature_window_size + 2),
            grid_filter,
            extractor,
            initial_corners: Vec::with_capacity(2000),
            num_detected: 0,
            keypoints: Vec::with_capacity(INITIAL_KEYPOINTS_CAPACITY),
            keypoints_capacity: INITIAL_KEYPOINTS_CAPACITY,
            descriptors,
        }
    }

    pub fn width(&self) -> usize {
        self.image.width()
    }

    pub fn height(&self) -> usize {
        self.image.height()
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn image(&self) -> &Image8 {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut Image8 {
        &mut self.image
    }

    /// Number of raw FAST detections of the last `detect_features` call,
    /// before grid filtering.
    pub fn num_detected_keypoints(&self) -> usize {
        self.num_detected
    }

    pub fn num_keypoints(&self) -> usize {
        self.keypoints.len()
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub(crate) fn keypoints_mut(&mut self) -> &mut [Keypoint] {
        &mut self.keypoints
    }

    /// The meaningful bytes of descriptor `index`.
    pub fn descriptor(&self, index: usize) -> &[u8] {
        let stride = self.extractor.descriptor_stride();
        let start = index * stride;
        &self.descriptors[start..start + self.extractor.descriptor_len()]
    }

    pub fn descriptor_extractor(&self) -> &DescriptorExtractor {
        &self.extractor
    }

    /// Reallocate the keypoint and descriptor buffers.
    /// Existing contents are discarded; callers refill afterwards.
    pub fn increase_capacity(&mut self, new_capacity: usize) {
        self.keypoints_capacity = new_capacity;
        self.keypoints = Vec::with_capacity(new_capacity);
        self.descriptors = vec![0; new_capacity * self.extractor.descriptor_stride()];
    }

    /// Detect, filter, refine and describe the keypoints of this level.
    pub fn detect_features(&mut self, fast_threshold: i32) {
        self.initial_corners.clear();
        self.keypoints.clear();

        if self.keypoint_max_x < self.keypoint_min_x || self.keypoint_max_y < self.keypoint_min_y {
            self.num_detected = 0;
            return;
        }

        fast::detect(
            &self.image,
            fast_threshold,
            (
                self.keypoint_min_x,
                self.keypoint_min_y,
                self.keypoint_max_x,
                self.keypoint_max_y,
            ),
            &mut self.initial_corners,
        );
        self.num_detected = self.initial_corners.len();

        if let Some(grid) = &self.grid_filter {
            grid.filter(&mut self.initial_corners, self.image.width());
        }

        if self.initial_corners.len() > self.keypoints_capacity {
            let new_capacity = self.initial_corners.len();
            self.increase_capacity(new_capacity);
        }

        let descriptor_stride = self.extractor.descriptor_stride();
        let descriptor_len = self.extractor.descriptor_len();
        for index in 0..self.initial_corners.len() {
            let corner = self.initial_corners[index];
            let (u, v) = subpixel::refine(
                &self.image,
                fast_threshold,
                corner.x,
                corner.y,
                corner.score,
            );
            // Refinement may move a border corner slightly outside the
            // detection rectangle; keep the keypoint bounds invariant.
            let u = u.clamp(self.keypoint_min_x as Float, self.keypoint_max_x as Float);
            let v = v.clamp(self.keypoint_min_y as Float, self.keypoint_max_y as Float);
            let start = index * descriptor_stride;
            self.extractor.extract_interp(
                &self.image,
                u,
                v,
                &mut self.descriptors[start..start + descriptor_len],
            );
            self.keypoints.push(Keypoint {
                u,
                v,
                level: self.level,
                score: Float::from(corner.score),
                xyz: Point3::origin(),
                has_depth: false,
                descriptor_index: index,
                track_id: 0,
            });
        }
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    /// Plant a few bright squares on a flat background.
    fn squares_image(width: usize, height: usize) -> Vec<u8> {
        let mut pixels = vec![80u8; width * height];
        for &(sx, sy) in &[(20usize, 20usize), (60, 24), (34, 50), (70, 60)] {
            for y in sy..sy + 6 {
                for x in sx..sx + 6 {
                    pixels[y * width + x] = 200;
                }
            }
        }
        pixels
    }

    fn prepared_level() -> PyramidLevel {
        let (width, height) = (96, 80);
        let mut level = PyramidLevel::new(width, height, 0, 9, None);
        let pixels = squares_image(width, height);
        level.image_mut().fill_from(&pixels);
        level.detect_features(20);
        level
    }

    #[test]
    fn detects_square_corners() {
        let level = prepared_level();
        assert!(level.num_detected_keypoints() > 0);
        assert_eq!(level.num_keypoints(), level.keypoints().len());
    }

    #[test]
    fn keypoints_respect_border_bounds() {
        let level = prepared_level();
        for kp in level.keypoints() {
            assert!(kp.u >= 9.0 && kp.u <= (96 - 9 - 2) as Float);
            assert!(kp.v >= 9.0 && kp.v <= (80 - 9 - 2) as Float);
        }
    }

    #[test]
    fn descriptors_are_filled_per_keypoint() {
        let level = prepared_level();
        for kp in level.keypoints() {
            let descriptor = level.descriptor(kp.descriptor_index);
            assert_eq!(descriptor.len(), 81);
            // A normalized patch is never all-zero.
            assert!(descriptor.iter().any(|&b| b != 0));
        }
    }

    #[test]
    fn increase_capacity_discards_contents() {
        let mut level = prepared_level();
        assert!(level.num_keypoints() > 0);
        level.increase_capacity(4000);
        assert_eq!(level.num_keypoints(), 0);
        assert_eq!(level.descriptors.len(), 4000 * 96);
    }

    #[test]
    fn base_coordinates_rescale_by_level() {
        let kp = Keypoint {
            u: 10.5,
            v: 7.25,
            level: 2,
            score: 1.0,
            xyz: Point3::origin(),
            has_depth: false,
            descriptor_index: 0,
            track_id: 0,
        };
        assert_eq!(kp.base_u(), 42.0);
        assert_eq!(kp.base_v(), 29.0);
    }
}
