// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coarse alignment of two images by a 3x3 homography, used to seed the
//! motion estimation with an initial rotation.
//!
//! The iteration is the efficient second-order minimisation (ESM) of
//! Benhimane & Malis: at each step the Jacobian is the average of the
//! template gradient and the warped test-image gradient, the 8x8 normal
//! equations are solved for an sl(3) update and the homography is
//! composed with its projective exponential.

use nalgebra::DMatrix;

use crate::core::image::Image8;
use crate::math::sl3;
use crate::misc::type_aliases::{Float, Mat3, Mat8, Vec3, Vec8};

/// Iterations stop when the update norm falls below this.
const CONVERGENCE_EPSILON: Float = 1e-8;
/// Minimum number of usable pixels for the normal equations.
const MIN_VALID_PIXELS: usize = 16;

/// Estimates the homography aligning a test image onto a template.
#[derive(Debug)]
pub struct HomographyEstimator {
    template: DMatrix<Float>,
    template_grad_x: DMatrix<Float>,
    template_grad_y: DMatrix<Float>,
    test: DMatrix<Float>,
}

impl Default for HomographyEstimator {
    fn default() -> Self {
        Self {
            template: DMatrix::zeros(0, 0),
            template_grad_x: DMatrix::zeros(0, 0),
            template_grad_y: DMatrix::zeros(0, 0),
            test: DMatrix::zeros(0, 0),
        }
    }
}

impl HomographyEstimator {
    /// Set the template image, downsampled `downsample` more times to
    /// suppress high frequencies.
    pub fn set_template_image(&mut self, image: &Image8, downsample: usize) {
        self.template = downsampled(image, downsample);
        let (gx, gy) = gradients(&self.template);
        self.template_grad_x = gx;
        self.template_grad_y = gy;
    }

    /// Set the test image, downsampled like the template.
    pub fn set_test_image(&mut self, image: &Image8, downsample: usize) {
        self.test = downsampled(image, downsample);
    }

    /// Run the ESM iterations from `init`, for at most `max_iterations`.
    /// Returns the homography in the estimator's (downsampled) pixel
    /// coordinates and the final RMS intensity error.
    pub fn track(&self, init: Mat3, max_iterations: usize) -> (Mat3, Float) {
        let rows = self.template.nrows();
        let cols = self.template.ncols();
        let mut h = init;
        let mut rms = Float::INFINITY;
        if rows < 3 || cols < 3 {
            return (h, rms);
        }

        let mut warped = DMatrix::<Float>::zeros(rows, cols);
        let mut valid = DMatrix::<bool>::from_element(rows, cols, false);

        for _ in 0..max_iterations {
            // Warp the test image into template coordinates.
            for y in 0..rows {
                for x in 0..cols {
                    let p = h * Vec3::new(x as Float, y as Float, 1.0);
                    valid[(y, x)] = false;
                    if p.z.abs() > 1e-12 {
                        let u = p.x / p.z;
                        let v = p.y / p.z;
                        if let Some(value) = interpolate(&self.test, u, v) {
                            warped[(y, x)] = value;
                            valid[(y, x)] = true;
                        }
                    }
                }
            }

            // Accumulate the 8x8 normal equations over pixels whose
            // gradient neighbourhood is fully valid.
            let mut jtj = Mat8::zeros();
            let mut jtr = Vec8::zeros();
            let mut error_sum = 0.0;
            let mut num_pixels = 0usize;
            for y in 1..rows - 1 {
                for x in 1..cols - 1 {
                    if !(valid[(y, x)]
                        && valid[(y, x - 1)]
                        && valid[(y, x + 1)]
                        && valid[(y - 1, x)]
                        && valid[(y + 1, x)])
                    {
                        continue;
                    }
                    let residual = warped[(y, x)] - self.template[(y, x)];
                    let grad_x = 0.5
                        * (self.template_grad_x[(y, x)]
                            + 0.5 * (warped[(y, x + 1)] - warped[(y, x - 1)]));
                    let grad_y = 0.5
                        * (self.template_grad_y[(y, x)]
                            + 0.5 * (warped[(y + 1, x)] - warped[(y - 1, x)]));

                    let xf = x as Float;
                    let yf = y as Float;
                    let jacobian = Vec8::from_column_slice(&[
                        grad_x * xf,
                        grad_x * yf,
                        grad_x,
                        grad_y * xf,
                        grad_y * yf,
                        grad_y,
                        -xf * (grad_x * xf + grad_y * yf),
                        -yf * (grad_x * xf + grad_y * yf),
                    ]);
                    jtj += jacobian * jacobian.transpose();
                    jtr += jacobian * residual;
                    error_sum += residual * residual;
                    num_pixels += 1;
                }
            }

            if num_pixels < MIN_VALID_PIXELS {
                break;
            }
            rms = (error_sum / num_pixels as Float).sqrt();

            let delta = match jtj.cholesky() {
                Some(cholesky) => -cholesky.solve(&jtr),
                None => break,
            };
            h *= sl3::exp(delta);
            let scale = h[(2, 2)];
            if scale.abs() > 1e-12 {
                h /= scale;
            }
            if delta.norm() < CONVERGENCE_EPSILON {
                break;
            }
        }
        (h, rms)
    }
}

/// Convert to a float matrix and mean-downsample `factor_log2` times.
fn downsampled(image: &Image8, factor_log2: usize) -> DMatrix<Float> {
    let mut mat = DMatrix::from_fn(image.height(), image.width(), |y, x| {
        Float::from(image.get(x, y))
    });
    for _ in 0..factor_log2 {
        let rows = mat.nrows() / 2;
        let cols = mat.ncols() / 2;
        if rows == 0 || cols == 0 {
            break;
        }
        mat = DMatrix::from_fn(rows, cols, |y, x| {
            0.25 * (mat[(2 * y, 2 * x)]
                + mat[(2 * y + 1, 2 * x)]
                + mat[(2 * y, 2 * x + 1)]
                + mat[(2 * y + 1, 2 * x + 1)])
        });
    }
    mat
}

/// Central-difference gradients, zero on the border.
fn gradients(mat: &DMatrix<Float>) -> (DMatrix<Float>, DMatrix<Float>) {
    let rows = mat.nrows();
    let cols = mat.ncols();
    let mut gx = DMatrix::zeros(rows, cols);
    let mut gy = DMatrix::zeros(rows, cols);
    for y in 1..rows.saturating_sub(1) {
        for x in 1..cols.saturating_sub(1) {
            gx[(y, x)] = 0.5 * (mat[(y, x + 1)] - mat[(y, x - 1)]);
            gy[(y, x)] = 0.5 * (mat[(y + 1, x)] - mat[(y - 1, x)]);
        }
    }
    (gx, gy)
}

/// Bilinear interpolation; `None` outside the valid square.
fn interpolate(mat: &DMatrix<Float>, x: Float, y: Float) -> Option<Float> {
    let rows = mat.nrows();
    let cols = mat.ncols();
    let u = x.floor();
    let v = y.floor();
    if u >= 0.0 && u < (cols - 1) as Float && v >= 0.0 && v < (rows - 1) as Float {
        let u0 = u as usize;
        let v0 = v as usize;
        let a = x - u;
        let b = y - v;
        Some(
            (1.0 - b) * (1.0 - a) * mat[(v0, u0)]
                + b * (1.0 - a) * mat[(v0 + 1, u0)]
                + (1.0 - b) * a * mat[(v0, u0 + 1)]
                + b * a * mat[(v0 + 1, u0 + 1)],
        )
    } else {
        None
    }
}

// TESTS #############################################################
