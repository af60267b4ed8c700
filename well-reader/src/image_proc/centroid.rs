//! Centroid and shape moments of masked regions
//!
//! Provides the center-of-mass and second-order moments used to locate
//! spots and the well, and to derive ellipse axis lengths and eccentricity.

use ndarray::ArrayView2;

use crate::error::{ReaderError, Result};

/// Result from centroid calculation containing position and shape properties
///
/// Position is relative to the origin of the arrays that were passed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentroidResult {
    /// Centroid x-coordinate (column)
    pub x: f64,
    /// Centroid y-coordinate (row)
    pub y: f64,
    /// Total weight (pixel count, or summed intensity when weighted)
    pub flux: f64,
    /// Second central moment μ₂₀ (variance in x-direction)
    pub m_xx: f64,
    /// Second central moment μ₀₂ (variance in y-direction)
    pub m_yy: f64,
    /// Second central moment μ₁₁ (covariance between x and y)
    pub m_xy: f64,
}

impl CentroidResult {
    /// Eigenvalues (λ₁ ≥ λ₂) of the normalized covariance matrix
    pub fn eigenvalues(&self) -> (f64, f64) {
        let sum = self.m_xx + self.m_yy;
        let diff = self.m_xx - self.m_yy;
        let discriminant = (4.0 * self.m_xy.powi(2) + diff.powi(2)).sqrt();
        let lambda1 = (sum + discriminant) / 2.0;
        let lambda2 = ((sum - discriminant) / 2.0).max(0.0);
        (lambda1, lambda2)
    }

    /// Major axis of the ellipse with the same second moments
    pub fn major_axis_length(&self) -> f64 {
        4.0 * self.eigenvalues().0.sqrt()
    }

    /// Minor axis of the ellipse with the same second moments
    pub fn minor_axis_length(&self) -> f64 {
        4.0 * self.eigenvalues().1.sqrt()
    }

    /// 0 for a circle, approaching 1 for a line. A single pixel reports 0.
    pub fn eccentricity(&self) -> f64 {
        let (lambda1, lambda2) = self.eigenvalues();
        if lambda1 <= f64::EPSILON {
            return 0.0;
        }
        (1.0 - lambda2 / lambda1).max(0.0).sqrt()
    }
}

fn accumulate<F>(mask: &ArrayView2<bool>, weight: F) -> CentroidResult
where
    F: Fn(usize, usize) -> f64,
{
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    let mut m20 = 0.0;
    let mut m02 = 0.0;
    let mut m11 = 0.0;

    for ((row, col), &mask_val) in mask.indexed_iter() {
        if mask_val {
            let w = weight(row, col);
            let (x, y) = (col as f64, row as f64);
            m00 += w;
            m10 += x * w;
            m01 += y * w;
            m20 += x * x * w;
            m02 += y * y * w;
            m11 += x * y * w;
        }
    }

    // Handle empty or zero-flux objects
    if m00 < f64::EPSILON {
        return CentroidResult {
            x: 0.0,
            y: 0.0,
            flux: 0.0,
            m_xx: 0.0,
            m_yy: 0.0,
            m_xy: 0.0,
        };
    }

    let x = m10 / m00;
    let y = m01 / m00;

    CentroidResult {
        x,
        y,
        flux: m00,
        m_xx: m20 / m00 - x * x,
        m_yy: m02 / m00 - y * y,
        m_xy: m11 / m00 - x * y,
    }
}

/// Geometric centroid and moments of the `true` pixels.
pub fn compute_shape_from_mask(mask: &ArrayView2<bool>) -> CentroidResult {
    accumulate(mask, |_, _| 1.0)
}

/// Intensity-weighted centroid and moments of the `true` pixels.
///
/// # Errors
/// `ShapeMismatch` when `image` and `mask` differ in shape.
pub fn compute_centroid_from_mask(
    image: &ArrayView2<f64>,
    mask: &ArrayView2<bool>,
) -> Result<CentroidResult> {
    if image.dim() != mask.dim() {
        return Err(ReaderError::ShapeMismatch {
            left: mask.dim(),
            right: image.dim(),
        });
    }
    Ok(accumulate(mask, |row, col| image[[row, col]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_centroid_single_pixel() {
        let mut image = Array2::from_elem((3, 3), 0.0);
        let mut mask = Array2::from_elem((3, 3), false);
        image[[1, 2]] = 100.0;
        mask[[1, 2]] = true;

        let result = compute_centroid_from_mask(&image.view(), &mask.view()).unwrap();

        assert_relative_eq!(result.x, 2.0, epsilon = 1e-10);
        assert_relative_eq!(result.y, 1.0, epsilon = 1e-10);
        assert_relative_eq!(result.flux, 100.0, epsilon = 1e-10);
        assert_eq!(result.eccentricity(), 0.0);
    }

    #[test]
    fn test_weighted_centroid_pulls_toward_bright_pixel() {
        let mut image = Array2::from_elem((1, 3), 1.0);
        image[[0, 2]] = 3.0;
        let mask = Array2::from_elem((1, 3), true);

        let weighted = compute_centroid_from_mask(&image.view(), &mask.view()).unwrap();
        let plain = compute_shape_from_mask(&mask.view());

        assert_relative_eq!(plain.x, 1.0);
        assert_relative_eq!(weighted.x, 7.0 / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mismatched_mask_is_an_error() {
        let image = Array2::from_elem((4, 5), 1.0);
        let mask = Array2::from_elem((5, 4), true);

        assert!(matches!(
            compute_centroid_from_mask(&image.view(), &mask.view()),
            Err(ReaderError::ShapeMismatch {
                left: (5, 4),
                right: (4, 5)
            })
        ));
    }

    #[test]
    fn test_disk_axes() {
        let radius = 20.0;
        let mask = Array2::from_shape_fn((61, 61), |(row, col)| {
            let dx = col as f64 - 30.0;
            let dy = row as f64 - 30.0;
            dx * dx + dy * dy <= radius * radius
        });

        let shape = compute_shape_from_mask(&mask.view());
        assert_relative_eq!(shape.x, 30.0, epsilon = 1e-9);
        assert_relative_eq!(shape.major_axis_length(), 2.0 * radius, epsilon = 0.5);
        assert_relative_eq!(shape.minor_axis_length(), 2.0 * radius, epsilon = 0.5);
        assert!(shape.eccentricity() < 0.1);
    }

    #[test]
    fn test_elongated_eccentricity() {
        let mask = Array2::from_shape_fn((5, 41), |(row, _)| row == 2);
        let shape = compute_shape_from_mask(&mask.view());

        assert!(shape.eccentricity() > 0.99);
        assert!(shape.major_axis_length() > shape.minor_axis_length());
    }
}
