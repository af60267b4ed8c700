//! 2D similarity transforms in homogeneous form
//!
//! A [`Transform2d`] maps idealized grid coordinates to image pixel
//! coordinates. It stores a 3x3 homogeneous matrix whose last row is always
//! `[0, 0, 1]`, so composition is plain matrix multiplication.

use nalgebra::{Matrix2, Matrix3, Vector2};

/// Create a 2x2 rotation matrix
///
/// # Arguments
/// * `angle_rad` - Rotation angle in radians (counter-clockwise)
///
/// # Returns
/// Rotation matrix
pub fn rotation_matrix(angle_rad: f64) -> Matrix2<f64> {
    let c = angle_rad.cos();
    let s = angle_rad.sin();
    Matrix2::new(c, -s, s, c)
}

/// Rotation, isotropic scale and translation packed in a homogeneous matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2d {
    matrix: Matrix3<f64>,
}

impl Transform2d {
    /// The identity mapping
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// Build from a linear part and a translation: `p' = linear * p + translation`
    pub fn from_parts(linear: &Matrix2<f64>, translation: &Vector2<f64>) -> Self {
        Self {
            matrix: Matrix3::new(
                linear[(0, 0)],
                linear[(0, 1)],
                translation.x,
                linear[(1, 0)],
                linear[(1, 1)],
                translation.y,
                0.0,
                0.0,
                1.0,
            ),
        }
    }

    /// Rigid transform: rotate about the origin, then translate
    pub fn rigid(angle_rad: f64, translation: Vector2<f64>) -> Self {
        Self::from_parts(&rotation_matrix(angle_rad), &translation)
    }

    /// Similarity transform: scale and rotate about the origin, then translate
    pub fn similarity(angle_rad: f64, scale: f64, translation: Vector2<f64>) -> Self {
        Self::from_parts(&(rotation_matrix(angle_rad) * scale), &translation)
    }

    /// Scale and rotate about `pivot`, then move the pivot to `position`.
    ///
    /// `p' = scale * R(angle) * (p - pivot) + position`
    pub fn about_pivot(
        pivot: &Vector2<f64>,
        angle_rad: f64,
        scale: f64,
        position: &Vector2<f64>,
    ) -> Self {
        let linear = rotation_matrix(angle_rad) * scale;
        let translation = position - linear * pivot;
        Self::from_parts(&linear, &translation)
    }

    /// Homogeneous matrix
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Linear (rotation and scale) part
    pub fn linear(&self) -> Matrix2<f64> {
        self.matrix.fixed_view::<2, 2>(0, 0).into_owned()
    }

    /// Translation part
    pub fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.matrix[(0, 2)], self.matrix[(1, 2)])
    }

    /// Rotation angle in radians
    pub fn rotation(&self) -> f64 {
        self.matrix[(1, 0)].atan2(self.matrix[(0, 0)])
    }

    /// Isotropic scale factor (length of the first column)
    pub fn scale(&self) -> f64 {
        (self.matrix[(0, 0)].powi(2) + self.matrix[(1, 0)].powi(2)).sqrt()
    }

    /// Compose: the result applies `self` first, then `next`
    pub fn then(&self, next: &Transform2d) -> Transform2d {
        Transform2d {
            matrix: next.matrix * self.matrix,
        }
    }

    /// Map a single point
    pub fn apply(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.linear() * point + self.translation()
    }

    /// Map every point of a set
    pub fn apply_all(&self, points: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
        let linear = self.linear();
        let translation = self.translation();
        points.iter().map(|p| linear * p + translation).collect()
    }

    /// Sum of absolute differences over the six affine parameters.
    ///
    /// Used as the ICP convergence measure between successive composites.
    pub fn parameter_distance(&self, other: &Transform2d) -> f64 {
        let mut total = 0.0;
        for row in 0..2 {
            for col in 0..3 {
                total += (self.matrix[(row, col)] - other.matrix[(row, col)]).abs();
            }
        }
        total
    }
}

impl Default for Transform2d {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_rotation_90_degrees() {
        let output = rotation_matrix(PI / 2.0) * Vector2::new(1.0, 0.0);

        assert_relative_eq!(output.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(output.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_identity_leaves_points() {
        let p = Vector2::new(3.0, -4.0);
        assert_relative_eq!(Transform2d::identity().apply(&p), p, epsilon = 1e-12);
    }

    #[test]
    fn test_similarity_accessors() {
        let t = Transform2d::similarity(0.3, 1.5, Vector2::new(2.0, -1.0));

        assert_relative_eq!(t.rotation(), 0.3, epsilon = 1e-12);
        assert_relative_eq!(t.scale(), 1.5, epsilon = 1e-12);
        assert_relative_eq!(t.translation(), Vector2::new(2.0, -1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_composition_order() {
        let rotate = Transform2d::rigid(PI / 2.0, Vector2::zeros());
        let shift = Transform2d::rigid(0.0, Vector2::new(10.0, 0.0));

        // rotate (1,0) -> (0,1), then shift -> (10,1)
        let p = rotate.then(&shift).apply(&Vector2::new(1.0, 0.0));
        assert_relative_eq!(p, Vector2::new(10.0, 1.0), epsilon = 1e-10);

        // shift (1,0) -> (11,0), then rotate -> (0,11)
        let q = shift.then(&rotate).apply(&Vector2::new(1.0, 0.0));
        assert_relative_eq!(q, Vector2::new(0.0, 11.0), epsilon = 1e-10);
    }

    #[test]
    fn test_about_pivot_moves_pivot_to_position() {
        let pivot = Vector2::new(50.0, 60.0);
        let position = Vector2::new(70.0, 20.0);
        let t = Transform2d::about_pivot(&pivot, 0.4, 1.1, &position);

        assert_relative_eq!(t.apply(&pivot), position, epsilon = 1e-10);
        assert_relative_eq!(t.scale(), 1.1, epsilon = 1e-12);
    }

    #[test]
    fn test_parameter_distance() {
        let a = Transform2d::identity();
        let b = Transform2d::rigid(0.0, Vector2::new(0.5, -0.25));

        assert_relative_eq!(a.parameter_distance(&b), 0.75, epsilon = 1e-12);
        assert_relative_eq!(a.parameter_distance(&a), 0.0);
    }

    #[test]
    fn test_apply_all_matches_apply() {
        let t = Transform2d::similarity(-0.2, 0.9, Vector2::new(3.0, 4.0));
        let points = vec![Vector2::new(1.0, 2.0), Vector2::new(-5.0, 7.5)];

        let mapped = t.apply_all(&points);
        for (p, m) in points.iter().zip(&mapped) {
            assert_relative_eq!(t.apply(p), *m, epsilon = 1e-12);
        }
    }
}
