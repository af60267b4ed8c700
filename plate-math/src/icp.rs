//! Iterative Closest Point registration of an idealized grid onto detections
//!
//! Each iteration matches every (moved) source point to its nearest target,
//! throws away correspondences longer than a multiple of that iteration's
//! median match distance, and solves for the rigid transform (rotation and
//! translation, never a reflection) that best aligns the surviving pairs.
//! Steps are accumulated into a composite transform until it stops moving.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::neighbors::NearestNeighbors;
use crate::stats::median;
use crate::transform::Transform2d;

/// Errors that can occur during ICP operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ICPError {
    #[error("Invalid argument: {0}")]
    ArgumentError(String),

    /// No valid rigid fit could be estimated for an iteration
    #[error("registration failed: {0}")]
    RegistrationFailed(String),
}

/// Tunables for [`iterative_closest_point`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Hard cap on iterations
    pub max_iterations: usize,
    /// Stop once the summed absolute change of the six affine parameters
    /// between successive composites drops below this
    pub matrix_diff: f64,
    /// Correspondences longer than `gate_factor * median` are rejected
    pub gate_factor: f64,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            matrix_diff: 1.0,
            gate_factor: 2.0,
        }
    }
}

/// Result of ICP algorithm containing transformation parameters and matching points
#[derive(Debug, Clone)]
pub struct ICPResult {
    /// Composite transform mapping source coordinates onto the target
    pub transform: Transform2d,

    /// Gated correspondences of the final iteration as (source_idx, target_idx)
    pub matches: Vec<(usize, usize)>,

    /// Mean squared error of the final alignment over `matches`
    pub mean_squared_error: f64,

    /// Number of iterations performed
    pub iterations: usize,

    /// False when the iteration cap was hit before the composite settled
    pub converged: bool,
}

impl ICPResult {
    /// Rotation matrix of the composite transform
    pub fn rotation(&self) -> Matrix2<f64> {
        self.transform.linear()
    }

    /// Translation of the composite transform
    pub fn translation(&self) -> Vector2<f64> {
        self.transform.translation()
    }
}

/// Calculates the geometric centroid (center of mass) of a point set.
///
/// Returns (0,0) if the point set is empty
fn calculate_centroid(points: &[Vector2<f64>]) -> Vector2<f64> {
    if points.is_empty() {
        return Vector2::zeros();
    }

    let mut centroid = Vector2::zeros();
    for point in points {
        centroid += point;
    }

    centroid / points.len() as f64
}

/// Least-squares rigid transform taking `source[i]` onto `target[i]`.
///
/// Kabsch solution via SVD of the cross-covariance; a negative determinant
/// is corrected so the result is always a proper rotation.
///
/// # Errors
/// * `ICPError::ArgumentError` - If the slices differ in length
/// * `ICPError::RegistrationFailed` - Fewer than two pairs, or the source
///   pairs have collapsed onto a single point so rotation is undefined
pub fn estimate_rigid_transform(
    source: &[Vector2<f64>],
    target: &[Vector2<f64>],
) -> Result<Transform2d, ICPError> {
    if source.len() != target.len() {
        return Err(ICPError::ArgumentError(format!(
            "correspondence length mismatch: {} source vs {} target",
            source.len(),
            target.len()
        )));
    }
    if source.len() < 2 {
        return Err(ICPError::RegistrationFailed(format!(
            "need at least 2 correspondences, got {}",
            source.len()
        )));
    }

    let source_centroid = calculate_centroid(source);
    let target_centroid = calculate_centroid(target);

    let mut h = Matrix2::zeros();
    for (s, t) in source.iter().zip(target) {
        h += (s - source_centroid) * (t - target_centroid).transpose();
    }

    if h.norm() < 1e-12 {
        return Err(ICPError::RegistrationFailed(
            "degenerate correspondence set (zero covariance)".to_string(),
        ));
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or_else(|| {
        ICPError::RegistrationFailed("SVD failed to produce U".to_string())
    })?;
    let v_t = svd.v_t.ok_or_else(|| {
        ICPError::RegistrationFailed("SVD failed to produce V^T".to_string())
    })?;

    let v = v_t.transpose();
    let sign = (v * u.transpose()).determinant().signum();
    let d = Matrix2::new(1.0, 0.0, 0.0, if sign == 0.0 { 1.0 } else { sign });
    let rotation = v * d * u.transpose();

    let translation = target_centroid - rotation * source_centroid;
    Ok(Transform2d::from_parts(&rotation, &translation))
}

/// Robust rigid ICP of `source_points` onto `target_points`.
///
/// # Arguments
/// * `source_points` - Points to be moved (the idealized reference grid)
/// * `target_points` - Fixed measurement points (detected spot centroids)
/// * `config` - Iteration cap, convergence threshold and gating factor
///
/// # Errors
/// * `ICPError::ArgumentError` - Empty inputs or non-positive tunables
/// * `ICPError::RegistrationFailed` - An iteration had no valid rigid fit
pub fn iterative_closest_point(
    source_points: &[Vector2<f64>],
    target_points: &[Vector2<f64>],
    config: &IcpConfig,
) -> Result<ICPResult, ICPError> {
    if source_points.is_empty() {
        return Err(ICPError::ArgumentError("source points are empty".to_string()));
    }
    if target_points.is_empty() {
        return Err(ICPError::ArgumentError("target points are empty".to_string()));
    }
    if config.max_iterations == 0 {
        return Err(ICPError::ArgumentError(
            "max_iterations must be at least 1".to_string(),
        ));
    }
    if config.matrix_diff <= 0.0 || config.gate_factor <= 0.0 {
        return Err(ICPError::ArgumentError(format!(
            "matrix_diff and gate_factor must be positive, got {} and {}",
            config.matrix_diff, config.gate_factor
        )));
    }

    let index = NearestNeighbors::train(target_points);

    let mut composite = Transform2d::identity();
    let mut current = source_points.to_vec();
    let mut matches = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    for i in 0..config.max_iterations {
        iterations = i + 1;

        let neighbors = index.query_all(&current);
        let distances: Vec<f64> = neighbors.iter().map(|n| n.distance).collect();
        let gate = config.gate_factor
            * median(&distances)
                .map_err(|e| ICPError::RegistrationFailed(e.to_string()))?;

        // Inclusive so an exact fit (all distances zero) keeps every pair
        matches = neighbors
            .iter()
            .enumerate()
            .filter(|(_, n)| n.distance <= gate)
            .map(|(src, n)| (src, n.index))
            .collect();

        let src_matched: Vec<Vector2<f64>> = matches.iter().map(|&(s, _)| current[s]).collect();
        let tgt_matched: Vec<Vector2<f64>> =
            matches.iter().map(|&(_, t)| target_points[t]).collect();

        let step = estimate_rigid_transform(&src_matched, &tgt_matched)?;
        current = step.apply_all(&current);

        let next = composite.then(&step);
        let change = next.parameter_distance(&composite);
        composite = next;

        debug!(
            iteration = iterations,
            retained = matches.len(),
            change,
            "ICP iteration"
        );

        if change < config.matrix_diff {
            converged = true;
            break;
        }
    }

    let mean_squared_error = if matches.is_empty() {
        f64::INFINITY
    } else {
        matches
            .iter()
            .map(|&(s, t)| (current[s] - target_points[t]).norm_squared())
            .sum::<f64>()
            / matches.len() as f64
    };

    Ok(ICPResult {
        transform: composite,
        matches,
        mean_squared_error,
        iterations,
        converged,
    })
}

/// Trait for objects that can be located in a 2D Cartesian coordinate system.
pub trait Locatable2d {
    /// Returns the x-coordinate of the object.
    fn x(&self) -> f64;

    /// Returns the y-coordinate of the object.
    fn y(&self) -> f64;
}

/// Implement Locatable for `nalgebra::Vector2<f64>`
impl Locatable2d for Vector2<f64> {
    fn x(&self) -> f64 {
        self.x
    }

    fn y(&self) -> f64 {
        self.y
    }
}

/// Runs ICP between two sets of Locatable2d objects and returns index pairs.
///
/// The returned indices can be used to access the original slices.
///
/// # Errors
/// Same as [`iterative_closest_point`].
pub fn icp_match_indices<R1, R2>(
    source: &[R1],
    target: &[R2],
    config: &IcpConfig,
) -> Result<(Vec<(usize, usize)>, ICPResult), ICPError>
where
    R1: Locatable2d,
    R2: Locatable2d,
{
    let source_points: Vec<Vector2<f64>> =
        source.iter().map(|p| Vector2::new(p.x(), p.y())).collect();
    let target_points: Vec<Vector2<f64>> =
        target.iter().map(|p| Vector2::new(p.x(), p.y())).collect();

    let result = iterative_closest_point(&source_points, &target_points, config)?;
    Ok((result.matches.clone(), result))
}
