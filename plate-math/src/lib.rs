//! plate-math - Geometry and registration math for micro-array grids
//!
//! This crate aligns an idealized, regularly spaced grid of spot positions
//! with an unordered set of detected spot centroids:
//!
//! - **Transform** - 2D similarity transforms in homogeneous form
//! - **Neighbors** - Nearest-neighbour index over the measurement set
//! - **ICP** - Robust rigid Iterative Closest Point with median gating
//! - **Particle filter** - Stochastic pose search over (x, y, angle, scale)
//! - **Statistics** - Median, mean and standard deviation
//!
//! # Example
//!
//! ```
//! use nalgebra::Vector2;
//! use plate_math::{iterative_closest_point, IcpConfig, Transform2d};
//!
//! let source: Vec<Vector2<f64>> = (0..9)
//!     .map(|i| Vector2::new((i % 3) as f64 * 80.0, (i / 3) as f64 * 80.0))
//!     .collect();
//! let target = Transform2d::rigid(0.05, Vector2::new(3.0, -2.0)).apply_all(&source);
//!
//! let result = iterative_closest_point(&source, &target, &IcpConfig::default()).unwrap();
//! assert!((result.transform.rotation() - 0.05).abs() < 1e-6);
//! ```

pub mod icp;
pub mod neighbors;
pub mod particle_filter;
pub mod stats;
pub mod transform;

pub use icp::{
    estimate_rigid_transform, icp_match_indices, iterative_closest_point, ICPError, ICPResult,
    IcpConfig, Locatable2d,
};
pub use neighbors::{nearest_neighbor_distances, Neighbor, NearestNeighbors};
pub use particle_filter::{
    particle_filter, ParticleFilterConfig, ParticleFilterError, ParticleFilterResult,
    ParticlePriors, ParticleState, Prior, ScoredParticle,
};
pub use stats::{mean, median, std_dev, StatsError};
pub use transform::{rotation_matrix, Transform2d};
