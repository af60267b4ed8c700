//! Registration of the idealized grid onto detected spots.
//!
//! Wraps the ICP and particle-filter searches from `plate_math` and turns
//! their result into the expected position of every grid cell.

use nalgebra::Vector2;
use plate_math::{
    iterative_closest_point, particle_filter, ICPError, IcpConfig, ParticleFilterConfig,
    ParticlePriors, ParticleState, Transform2d,
};
use rand::Rng;
use tracing::{info, warn};

use crate::error::Result;

/// Pose of the reference grid in the image, and where it puts each cell
#[derive(Debug, Clone, PartialEq)]
pub struct GridRegistration {
    pub transform: Transform2d,
    /// Set when registration could not produce a fit and `transform` is
    /// the identity
    pub failed: bool,
    /// Row-major transformed reference positions, one per cell
    pub expected_positions: Vec<Vector2<f64>>,
    /// ICP mean squared error, or particle-filter aggregate distance
    pub cost: f64,
    pub iterations: usize,
}

/// Register with ICP from fiducial markers.
///
/// `fiducials` are the reference positions of the fiducial cells and
/// `observed` the detected spot centroids; the fitted transform is then
/// applied to the full `reference` grid. A failed fit is reported as a
/// flagged identity instead of an error so assignment can still run.
///
/// # Errors
/// `RegistrationFailed` for invalid inputs (empty point sets or tunables).
pub fn register_icp(
    fiducials: &[Vector2<f64>],
    observed: &[Vector2<f64>],
    reference: &[Vector2<f64>],
    config: &IcpConfig,
) -> Result<GridRegistration> {
    match iterative_closest_point(fiducials, observed, config) {
        Ok(result) => {
            info!(
                iterations = result.iterations,
                converged = result.converged,
                mse = result.mean_squared_error,
                "ICP registration"
            );
            Ok(GridRegistration {
                expected_positions: result.transform.apply_all(reference),
                transform: result.transform,
                failed: false,
                cost: result.mean_squared_error,
                iterations: result.iterations,
            })
        }
        Err(ICPError::RegistrationFailed(reason)) => {
            warn!(%reason, "ICP failed, using identity transform");
            Ok(GridRegistration {
                transform: Transform2d::identity(),
                failed: true,
                expected_positions: reference.to_vec(),
                cost: f64::INFINITY,
                iterations: 0,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Gaussian priors around the unmoved reference grid.
///
/// Particle positions are where the reference centroid lands, so the
/// prior mean sits on that centroid with no rotation and unit scale.
pub fn priors_around(reference: &[Vector2<f64>], spread: &ParticleState) -> ParticlePriors {
    let centroid = if reference.is_empty() {
        Vector2::zeros()
    } else {
        reference.iter().sum::<Vector2<f64>>() / reference.len() as f64
    };
    ParticlePriors::gaussian(&ParticleState::new(centroid.x, centroid.y, 0.0, 1.0), spread)
}

/// Register by particle filtering the reference grid onto `observed`.
///
/// # Errors
/// `ParticleFilter` for empty point sets or invalid tunables.
pub fn register_particle_filter<R: Rng + ?Sized>(
    reference: &[Vector2<f64>],
    observed: &[Vector2<f64>],
    spread: &ParticleState,
    config: &ParticleFilterConfig,
    rng: &mut R,
) -> Result<GridRegistration> {
    let priors = priors_around(reference, spread);
    let result = particle_filter(reference, observed, &priors, config, rng)?;

    info!(
        iterations = result.iterations,
        cost = result.best.cost,
        x = result.best.state.x,
        y = result.best.state.y,
        angle = result.best.state.angle,
        scale = result.best.state.scale,
        "particle filter registration"
    );
    Ok(GridRegistration {
        expected_positions: result.transform.apply_all(reference),
        transform: result.transform,
        failed: false,
        cost: result.best.cost,
        iterations: result.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use crate::grid::reference::create_reference_grid;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_icp_recovers_offset_grid() {
        let reference = create_reference_grid(&Vector2::new(200.0, 200.0), 4, 4, 60.0);
        let truth = Transform2d::rigid(0.03, Vector2::new(6.0, -4.0));
        let observed = truth.apply_all(&reference);
        let fiducials = vec![reference[0], reference[3], reference[12]];

        let registration =
            register_icp(&fiducials, &observed, &reference, &IcpConfig::default()).unwrap();

        assert!(!registration.failed);
        for (expected, actual) in registration.expected_positions.iter().zip(&observed) {
            assert!((expected - actual).norm() < 1e-3);
        }
    }

    #[test]
    fn test_icp_failure_is_flagged_identity() {
        let reference = create_reference_grid(&Vector2::new(50.0, 50.0), 2, 2, 10.0);
        // A single fiducial cannot pin down a rotation
        let registration = register_icp(
            &reference[..1],
            &[Vector2::new(3.0, 4.0)],
            &reference,
            &IcpConfig::default(),
        )
        .unwrap();

        assert!(registration.failed);
        assert_eq!(registration.transform, Transform2d::identity());
        assert_eq!(registration.expected_positions, reference);
    }

    #[test]
    fn test_icp_rejects_empty_observations() {
        let reference = create_reference_grid(&Vector2::new(50.0, 50.0), 2, 2, 10.0);
        assert!(matches!(
            register_icp(&reference, &[], &reference, &IcpConfig::default()),
            Err(ReaderError::RegistrationFailed(_))
        ));
    }

    #[test]
    fn test_particle_filter_registration_is_seeded() {
        let reference = create_reference_grid(&Vector2::new(250.0, 250.0), 6, 6, 80.0);
        let truth = ParticleState::new(256.0, 246.0, 2f64.to_radians(), 1.02);
        let pivot = Vector2::new(250.0, 250.0);
        let observed = truth.transform(&pivot).apply_all(&reference);
        let spread = ParticleState::new(5.0, 5.0, 0.02, 0.02);
        let config = ParticleFilterConfig::default();

        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            register_particle_filter(&reference, &observed, &spread, &config, &mut rng).unwrap()
        };
        let a = run(42);
        let b = run(42);

        assert_eq!(a.transform, b.transform);
        assert!(!a.failed);
        assert!(a.cost < 10.0, "cost {} over 36 points", a.cost);
        assert_eq!(a.expected_positions.len(), 36);

        // Recovered pose: the grid centre lands on the true one, and the
        // rotation and scale match
        assert!((a.transform.apply(&pivot) - Vector2::new(256.0, 246.0)).norm() < 1.0);
        assert!((a.transform.rotation() - truth.angle).abs() < 0.5f64.to_radians());
        assert!((a.transform.scale() - truth.scale).abs() < 0.003);
        for (expected, actual) in a.expected_positions.iter().zip(&observed) {
            assert!((expected - actual).norm() < 5.0);
        }
    }

    #[test]
    fn test_priors_centered_on_reference() {
        let reference = create_reference_grid(&Vector2::new(10.0, 20.0), 2, 2, 4.0);
        let priors = priors_around(&reference, &ParticleState::new(1.0, 1.0, 0.1, 0.1));
        assert_eq!(
            priors.x,
            plate_math::Prior::Gaussian {
                mean: 10.0,
                std: 1.0
            }
        );
        assert_eq!(
            priors.scale,
            plate_math::Prior::Gaussian {
                mean: 1.0,
                std: 0.1
            }
        );
    }
}
