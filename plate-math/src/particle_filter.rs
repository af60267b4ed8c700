//! Particle filter search for the grid pose
//!
//! Each particle is a candidate pose `(x, y, angle, scale)` of the idealized
//! reference grid. A particle is scored by moving the reference points with
//! its transform and measuring how far they land from the observed spot
//! centroids. Low-cost particles are resampled more often, then everything is
//! jittered with a noise level that shrinks every iteration.
//!
//! Resampling can discard the best particle ever seen, so a running best is
//! kept separately from the terminal population and both are returned.

use nalgebra::Vector2;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::neighbors::NearestNeighbors;
use crate::transform::Transform2d;

/// Floor applied to costs before inverting them into weights
const MIN_COST: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParticleFilterError {
    #[error("Invalid argument: {0}")]
    ArgumentError(String),

    #[error("importance weights are degenerate: {0}")]
    DegenerateWeights(String),
}

/// Distribution used to draw the initial value of one state dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prior {
    Uniform { low: f64, high: f64 },
    Gaussian { mean: f64, std: f64 },
}

impl Prior {
    fn validate(&self, name: &str) -> Result<(), ParticleFilterError> {
        let ok = match *self {
            Prior::Uniform { low, high } => low.is_finite() && high.is_finite() && low <= high,
            Prior::Gaussian { mean, std } => mean.is_finite() && std.is_finite() && std >= 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(ParticleFilterError::ArgumentError(format!(
                "invalid prior for {name}: {self:?}"
            )))
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Prior::Uniform { low, high } => rng.gen_range(low..=high),
            Prior::Gaussian { mean, std } => {
                let z: f64 = rng.sample(StandardNormal);
                mean + z * std
            }
        }
    }
}

/// Per-dimension priors for the initial particle population
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticlePriors {
    pub x: Prior,
    pub y: Prior,
    pub angle: Prior,
    pub scale: Prior,
}

impl ParticlePriors {
    /// Independent Gaussians around `mean` with the given spreads
    pub fn gaussian(mean: &ParticleState, std: &ParticleState) -> Self {
        Self {
            x: Prior::Gaussian {
                mean: mean.x,
                std: std.x,
            },
            y: Prior::Gaussian {
                mean: mean.y,
                std: std.y,
            },
            angle: Prior::Gaussian {
                mean: mean.angle,
                std: std.angle,
            },
            scale: Prior::Gaussian {
                mean: mean.scale,
                std: std.scale,
            },
        }
    }

    fn validate(&self) -> Result<(), ParticleFilterError> {
        self.x.validate("x")?;
        self.y.validate("y")?;
        self.angle.validate("angle")?;
        self.scale.validate("scale")
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParticleState {
        ParticleState {
            x: self.x.sample(rng),
            y: self.y.sample(rng),
            angle: self.angle.sample(rng),
            scale: self.scale.sample(rng),
        }
    }
}

/// Pose of the reference grid: where its centroid lands, its rotation
/// (radians) and its isotropic scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleState {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub scale: f64,
}

impl ParticleState {
    pub fn new(x: f64, y: f64, angle: f64, scale: f64) -> Self {
        Self { x, y, angle, scale }
    }

    /// Rotate and scale about `pivot`, then move `pivot` to `(x, y)`
    pub fn transform(&self, pivot: &Vector2<f64>) -> Transform2d {
        Transform2d::about_pivot(pivot, self.angle, self.scale, &Vector2::new(self.x, self.y))
    }

    fn jittered<R: Rng + ?Sized>(&self, std: &ParticleState, factor: f64, rng: &mut R) -> Self {
        let mut noise = || -> f64 { rng.sample(StandardNormal) };
        Self {
            x: self.x + noise() * std.x * factor,
            y: self.y + noise() * std.y * factor,
            angle: self.angle + noise() * std.angle * factor,
            scale: self.scale + noise() * std.scale * factor,
        }
    }
}

/// Tunables for [`particle_filter`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    pub n_particles: usize,
    pub max_iterations: usize,
    /// Jitter std at iteration `i` is `jitter_std * decay^i`
    pub decay: f64,
    /// Stop once the per-iteration minimum cost moves less than this
    pub stop_criteria: f64,
    /// Initial jitter std per state dimension
    pub jitter_std: ParticleState,
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            n_particles: 100,
            max_iterations: 50,
            decay: 0.95,
            stop_criteria: 0.1,
            jitter_std: ParticleState::new(2.0, 2.0, 0.5f64.to_radians(), 0.005),
        }
    }
}

/// A particle together with its alignment cost
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredParticle {
    pub state: ParticleState,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct ParticleFilterResult {
    /// Lowest-cost particle seen across every iteration
    pub best: ScoredParticle,
    /// Transform of `best`
    pub transform: Transform2d,
    /// Population after the last resample and jitter, scored
    pub terminal: Vec<ScoredParticle>,
    /// Lowest-cost member of `terminal`
    pub terminal_best: ScoredParticle,
    pub iterations: usize,
    /// Minimum population cost of each iteration
    pub cost_history: Vec<f64>,
    /// Point the particle rotations and scales are taken about
    pub pivot: Vector2<f64>,
}

/// Aggregate cost of placing `reference` with `state`
pub fn particle_cost(
    state: &ParticleState,
    reference: &[Vector2<f64>],
    pivot: &Vector2<f64>,
    observed: &NearestNeighbors,
) -> f64 {
    let moved = state.transform(pivot).apply_all(reference);
    observed.aggregate_distance(&moved)
}

fn lowest(scored: &[ScoredParticle]) -> Option<ScoredParticle> {
    scored
        .iter()
        .copied()
        .min_by(|a, b| a.cost.total_cmp(&b.cost))
}

fn score(
    particles: &[ParticleState],
    reference: &[Vector2<f64>],
    pivot: &Vector2<f64>,
    observed: &NearestNeighbors,
) -> Vec<ScoredParticle> {
    particles
        .iter()
        .map(|state| ScoredParticle {
            state: *state,
            cost: particle_cost(state, reference, pivot, observed),
        })
        .collect()
}

/// Search for the pose that best lays `reference` over `observed`.
///
/// # Arguments
/// * `reference` - Idealized grid coordinates
/// * `observed` - Detected spot centroids (the fixed measurement set)
/// * `priors` - Distributions for the initial population
/// * `config` - Population size, iteration cap, jitter and stopping rule
/// * `rng` - Randomness source; seed it for reproducible runs
///
/// # Errors
/// * `ParticleFilterError::ArgumentError` - Empty point sets, an empty
///   population, or invalid priors/tunables
/// * `ParticleFilterError::DegenerateWeights` - Weights could not be
///   normalized (non-finite costs)
pub fn particle_filter<R: Rng + ?Sized>(
    reference: &[Vector2<f64>],
    observed: &[Vector2<f64>],
    priors: &ParticlePriors,
    config: &ParticleFilterConfig,
    rng: &mut R,
) -> Result<ParticleFilterResult, ParticleFilterError> {
    if reference.is_empty() || observed.is_empty() {
        return Err(ParticleFilterError::ArgumentError(format!(
            "need reference and observed points, got {} and {}",
            reference.len(),
            observed.len()
        )));
    }
    if config.n_particles == 0 || config.max_iterations == 0 {
        return Err(ParticleFilterError::ArgumentError(
            "n_particles and max_iterations must be at least 1".to_string(),
        ));
    }
    if !(config.decay > 0.0 && config.decay <= 1.0) {
        return Err(ParticleFilterError::ArgumentError(format!(
            "decay must be in (0, 1], got {}",
            config.decay
        )));
    }
    let j = &config.jitter_std;
    if [j.x, j.y, j.angle, j.scale]
        .iter()
        .any(|s| !s.is_finite() || *s < 0.0)
    {
        return Err(ParticleFilterError::ArgumentError(format!(
            "jitter std must be finite and non-negative, got {j:?}"
        )));
    }
    priors.validate()?;

    let pivot = reference.iter().sum::<Vector2<f64>>() / reference.len() as f64;
    let index = NearestNeighbors::train(observed);

    let mut particles: Vec<ParticleState> =
        (0..config.n_particles).map(|_| priors.sample(rng)).collect();

    let mut best: Option<ScoredParticle> = None;
    let mut cost_history = Vec::new();
    let mut prev_min = f64::INFINITY;
    let mut iterations = 0;

    for i in 0..config.max_iterations {
        iterations = i + 1;
        let factor = config.decay.powi(i as i32);

        let scored = score(&particles, reference, &pivot, &index);
        let iteration_best = lowest(&scored).ok_or_else(|| {
            ParticleFilterError::ArgumentError("empty particle population".to_string())
        })?;
        if best.map_or(true, |b| iteration_best.cost < b.cost) {
            best = Some(iteration_best);
        }
        let min_cost = iteration_best.cost;
        cost_history.push(min_cost);

        debug!(iteration = iterations, min_cost, "particle filter iteration");

        let weights: Vec<f64> = scored.iter().map(|s| 1.0 / s.cost.max(MIN_COST)).collect();
        let sampler = WeightedIndex::new(&weights)
            .map_err(|e| ParticleFilterError::DegenerateWeights(e.to_string()))?;

        particles = (0..config.n_particles)
            .map(|_| particles[sampler.sample(rng)].jittered(&config.jitter_std, factor, rng))
            .collect();

        if (prev_min - min_cost).abs() < config.stop_criteria {
            break;
        }
        prev_min = min_cost;
    }

    let terminal = score(&particles, reference, &pivot, &index);
    let terminal_best = lowest(&terminal).ok_or_else(|| {
        ParticleFilterError::ArgumentError("empty particle population".to_string())
    })?;
    let best = match best {
        Some(b) if b.cost <= terminal_best.cost => b,
        _ => terminal_best,
    };

    Ok(ParticleFilterResult {
        best,
        transform: best.state.transform(&pivot),
        terminal,
        terminal_best,
        iterations,
        cost_history,
        pivot,
    })
}
