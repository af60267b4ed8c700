//! Per-well orchestration and the parallel batch driver.
//!
//! A well is processed in a fixed order: locate and crop the well, detect
//! spots, place them on the grid (directly, or after registering the
//! idealized grid and re-detecting spots inside blocks around the registered
//! cells), measure background rings, and compute optical density.
//! Each well owns its data; batches run wells on the rayon pool with one
//! seeded RNG per well.

use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::background::{background_grid, compute_od, OdResult};
use crate::error::Result;
use crate::grid::assignment::{assign_regions, assign_to_registered_grid};
use crate::grid::config::ReaderConfig;
use crate::grid::estimation::{grid_estimation, GridEstimate};
use crate::grid::reference::{
    block_mask, block_side, create_reference_grid, fiducial_reference_coords,
    spec_reference_grid,
};
use crate::grid::registration::{register_icp, register_particle_filter, GridRegistration};
use crate::grid::spec::GridSpec;
use crate::grid::spot_grid::{SpotGrid, SpotMeasurement};
use crate::image_proc::detection::regions::RegionProps;
use crate::image_proc::detection::spots::{detect_spots, detect_spots_within};
use crate::image_proc::image::GrayscaleImage;
use crate::image_proc::well::{crop_well, find_well_border, Crop, WellBorder};

/// How detected spots are placed on the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Rescale centroids from their observed extent, no registration
    Interpolate,
    /// Register printed fiducial cells `(row, col)` with ICP
    Icp { fiducials: Vec<(usize, usize)> },
    /// Register the whole grid with the particle filter
    ParticleFilter,
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        AssignmentStrategy::Interpolate
    }
}

/// Everything produced for one well. Positions are in crop coordinates;
/// `crop` maps them back to the source image.
#[derive(Debug, Clone)]
pub struct WellAnalysis {
    pub well: WellBorder,
    pub crop: Crop,
    pub estimate: Option<GridEstimate>,
    pub registration: Option<GridRegistration>,
    pub spots: SpotGrid,
    pub background: SpotGrid,
    pub od: OdResult,
}

/// Processes wells of one plate layout with one configuration
#[derive(Debug, Clone)]
pub struct WellProcessor {
    pub spec: GridSpec,
    pub config: ReaderConfig,
    pub strategy: AssignmentStrategy,
}

impl WellProcessor {
    pub fn new(spec: GridSpec, config: ReaderConfig, strategy: AssignmentStrategy) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            config,
            strategy,
        })
    }

    /// Run every stage on one well image.
    ///
    /// `seed` drives the particle filter and is ignored by the other
    /// strategies.
    pub fn process(&self, image: &GrayscaleImage, seed: u64) -> Result<WellAnalysis> {
        let well = find_well_border(image, &self.config.well)?;
        let crop = crop_well(image, &well.center, well.radius, self.config.well.crop_border)?;
        self.process_crop(well, crop, seed)
    }

    /// Run the stages after well localization on an existing crop
    pub fn process_crop(&self, well: WellBorder, crop: Crop, seed: u64) -> Result<WellAnalysis> {
        let view = crop.image.view();
        let detected = detect_spots(&crop.image, &self.config.spots)?;
        let centroids: Vec<Vector2<f64>> = detected.iter().map(|r| r.position()).collect();

        let mut estimate = None;
        let mut registration = None;
        let spots = match &self.strategy {
            AssignmentStrategy::Interpolate => {
                assign_regions(detected, &view, &self.spec, &self.config.assigner)?
            }
            AssignmentStrategy::Icp { fiducials } => {
                let guess = grid_estimation(&view, &centroids, &self.config.estimator);
                let sources = fiducial_reference_coords(&self.spec, fiducials, &guess.center)?;
                let reference = spec_reference_grid(&self.spec, &guess.center);
                let fit = register_icp(&sources, &centroids, &reference, &self.config.icp)?;
                let max_distance = self.config.assign_distance
                    * self.spec.h_pitch_px().min(self.spec.v_pitch_px());
                let grid = self.assign_in_blocks(&crop, detected, &fit, max_distance)?;
                estimate = Some(guess);
                registration = Some(fit);
                grid
            }
            AssignmentStrategy::ParticleFilter => {
                let (rows, cols) = (self.spec.rows, self.spec.columns);
                let guess = grid_estimation(&view, &centroids, &self.config.estimator);
                let reference = create_reference_grid(&guess.center, rows, cols, guess.spacing);
                let mut rng = StdRng::seed_from_u64(seed);
                let fit = register_particle_filter(
                    &reference,
                    &centroids,
                    &self.config.prior_spread,
                    &self.config.particle_filter,
                    &mut rng,
                )?;
                let max_distance = self.config.assign_distance * guess.spacing;
                let grid = self.assign_in_blocks(&crop, detected, &fit, max_distance)?;
                estimate = Some(guess);
                registration = Some(fit);
                grid
            }
        };

        let background = background_grid(&spots, &view, &self.config.background)?;
        let od = compute_od(&spots, &background)?;
        info!(
            filled = spots.filled_count(),
            synthesized = spots.synthesized_count(),
            "well processed"
        );

        Ok(WellAnalysis {
            well,
            crop,
            estimate,
            registration,
            spots,
            background,
            od,
        })
    }

    /// Re-detect spots inside blocks around the registered cells, then
    /// assign them to the nearest cell.
    ///
    /// A failed registration keeps the first-pass regions, since its blocks
    /// would sit on the unregistered grid.
    fn assign_in_blocks(
        &self,
        crop: &Crop,
        detected: Vec<RegionProps>,
        fit: &GridRegistration,
        max_distance: f64,
    ) -> Result<SpotGrid> {
        let regions = if fit.failed {
            detected
        } else {
            let side = block_side(&self.spec);
            let blocks = block_mask(crop.image.shape(), &fit.expected_positions, side);
            let regions = detect_spots_within(&crop.image, &blocks, &self.config.spots)?;
            debug!(
                first_pass = detected.len(),
                in_blocks = regions.len(),
                side,
                "spots re-detected inside registered blocks"
            );
            regions
        };
        assign_to_registered_grid(
            regions,
            &crop.image.view(),
            &fit.expected_positions,
            &self.spec,
            max_distance,
            &self.config.assigner,
        )
    }
}

/// Process independent wells concurrently.
///
/// Well `i` is seeded with `base_seed + i`, so each result is reproducible
/// on its own regardless of scheduling. Results keep the input order; one
/// failed well does not affect the others.
pub fn process_wells_in_parallel(
    processor: &WellProcessor,
    images: &[GrayscaleImage],
    base_seed: u64,
) -> Vec<Result<WellAnalysis>> {
    images
        .par_iter()
        .enumerate()
        .map(|(index, image)| {
            let _span = info_span!("well", index).entered();
            processor.process(image, base_seed.wrapping_add(index as u64))
        })
        .collect()
}
