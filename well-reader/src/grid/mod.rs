//! From detected spots to a filled print grid.
//!
//! # Module Organization
//!
//! - **spec**: Printed array geometry ([`GridSpec`])
//! - **config**: Run-wide tunables ([`ReaderConfig`])
//! - **estimation**: Grid center and spacing from intensity profiles
//! - **reference**: Idealized grid coordinates and block masks
//! - **registration**: ICP and particle-filter registration of the grid
//! - **assignment**: Region to cell assignment and missing-cell synthesis
//! - **spot_grid**: The rows x columns result container

pub mod assignment;
pub mod config;
pub mod estimation;
pub mod reference;
pub mod registration;
pub mod spec;
pub mod spot_grid;

pub use assignment::{
    assign_regions, assign_to_registered_grid, grid_extent, patch_side, synthesize_region,
    AssignerConfig, CollisionPolicy, GridExtent, PatchSizing,
};
pub use config::ReaderConfig;
pub use estimation::{
    find_peaks, find_profile_peaks, gaussian_smooth, grid_estimation, GridEstimate,
    GridEstimatorConfig, ProfilePeaks,
};
pub use reference::{
    block_mask, block_side, create_reference_grid, fiducial_reference_coords,
    pitched_reference_grid, spec_reference_grid,
};
pub use registration::{priors_around, register_icp, register_particle_filter, GridRegistration};
pub use spec::GridSpec;
pub use spot_grid::{Region, SpotGrid, SpotMeasurement, SynthesizedRegion};
