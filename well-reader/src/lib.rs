//! Grid registration and spot assignment for antigen micro-array wells.
//!
//! Turns a grayscale image of one well into a rows x columns grid of spot
//! regions, a matching grid of background rings, and the optical density
//! of every printed spot.
//!
//! # Module Organization
//!
//! - **image_proc**: Image type, thresholding, morphology, regions, well locator
//! - **grid**: Plate geometry, grid estimation, registration, assignment
//! - **background**: Background rings and optical density
//! - **pipeline**: Per-well orchestration and parallel batches
//! - **error**: [`ReaderError`] shared by every stage
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use well_reader::{AssignmentStrategy, GrayscaleImage, GridSpec, ReaderConfig, WellProcessor};
//!
//! let spec = GridSpec::load_from_file(Path::new("plate.json"))?;
//! let image = GrayscaleImage::load(Path::new("A1.png"), spec.pixel_size)?;
//! let processor = WellProcessor::new(spec, ReaderConfig::default(), AssignmentStrategy::Interpolate)?;
//!
//! let analysis = processor.process(&image, 0)?;
//! println!("OD of spot (0, 0): {}", analysis.od.od[[0, 0]]);
//! # Ok::<(), well_reader::ReaderError>(())
//! ```

pub mod background;
pub mod error;
pub mod grid;
pub mod image_proc;
pub mod pipeline;

pub use background::{background_annulus, background_grid, compute_od, BackgroundConfig, OdResult};
pub use error::{ReaderError, Result};
pub use grid::{
    GridRegistration, GridSpec, ReaderConfig, Region, SpotGrid, SpotMeasurement,
    SynthesizedRegion,
};
pub use image_proc::{GrayscaleImage, RegionProps};
pub use pipeline::{process_wells_in_parallel, AssignmentStrategy, WellAnalysis, WellProcessor};
