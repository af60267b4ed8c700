//! Object detection on well images.
//!
//! # Module Organization
//!
//! - **thresholding**: Histogram thresholds and binarization strategies
//! - **components**: 8-connected component labeling
//! - **regions**: Per-component properties and attribute selection
//! - **spots**: Printed spot detection inside a cropped well
//! - **aabb**: Axis-aligned bounding boxes for region management

pub mod aabb;
pub mod components;
pub mod regions;
pub mod spots;
pub mod thresholding;

pub use aabb::AABB;
pub use components::connected_components;
pub use regions::{extract_regions, select, Predicate, RegionAttribute, RegionProps};
pub use spots::{detect_spots, detect_spots_within, SpotDetectionConfig};
pub use thresholding::{
    apply_threshold, binarize, minimum_threshold, multi_otsu_thresholds, otsu_threshold,
    percentile, rosin_threshold, Histogram, ThresholdMethod,
};
