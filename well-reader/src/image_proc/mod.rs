//! Image processing stages for well images.
//!
//! Everything upstream of the grid: loading, binarization, morphology,
//! region extraction, well localization and cropping.
//!
//! # Module Organization
//!
//! - **image**: Grayscale well images and conversions from the `image` crate
//! - **morphology**: Binary dilation, erosion, opening and border clearing
//! - **centroid**: Moments, axis lengths and eccentricity of masked regions
//! - **detection**: Thresholding, connected components, region properties, spots
//! - **well**: Well border localization and cropping
//! - **test_patterns**: Synthetic wells and spot arrays

pub mod centroid;
pub mod detection;
pub mod image;
pub mod morphology;
pub mod test_patterns;
pub mod well;

pub use centroid::{compute_centroid_from_mask, compute_shape_from_mask, CentroidResult};
pub use detection::{
    binarize, detect_spots, detect_spots_within, extract_regions, select, Predicate,
    RegionAttribute, RegionProps, SpotDetectionConfig, ThresholdMethod, AABB,
};
pub use image::{BinaryMask, GrayscaleImage};
pub use morphology::{
    clean_spot_binary, clear_border, closing, dilate, erode, opening, StructuringElement,
};
pub use well::{crop_well, find_well_border, Crop, WellBorder, WellDetection, WellLocatorConfig};
