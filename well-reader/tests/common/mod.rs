//! Synthetic well images shared by the integration tests

#![allow(dead_code)]

use nalgebra::Vector2;
use ndarray::s;
use plate_math::Transform2d;
use well_reader::image_proc::test_patterns::{dark_spot_array_with, SpotPattern, SPOT_LEVEL};
use well_reader::image_proc::well::{Crop, WellDetection, WellLocatorConfig};
use well_reader::image_proc::{SpotDetectionConfig, ThresholdMethod};
use well_reader::{GrayscaleImage, GridSpec, ReaderConfig};

/// Intensity outside the well
pub const PLATE_LEVEL: f64 = 0.1;

pub const IMAGE_SIDE: usize = 900;
pub const WELL_RADIUS: f64 = 400.0;
pub const PITCH: f64 = 60.0;
pub const SPOT_RADIUS: f64 = 12.0;

/// A 6x6 well and the true (x, y) of every cell in full-image coordinates
pub struct SyntheticWell {
    pub image: GrayscaleImage,
    pub centers: Vec<Vector2<f64>>,
}

/// Bright well disk centered in the image, with a 6x6 array of dark spots
/// moved by `distortion` and `omitted` cells left unprinted.
pub fn synthetic_well(omitted: &[(usize, usize)], distortion: &Transform2d) -> SyntheticWell {
    into_well(well_pattern(omitted, distortion))
}

/// Undistorted well where the spot of `cell` trails a 3 px tall dark streak
/// from its center `length` pixels to the right.
pub fn streaked_well(cell: (usize, usize), length: usize) -> SyntheticWell {
    let mut pattern = well_pattern(&[], &Transform2d::identity());
    let c = pattern.centers[cell.0 * 6 + cell.1];
    let (x, y) = (c.x.round() as usize, c.y.round() as usize);
    pattern
        .image
        .slice_mut(s![y - 1..=y + 1, x..=x + length])
        .fill(SPOT_LEVEL);
    into_well(pattern)
}

fn into_well(pattern: SpotPattern) -> SyntheticWell {
    SyntheticWell {
        image: GrayscaleImage::new(pattern.image, 0.01).unwrap(),
        centers: pattern.centers,
    }
}

fn well_pattern(omitted: &[(usize, usize)], distortion: &Transform2d) -> SpotPattern {
    let shape = (IMAGE_SIDE, IMAGE_SIDE);
    let mut pattern = dark_spot_array_with(shape, 6, 6, PITCH, SPOT_RADIUS, omitted, distortion);

    let center = IMAGE_SIDE as f64 / 2.0;
    for ((row, col), v) in pattern.image.indexed_iter_mut() {
        let (dx, dy) = (col as f64 - center, row as f64 - center);
        if dx * dx + dy * dy > WELL_RADIUS * WELL_RADIUS {
            *v = PLATE_LEVEL;
        }
    }
    pattern
}

/// Small shift and rotation of the printed grid about the image center
pub fn misprint() -> Transform2d {
    let center = Vector2::new(IMAGE_SIDE as f64 / 2.0, IMAGE_SIDE as f64 / 2.0);
    Transform2d::about_pivot(&center, 1.0f64.to_radians(), 1.0, &(center + Vector2::new(5.0, -3.0)))
}

/// 6x6 grid at 60 px pitch with 24 px spots, 0.01 mm pixels
pub fn spec() -> GridSpec {
    GridSpec::new(6, 6, 0.6, 0.6, 0.24, 0.01).unwrap()
}

/// Configuration for the synthetic wells: two-level images threshold
/// cleanly with Otsu, and the crop keeps clear of the well edge.
pub fn config() -> ReaderConfig {
    ReaderConfig {
        well: WellLocatorConfig {
            method: ThresholdMethod::Otsu,
            detection: WellDetection::Region,
            crop_border: 150.0,
            ..Default::default()
        },
        spots: SpotDetectionConfig {
            method: ThresholdMethod::Otsu,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Map full-image points into crop coordinates
pub fn to_crop(points: &[Vector2<f64>], crop: &Crop) -> Vec<Vector2<f64>> {
    let offset = Vector2::new(crop.col_offset as f64, crop.row_offset as f64);
    points.iter().map(|p| p - offset).collect()
}
