//! Well localization and cropping.
//!
//! A well is the bright disk the spots are printed in. Two detectors are
//! available: the region detector picks the first large, round connected
//! component of the binarized image; the Hough detector votes for circle
//! centers along the mask edge over a fixed set of candidate radii.

use nalgebra::Vector2;
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ReaderError, Result};
use crate::image_proc::detection::regions::{extract_regions, RegionProps};
use crate::image_proc::detection::thresholding::{binarize, ThresholdMethod};
use crate::image_proc::image::{BinaryMask, GrayscaleImage};
use crate::image_proc::morphology::{erode, opening, StructuringElement};

/// How the well border is found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WellDetection {
    /// First component with enough area and low eccentricity
    Region,
    /// Circular Hough transform; the strongest peak over all radii wins
    Hough { radii: Vec<f64> },
}

impl Default for WellDetection {
    fn default() -> Self {
        WellDetection::Region
    }
}

impl WellDetection {
    /// Hough detection over the radii seen on full-resolution well images
    pub fn hough() -> Self {
        WellDetection::Hough {
            radii: vec![300.0, 400.0, 500.0, 600.0],
        }
    }
}

/// Parameters for [`find_well_border`] and the crop that follows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WellLocatorConfig {
    pub method: ThresholdMethod,
    pub detection: WellDetection,
    /// Disk radius of the opening that removes speckle before labeling
    pub opening_radius: usize,
    /// Components must be strictly larger than this (pixels)
    pub min_area: f64,
    /// Components must be strictly rounder than this
    pub max_eccentricity: f64,
    /// Pixels trimmed from the radius when cropping
    pub crop_border: f64,
}

impl Default for WellLocatorConfig {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::Bimodal,
            detection: WellDetection::Region,
            opening_radius: 10,
            min_area: 1e5,
            max_eccentricity: 0.6,
            crop_border: 200.0,
        }
    }
}

/// Located well in full-image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct WellBorder {
    /// (x, y) = (col, row)
    pub center: Vector2<f64>,
    pub radius: f64,
    /// Well pixels, same shape as the input image
    pub mask: BinaryMask,
}

/// Square window cut from a larger image
#[derive(Debug, Clone, PartialEq)]
pub struct Crop {
    pub image: GrayscaleImage,
    /// First row of the window in the source image
    pub row_offset: usize,
    /// First column of the window in the source image
    pub col_offset: usize,
}

impl Crop {
    /// Map an (x, y) point in crop coordinates back to the source image
    pub fn to_source(&self, point: &Vector2<f64>) -> Vector2<f64> {
        point + Vector2::new(self.col_offset as f64, self.row_offset as f64)
    }
}

/// Locate the well in `image`.
///
/// # Errors
/// `NoWellFound` when no component qualifies (region detector) or the mask
/// has no edge to vote with (Hough detector). Threshold failures propagate.
pub fn find_well_border(image: &GrayscaleImage, config: &WellLocatorConfig) -> Result<WellBorder> {
    let mask = binarize(&image.view(), &config.method, false)?;
    let cleaned = opening(&mask.view(), &StructuringElement::disk(config.opening_radius));

    let border = match &config.detection {
        WellDetection::Region => region_well(&cleaned.view(), config)?,
        WellDetection::Hough { radii } => hough_well(&cleaned.view(), radii)?,
    };

    info!(
        cx = border.center.x,
        cy = border.center.y,
        radius = border.radius,
        "well located"
    );
    Ok(border)
}

fn region_well(mask: &ArrayView2<bool>, config: &WellLocatorConfig) -> Result<WellBorder> {
    let regions = extract_regions(mask, None)?;
    let total = regions.len();

    let well = regions
        .into_iter()
        .find(|r| r.area as f64 > config.min_area && r.eccentricity < config.max_eccentricity)
        .ok_or_else(|| {
            ReaderError::NoWellFound(format!(
                "none of {total} components has area > {} and eccentricity < {}",
                config.min_area, config.max_eccentricity
            ))
        })?;

    debug!(total, label = well.label, area = well.area, "well component selected");
    Ok(WellBorder {
        center: well.centroid,
        radius: (well.major_axis_length + well.minor_axis_length) / 4.0,
        mask: place_footprint(&well, mask.dim()),
    })
}

/// Expand a region's footprint back into a full-size mask
fn place_footprint(region: &RegionProps, shape: (usize, usize)) -> BinaryMask {
    let mut full = Array2::from_elem(shape, false);
    let (height, width) = region.footprint.dim();
    let (row0, col0) = (region.bbox.min_row, region.bbox.min_col);
    full.slice_mut(s![row0..row0 + height, col0..col0 + width])
        .zip_mut_with(&region.footprint, |dst, &src| *dst = src);
    full
}

fn hough_well(mask: &ArrayView2<bool>, radii: &[f64]) -> Result<WellBorder> {
    if radii.is_empty() {
        return Err(ReaderError::InvalidArgument(
            "Hough detection needs at least one candidate radius".to_string(),
        ));
    }

    let interior = erode(mask, &StructuringElement::disk(1));
    let edges: Vec<(usize, usize)> = mask
        .indexed_iter()
        .filter(|&(idx, &v)| v && !interior[idx])
        .map(|(idx, _)| idx)
        .collect();
    if edges.is_empty() {
        return Err(ReaderError::NoWellFound(
            "binarized image has no edge pixels".to_string(),
        ));
    }

    let (height, width) = mask.dim();
    let mut best: Option<(f64, usize, usize, f64)> = None;

    for &radius in radii.iter().filter(|r| **r > 0.0) {
        let accumulator = hough_votes(&edges, (height, width), radius);
        // Normalize by circumference so large radii are not favoured
        let circumference = 2.0 * std::f64::consts::PI * radius;
        for ((row, col), &votes) in accumulator.indexed_iter() {
            let score = votes / circumference;
            if best.map_or(true, |(s, ..)| score > s) {
                best = Some((score, row, col, radius));
            }
        }
    }

    let (score, row, col, radius) = best.ok_or_else(|| {
        ReaderError::InvalidArgument("Hough radii must be positive".to_string())
    })?;
    debug!(score, radius, edges = edges.len(), "Hough peak");

    let center = Vector2::new(col as f64, row as f64);
    let mask = Array2::from_shape_fn((height, width), |(r, c)| {
        let dx = c as f64 - center.x;
        let dy = r as f64 - center.y;
        dx * dx + dy * dy <= radius * radius
    });

    Ok(WellBorder {
        center,
        radius,
        mask,
    })
}

/// Each edge pixel votes once for every center at distance `radius`
fn hough_votes(edges: &[(usize, usize)], shape: (usize, usize), radius: f64) -> Array2<f64> {
    let (height, width) = shape;
    let mut accumulator = Array2::<f64>::zeros(shape);

    let steps = (2.0 * std::f64::consts::PI * radius).ceil().max(8.0) as usize;
    let offsets: Vec<(isize, isize)> = {
        let mut offsets: Vec<(isize, isize)> = (0..steps)
            .map(|i| {
                let theta = 2.0 * std::f64::consts::PI * i as f64 / steps as f64;
                (
                    (radius * theta.sin()).round() as isize,
                    (radius * theta.cos()).round() as isize,
                )
            })
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        offsets
    };

    for &(row, col) in edges {
        for &(dr, dc) in &offsets {
            let r = row as isize + dr;
            let c = col as isize + dc;
            if r >= 0 && c >= 0 && (r as usize) < height && (c as usize) < width {
                accumulator[[r as usize, c as usize]] += 1.0;
            }
        }
    }
    accumulator
}

/// Cut the square window `[c - (radius - border), c + (radius - border)]`
/// around `center`, clipped to the image.
///
/// # Errors
/// `InvalidCrop` when `border >= radius` or the window misses the image.
pub fn crop_well(
    image: &GrayscaleImage,
    center: &Vector2<f64>,
    radius: f64,
    border: f64,
) -> Result<Crop> {
    if border >= radius {
        return Err(ReaderError::InvalidCrop {
            reason: format!("border {border} must be smaller than radius {radius}"),
        });
    }

    let half = (radius - border).round() as isize;
    let (height, width) = image.shape();
    let cx = center.x.round() as isize;
    let cy = center.y.round() as isize;

    let row_lo = (cy - half).max(0) as usize;
    let row_hi = (cy + half).min(height as isize).max(0) as usize;
    let col_lo = (cx - half).max(0) as usize;
    let col_hi = (cx + half).min(width as isize).max(0) as usize;

    if row_lo >= row_hi || col_lo >= col_hi {
        return Err(ReaderError::InvalidCrop {
            reason: format!(
                "window around ({cx}, {cy}) with half side {half} lies outside a {width}x{height} image"
            ),
        });
    }

    let data = image.data.slice(s![row_lo..row_hi, col_lo..col_hi]).to_owned();
    Ok(Crop {
        image: GrayscaleImage::new(data, image.pixel_size)?,
        row_offset: row_lo,
        col_offset: col_lo,
    })
}
