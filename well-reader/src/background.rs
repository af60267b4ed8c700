//! Local background around each spot and the optical density it yields.
//!
//! The background of a spot is a ring a few pixels outside its edge. Rings
//! are built per spot and are not masked against neighbouring spots, so
//! touching or comet-shaped spots can leak into each other's background.

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReaderError, Result};
use crate::grid::spot_grid::{Region, SpotGrid, SpotMeasurement};
use crate::image_proc::detection::aabb::AABB;
use crate::image_proc::detection::regions::RegionProps;
use crate::image_proc::image::BinaryMask;
use crate::image_proc::morphology::{dilate, StructuringElement};

/// Ring geometry, in pixels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Gap between the spot edge and the ring
    pub distance: usize,
    /// Ring width
    pub annulus: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            distance: 3,
            annulus: 5,
        }
    }
}

/// `dilate(mask, disk(distance + annulus)) XOR dilate(mask, disk(distance))`
pub fn background_annulus(mask: &ArrayView2<bool>, distance: usize, annulus: usize) -> BinaryMask {
    let inner = dilate(mask, &StructuringElement::disk(distance));
    let outer = dilate(mask, &StructuringElement::disk(distance + annulus));
    Array2::from_shape_fn(mask.dim(), |idx| outer[idx] ^ inner[idx])
}

/// Background ring of one region, measured against `image`
fn ring_region(
    label: usize,
    region: &Region,
    image: &ArrayView2<f64>,
    config: &BackgroundConfig,
) -> Result<Option<RegionProps>> {
    let bbox = region.bbox();
    if !bbox.is_valid() {
        return Ok(None);
    }

    let (height, width) = image.dim();
    let pad = config.distance + config.annulus;
    let row_lo = bbox.min_row.saturating_sub(pad);
    let col_lo = bbox.min_col.saturating_sub(pad);
    let row_hi = (bbox.max_row + pad + 1).min(height);
    let col_hi = (bbox.max_col + pad + 1).min(width);
    if row_lo >= row_hi || col_lo >= col_hi {
        return Ok(None);
    }

    let footprint = region.footprint();
    let mut local = Array2::from_elem((row_hi - row_lo, col_hi - col_lo), false);
    for ((r, c), &inside) in footprint.indexed_iter() {
        let (row, col) = (bbox.min_row + r - row_lo, bbox.min_col + c - col_lo);
        if inside && row < local.nrows() && col < local.ncols() {
            local[[row, col]] = true;
        }
    }

    let ring = background_annulus(&local.view(), config.distance, config.annulus);
    let extent = AABB::of_mask(&ring.view());
    if !extent.is_valid() {
        return Ok(None);
    }

    let trimmed = ring
        .slice(s![
            extent.min_row..=extent.max_row,
            extent.min_col..=extent.max_col
        ])
        .to_owned();
    RegionProps::from_footprint(
        label,
        trimmed,
        (row_lo + extent.min_row, col_lo + extent.min_col),
        Some(image),
    )
    .map(Some)
}

/// Background region for every filled cell of `spots`.
///
/// Cells whose region has no usable pixels stay empty.
///
/// # Errors
/// `ShapeMismatch` when a spot lies outside `image`.
pub fn background_grid(
    spots: &SpotGrid,
    image: &ArrayView2<f64>,
    config: &BackgroundConfig,
) -> Result<SpotGrid> {
    let (rows, cols) = spots.shape();
    let mut background = SpotGrid::new(rows, cols);

    for ((row, col), region) in spots.iter() {
        let label = row * cols + col + 1;
        if let Some(ring) = ring_region(label, region, image, config)? {
            background.set(row, col, Region::Detected(ring));
        }
    }

    debug!(
        spots = spots.filled_count(),
        rings = background.filled_count(),
        "background rings measured"
    );
    Ok(background)
}

/// Optical density and the intensities it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct OdResult {
    /// `background / spot` per cell
    pub od: Array2<f64>,
    pub spot_intensity: Array2<f64>,
    pub background_intensity: Array2<f64>,
}

/// Elementwise `background / spot` mean intensities.
///
/// Cells without a spot, and spots with zero or non-finite intensity, give
/// NaN. Background is only reported where a spot exists.
///
/// # Errors
/// `ShapeMismatch` when the grids differ in shape.
pub fn compute_od(spots: &SpotGrid, background: &SpotGrid) -> Result<OdResult> {
    if spots.shape() != background.shape() {
        return Err(ReaderError::ShapeMismatch {
            left: spots.shape(),
            right: background.shape(),
        });
    }

    let spot_intensity = spots.mean_intensities();
    let background_intensity = Array2::from_shape_fn(spots.shape(), |(row, col)| {
        match (spots.get(row, col), background.get(row, col)) {
            (Some(_), Some(bg)) => bg.mean_intensity(),
            _ => f64::NAN,
        }
    });

    let od = Array2::from_shape_fn(spots.shape(), |idx| {
        let spot = spot_intensity[idx];
        if spot.is_finite() && spot != 0.0 {
            background_intensity[idx] / spot
        } else {
            f64::NAN
        }
    });

    Ok(OdResult {
        od,
        spot_intensity,
        background_intensity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::spot_grid::SynthesizedRegion;
    use crate::image_proc::detection::regions::extract_regions;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn flat(value: f64) -> Region {
        Region::Synthesized(SynthesizedRegion {
            centroid: Vector2::zeros(),
            bbox: AABB::from_coords(0, 0, 0, 0),
            intensity_patch: Array2::from_elem((1, 1), value),
            footprint: Array2::from_elem((1, 1), true),
            mean_intensity: value,
        })
    }

    #[test]
    fn test_annulus_of_disk() {
        let disk = Array2::from_shape_fn((61, 61), |(row, col)| {
            let (dx, dy) = (col as f64 - 30.0, row as f64 - 30.0);
            dx * dx + dy * dy <= 100.0
        });
        let ring = background_annulus(&disk.view(), 3, 5);

        let count = |m: &BinaryMask| m.iter().filter(|&&v| v).count();
        let inner = dilate(&disk.view(), &StructuringElement::disk(3));
        let outer = dilate(&disk.view(), &StructuringElement::disk(8));
        assert_eq!(count(&ring), count(&outer) - count(&inner));
        assert!(ring.iter().zip(disk.iter()).all(|(&r, &d)| !(r && d)));
        // Roughly the area between radii 13 and 18
        let expected = std::f64::consts::PI * (18.0f64.powi(2) - 13.0f64.powi(2));
        assert!((count(&ring) as f64 - expected).abs() / expected < 0.1);
    }

    #[test]
    fn test_od_values() {
        let mut spots = SpotGrid::new(1, 3);
        let mut background = SpotGrid::new(1, 3);
        spots.set(0, 0, flat(50.0));
        background.set(0, 0, flat(100.0));
        spots.set(0, 1, flat(0.0));
        background.set(0, 1, flat(100.0));
        background.set(0, 2, flat(100.0));

        let result = compute_od(&spots, &background).unwrap();
        assert_relative_eq!(result.od[[0, 0]], 2.0);
        assert!(result.od[[0, 1]].is_nan());
        assert!(result.od[[0, 2]].is_nan());
        assert!(result.spot_intensity[[0, 2]].is_nan());
        assert!(result.background_intensity[[0, 2]].is_nan());
    }

    #[test]
    fn test_od_shape_mismatch() {
        assert!(matches!(
            compute_od(&SpotGrid::new(2, 2), &SpotGrid::new(2, 3)),
            Err(ReaderError::ShapeMismatch {
                left: (2, 2),
                right: (2, 3)
            })
        ));
    }

    #[test]
    fn test_background_ring_measures_surroundings() {
        let mut image = Array2::from_elem((60, 60), 0.8);
        let mut mask = Array2::from_elem((60, 60), false);
        image.slice_mut(s![25..35, 25..35]).fill(0.2);
        mask.slice_mut(s![25..35, 25..35]).fill(true);
        let region = extract_regions(&mask.view(), Some(&image.view()))
            .unwrap()
            .remove(0);

        let mut spots = SpotGrid::new(1, 1);
        spots.set(0, 0, Region::Detected(region));
        let background =
            background_grid(&spots, &image.view(), &BackgroundConfig::default()).unwrap();

        let ring = background.get(0, 0).unwrap();
        assert_relative_eq!(ring.mean_intensity(), 0.8, epsilon = 1e-12);
        assert_relative_eq!(ring.position(), Vector2::new(29.5, 29.5), epsilon = 1e-9);

        let od = compute_od(&spots, &background).unwrap();
        assert_relative_eq!(od.od[[0, 0]], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ring_clipped_at_image_edge() {
        let image = Array2::from_elem((20, 20), 0.5);
        let mut mask = Array2::from_elem((20, 20), false);
        mask.slice_mut(s![0..3, 0..3]).fill(true);
        let region = extract_regions(&mask.view(), Some(&image.view()))
            .unwrap()
            .remove(0);

        let mut spots = SpotGrid::new(1, 1);
        spots.set(0, 0, Region::Detected(region));
        let background =
            background_grid(&spots, &image.view(), &BackgroundConfig::default()).unwrap();
        assert!(background.get(0, 0).is_some());
    }
}
