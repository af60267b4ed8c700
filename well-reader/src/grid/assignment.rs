//! Mapping detected regions onto print positions.
//!
//! Two assigners share the same collision and synthesis rules:
//!
//! - [`assign_regions`] needs no registration. It rescales region centroids
//!   from their observed extent onto the cells of a [`GridSpec`] and rounds
//!   to the nearest cell. Boundary outliers are trimmed from the extent
//!   using nearest-neighbour distances before rescaling.
//! - [`assign_to_registered_grid`] takes the expected cell positions from a
//!   registration and assigns each region to the nearest one within a
//!   distance limit.
//!
//! Cells left empty get a [`SynthesizedRegion`] cut from the image at the
//! cell's expected position.

use nalgebra::Vector2;
use ndarray::{s, ArrayView2};
use plate_math::{median, nearest_neighbor_distances, std_dev, NearestNeighbors};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ReaderError, Result};
use crate::grid::spec::GridSpec;
use crate::grid::spot_grid::{Region, SpotGrid, SpotMeasurement, SynthesizedRegion};
use crate::image_proc::detection::aabb::AABB;
use crate::image_proc::detection::regions::RegionProps;

/// What happens when two regions land on one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The region with the higher mean intensity keeps the cell
    BrightestWins,
    /// Fail with `DuplicateAssignment`
    Strict,
}

impl Default for CollisionPolicy {
    fn default() -> Self {
        CollisionPolicy::BrightestWins
    }
}

/// Side of the window cut for a synthesized region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchSizing {
    /// Square root of the mean bounding-box area of the assigned regions
    MeanBoundingBox,
    Fixed { side: f64 },
}

impl Default for PatchSizing {
    fn default() -> Self {
        PatchSizing::MeanBoundingBox
    }
}

/// Tunables shared by both assigners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignerConfig {
    /// Regions must be strictly larger than this (pixels)
    pub min_area: usize,
    /// Extent trimming only runs with at least this many regions
    pub nn_filter_min_regions: usize,
    /// Half-width of the accepted band around the median NN distance, in
    /// standard deviations
    pub nn_std_factor: f64,
    /// Trimming is skipped unless the band is wider than this (pixels)
    pub nn_noise_floor: f64,
    pub collision: CollisionPolicy,
    pub patch_sizing: PatchSizing,
}

impl Default for AssignerConfig {
    fn default() -> Self {
        Self {
            min_area: 100,
            nn_filter_min_regions: 10,
            nn_std_factor: 0.8,
            nn_noise_floor: 5.0,
            collision: CollisionPolicy::BrightestWins,
            patch_sizing: PatchSizing::MeanBoundingBox,
        }
    }
}

/// Observed span of the grid, corner cell centers inclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridExtent {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// Position of `index` within `count` evenly spaced slots over `[lo, hi]`
fn interpolate(lo: f64, hi: f64, index: usize, count: usize) -> f64 {
    if count <= 1 {
        (lo + hi) / 2.0
    } else {
        lo + (hi - lo) * index as f64 / (count - 1) as f64
    }
}

/// Nearest slot of `value` among `count` slots over `[lo, hi]`
fn slot(value: f64, lo: f64, hi: f64, count: usize) -> Option<usize> {
    let range = hi - lo;
    if count <= 1 || range <= f64::EPSILON {
        return Some(0);
    }
    let index = ((value - lo) / range * (count - 1) as f64).round();
    (index >= 0.0 && index <= (count - 1) as f64).then_some(index as usize)
}

impl GridExtent {
    /// Cell (row, col) nearest `point`, `None` outside the extent
    pub fn cell_of(&self, point: &Vector2<f64>, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let row = slot(point.y, self.y_min, self.y_max, rows)?;
        let col = slot(point.x, self.x_min, self.x_max, cols)?;
        Some((row, col))
    }

    /// Linearly interpolated (x, y) of cell (row, col)
    pub fn position_of(&self, row: usize, col: usize, rows: usize, cols: usize) -> Vector2<f64> {
        Vector2::new(
            interpolate(self.x_min, self.x_max, col, cols),
            interpolate(self.y_min, self.y_max, row, rows),
        )
    }
}

/// First and last entry of `order` accepted by `inlier`
fn inlier_bounds(order: &[usize], inlier: impl Fn(usize) -> bool) -> Option<(usize, usize)> {
    let first = order.iter().copied().find(|&i| inlier(i))?;
    let last = order.iter().rev().copied().find(|&i| inlier(i))?;
    Some((first, last))
}

/// Extent of `points`, with boundary outliers trimmed.
///
/// With at least `nn_filter_min_regions` points, each axis end moves inward
/// past points whose nearest-neighbour distance lies outside
/// `median ± nn_std_factor * std`, provided that band exceeds the noise floor.
pub fn grid_extent(points: &[Vector2<f64>], config: &AssignerConfig) -> Option<GridExtent> {
    if points.is_empty() {
        return None;
    }

    let fold = |f: fn(&Vector2<f64>) -> f64| {
        points.iter().map(f).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
    };
    let (mut x_min, mut x_max) = fold(|p| p.x);
    let (mut y_min, mut y_max) = fold(|p| p.y);

    if points.len() >= config.nn_filter_min_regions {
        let dist = nearest_neighbor_distances(points);
        let band = config.nn_std_factor * std_dev(&dist);
        if let Ok(med) = median(&dist) {
            if band > config.nn_noise_floor {
                let inlier = |i: usize| (dist[i] - med).abs() <= band;

                let mut by_x: Vec<usize> = (0..points.len()).collect();
                by_x.sort_by(|&a, &b| points[a].x.total_cmp(&points[b].x));
                let mut by_y = by_x.clone();
                by_y.sort_by(|&a, &b| points[a].y.total_cmp(&points[b].y));

                if let Some((lo, hi)) = inlier_bounds(&by_x, inlier) {
                    x_min = points[lo].x;
                    x_max = points[hi].x;
                }
                if let Some((lo, hi)) = inlier_bounds(&by_y, inlier) {
                    y_min = points[lo].y;
                    y_max = points[hi].y;
                }
                debug!(median = med, band, "grid extent trimmed by NN distance");
            }
        }
    }

    Some(GridExtent {
        x_min,
        x_max,
        y_min,
        y_max,
    })
}

/// Window side for synthesized regions; 0 when sizing by mean bbox with
/// nothing to measure.
pub fn patch_side(regions: &[RegionProps], sizing: &PatchSizing) -> f64 {
    match *sizing {
        PatchSizing::Fixed { side } => side,
        PatchSizing::MeanBoundingBox => {
            if regions.is_empty() {
                return 0.0;
            }
            let mean_area =
                regions.iter().map(|r| r.bbox_area() as f64).sum::<f64>() / regions.len() as f64;
            mean_area.sqrt()
        }
    }
}

/// Cut a `side`-wide window of `image` around `position` as a placeholder.
pub fn synthesize_region(
    image: &ArrayView2<f64>,
    position: &Vector2<f64>,
    side: f64,
) -> SynthesizedRegion {
    let (height, width) = image.dim();
    let half = (side / 2.0) as isize;
    let cx = position.x.round() as isize;
    let cy = position.y.round() as isize;

    let clip = |v: isize, len: usize| v.clamp(0, len as isize) as usize;
    let (row_lo, row_hi) = (clip(cy - half, height), clip(cy + half, height));
    let (col_lo, col_hi) = (clip(cx - half, width), clip(cx + half, width));

    let patch = image.slice(s![row_lo..row_hi, col_lo..col_hi]).to_owned();
    let bbox = if patch.is_empty() {
        AABB::new()
    } else {
        AABB::from_coords(row_lo, col_lo, row_hi - 1, col_hi - 1)
    };

    SynthesizedRegion {
        centroid: *position,
        bbox,
        mean_intensity: patch.mean().unwrap_or(f64::NAN),
        footprint: patch.mapv(|_| true),
        intensity_patch: patch,
    }
}

/// Put `region` in its cell under `policy`. Returns true on a collision.
fn place(
    grid: &mut SpotGrid,
    (row, col): (usize, usize),
    region: Region,
    policy: CollisionPolicy,
) -> Result<bool> {
    let replace = match grid.get(row, col) {
        None => true,
        Some(existing) => match policy {
            CollisionPolicy::Strict => {
                return Err(ReaderError::DuplicateAssignment { row, col });
            }
            CollisionPolicy::BrightestWins => region.mean_intensity() > existing.mean_intensity(),
        },
    };
    let collided = grid.get(row, col).is_some();
    if replace {
        grid.set(row, col, region);
    }
    Ok(collided)
}

fn fill_missing(
    grid: &mut SpotGrid,
    image: &ArrayView2<f64>,
    side: f64,
    position_of: impl Fn(usize, usize) -> Vector2<f64>,
) -> usize {
    let missing = grid.missing();
    for &(row, col) in &missing {
        let region = synthesize_region(image, &position_of(row, col), side);
        grid.set(row, col, Region::Synthesized(region));
    }
    missing.len()
}

fn large_enough(regions: Vec<RegionProps>, min_area: usize) -> Vec<RegionProps> {
    regions.into_iter().filter(|r| r.area > min_area).collect()
}

/// Assign regions to cells by rescaling their centroids onto the grid.
///
/// # Errors
/// * `InvalidArgument` - An empty grid, or no region above `min_area`
/// * `DuplicateAssignment` - A collision under [`CollisionPolicy::Strict`]
pub fn assign_regions(
    regions: Vec<RegionProps>,
    image: &ArrayView2<f64>,
    spec: &GridSpec,
    config: &AssignerConfig,
) -> Result<SpotGrid> {
    let (rows, cols) = (spec.rows, spec.columns);
    if rows == 0 || cols == 0 {
        return Err(ReaderError::InvalidArgument(format!(
            "cannot assign onto a {rows}x{cols} grid"
        )));
    }
    let kept = large_enough(regions, config.min_area);
    let points: Vec<Vector2<f64>> = kept.iter().map(|r| r.position()).collect();
    let extent = grid_extent(&points, config).ok_or_else(|| {
        ReaderError::InvalidArgument(format!("no region larger than {} pixels", config.min_area))
    })?;
    let side = patch_side(&kept, &config.patch_sizing);

    let mut grid = SpotGrid::new(rows, cols);
    let (mut collisions, mut outside) = (0, 0);
    for region in kept {
        match extent.cell_of(&region.position(), rows, cols) {
            Some(cell) => {
                if place(&mut grid, cell, Region::Detected(region), config.collision)? {
                    collisions += 1;
                }
            }
            None => outside += 1,
        }
    }

    let synthesized = fill_missing(&mut grid, image, side, |row, col| {
        extent.position_of(row, col, rows, cols)
    });
    info!(
        detected = rows * cols - synthesized,
        synthesized, collisions, outside, "regions assigned by extent"
    );
    Ok(grid)
}

/// Assign regions to the nearest expected cell position.
///
/// `expected` holds one row-major position per cell of `spec`. Regions
/// farther than `max_distance` from every cell are dropped.
///
/// # Errors
/// * `InvalidArgument` - `expected` does not have one entry per cell
/// * `DuplicateAssignment` - A collision under [`CollisionPolicy::Strict`]
pub fn assign_to_registered_grid(
    regions: Vec<RegionProps>,
    image: &ArrayView2<f64>,
    expected: &[Vector2<f64>],
    spec: &GridSpec,
    max_distance: f64,
    config: &AssignerConfig,
) -> Result<SpotGrid> {
    let (rows, cols) = (spec.rows, spec.columns);
    if rows == 0 || cols == 0 || expected.len() != rows * cols {
        return Err(ReaderError::InvalidArgument(format!(
            "{} expected positions for a {rows}x{cols} grid",
            expected.len()
        )));
    }
    let kept = large_enough(regions, config.min_area);
    let side = patch_side(&kept, &config.patch_sizing);
    let index = NearestNeighbors::train(expected);

    let mut grid = SpotGrid::new(rows, cols);
    let (mut collisions, mut outside) = (0, 0);
    for region in kept {
        match index.nearest(&region.position()) {
            Some(n) if n.distance <= max_distance => {
                let cell = (n.index / cols, n.index % cols);
                if place(&mut grid, cell, Region::Detected(region), config.collision)? {
                    collisions += 1;
                }
            }
            _ => outside += 1,
        }
    }

    let synthesized = fill_missing(&mut grid, image, side, |row, col| expected[row * cols + col]);
    info!(
        detected = rows * cols - synthesized,
        synthesized, collisions, outside, "regions assigned to registered grid"
    );
    Ok(grid)
}
