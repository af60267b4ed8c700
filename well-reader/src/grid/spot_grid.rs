//! Rows x columns container of assigned spot regions.

use nalgebra::Vector2;
use ndarray::{Array2, ArrayView2};

use crate::image_proc::detection::aabb::AABB;
use crate::image_proc::detection::regions::RegionProps;

/// Fields the assignment and OD stages read from a region, whatever its
/// provenance.
pub trait SpotMeasurement {
    /// (x, y) position used for assignment
    fn position(&self) -> Vector2<f64>;

    fn area(&self) -> usize;

    fn mean_intensity(&self) -> f64;

    fn bbox(&self) -> AABB;

    /// Intensity under [`SpotMeasurement::bbox`]
    fn intensity_patch(&self) -> ArrayView2<'_, f64>;

    /// Pixels of the region within [`SpotMeasurement::bbox`]
    fn footprint(&self) -> ArrayView2<'_, bool>;
}

impl SpotMeasurement for RegionProps {
    fn position(&self) -> Vector2<f64> {
        self.weighted_centroid
    }

    fn area(&self) -> usize {
        self.area
    }

    fn mean_intensity(&self) -> f64 {
        self.mean_intensity
    }

    fn bbox(&self) -> AABB {
        self.bbox
    }

    fn intensity_patch(&self) -> ArrayView2<'_, f64> {
        self.intensity_patch.view()
    }

    fn footprint(&self) -> ArrayView2<'_, bool> {
        self.footprint.view()
    }
}

/// Placeholder for a cell where no spot was detected.
///
/// The patch is the square window of the source image around the
/// expected position; every pixel of it counts as the region.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedRegion {
    pub centroid: Vector2<f64>,
    pub bbox: AABB,
    pub intensity_patch: Array2<f64>,
    pub footprint: Array2<bool>,
    /// NaN when the window fell outside the image
    pub mean_intensity: f64,
}

impl SpotMeasurement for SynthesizedRegion {
    fn position(&self) -> Vector2<f64> {
        self.centroid
    }

    fn area(&self) -> usize {
        self.intensity_patch.len()
    }

    fn mean_intensity(&self) -> f64 {
        self.mean_intensity
    }

    fn bbox(&self) -> AABB {
        self.bbox
    }

    fn intensity_patch(&self) -> ArrayView2<'_, f64> {
        self.intensity_patch.view()
    }

    fn footprint(&self) -> ArrayView2<'_, bool> {
        self.footprint.view()
    }
}

/// A grid cell's region, detected in the image or synthesized in its absence
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Detected(RegionProps),
    Synthesized(SynthesizedRegion),
}

impl Region {
    pub fn is_synthesized(&self) -> bool {
        matches!(self, Region::Synthesized(_))
    }

    fn inner(&self) -> &dyn SpotMeasurement {
        match self {
            Region::Detected(r) => r,
            Region::Synthesized(r) => r,
        }
    }
}

impl SpotMeasurement for Region {
    fn position(&self) -> Vector2<f64> {
        self.inner().position()
    }

    fn area(&self) -> usize {
        self.inner().area()
    }

    fn mean_intensity(&self) -> f64 {
        self.inner().mean_intensity()
    }

    fn bbox(&self) -> AABB {
        self.inner().bbox()
    }

    fn intensity_patch(&self) -> ArrayView2<'_, f64> {
        self.inner().intensity_patch()
    }

    fn footprint(&self) -> ArrayView2<'_, bool> {
        self.inner().footprint()
    }
}

/// Regions laid out by print position; `None` marks an unfilled cell.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotGrid {
    rows: usize,
    cols: usize,
    cells: Vec<Option<Region>>,
}

impl SpotGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![None; rows * cols],
        }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Region> {
        self.index(row, col).and_then(|i| self.cells[i].as_ref())
    }

    /// Store `region` at (row, col), returning what was there.
    ///
    /// Out-of-range cells are ignored.
    pub fn set(&mut self, row: usize, col: usize, region: Region) -> Option<Region> {
        let i = self.index(row, col)?;
        self.cells[i].replace(region)
    }

    /// Filled cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), &Region)> + '_ {
        let cols = self.cols;
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(i, cell)| cell.as_ref().map(|r| ((i / cols, i % cols), r)))
    }

    /// Unfilled cells in row-major order
    pub fn missing(&self) -> Vec<(usize, usize)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_none())
            .map(|(i, _)| (i / self.cols, i % self.cols))
            .collect()
    }

    pub fn filled_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn synthesized_count(&self) -> usize {
        self.iter().filter(|(_, r)| r.is_synthesized()).count()
    }

    /// Mean intensity per cell, NaN where the cell is empty
    pub fn mean_intensities(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.rows, self.cols), |(row, col)| {
            self.get(row, col)
                .map_or(f64::NAN, |region| region.mean_intensity())
        })
    }

    fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }
}
