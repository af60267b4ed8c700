//! Printed array geometry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, Result};

/// Layout of the printed spot array in one well.
///
/// Pitches and spot width are in millimetres; `pixel_size` is millimetres
/// per pixel, so the `*_px` helpers give image units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub columns: usize,
    /// Center-to-center distance between rows
    pub v_pitch: f64,
    /// Center-to-center distance between columns
    pub h_pitch: f64,
    pub spot_width: f64,
    pub pixel_size: f64,
}

impl GridSpec {
    pub fn new(
        rows: usize,
        columns: usize,
        v_pitch: f64,
        h_pitch: f64,
        spot_width: f64,
        pixel_size: f64,
    ) -> Result<Self> {
        let spec = Self {
            rows,
            columns,
            v_pitch,
            h_pitch,
            spot_width,
            pixel_size,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the invariants every stage relies on
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 {
            return Err(ReaderError::InvalidArgument(format!(
                "grid needs at least one row and column, got {}x{}",
                self.rows, self.columns
            )));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !(positive(self.v_pitch) && positive(self.h_pitch)) {
            return Err(ReaderError::InvalidArgument(format!(
                "pitches must be positive, got v={} h={}",
                self.v_pitch, self.h_pitch
            )));
        }
        if !(positive(self.spot_width) && positive(self.pixel_size)) {
            return Err(ReaderError::InvalidArgument(format!(
                "spot width and pixel size must be positive, got {} and {}",
                self.spot_width, self.pixel_size
            )));
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.columns
    }

    pub fn v_pitch_px(&self) -> f64 {
        self.v_pitch / self.pixel_size
    }

    pub fn h_pitch_px(&self) -> f64 {
        self.h_pitch / self.pixel_size
    }

    pub fn spot_width_px(&self) -> f64 {
        self.spot_width / self.pixel_size
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file and validate
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let spec: Self = serde_json::from_str(&json)?;
        spec.validate()?;
        Ok(spec)
    }
}
