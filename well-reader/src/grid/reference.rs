//! Idealized grid coordinates and the block mask built from them.

use nalgebra::Vector2;
use ndarray::{s, Array2};

use crate::error::{ReaderError, Result};
use crate::grid::spec::GridSpec;
use crate::image_proc::image::BinaryMask;

/// Block side relative to the spot width when neighbouring blocks have room
const BLOCK_OVERSIZE: f64 = 1.3;

/// Row-major grid of `rows x cols` points centered on `center`, with x
/// varying fastest.
pub fn pitched_reference_grid(
    center: &Vector2<f64>,
    rows: usize,
    cols: usize,
    h_pitch: f64,
    v_pitch: f64,
) -> Vec<Vector2<f64>> {
    let start_x = center.x - h_pitch * (cols as f64 - 1.0) / 2.0;
    let start_y = center.y - v_pitch * (rows as f64 - 1.0) / 2.0;

    (0..rows)
        .flat_map(|row| {
            (0..cols).map(move |col| {
                Vector2::new(start_x + col as f64 * h_pitch, start_y + row as f64 * v_pitch)
            })
        })
        .collect()
}

/// Square reference grid with one spacing on both axes
pub fn create_reference_grid(
    center: &Vector2<f64>,
    rows: usize,
    cols: usize,
    spacing: f64,
) -> Vec<Vector2<f64>> {
    pitched_reference_grid(center, rows, cols, spacing, spacing)
}

/// Full reference grid for `spec` at its pixel pitches, centered on `center`
pub fn spec_reference_grid(spec: &GridSpec, center: &Vector2<f64>) -> Vec<Vector2<f64>> {
    pitched_reference_grid(
        center,
        spec.rows,
        spec.columns,
        spec.h_pitch_px(),
        spec.v_pitch_px(),
    )
}

/// Expected positions of the fiducial cells `(row, col)` when the grid is
/// centered on `center`.
///
/// # Errors
/// `InvalidArgument` for an empty list or a cell outside the grid.
pub fn fiducial_reference_coords(
    spec: &GridSpec,
    fiducials: &[(usize, usize)],
    center: &Vector2<f64>,
) -> Result<Vec<Vector2<f64>>> {
    if fiducials.is_empty() {
        return Err(ReaderError::InvalidArgument(
            "at least one fiducial is required".to_string(),
        ));
    }
    if let Some(&(row, col)) = fiducials
        .iter()
        .find(|&&(row, col)| row >= spec.rows || col >= spec.columns)
    {
        return Err(ReaderError::InvalidArgument(format!(
            "fiducial ({row}, {col}) lies outside a {}x{} grid",
            spec.rows, spec.columns
        )));
    }

    let grid = spec_reference_grid(spec, center);
    Ok(fiducials
        .iter()
        .map(|&(row, col)| grid[row * spec.columns + col])
        .collect())
}

/// Side of the square block drawn around each expected spot (pixels).
///
/// 1.3 spot widths, unless that would make neighbouring blocks touch.
pub fn block_side(spec: &GridSpec) -> f64 {
    let spot = spec.spot_width_px();
    let grown = BLOCK_OVERSIZE * spot;
    if grown < spec.v_pitch_px() - 1.0 && grown < spec.h_pitch_px() - 1.0 {
        grown
    } else {
        spot
    }
}

/// Mask of `side x side` squares centered on each point of `centers`,
/// clipped to `shape`.
pub fn block_mask(shape: (usize, usize), centers: &[Vector2<f64>], side: f64) -> BinaryMask {
    let (height, width) = shape;
    let mut mask = Array2::from_elem(shape, false);
    let half = side / 2.0;

    for c in centers {
        let row_lo = (c.y - half).max(0.0) as usize;
        let row_hi = ((c.y + half).max(0.0) as usize).min(height);
        let col_lo = (c.x - half).max(0.0) as usize;
        let col_hi = ((c.x + half).max(0.0) as usize).min(width);
        if row_lo < row_hi && col_lo < col_hi {
            mask.slice_mut(s![row_lo..row_hi, col_lo..col_hi]).fill(true);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_grid_is_row_major() {
        let grid = create_reference_grid(&Vector2::new(100.0, 50.0), 2, 3, 10.0);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0], Vector2::new(90.0, 45.0));
        assert_eq!(grid[1], Vector2::new(100.0, 45.0));
        assert_eq!(grid[3], Vector2::new(90.0, 55.0));

        let centroid = grid.iter().sum::<Vector2<f64>>() / grid.len() as f64;
        assert_relative_eq!(centroid, Vector2::new(100.0, 50.0), epsilon = 1e-12);
    }

    #[test]
    fn test_fiducials_follow_pitches() {
        let spec = GridSpec::new(4, 6, 0.5, 0.4, 0.2, 0.005).unwrap();
        let center = Vector2::new(400.0, 300.0);
        let coords = fiducial_reference_coords(&spec, &[(0, 0), (3, 5)], &center).unwrap();

        // h pitch 80 px, v pitch 100 px
        assert_relative_eq!(coords[0], Vector2::new(200.0, 150.0), epsilon = 1e-9);
        assert_relative_eq!(coords[1], Vector2::new(600.0, 450.0), epsilon = 1e-9);
    }

    #[test]
    fn test_fiducial_outside_grid() {
        let spec = GridSpec::new(4, 6, 0.5, 0.4, 0.2, 0.005).unwrap();
        let center = Vector2::new(400.0, 300.0);
        assert!(fiducial_reference_coords(&spec, &[(4, 0)], &center).is_err());
        assert!(fiducial_reference_coords(&spec, &[], &center).is_err());
    }

    #[test]
    fn test_spec_grid_follows_center() {
        let spec = GridSpec::new(4, 6, 0.5, 0.4, 0.2, 0.005).unwrap();
        let grid = spec_reference_grid(&spec, &Vector2::new(435.0, 290.0));

        assert_eq!(grid.len(), 24);
        let centroid = grid.iter().sum::<Vector2<f64>>() / grid.len() as f64;
        assert_relative_eq!(centroid, Vector2::new(435.0, 290.0), epsilon = 1e-9);
        assert_relative_eq!(grid[1].x - grid[0].x, 80.0, epsilon = 1e-9);
        assert_relative_eq!(grid[6].y - grid[0].y, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_block_side_shrinks_when_crowded() {
        let roomy = GridSpec::new(6, 6, 0.4, 0.4, 0.2, 0.005).unwrap();
        assert_relative_eq!(block_side(&roomy), 52.0, epsilon = 1e-9);

        // 1.3 x 62 px would overrun a 80 px pitch minus one
        let crowded = GridSpec::new(6, 6, 0.4, 0.4, 0.31, 0.005).unwrap();
        assert_relative_eq!(block_side(&crowded), 62.0, epsilon = 1e-9);
    }

    #[test]
    fn test_block_mask_squares() {
        let mask = block_mask((50, 50), &[Vector2::new(10.0, 10.0), Vector2::new(48.0, 30.0)], 6.0);

        assert!(mask[[10, 10]] && mask[[7, 7]] && mask[[12, 12]]);
        assert!(!mask[[13, 10]]);
        assert_eq!(mask.slice(s![7..13, 7..13]).iter().filter(|&&v| v).count(), 36);
        // Clipped at the right edge
        assert!(mask[[30, 49]]);
        assert_eq!(mask.iter().filter(|&&v| v).count(), 36 + 6 * 5);
    }
}
