//! Synthetic well images for validating the processing stages
//!
//! Provides bright well disks and regular arrays of dark printed spots,
//! with optional missing cells and a geometric distortion of the print.

use nalgebra::Vector2;
use ndarray::Array2;
use plate_math::Transform2d;

/// Intensity of the well floor between spots
pub const WELL_LEVEL: f64 = 0.8;

/// Intensity inside a printed spot
pub const SPOT_LEVEL: f64 = 0.2;

/// Generate a filled disk on a flat background
///
/// # Arguments
/// * `shape` - (height, width) of the image
/// * `center` - Disk center as (x, y)
/// * `radius` - Disk radius in pixels
/// * `inside` - Value inside the disk
/// * `outside` - Value outside the disk
pub fn light_disk(
    shape: (usize, usize),
    center: Vector2<f64>,
    radius: f64,
    inside: f64,
    outside: f64,
) -> Array2<f64> {
    Array2::from_shape_fn(shape, |(row, col)| {
        let dx = col as f64 - center.x;
        let dy = row as f64 - center.y;
        if dx * dx + dy * dy <= radius * radius {
            inside
        } else {
            outside
        }
    })
}

/// Synthetic spot array and the ground-truth position of every cell
#[derive(Debug, Clone)]
pub struct SpotPattern {
    pub image: Array2<f64>,
    /// Row-major (x, y) position of each cell, printed or not
    pub centers: Vec<Vector2<f64>>,
}

/// Dark disks on a light background, laid out on a regular grid centered in
/// the image. Cells listed in `omitted` as (row, col) are left unprinted.
pub fn dark_spot_array(
    shape: (usize, usize),
    rows: usize,
    cols: usize,
    pitch: f64,
    spot_radius: f64,
    omitted: &[(usize, usize)],
) -> SpotPattern {
    dark_spot_array_with(
        shape,
        rows,
        cols,
        pitch,
        spot_radius,
        omitted,
        &Transform2d::identity(),
    )
}

/// Like [`dark_spot_array`], with every grid position moved by `distortion`
pub fn dark_spot_array_with(
    shape: (usize, usize),
    rows: usize,
    cols: usize,
    pitch: f64,
    spot_radius: f64,
    omitted: &[(usize, usize)],
    distortion: &Transform2d,
) -> SpotPattern {
    let (height, width) = shape;
    let center = Vector2::new(width as f64 / 2.0, height as f64 / 2.0);

    let mut centers = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let ideal = center
                + Vector2::new(
                    (col as f64 - (cols as f64 - 1.0) / 2.0) * pitch,
                    (row as f64 - (rows as f64 - 1.0) / 2.0) * pitch,
                );
            centers.push(distortion.apply(&ideal));
        }
    }

    let mut image = Array2::from_elem(shape, WELL_LEVEL);
    let r2 = spot_radius * spot_radius;
    for (i, c) in centers.iter().enumerate() {
        if omitted.contains(&(i / cols, i % cols)) {
            continue;
        }
        let row_lo = (c.y - spot_radius).floor().max(0.0) as usize;
        let row_hi = ((c.y + spot_radius).ceil() as usize).min(height.saturating_sub(1));
        let col_lo = (c.x - spot_radius).floor().max(0.0) as usize;
        let col_hi = ((c.x + spot_radius).ceil() as usize).min(width.saturating_sub(1));
        for row in row_lo..=row_hi {
            for col in col_lo..=col_hi {
                let dx = col as f64 - c.x;
                let dy = row as f64 - c.y;
                if dx * dx + dy * dy <= r2 {
                    image[[row, col]] = SPOT_LEVEL;
                }
            }
        }
    }

    SpotPattern { image, centers }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_disk_area() {
        let disk = light_disk((101, 101), Vector2::new(50.0, 50.0), 30.0, 1.0, 0.0);
        let area = disk.iter().filter(|&&v| v > 0.5).count() as f64;
        let expected = std::f64::consts::PI * 900.0;
        assert!((area - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_spot_array_layout() {
        let pattern = dark_spot_array((200, 300), 2, 3, 60.0, 5.0, &[(1, 2)]);

        assert_eq!(pattern.centers.len(), 6);
        assert_eq!(pattern.centers[0], Vector2::new(90.0, 70.0));
        assert_eq!(pattern.image[[70, 90]], SPOT_LEVEL);
        // The omitted cell stays unprinted
        assert_eq!(pattern.image[[130, 210]], WELL_LEVEL);
    }
}
