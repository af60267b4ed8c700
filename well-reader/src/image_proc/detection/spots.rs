//! Spot detection inside a cropped well.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReaderError, Result};
use crate::image_proc::detection::regions::{extract_regions, RegionProps};
use crate::image_proc::detection::thresholding::{binarize, ThresholdMethod};
use crate::image_proc::image::{BinaryMask, GrayscaleImage};

/// Parameters for finding printed spots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotDetectionConfig {
    /// Applied to the inverted crop so dark spots are foreground
    pub method: ThresholdMethod,
    pub min_area: usize,
    pub max_area: usize,
    /// Rejects streaks and merged neighbours
    pub max_eccentricity: f64,
}

impl Default for SpotDetectionConfig {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::BrightSpots {
                percentile: 95.0,
                opening_radius: 10,
            },
            min_area: 100,
            max_area: 10_000,
            max_eccentricity: 0.9,
        }
    }
}

/// Find dark spots in `crop` and measure them against the raw crop.
///
/// Regions outside `[min_area, max_area]` or at least as eccentric as
/// `max_eccentricity` are dropped.
pub fn detect_spots(crop: &GrayscaleImage, config: &SpotDetectionConfig) -> Result<Vec<RegionProps>> {
    let mask = binarize(&crop.view(), &config.method, true)?;
    measure_spots(&mask, crop, config)
}

/// Like [`detect_spots`], with the spot mask cut down to `blocks` first.
///
/// Pixels outside the blocks are cleared before components are labeled, so
/// debris touching a spot is trimmed at the block edge and anything between
/// blocks disappears.
///
/// # Errors
/// `ShapeMismatch` when `blocks` and `crop` differ in shape.
pub fn detect_spots_within(
    crop: &GrayscaleImage,
    blocks: &BinaryMask,
    config: &SpotDetectionConfig,
) -> Result<Vec<RegionProps>> {
    if blocks.dim() != crop.shape() {
        return Err(ReaderError::ShapeMismatch {
            left: blocks.dim(),
            right: crop.shape(),
        });
    }
    let mut mask = binarize(&crop.view(), &config.method, true)?;
    mask.zip_mut_with(blocks, |spot, &inside| *spot &= inside);
    measure_spots(&mask, crop, config)
}

fn measure_spots(
    mask: &BinaryMask,
    crop: &GrayscaleImage,
    config: &SpotDetectionConfig,
) -> Result<Vec<RegionProps>> {
    let regions = extract_regions(&mask.view(), Some(&crop.view()))?;
    let total = regions.len();

    let spots: Vec<RegionProps> = regions
        .into_iter()
        .filter(|r| {
            r.area >= config.min_area
                && r.area <= config.max_area
                && r.eccentricity < config.max_eccentricity
        })
        .collect();

    debug!(total, kept = spots.len(), "spot regions extracted");
    Ok(spots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::test_patterns::dark_spot_array;
    use ndarray::{s, Array2};

    #[test]
    fn test_detects_every_printed_spot() {
        let pattern = dark_spot_array((200, 200), 3, 3, 50.0, 8.0, &[]);
        let image = GrayscaleImage::new(pattern.image, 1.0).unwrap();
        let config = SpotDetectionConfig {
            method: ThresholdMethod::Otsu,
            min_area: 20,
            ..Default::default()
        };

        let spots = detect_spots(&image, &config).unwrap();
        assert_eq!(spots.len(), 9);
        for spot in &spots {
            let nearest = pattern
                .centers
                .iter()
                .map(|c| (c - spot.centroid).norm())
                .fold(f64::INFINITY, f64::min);
            assert!(nearest < 1.0);
        }
    }

    #[test]
    fn test_area_filter() {
        let pattern = dark_spot_array((200, 200), 3, 3, 50.0, 8.0, &[]);
        let image = GrayscaleImage::new(pattern.image, 1.0).unwrap();
        let config = SpotDetectionConfig {
            method: ThresholdMethod::Otsu,
            min_area: 1000,
            ..Default::default()
        };

        assert!(detect_spots(&image, &config).unwrap().is_empty());
    }

    #[test]
    fn test_default_percentile_detection() {
        // Spots cover well under 5% of the crop
        let pattern = dark_spot_array((400, 400), 3, 3, 80.0, 12.0, &[(1, 1)]);
        let image = GrayscaleImage::new(pattern.image, 1.0).unwrap();

        let spots = detect_spots(&image, &SpotDetectionConfig::default()).unwrap();
        assert_eq!(spots.len(), 8);
        let center = pattern.centers[4];
        assert!(spots.iter().all(|s| (s.centroid - center).norm() > 40.0));
    }

    #[test]
    fn test_blocks_trim_attached_debris() {
        let pattern = dark_spot_array((200, 200), 3, 3, 50.0, 8.0, &[]);
        let mut raw = pattern.image.clone();
        // A dark tail hanging off the centre spot to the right
        let center = pattern.centers[4];
        let (cx, cy) = (center.x.round() as usize, center.y.round() as usize);
        raw.slice_mut(s![cy - 1..=cy + 1, cx..=cx + 20]).fill(pattern.image[[cy, cx]]);
        let image = GrayscaleImage::new(raw, 1.0).unwrap();
        let config = SpotDetectionConfig {
            method: ThresholdMethod::Otsu,
            min_area: 20,
            max_eccentricity: 0.99,
            ..Default::default()
        };

        let nearest = |spots: &[RegionProps]| {
            spots
                .iter()
                .map(|s| (s.centroid - center).norm())
                .fold(f64::INFINITY, f64::min)
        };
        let loose = detect_spots(&image, &config).unwrap();
        assert!(nearest(&loose) > 1.5);

        let mut blocks = Array2::from_elem(image.shape(), false);
        for c in &pattern.centers {
            let (x, y) = (c.x.round() as usize, c.y.round() as usize);
            blocks.slice_mut(s![y - 10..=y + 10, x - 10..=x + 10]).fill(true);
        }
        let trimmed = detect_spots_within(&image, &blocks, &config).unwrap();
        assert_eq!(trimmed.len(), 9);
        assert!(nearest(&trimmed) < 0.5);
    }

    #[test]
    fn test_blocks_must_match_crop() {
        let pattern = dark_spot_array((60, 60), 1, 1, 20.0, 5.0, &[]);
        let image = GrayscaleImage::new(pattern.image, 1.0).unwrap();
        let blocks = Array2::from_elem((30, 60), true);

        assert!(matches!(
            detect_spots_within(&image, &blocks, &SpotDetectionConfig::default()),
            Err(ReaderError::ShapeMismatch { .. })
        ));
    }
}
