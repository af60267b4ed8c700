//! Region properties of labeled connected components.
//!
//! Each foreground component of a mask becomes one immutable
//! [`RegionProps`]: where it is, how big it is, its shape, and what the
//! intensity image looks like underneath it.

use nalgebra::Vector2;
use ndarray::{s, Array2, ArrayView2};
use plate_math::Locatable2d;
use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, Result};
use crate::image_proc::centroid::{compute_centroid_from_mask, compute_shape_from_mask};
use crate::image_proc::detection::aabb::AABB;
use crate::image_proc::detection::components::connected_components;

/// Measured properties of one connected component.
///
/// Points are `(x, y) = (col, row)` in the coordinates of the mask the
/// region was extracted from.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionProps {
    pub label: usize,
    pub centroid: Vector2<f64>,
    /// Intensity-weighted centroid; equals `centroid` without an intensity image
    pub weighted_centroid: Vector2<f64>,
    /// Pixel count
    pub area: usize,
    pub bbox: AABB,
    pub eccentricity: f64,
    pub major_axis_length: f64,
    pub minor_axis_length: f64,
    pub mean_intensity: f64,
    /// Intensity under the bounding box, zero outside the footprint
    pub intensity_patch: Array2<f64>,
    /// Component pixels within the bounding box
    pub footprint: Array2<bool>,
}

impl RegionProps {
    /// Build a region from its footprint placed at `origin = (row, col)`.
    ///
    /// `intensity` is the full image the footprint indexes into; without
    /// one, intensities are taken as 1 on the footprint.
    ///
    /// # Errors
    /// `ShapeMismatch` when the placed footprint runs off `intensity`.
    pub fn from_footprint(
        label: usize,
        footprint: Array2<bool>,
        origin: (usize, usize),
        intensity: Option<&ArrayView2<f64>>,
    ) -> Result<Self> {
        let (height, width) = footprint.dim();
        let (row0, col0) = origin;
        if let Some(image) = intensity {
            let (image_height, image_width) = image.dim();
            if row0 + height > image_height || col0 + width > image_width {
                return Err(ReaderError::ShapeMismatch {
                    left: (row0 + height, col0 + width),
                    right: image.dim(),
                });
            }
        }

        let mut bbox = AABB::new();
        let mut area = 0;
        for ((row, col), &inside) in footprint.indexed_iter() {
            if inside {
                bbox.expand_to_include(row0 + row, col0 + col);
                area += 1;
            }
        }

        let intensity_patch = match intensity {
            Some(image) => {
                let window = image.slice(s![row0..row0 + height, col0..col0 + width]);
                Array2::from_shape_fn((height, width), |(r, c)| {
                    if footprint[[r, c]] {
                        window[[r, c]]
                    } else {
                        0.0
                    }
                })
            }
            None => footprint.mapv(|v| if v { 1.0 } else { 0.0 }),
        };

        let shape = compute_shape_from_mask(&footprint.view());
        let weighted = compute_centroid_from_mask(&intensity_patch.view(), &footprint.view())?;
        let offset = Vector2::new(col0 as f64, row0 as f64);
        let centroid = offset + Vector2::new(shape.x, shape.y);
        let weighted_centroid = if weighted.flux > 0.0 {
            offset + Vector2::new(weighted.x, weighted.y)
        } else {
            centroid
        };

        let mean_intensity = if area > 0 {
            intensity_patch.sum() / area as f64
        } else {
            f64::NAN
        };

        Ok(Self {
            label,
            centroid,
            weighted_centroid,
            area,
            bbox,
            eccentricity: shape.eccentricity(),
            major_axis_length: shape.major_axis_length(),
            minor_axis_length: shape.minor_axis_length(),
            mean_intensity,
            intensity_patch,
            footprint,
        })
    }

    /// Area of the bounding box in pixels
    pub fn bbox_area(&self) -> usize {
        self.bbox.area()
    }

    pub fn attribute(&self, attribute: RegionAttribute) -> f64 {
        match attribute {
            RegionAttribute::Area => self.area as f64,
            RegionAttribute::Eccentricity => self.eccentricity,
            RegionAttribute::Label => self.label as f64,
            RegionAttribute::MeanIntensity => self.mean_intensity,
            RegionAttribute::BboxArea => self.bbox_area() as f64,
        }
    }
}

impl Locatable2d for RegionProps {
    fn x(&self) -> f64 {
        self.weighted_centroid.x
    }

    fn y(&self) -> f64 {
        self.weighted_centroid.y
    }
}

/// One region per 8-connected component of `mask`, in label order.
///
/// # Errors
/// `ShapeMismatch` when `intensity` is given with a different shape.
pub fn extract_regions(
    mask: &ArrayView2<bool>,
    intensity: Option<&ArrayView2<f64>>,
) -> Result<Vec<RegionProps>> {
    if let Some(image) = intensity {
        if image.dim() != mask.dim() {
            return Err(ReaderError::ShapeMismatch {
                left: mask.dim(),
                right: image.dim(),
            });
        }
    }

    let (labels, count) = connected_components(mask);
    let mut boxes = vec![AABB::new(); count + 1];
    for ((row, col), &label) in labels.indexed_iter() {
        if label > 0 {
            boxes[label].expand_to_include(row, col);
        }
    }

    (1..=count)
        .map(|label| {
            let bbox = boxes[label];
            let window = labels.slice(s![
                bbox.min_row..=bbox.max_row,
                bbox.min_col..=bbox.max_col
            ]);
            let footprint = window.mapv(|l| l == label);
            RegionProps::from_footprint(label, footprint, (bbox.min_row, bbox.min_col), intensity)
        })
        .collect()
}

/// Scalar region attribute usable in [`select`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionAttribute {
    Area,
    Eccentricity,
    Label,
    MeanIntensity,
    BboxArea,
}

/// Comparison applied to a region attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    GreaterThan(f64),
    LessThan(f64),
    Equals(f64),
    IsIn(Vec<f64>),
}

impl Predicate {
    pub fn test(&self, value: f64) -> bool {
        match self {
            Predicate::GreaterThan(v) => value > *v,
            Predicate::LessThan(v) => value < *v,
            Predicate::Equals(v) => value == *v,
            Predicate::IsIn(vs) => vs.contains(&value),
        }
    }
}

/// Keep the regions whose `attribute` satisfies `predicate`, preserving order.
pub fn select(
    regions: Vec<RegionProps>,
    attribute: RegionAttribute,
    predicate: &Predicate,
) -> Vec<RegionProps> {
    regions
        .into_iter()
        .filter(|region| predicate.test(region.attribute(attribute)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two blobs: a 3x3 square at rows 1..4, cols 1..4 and a 1x4 bar on row 6
    fn two_blobs() -> (Array2<bool>, Array2<f64>) {
        let mut mask = Array2::from_elem((8, 8), false);
        let mut image = Array2::from_elem((8, 8), 0.1);
        for row in 1..4 {
            for col in 1..4 {
                mask[[row, col]] = true;
                image[[row, col]] = 0.5;
            }
        }
        image[[3, 3]] = 2.3;
        for col in 2..6 {
            mask[[6, col]] = true;
            image[[6, col]] = 0.9;
        }
        (mask, image)
    }

    #[test]
    fn test_extract_properties() {
        let (mask, image) = two_blobs();
        let regions = extract_regions(&mask.view(), Some(&image.view())).unwrap();
        assert_eq!(regions.len(), 2);

        let square = &regions[0];
        assert_eq!(square.label, 1);
        assert_eq!(square.area, 9);
        assert_eq!(square.bbox, AABB::from_coords(1, 1, 3, 3));
        assert_eq!(square.bbox_area(), 9);
        assert_relative_eq!(square.centroid, Vector2::new(2.0, 2.0), epsilon = 1e-12);
        // The bright corner drags the weighted centroid toward (3, 3)
        assert!(square.weighted_centroid.x > 2.0 && square.weighted_centroid.y > 2.0);
        assert_relative_eq!(square.mean_intensity, (8.0 * 0.5 + 2.3) / 9.0, epsilon = 1e-12);
        assert_eq!(square.intensity_patch.dim(), (3, 3));

        let bar = &regions[1];
        assert_eq!(bar.area, 4);
        assert_relative_eq!(bar.centroid, Vector2::new(3.5, 6.0), epsilon = 1e-12);
        assert!(bar.eccentricity > 0.99);
    }

    #[test]
    fn test_without_intensity_uses_unweighted_centroid() {
        let (mask, _) = two_blobs();
        let regions = extract_regions(&mask.view(), None).unwrap();

        for region in &regions {
            assert_relative_eq!(region.weighted_centroid, region.centroid, epsilon = 1e-12);
            assert_relative_eq!(region.mean_intensity, 1.0);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let (mask, _) = two_blobs();
        let image = Array2::zeros((4, 4));
        assert!(matches!(
            extract_regions(&mask.view(), Some(&image.view())),
            Err(ReaderError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_footprint_off_the_image() {
        let image = Array2::from_elem((4, 4), 1.0);
        let footprint = Array2::from_elem((3, 3), true);

        let inside = RegionProps::from_footprint(1, footprint.clone(), (1, 1), Some(&image.view()));
        assert_eq!(inside.unwrap().bbox, AABB::from_coords(1, 1, 3, 3));
        assert!(matches!(
            RegionProps::from_footprint(1, footprint, (2, 1), Some(&image.view())),
            Err(ReaderError::ShapeMismatch {
                left: (5, 4),
                right: (4, 4)
            })
        ));
    }

    #[test]
    fn test_select_predicates() {
        let (mask, image) = two_blobs();
        let regions = extract_regions(&mask.view(), Some(&image.view())).unwrap();

        let big = select(regions.clone(), RegionAttribute::Area, &Predicate::GreaterThan(5.0));
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].label, 1);

        let round = select(
            regions.clone(),
            RegionAttribute::Eccentricity,
            &Predicate::LessThan(0.5),
        );
        assert_eq!(round.len(), 1);

        let by_label = select(regions.clone(), RegionAttribute::Label, &Predicate::Equals(2.0));
        assert_eq!(by_label[0].area, 4);

        let listed = select(
            regions,
            RegionAttribute::BboxArea,
            &Predicate::IsIn(vec![4.0, 9.0]),
        );
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn test_locatable_uses_weighted_centroid() {
        let (mask, image) = two_blobs();
        let regions = extract_regions(&mask.view(), Some(&image.view())).unwrap();
        assert_eq!(regions[0].x(), regions[0].weighted_centroid.x);
    }
}
