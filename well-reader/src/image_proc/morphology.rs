//! Binary morphology on boolean masks.
//!
//! Structuring elements are stored as horizontal runs, one per row offset,
//! so dilation and erosion reduce to range queries on per-row prefix sums.
//! Cost is O(pixels × element rows) rather than O(pixels × element area),
//! which keeps the radius-10 openings used on full well images cheap.

use ndarray::{Array2, ArrayView2};

use crate::image_proc::detection::components::connected_components;
use crate::image_proc::image::BinaryMask;

/// Run of element pixels on one row: offsets `dx_min..=dx_max` at `dy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    dy: isize,
    dx_min: isize,
    dx_max: isize,
}

/// Flat structuring element centered on the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    spans: Vec<Span>,
}

impl StructuringElement {
    /// All offsets with `dx² + dy² <= radius²`
    pub fn disk(radius: usize) -> Self {
        let r = radius as isize;
        let spans = (-r..=r)
            .map(|dy| {
                let half = ((r * r - dy * dy) as f64).sqrt().floor() as isize;
                Span {
                    dy,
                    dx_min: -half,
                    dx_max: half,
                }
            })
            .collect();
        Self { spans }
    }

    /// Filled `rows x cols` rectangle; even sizes put the extra pixel
    /// before the origin.
    pub fn rectangle(rows: usize, cols: usize) -> Self {
        if rows == 0 || cols == 0 {
            return Self { spans: Vec::new() };
        }
        let dy0 = -((rows / 2) as isize);
        let dx0 = -((cols / 2) as isize);
        let spans = (0..rows as isize)
            .map(|i| Span {
                dy: dy0 + i,
                dx_min: dx0,
                dx_max: dx0 + cols as isize - 1,
            })
            .collect();
        Self { spans }
    }

    /// Number of pixels in the element
    pub fn area(&self) -> usize {
        self.spans
            .iter()
            .map(|s| (s.dx_max - s.dx_min + 1) as usize)
            .sum()
    }

    fn reflected(&self) -> Self {
        Self {
            spans: self
                .spans
                .iter()
                .map(|s| Span {
                    dy: -s.dy,
                    dx_min: -s.dx_max,
                    dx_max: -s.dx_min,
                })
                .collect(),
        }
    }
}

/// Per-row running counts of foreground pixels, `width + 1` columns wide
fn row_prefix_sums(mask: &ArrayView2<bool>) -> Array2<u32> {
    let (height, width) = mask.dim();
    let mut prefix = Array2::zeros((height, width + 1));
    for row in 0..height {
        for col in 0..width {
            prefix[[row, col + 1]] = prefix[[row, col]] + mask[[row, col]] as u32;
        }
    }
    prefix
}

/// Clip `[lo, hi]` to `[0, width)`; `None` when nothing remains
fn clip(lo: isize, hi: isize, width: usize) -> Option<(usize, usize)> {
    let lo = lo.max(0);
    let hi = hi.min(width as isize - 1);
    (lo <= hi).then_some((lo as usize, hi as usize))
}

/// Foreground wherever the reflected element placed at the pixel hits foreground.
pub fn dilate(mask: &ArrayView2<bool>, element: &StructuringElement) -> BinaryMask {
    let (height, width) = mask.dim();
    let prefix = row_prefix_sums(mask);
    let reflected = element.reflected();

    Array2::from_shape_fn((height, width), |(row, col)| {
        reflected.spans.iter().any(|span| {
            let r = row as isize + span.dy;
            if r < 0 || r >= height as isize {
                return false;
            }
            let c = col as isize;
            match clip(c + span.dx_min, c + span.dx_max, width) {
                Some((lo, hi)) => {
                    let r = r as usize;
                    prefix[[r, hi + 1]] > prefix[[r, lo]]
                }
                None => false,
            }
        })
    })
}

/// Foreground wherever the element placed at the pixel fits inside the
/// foreground. Pixels beyond the image edge count as foreground, so
/// shapes touching the border do not erode away from it.
pub fn erode(mask: &ArrayView2<bool>, element: &StructuringElement) -> BinaryMask {
    let (height, width) = mask.dim();
    let prefix = row_prefix_sums(mask);

    Array2::from_shape_fn((height, width), |(row, col)| {
        element.spans.iter().all(|span| {
            let r = row as isize + span.dy;
            if r < 0 || r >= height as isize {
                return true;
            }
            let c = col as isize;
            match clip(c + span.dx_min, c + span.dx_max, width) {
                Some((lo, hi)) => {
                    let r = r as usize;
                    (prefix[[r, hi + 1]] - prefix[[r, lo]]) as usize == hi - lo + 1
                }
                None => true,
            }
        })
    })
}

/// Erosion followed by dilation; removes specks smaller than the element.
pub fn opening(mask: &ArrayView2<bool>, element: &StructuringElement) -> BinaryMask {
    let eroded = erode(mask, element);
    dilate(&eroded.view(), element)
}

/// Dilation followed by erosion; fills gaps smaller than the element.
pub fn closing(mask: &ArrayView2<bool>, element: &StructuringElement) -> BinaryMask {
    let dilated = dilate(mask, element);
    erode(&dilated.view(), element)
}

/// Drop every 8-connected component that touches the image edge.
pub fn clear_border(mask: &ArrayView2<bool>) -> BinaryMask {
    let (height, width) = mask.dim();
    let (labels, count) = connected_components(mask);
    if count == 0 {
        return mask.to_owned();
    }

    let mut touches = vec![false; count + 1];
    for ((row, col), &label) in labels.indexed_iter() {
        if label > 0 && (row == 0 || col == 0 || row + 1 == height || col + 1 == width) {
            touches[label] = true;
        }
    }

    labels.mapv(|label| label > 0 && !touches[label])
}

/// Closing with a `kx x ky` rectangle to merge fragmented spots.
pub fn clean_spot_binary(mask: &ArrayView2<bool>, kx: usize, ky: usize) -> BinaryMask {
    closing(mask, &StructuringElement::rectangle(kx, ky))
}
