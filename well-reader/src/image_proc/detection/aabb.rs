//! Bounding boxes of spot regions, background rings and synthesized patches.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Inclusive pixel bounds in array order, `(row, col) = (y, x)`.
///
/// An empty box has `min > max` on both axes and reports zero extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AABB {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl AABB {
    /// Empty box, ready to be grown with [`AABB::expand_to_include`]
    pub fn new() -> Self {
        Self {
            min_row: usize::MAX,
            min_col: usize::MAX,
            max_row: 0,
            max_col: 0,
        }
    }

    pub fn from_coords(min_row: usize, min_col: usize, max_row: usize, max_col: usize) -> Self {
        Self {
            min_row,
            min_col,
            max_row,
            max_col,
        }
    }

    /// Tightest box around the `true` pixels of `mask`; empty when none are set
    pub fn of_mask(mask: &ArrayView2<bool>) -> Self {
        mask.indexed_iter()
            .filter(|(_, set)| **set)
            .fold(Self::new(), |mut bbox, ((row, col), _)| {
                bbox.expand_to_include(row, col);
                bbox
            })
    }

    pub fn expand_to_include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
    }

    pub fn is_valid(&self) -> bool {
        self.min_row <= self.max_row && self.min_col <= self.max_col
    }

    /// Columns covered, 0 when empty
    pub fn width(&self) -> usize {
        if self.is_valid() {
            self.max_col + 1 - self.min_col
        } else {
            0
        }
    }

    /// Rows covered, 0 when empty
    pub fn height(&self) -> usize {
        if self.is_valid() {
            self.max_row + 1 - self.min_row
        } else {
            0
        }
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }
}

impl Default for AABB {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_grow_from_points() {
        let mut bbox = AABB::new();
        assert!(!bbox.is_valid());
        assert_eq!(bbox.area(), 0);

        bbox.expand_to_include(3, 4);
        bbox.expand_to_include(5, 2);
        assert_eq!(bbox, AABB::from_coords(3, 2, 5, 4));
        assert_eq!((bbox.height(), bbox.width()), (3, 3));
        assert_eq!(bbox.area(), 9);
    }

    #[test]
    fn test_of_mask() {
        let mut mask = Array2::from_elem((6, 8), false);
        assert!(!AABB::of_mask(&mask.view()).is_valid());

        mask[[1, 6]] = true;
        mask[[4, 2]] = true;
        assert_eq!(AABB::of_mask(&mask.view()), AABB::from_coords(1, 2, 4, 6));
    }
}
