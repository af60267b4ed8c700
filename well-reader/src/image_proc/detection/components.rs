//! Connected component labeling of binary masks.
//!
//! Two-pass labeling with union-find. Pixels are 8-connected: diagonal
//! neighbours belong to the same component, matching how printed spots that
//! touch at a corner are segmented downstream.

use ndarray::{Array2, ArrayView2};

/// Find the root label in a disjoint-set (union-find) data structure
///
/// # Arguments
/// * `labels` - The array of label parent pointers
/// * `label` - The label to find the root for
///
/// # Returns
/// * The root label
fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;

    // Path halving
    while current != labels[current] {
        labels[current] = labels[labels[current]];
        current = labels[current];
    }

    current
}

/// Union two labels in a disjoint-set data structure
///
/// The smaller root becomes the parent so roots stay in first-seen order.
fn union_labels(labels: &mut [usize], label1: usize, label2: usize) {
    let root1 = find_root(labels, label1);
    let root2 = find_root(labels, label2);

    if root1 < root2 {
        labels[root2] = root1;
    } else if root2 < root1 {
        labels[root1] = root2;
    }
}

/// Label 8-connected foreground components.
///
/// # Algorithm
/// 1. **First pass**: Scan image, assign preliminary labels, track equivalences
/// 2. **Union-find**: Resolve label equivalences
/// 3. **Second pass**: Relabel image with final consecutive labels
///
/// # Returns
/// `(labels, count)` where background pixels are 0 and components are
/// numbered `1..=count` in raster order of their first pixel.
pub fn connected_components(mask: &ArrayView2<bool>) -> (Array2<usize>, usize) {
    let (height, width) = mask.dim();
    let mut labels = Array2::zeros((height, width));
    let mut label_count = 0;

    // Index 0 is the background
    let mut parent_table = vec![0];

    for i in 0..height {
        for j in 0..width {
            if !mask[[i, j]] {
                continue;
            }

            // Already-visited 8-neighbours: W, NW, N, NE
            let mut neighbor_labels = [0usize; 4];
            let mut n = 0;
            let mut push = |label: usize| {
                if label > 0 {
                    neighbor_labels[n] = label;
                    n += 1;
                }
            };

            if j > 0 {
                push(labels[[i, j - 1]]);
            }
            if i > 0 {
                if j > 0 {
                    push(labels[[i - 1, j - 1]]);
                }
                push(labels[[i - 1, j]]);
                if j + 1 < width {
                    push(labels[[i - 1, j + 1]]);
                }
            }

            let present = &neighbor_labels[..n];
            match present.iter().copied().min() {
                None => {
                    label_count += 1;
                    labels[[i, j]] = label_count;
                    parent_table.push(label_count);
                }
                Some(min_label) => {
                    labels[[i, j]] = min_label;
                    for &neighbor_label in present {
                        if neighbor_label != min_label {
                            union_labels(&mut parent_table, min_label, neighbor_label);
                        }
                    }
                }
            }
        }
    }

    for i in 1..parent_table.len() {
        let root = find_root(&mut parent_table, i);
        parent_table[i] = root;
    }

    let mut relabel_map = vec![0; parent_table.len()];
    let mut next_label = 1;

    for i in 1..parent_table.len() {
        let root = parent_table[i];
        if relabel_map[root] == 0 {
            relabel_map[root] = next_label;
            next_label += 1;
        }
        relabel_map[i] = relabel_map[root];
    }

    labels.mapv_inplace(|label| relabel_map[label]);

    (labels, next_label - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_empty_mask() {
        let mask = Array2::from_elem((4, 4), false);
        let (labels, count) = connected_components(&mask.view());
        assert_eq!(count, 0);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_diagonal_pixels_join() {
        let mask = array![
            [true, false, false],
            [false, true, false],
            [false, false, true],
        ];
        let (labels, count) = connected_components(&mask.view());
        assert_eq!(count, 1);
        assert_eq!(labels[[2, 2]], 1);
    }

    #[test]
    fn test_separate_components_raster_order() {
        let mask = array![
            [false, false, false, true],
            [true, false, false, true],
            [true, false, false, false],
        ];
        let (labels, count) = connected_components(&mask.view());
        assert_eq!(count, 2);
        // The top-right blob is met first in the scan
        assert_eq!(labels[[0, 3]], 1);
        assert_eq!(labels[[2, 0]], 2);
    }

    #[test]
    fn test_u_shape_merges() {
        let mask = array![
            [true, false, true],
            [true, false, true],
            [true, true, true],
        ];
        let (labels, count) = connected_components(&mask.view());
        assert_eq!(count, 1);
        assert_eq!(labels[[0, 0]], labels[[0, 2]]);
    }
}
