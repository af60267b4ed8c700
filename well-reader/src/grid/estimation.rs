//! Initial grid estimate from intensity profiles.
//!
//! Spots are dark, so averaging the cropped well along rows and columns
//! gives two profiles with a dip at every printed row and column. The dips
//! are inverted into peaks, smoothed, and picked by prominence; their span
//! gives the grid center and their gaps the spot spacing.

use nalgebra::Vector2;
use ndarray::{s, ArrayView2, Axis};
use plate_math::median;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tunables for [`grid_estimation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridEstimatorConfig {
    /// Padding around the detected spots when cutting the profile ROI (pixels)
    pub margin: usize,
    /// Minimum peak prominence as a fraction of the profile maximum
    pub prominence: f64,
    /// Gaussian smoothing applied to each profile (pixels)
    pub sigma: f64,
    pub min_peak_distance: usize,
    /// Peaks needed on an axis before its gaps are trusted
    pub min_peaks: usize,
    /// Spacing used when no axis has enough peaks (pixels)
    pub default_spacing: f64,
}

impl Default for GridEstimatorConfig {
    fn default() -> Self {
        Self {
            margin: 50,
            prominence: 0.15,
            sigma: 3.0,
            min_peak_distance: 50,
            min_peaks: 4,
            default_spacing: 80.0,
        }
    }
}

/// Peaks found on one profile, in profile coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePeaks {
    pub peaks: Vec<usize>,
    /// Midpoint between the first and last peak
    pub center: Option<f64>,
    /// Gaps between neighbouring peaks, `None` with too few peaks
    pub gaps: Option<Vec<f64>>,
}

/// Seed for the idealized grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridEstimate {
    /// (x, y) in the coordinates of the estimated image
    pub center: Vector2<f64>,
    /// Median of every trusted peak gap, or the configured default
    pub spacing: f64,
    pub spacing_x: Option<f64>,
    pub spacing_y: Option<f64>,
}

/// Index into a signal of length `n` with half-sample symmetric reflection
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Convolve with a normalized Gaussian truncated at 4 sigma; edges reflect.
pub fn gaussian_smooth(signal: &[f64], sigma: f64) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || sigma <= 0.0 {
        return signal.to_vec();
    }

    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(k, offset)| k * signal[reflect_index(i + offset, n)])
                .sum()
        })
        .collect()
}

/// Strict local maxima; a flat top reports its middle sample.
fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let n = signal.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead + 1 < n && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of a peak above the higher of the two minima separating it from
/// taller samples on either side.
fn prominence(signal: &[f64], peak: usize) -> f64 {
    let height = signal[peak];

    let mut left_min = height;
    for &v in signal[..=peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = height;
    for &v in &signal[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// Local maxima at least `min_distance` apart with prominence at least
/// `min_prominence`.
///
/// When two maxima are closer than `min_distance` the taller one is kept.
pub fn find_peaks(signal: &[f64], min_prominence: f64, min_distance: usize) -> Vec<usize> {
    let candidates = local_maxima(signal);

    let mut keep = vec![true; candidates.len()];
    let mut by_height: Vec<usize> = (0..candidates.len()).collect();
    by_height.sort_by(|&a, &b| signal[candidates[b]].total_cmp(&signal[candidates[a]]));
    for &j in &by_height {
        if !keep[j] {
            continue;
        }
        for (k, &other) in candidates.iter().enumerate() {
            if k != j && keep[k] && candidates[j].abs_diff(other) < min_distance {
                keep[k] = false;
            }
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter(|&(peak, kept)| kept && prominence(signal, peak) >= min_prominence)
        .map(|(peak, _)| peak)
        .collect()
}

/// Find the dark-spot peaks of one projection profile.
///
/// If the darkest sample lies within half a margin of either end, that end
/// is trimmed first so a well edge bleeding into the ROI is not taken for a
/// spot row. Reported positions include the trimmed offset.
pub fn find_profile_peaks(profile: &[f64], config: &GridEstimatorConfig) -> ProfilePeaks {
    let n = profile.len();
    if n == 0 {
        return ProfilePeaks {
            peaks: Vec::new(),
            center: None,
            gaps: None,
        };
    }

    let top = profile.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let inverted: Vec<f64> = profile.iter().map(|v| top - v).collect();

    let inv_max = inverted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let at_max: Vec<usize> = (0..n).filter(|&i| inverted[i] == inv_max).collect();
    let max_pos = at_max.iter().sum::<usize>() / at_max.len().max(1);

    let half = config.margin / 2;
    let (start, end) = if half == 0 || n <= half {
        (0, n)
    } else if max_pos > n - half {
        (0, n - half)
    } else if max_pos < half {
        (half, n)
    } else {
        (0, n)
    };

    let smooth = gaussian_smooth(&inverted[start..end], config.sigma);
    let smooth_max = smooth.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let peaks: Vec<usize> = find_peaks(
        &smooth,
        smooth_max * config.prominence,
        config.min_peak_distance,
    )
    .into_iter()
    .map(|p| p + start)
    .collect();

    let center = match (peaks.first(), peaks.last()) {
        (Some(&first), Some(&last)) => Some(first as f64 + (last - first) as f64 / 2.0),
        _ => None,
    };
    let gaps = (peaks.len() >= config.min_peaks.max(2))
        .then(|| peaks.windows(2).map(|w| (w[1] - w[0]) as f64).collect());

    ProfilePeaks {
        peaks,
        center,
        gaps,
    }
}

/// `[lo, hi)` along one axis: detected extent plus margin, kept `margin`
/// away from the image edge. Falls back to the full axis when empty.
fn roi_bounds(values: impl Iterator<Item = f64>, len: usize, margin: usize) -> (usize, usize) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() {
        return (0, len);
    }

    let m = margin as f64;
    let lo = m.max(min - m).max(0.0) as usize;
    let hi = ((len as f64 - m).min(max + m).max(0.0) as usize).min(len);
    if lo < hi {
        (lo, hi)
    } else {
        (0, len)
    }
}

fn axis_spacing(gaps: &Option<Vec<f64>>) -> Option<f64> {
    gaps.as_ref().and_then(|g| median(g).ok())
}

/// Estimate grid center and spacing from the image and detected centroids.
///
/// An axis without peaks falls back to the center of the ROI on that axis.
pub fn grid_estimation(
    image: &ArrayView2<f64>,
    centroids: &[Vector2<f64>],
    config: &GridEstimatorConfig,
) -> GridEstimate {
    let (height, width) = image.dim();
    let (x_lo, x_hi) = roi_bounds(centroids.iter().map(|c| c.x), width, config.margin);
    let (y_lo, y_hi) = roi_bounds(centroids.iter().map(|c| c.y), height, config.margin);

    let roi = image.slice(s![y_lo..y_hi, x_lo..x_hi]);
    let profile_x = roi.mean_axis(Axis(0)).map(|p| p.to_vec()).unwrap_or_default();
    let profile_y = roi.mean_axis(Axis(1)).map(|p| p.to_vec()).unwrap_or_default();

    let peaks_x = find_profile_peaks(&profile_x, config);
    let peaks_y = find_profile_peaks(&profile_y, config);
    debug!(
        peaks_x = peaks_x.peaks.len(),
        peaks_y = peaks_y.peaks.len(),
        "profile peaks"
    );

    let center = Vector2::new(
        x_lo as f64 + peaks_x.center.unwrap_or((x_hi - x_lo) as f64 / 2.0),
        y_lo as f64 + peaks_y.center.unwrap_or((y_hi - y_lo) as f64 / 2.0),
    );

    let all_gaps: Vec<f64> = peaks_x
        .gaps
        .iter()
        .chain(peaks_y.gaps.iter())
        .flatten()
        .copied()
        .collect();
    let spacing = median(&all_gaps).unwrap_or(config.default_spacing);

    GridEstimate {
        center,
        spacing,
        spacing_x: axis_spacing(&peaks_x.gaps),
        spacing_y: axis_spacing(&peaks_y.gaps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::test_patterns::dark_spot_array;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_smooth_preserves_constant_and_mass() {
        let flat = vec![2.0; 20];
        for v in gaussian_smooth(&flat, 3.0) {
            assert_relative_eq!(v, 2.0, epsilon = 1e-12);
        }

        let mut impulse = vec![0.0; 101];
        impulse[50] = 1.0;
        let smooth = gaussian_smooth(&impulse, 3.0);
        assert_relative_eq!(smooth.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(smooth[50] > smooth[47] && smooth[47] > smooth[44]);
    }

    #[test]
    fn test_find_peaks_distance_and_prominence() {
        let mut signal = vec![0.0; 40];
        signal[5] = 1.0;
        signal[8] = 3.0;
        signal[20] = 2.0;
        signal[30] = 0.1;

        assert_eq!(find_peaks(&signal, 0.0, 1), vec![5, 8, 20, 30]);
        // 5 sits within 10 samples of the taller 8
        assert_eq!(find_peaks(&signal, 0.0, 10), vec![8, 20, 30]);
        assert_eq!(find_peaks(&signal, 0.5, 10), vec![8, 20]);
    }

    #[test]
    fn test_flat_top_reports_middle() {
        let signal = [0.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(find_peaks(&signal, 0.0, 1), vec![2]);
    }

    #[test]
    fn test_profile_edge_is_trimmed() {
        let dip = |i: usize, c: f64, depth: f64| {
            depth * (-(i as f64 - c).powi(2) / (2.0 * 16.0)).exp()
        };
        let profile: Vec<f64> = (0..300)
            .map(|i| {
                1.0 - dip(i, 5.0, 0.9)
                    - dip(i, 100.0, 0.5)
                    - dip(i, 160.0, 0.5)
                    - dip(i, 220.0, 0.5)
            })
            .collect();

        let found = find_profile_peaks(&profile, &GridEstimatorConfig::default());
        assert_eq!(found.peaks, vec![100, 160, 220]);
        assert_relative_eq!(found.center.unwrap(), 160.0);
        // Three peaks are not enough to trust the gaps
        assert!(found.gaps.is_none());
    }

    #[test]
    fn test_estimate_on_spot_array() {
        let pattern = dark_spot_array((500, 500), 6, 6, 60.0, 10.0, &[]);
        let estimate = grid_estimation(
            &pattern.image.view(),
            &pattern.centers,
            &GridEstimatorConfig::default(),
        );

        assert!((estimate.center - Vector2::new(250.0, 250.0)).norm() < 1.5);
        assert_relative_eq!(estimate.spacing, 60.0, epsilon = 1.0);
        assert!(estimate.spacing_x.is_some() && estimate.spacing_y.is_some());
    }

    #[test]
    fn test_sparse_grid_uses_default_spacing() {
        let pattern = dark_spot_array((400, 400), 3, 3, 80.0, 10.0, &[]);
        let config = GridEstimatorConfig::default();
        let estimate = grid_estimation(&pattern.image.view(), &pattern.centers, &config);

        assert_eq!(estimate.spacing_x, None);
        assert_eq!(estimate.spacing_y, None);
        assert_eq!(estimate.spacing, config.default_spacing);
        assert!((estimate.center - Vector2::new(200.0, 200.0)).norm() < 1.5);
    }

    #[test]
    fn test_no_peaks_falls_back_to_roi_center() {
        let image = ndarray::Array2::from_elem((200, 300), 0.5);
        let estimate = grid_estimation(&image.view(), &[], &GridEstimatorConfig::default());
        assert_relative_eq!(estimate.center, Vector2::new(150.0, 100.0));
        assert_eq!(estimate.spacing, 80.0);
    }
}
