//! Threshold selection and binarization of well images.
//!
//! Converts grayscale well images into binary masks. Every method picks a
//! cut from the intensity histogram (or a percentile) and marks the bright
//! side as foreground; callers invert the image first when the objects of
//! interest are dark, as printed spots are.
//!
//! # Methods
//!
//! - **Otsu**: maximize between-class variance for a two-class split
//! - **Multi-Otsu**: the same criterion over `n` classes; foreground is the
//!   brightest class
//! - **Rosin**: unimodal histograms; the cut sits where the histogram tail
//!   is farthest from the line joining the peak and the tail end
//! - **Bimodal**: smooth the histogram until exactly two peaks remain and
//!   cut at the minimum between them
//! - **Bright spots**: a high percentile, then an opening and border clearing

use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, Result};
use crate::image_proc::image::BinaryMask;
use crate::image_proc::morphology::{clear_border, opening, StructuringElement};

/// Histogram bin count used by Otsu, multi-Otsu and Rosin
const DEFAULT_NBINS: usize = 256;

/// Histogram bin count used by the bimodal (minimum) method
const BIMODAL_NBINS: usize = 512;

/// Smoothing passes allowed before a histogram is declared not bimodal
const MAX_SMOOTHING_PASSES: usize = 10_000;

/// Histogram of an image over its own intensity range.
#[derive(Debug, Clone)]
pub struct Histogram {
    pub counts: Vec<f64>,
    /// Intensity at the center of each bin
    pub centers: Vec<f64>,
}

impl Histogram {
    /// Bin every finite pixel into `nbins` equal-width bins spanning
    /// `[min, max]` of the image.
    ///
    /// A constant image collapses into a single bin.
    pub fn of(image: &ArrayView2<f64>, nbins: usize) -> Result<Self> {
        let (min, max) = image
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if !min.is_finite() {
            return Err(ReaderError::ThresholdFailed(
                "image has no finite pixels".to_string(),
            ));
        }

        if max <= min {
            return Ok(Self {
                counts: vec![image.len() as f64],
                centers: vec![min],
            });
        }

        let nbins = nbins.max(1);
        let width = (max - min) / nbins as f64;
        let mut counts = vec![0.0; nbins];
        for &v in image.iter().filter(|v| v.is_finite()) {
            let bin = (((v - min) / width) as usize).min(nbins - 1);
            counts[bin] += 1.0;
        }
        let centers = (0..nbins)
            .map(|i| min + (i as f64 + 0.5) * width)
            .collect();

        Ok(Self { counts, centers })
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Compute optimal threshold using Otsu's method for automatic image segmentation.
///
/// Otsu's algorithm finds the threshold that maximizes between-class variance,
/// effectively separating foreground objects from background.
///
/// # Algorithm
/// 1. Compute intensity histogram (256 bins over the image range)
/// 2. For each possible threshold, calculate between-class variance
/// 3. Return the bin center that maximizes this variance
///
/// # Returns
/// Threshold in image units; foreground is `pixel > threshold`
pub fn otsu_threshold(image: &ArrayView2<f64>) -> Result<f64> {
    let hist = Histogram::of(image, DEFAULT_NBINS)?;
    Ok(otsu_from_histogram(&hist))
}

fn otsu_from_histogram(hist: &Histogram) -> f64 {
    let n = hist.len();
    if n < 2 {
        return hist.centers[0];
    }

    let total: f64 = hist.counts.iter().sum();
    let sum: f64 = hist
        .counts
        .iter()
        .zip(&hist.centers)
        .map(|(c, x)| c * x)
        .sum();

    let mut weight_b = 0.0;
    let mut sum_b = 0.0;
    let mut max_variance = f64::NEG_INFINITY;
    let mut threshold = hist.centers[0];

    for i in 0..n - 1 {
        weight_b += hist.counts[i];
        sum_b += hist.counts[i] * hist.centers[i];

        let weight_f = total - weight_b;
        if weight_b <= 0.0 || weight_f <= 0.0 {
            continue;
        }

        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);

        if variance > max_variance {
            max_variance = variance;
            threshold = hist.centers[i];
        }
    }

    threshold
}

/// Thresholds splitting the histogram into `n_classes` classes of maximal
/// between-class variance.
///
/// Solved exactly by dynamic programming over bins. Returns `n_classes - 1`
/// increasing thresholds; class `k` holds pixels in
/// `(thresholds[k-1], thresholds[k]]`.
///
/// # Errors
/// `InvalidArgument` when `n_classes < 2`, `ThresholdFailed` when the
/// histogram has fewer occupied bins than classes.
pub fn multi_otsu_thresholds(image: &ArrayView2<f64>, n_classes: usize) -> Result<Vec<f64>> {
    if n_classes < 2 {
        return Err(ReaderError::InvalidArgument(format!(
            "multi-Otsu needs at least 2 classes, got {n_classes}"
        )));
    }
    let hist = Histogram::of(image, DEFAULT_NBINS)?;
    let occupied = hist.counts.iter().filter(|&&c| c > 0.0).count();
    if occupied < n_classes {
        return Err(ReaderError::ThresholdFailed(format!(
            "{occupied} occupied histogram bins cannot form {n_classes} classes"
        )));
    }

    let n = hist.len();
    let mut w = vec![0.0; n + 1];
    let mut s = vec![0.0; n + 1];
    for i in 0..n {
        w[i + 1] = w[i] + hist.counts[i];
        s[i + 1] = s[i] + hist.counts[i] * hist.centers[i];
    }
    // Contribution of bins a..=b as one class
    let class_score = |a: usize, b: usize| -> f64 {
        let weight = w[b + 1] - w[a];
        if weight > 0.0 {
            (s[b + 1] - s[a]).powi(2) / weight
        } else {
            0.0
        }
    };

    // best[k][j]: bins 0..=j split into k+1 classes; split[k][j]: last bin of class k-1
    let mut best = vec![vec![f64::NEG_INFINITY; n]; n_classes];
    let mut split = vec![vec![0usize; n]; n_classes];
    for j in 0..n {
        best[0][j] = class_score(0, j);
    }
    for k in 1..n_classes {
        for j in k..n {
            for cut in (k - 1)..j {
                let value = best[k - 1][cut] + class_score(cut + 1, j);
                if value > best[k][j] {
                    best[k][j] = value;
                    split[k][j] = cut;
                }
            }
        }
    }

    let mut cuts = Vec::with_capacity(n_classes - 1);
    let mut j = n - 1;
    for k in (1..n_classes).rev() {
        j = split[k][j];
        cuts.push(hist.centers[j]);
    }
    cuts.reverse();
    Ok(cuts)
}

/// Rosin's unimodal threshold.
///
/// Draws a line from the histogram peak to the last occupied bin on the
/// longer tail and returns the bin farthest below that line.
pub fn rosin_threshold(image: &ArrayView2<f64>) -> Result<f64> {
    let hist = Histogram::of(image, DEFAULT_NBINS)?;
    let n = hist.len();
    if n < 3 {
        return Ok(hist.centers[0]);
    }

    let peak = hist
        .counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let first = hist.counts.iter().position(|&c| c > 0.0).unwrap_or(0);
    let last = hist.counts.iter().rposition(|&c| c > 0.0).unwrap_or(n - 1);

    let tail_end = if last - peak >= peak - first { last } else { first };
    if tail_end == peak {
        return Ok(hist.centers[peak]);
    }

    let (x0, y0) = (peak as f64, hist.counts[peak]);
    let (x1, y1) = (tail_end as f64, hist.counts[tail_end]);
    let norm = ((y1 - y0).powi(2) + (x1 - x0).powi(2)).sqrt();

    let (lo, hi) = if tail_end > peak {
        (peak, tail_end)
    } else {
        (tail_end, peak)
    };
    let mut best_bin = peak;
    let mut best_dist = f64::NEG_INFINITY;
    for i in lo..=hi {
        let dist = ((y1 - y0) * i as f64 - (x1 - x0) * hist.counts[i] + x1 * y0 - y1 * x0).abs()
            / norm;
        if dist > best_dist {
            best_dist = dist;
            best_bin = i;
        }
    }

    Ok(hist.centers[best_bin])
}

/// Indices of local maxima; a plateau counts once, at its last bin.
///
/// A histogram still rising at its final bin has a maximum there.
fn local_maxima(hist: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    let mut rising = true;
    let mut climbed = false;
    for i in 0..hist.len().saturating_sub(1) {
        if rising {
            if hist[i + 1] < hist[i] {
                rising = false;
                maxima.push(i);
            } else if hist[i + 1] > hist[i] {
                climbed = true;
            }
        } else if hist[i + 1] > hist[i] {
            rising = true;
            climbed = true;
        }
    }
    if rising && climbed {
        if let Some(last) = hist.len().checked_sub(1) {
            maxima.push(last);
        }
    }
    maxima
}

/// 3-tap mean filter; edges reflect the border sample.
fn smooth3(hist: &[f64]) -> Vec<f64> {
    let n = hist.len();
    (0..n)
        .map(|i| {
            let left = hist[i.saturating_sub(1)];
            let right = hist[(i + 1).min(n - 1)];
            (left + hist[i] + right) / 3.0
        })
        .collect()
}

/// Minimum between the two peaks of a bimodal histogram.
///
/// The 512-bin histogram is smoothed until at most two maxima remain.
///
/// # Errors
/// `ThresholdFailed` if smoothing never produces exactly two peaks.
pub fn minimum_threshold(image: &ArrayView2<f64>) -> Result<f64> {
    let hist = Histogram::of(image, BIMODAL_NBINS)?;
    let mut smooth = hist.counts.clone();

    let mut maxima = local_maxima(&smooth);
    let mut passes = 0;
    while maxima.len() > 2 && passes < MAX_SMOOTHING_PASSES {
        smooth = smooth3(&smooth);
        maxima = local_maxima(&smooth);
        passes += 1;
    }

    if maxima.len() != 2 {
        return Err(ReaderError::ThresholdFailed(format!(
            "histogram is not bimodal ({} peaks after {passes} smoothing passes)",
            maxima.len()
        )));
    }

    let (a, b) = (maxima[0], maxima[1]);
    let valley = (a..=b)
        .min_by(|&i, &j| smooth[i].total_cmp(&smooth[j]))
        .unwrap_or(a);
    Ok(hist.centers[valley])
}

/// Percentile with linear interpolation between order statistics.
///
/// `q` is in `[0, 100]`. NaN pixels are ignored.
pub fn percentile(image: &ArrayView2<f64>, q: f64) -> Result<f64> {
    if !(0.0..=100.0).contains(&q) {
        return Err(ReaderError::InvalidArgument(format!(
            "percentile must be within [0, 100], got {q}"
        )));
    }
    let mut values: Vec<f64> = image.iter().copied().filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return Err(ReaderError::ThresholdFailed(
            "image has no valid pixels".to_string(),
        ));
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let pos = q / 100.0 * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Ok(values[lo] + (values[hi] - values[lo]) * frac)
}

/// Apply binary threshold to create segmentation mask.
///
/// # Returns
/// Mask with `true` for pixels strictly above the threshold
pub fn apply_threshold(image: &ArrayView2<f64>, threshold: f64) -> BinaryMask {
    image.mapv(|pixel| pixel > threshold)
}

/// Binarization strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Unimodal threshold, then opening with a disk of `opening_radius`
    Rosin { opening_radius: usize },
    Otsu,
    MultiOtsu { n_classes: usize },
    /// Minimum between two histogram peaks; keeps `pixel >= threshold`
    Bimodal,
    BrightSpots {
        percentile: f64,
        opening_radius: usize,
    },
}

impl Default for ThresholdMethod {
    fn default() -> Self {
        ThresholdMethod::Rosin { opening_radius: 3 }
    }
}

impl FromStr for ThresholdMethod {
    type Err = ReaderError;

    /// Parse a method name with its customary parameters
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rosin" => Ok(ThresholdMethod::Rosin { opening_radius: 3 }),
            "otsu" => Ok(ThresholdMethod::Otsu),
            "multi_otsu" => Ok(ThresholdMethod::MultiOtsu { n_classes: 3 }),
            "bimodal" => Ok(ThresholdMethod::Bimodal),
            "bright_spots" => Ok(ThresholdMethod::BrightSpots {
                percentile: 95.0,
                opening_radius: 10,
            }),
            other => Err(ReaderError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Threshold `image` into a mask of the same shape.
///
/// With `invert`, pixels are mapped to `1 - v` first so dark objects
/// become foreground.
pub fn binarize(
    image: &ArrayView2<f64>,
    method: &ThresholdMethod,
    invert: bool,
) -> Result<BinaryMask> {
    let inverted: Array2<f64>;
    let work = if invert {
        inverted = image.mapv(|v| 1.0 - v);
        inverted.view()
    } else {
        image.view()
    };

    let mask = match method {
        ThresholdMethod::Otsu => apply_threshold(&work, otsu_threshold(&work)?),
        ThresholdMethod::MultiOtsu { n_classes } => {
            let thresholds = multi_otsu_thresholds(&work, *n_classes)?;
            let top = thresholds.last().copied().ok_or_else(|| {
                ReaderError::ThresholdFailed("multi-Otsu produced no thresholds".to_string())
            })?;
            apply_threshold(&work, top)
        }
        ThresholdMethod::Rosin { opening_radius } => {
            let mask = apply_threshold(&work, rosin_threshold(&work)?);
            opening(&mask.view(), &StructuringElement::disk(*opening_radius))
        }
        ThresholdMethod::Bimodal => {
            let t = minimum_threshold(&work)?;
            work.mapv(|v| v >= t)
        }
        ThresholdMethod::BrightSpots {
            percentile: q,
            opening_radius,
        } => {
            let mask = apply_threshold(&work, percentile(&work, *q)?);
            let opened = opening(&mask.view(), &StructuringElement::disk(*opening_radius));
            clear_border(&opened.view())
        }
    };

    Ok(mask)
}
