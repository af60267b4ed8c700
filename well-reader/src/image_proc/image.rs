//! Grayscale well images and their conversion from the image crate.
//!
//! # Coordinate System Conversions
//!
//! - **ndarray**: Uses matrix indexing [row, col] = [y, x] with (height, width) dimensions
//! - **image crate**: Uses graphics indexing (x, y) with (width, height) dimensions
//!
//! Every point handed to the grid stages is `(x, y) = (col, row)`.

use std::path::Path;

use image::{DynamicImage, GrayImage};
use ndarray::{Array2, ArrayView2};

use crate::error::{ReaderError, Result};

/// Boolean mask with the same shape as the image it was derived from.
pub type BinaryMask = Array2<bool>;

/// Intensity image in `[0, 1]` plus the physical size of one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayscaleImage {
    pub data: Array2<f64>,
    /// Physical units (mm) per pixel
    pub pixel_size: f64,
}

impl GrayscaleImage {
    pub fn new(data: Array2<f64>, pixel_size: f64) -> Result<Self> {
        if !(pixel_size.is_finite() && pixel_size > 0.0) {
            return Err(ReaderError::InvalidArgument(format!(
                "pixel size must be positive, got {pixel_size}"
            )));
        }
        Ok(Self { data, pixel_size })
    }

    /// Convert an 8-bit grayscale buffer, scaling to `[0, 1]`.
    ///
    /// # Coordinate Mapping
    /// - Image pixel (x, y) → Array index [y, x]
    pub fn from_gray_image(img: &GrayImage, pixel_size: f64) -> Result<Self> {
        let (width, height) = img.dimensions();
        let data = Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
            img.get_pixel(col as u32, row as u32)[0] as f64 / 255.0
        });
        Self::new(data, pixel_size)
    }

    /// Convert any decoded image. Colour is reduced to luma; 16-bit depth
    /// is preserved before scaling to `[0, 1]`.
    pub fn from_dynamic(img: &DynamicImage, pixel_size: f64) -> Result<Self> {
        let luma = img.to_luma16();
        let (width, height) = luma.dimensions();
        let data = Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
            luma.get_pixel(col as u32, row as u32)[0] as f64 / u16::MAX as f64
        });
        Self::new(data, pixel_size)
    }

    /// Decode an image file from disk.
    pub fn load(path: &Path, pixel_size: f64) -> Result<Self> {
        let img = image::open(path)?;
        Self::from_dynamic(&img, pixel_size)
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// (height, width)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// `1 - v` for every pixel; dark spots become bright.
    pub fn invert(&self) -> Self {
        Self {
            data: self.data.mapv(|v| 1.0 - v),
            pixel_size: self.pixel_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{ImageBuffer, Luma};

    #[test]
    fn test_from_gray_image_orientation() {
        let mut img = GrayImage::new(3, 2);
        img.put_pixel(2, 0, Luma([255]));
        img.put_pixel(0, 1, Luma([51]));

        let gray = GrayscaleImage::from_gray_image(&img, 0.005).unwrap();
        assert_eq!(gray.shape(), (2, 3));
        assert_relative_eq!(gray.data[[0, 2]], 1.0);
        assert_relative_eq!(gray.data[[1, 0]], 0.2);
    }

    #[test]
    fn test_from_dynamic_sixteen_bit() {
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(2, 2, |x, _| Luma([if x == 0 { 0 } else { u16::MAX }]));
        let gray = GrayscaleImage::from_dynamic(&DynamicImage::ImageLuma16(img), 1.0).unwrap();

        assert_relative_eq!(gray.data[[0, 0]], 0.0);
        assert_relative_eq!(gray.data[[1, 1]], 1.0);
    }

    #[test]
    fn test_invert() {
        let gray = GrayscaleImage::new(Array2::from_elem((2, 2), 0.25), 1.0).unwrap();
        let inv = gray.invert();
        assert_relative_eq!(inv.data[[1, 1]], 0.75);
        assert_eq!(inv.pixel_size, 1.0);
    }

    #[test]
    fn test_rejects_bad_pixel_size() {
        assert!(GrayscaleImage::new(Array2::zeros((2, 2)), 0.0).is_err());
        assert!(GrayscaleImage::new(Array2::zeros((2, 2)), f64::NAN).is_err());
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("well.png");
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x * 10 + y) as u8]));
        img.save(&path).unwrap();

        let gray = GrayscaleImage::load(&path, 0.0049).unwrap();
        assert_eq!(gray.shape(), (3, 4));
        assert_relative_eq!(gray.data[[2, 3]], 32.0 / 255.0, epsilon = 1e-4);
    }
}
