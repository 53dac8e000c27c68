//! Image loading and conversion helpers.

use crate::core::errors::InspectError;
use image::{DynamicImage, GrayImage, RgbImage};
use std::path::Path;

/// Converts a DynamicImage to an RgbImage.
pub fn dynamic_to_rgb(img: DynamicImage) -> RgbImage {
    img.to_rgb8()
}

/// Converts a DynamicImage to a GrayImage.
pub fn dynamic_to_gray(img: DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Loads an image from a file path.
///
/// # Errors
///
/// Returns [`InspectError::ImageLoad`] when the file cannot be opened or
/// decoded.
pub fn load_image(path: &Path) -> Result<DynamicImage, InspectError> {
    image::open(path).map_err(InspectError::ImageLoad)
}

/// Loads several images, failing on the first unreadable path.
pub fn load_images<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<DynamicImage>, InspectError> {
    paths.iter().map(|p| load_image(p.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_image_reports_missing_files() {
        let result = load_image(Path::new("/definitely/not/here.png"));
        assert!(matches!(result, Err(InspectError::ImageLoad(_))));
    }

    #[test]
    fn conversions_preserve_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(17, 9));
        assert_eq!(dynamic_to_gray(img.clone()).dimensions(), (17, 9));
        assert_eq!(dynamic_to_rgb(img).dimensions(), (17, 9));
    }
}
