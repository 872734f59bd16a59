//! Image decoding and per-family normalization into model input tensors

use crate::error::PipelineError;
use crate::types::{ImageTensor, NormalizationFamily};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use std::path::Path;
use tracing::debug;

/// ImageNet channel means in BGR order, as used by the caffe-style models
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// Decode an image from disk
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage, PipelineError> {
    let path = path.as_ref();
    image::open(path)
        .map_err(|e| PipelineError::ImageDecodeFailed(format!("{}: {}", path.display(), e)))
}

/// Decode an image from an in-memory buffer (uploads)
pub fn load_image_bytes(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    image::load_from_memory(bytes)
        .map_err(|e| PipelineError::ImageDecodeFailed(format!("bytes input: {}", e)))
}

/// Resizes and normalizes decoded images for a classifier family
#[derive(Debug, Clone)]
pub struct Preprocessor {
    target_size: u32,
}

impl Preprocessor {
    pub fn new(target_size: u32) -> Self {
        Self {
            target_size: target_size.max(1),
        }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Produce a (1, size, size, 3) tensor in `family`'s normalization
    pub fn prepare(&self, image: &DynamicImage, family: NormalizationFamily) -> ImageTensor {
        let size = self.target_size;
        // Triangle is the closest match to area averaging when shrinking
        let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();

        let data = Array4::from_shape_fn((1, size as usize, size as usize, 3), |(_, y, x, c)| {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            normalize(pixel.0, c, family)
        });

        debug!(size = size, family = ?family, "Image preprocessed");
        ImageTensor::new(data, family)
    }
}

fn normalize(rgb: [u8; 3], channel: usize, family: NormalizationFamily) -> f32 {
    match family {
        NormalizationFamily::Caffe => {
            // Output channel order is BGR
            let value = rgb[2 - channel] as f32;
            value - CAFFE_MEAN_BGR[channel]
        }
        NormalizationFamily::Passthrough => rgb[channel] as f32,
        NormalizationFamily::SignedUnit => rgb[channel] as f32 / 127.5 - 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([r, g, b])))
    }

    #[test]
    fn test_caffe_normalization() {
        let tensor = Preprocessor::new(8).prepare(&solid(200, 100, 50), NormalizationFamily::Caffe);
        let view = tensor.view();
        assert_eq!(view.shape(), &[1, 8, 8, 3]);
        assert!((view[[0, 0, 0, 0]] - (50.0 - 103.939)).abs() < 1e-3);
        assert!((view[[0, 3, 3, 1]] - (100.0 - 116.779)).abs() < 1e-3);
        assert!((view[[0, 7, 7, 2]] - (200.0 - 123.68)).abs() < 1e-3);
        assert_eq!(tensor.family(), NormalizationFamily::Caffe);
    }

    #[test]
    fn test_signed_unit_and_passthrough() {
        let image = solid(255, 0, 51);
        let signed = Preprocessor::new(4).prepare(&image, NormalizationFamily::SignedUnit);
        assert!((signed.view()[[0, 1, 1, 0]] - 1.0).abs() < 1e-6);
        assert!((signed.view()[[0, 1, 1, 1]] + 1.0).abs() < 1e-6);

        let raw = Preprocessor::new(4).prepare(&image, NormalizationFamily::Passthrough);
        assert_eq!(raw.view()[[0, 2, 2, 2]], 51.0);
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(
            load_image_bytes(b"not an image"),
            Err(PipelineError::ImageDecodeFailed(_))
        ));
        assert!(matches!(
            load_image("/nonexistent/xray.png"),
            Err(PipelineError::ImageDecodeFailed(_))
        ));
    }

    #[test]
    fn test_png_round_trip_from_bytes() {
        let mut bytes = std::io::Cursor::new(Vec::new());
        solid(10, 20, 30)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        let decoded = load_image_bytes(bytes.get_ref()).unwrap();
        assert_eq!(decoded.width(), 40);
        assert_eq!(decoded.height(), 30);
    }
}
