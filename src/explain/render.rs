//! Heatmap overlay rendering
//!
//! Rendering is best-effort: every failure path returns `None` and the
//! caller reports "no visualization available".

use crate::preprocess::load_image;
use crate::types::SaliencyMap;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Smooth up-sampling filters (no nearest-neighbour)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    CatmullRom,
    Triangle,
    Gaussian,
    Lanczos3,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::CatmullRom => FilterType::CatmullRom,
            Interpolation::Triangle => FilterType::Triangle,
            Interpolation::Gaussian => FilterType::Gaussian,
            Interpolation::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Overlay parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Heatmap opacity, strictly inside (0, 1)
    pub alpha: f32,
    pub interpolation: Interpolation,
    /// Append a vertical low-to-high color scale
    pub with_legend: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            alpha: 0.45,
            interpolation: Interpolation::CatmullRom,
            with_legend: true,
        }
    }
}

const LEGEND_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const LEGEND_INK: Rgb<u8> = Rgb([0, 0, 0]);

/// Cold-to-hot palette: dark blue at 0, dark red at 255
pub fn jet(level: u8) -> Rgb<u8> {
    let v = level as f32 / 255.0;
    let channel = |offset: f32| ((1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Raw map as an 8-bit grayscale image at its native resolution
pub fn grayscale(map: &SaliencyMap) -> GrayImage {
    let (h, w) = map.dims();
    let values = map.values();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([quantize(values[[y as usize, x as usize]])])
    })
}

fn quantize(v: f32) -> u8 {
    (255.0 * v.clamp(0.0, 1.0)) as u8
}

/// Resample the map to `width` x `height` and quantize to 0..=255
fn resample(map: &SaliencyMap, width: u32, height: u32, interpolation: Interpolation) -> GrayImage {
    if map.is_degenerate() {
        return GrayImage::new(width, height);
    }

    let (h, w) = map.dims();
    let source: ImageBuffer<Luma<f32>, Vec<f32>> =
        match ImageBuffer::from_raw(w as u32, h as u32, map.values().iter().copied().collect()) {
            Some(buffer) => buffer,
            None => return GrayImage::new(width, height),
        };

    let resized = imageops::resize(&source, width, height, interpolation.filter());
    GrayImage::from_fn(width, height, |x, y| Luma([quantize(resized.get_pixel(x, y)[0])]))
}

/// Blend a color-mapped `map` over `reference` at the reference's resolution.
pub fn render(map: &SaliencyMap, reference: &RgbImage, options: &RenderOptions) -> Option<RgbImage> {
    if map.is_empty() {
        debug!("Empty saliency map, nothing to render");
        return None;
    }
    if !(options.alpha > 0.0 && options.alpha < 1.0) {
        warn!(alpha = options.alpha, "Overlay alpha outside (0, 1)");
        return None;
    }

    let (width, height) = reference.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let levels = resample(map, width, height, options.interpolation);
    let alpha = options.alpha;
    let overlay = RgbImage::from_fn(width, height, |x, y| {
        let base = reference.get_pixel(x, y);
        let heat = jet(levels.get_pixel(x, y)[0]);
        let mut blended = [0u8; 3];
        for c in 0..3 {
            let v = (1.0 - alpha) * base[c] as f32 + alpha * heat[c] as f32;
            blended[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(blended)
    });

    if options.with_legend {
        Some(attach_legend(&overlay))
    } else {
        Some(overlay)
    }
}

/// Load the reference image from disk, then [`render`]
pub fn render_path<P: AsRef<Path>>(
    map: &SaliencyMap,
    reference: P,
    options: &RenderOptions,
) -> Option<RgbImage> {
    match load_image(reference.as_ref()) {
        Ok(image) => render(map, &image.to_rgb8(), options),
        Err(e) => {
            warn!(path = %reference.as_ref().display(), error = %e, "Reference image unavailable");
            None
        }
    }
}

/// 3x5 bitmaps for the legend labels, one row per byte (low 3 bits)
fn glyph(c: char) -> [u8; 5] {
    match c {
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b101, 0b111, 0b101],
        _ => [0; 5],
    }
}

fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    (n * 4).saturating_sub(1) * scale
}

fn draw_label(canvas: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32) {
    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as u32 * 4 * scale;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..3u32 {
                if bits & (0b100 >> col) != 0 {
                    let px = origin_x + col * scale;
                    let py = y + row as u32 * scale;
                    draw_filled_rect_mut(
                        canvas,
                        Rect::at(px as i32, py as i32).of_size(scale, scale),
                        LEGEND_INK,
                    );
                }
            }
        }
    }
}

/// Overlay plus a vertical color bar labelled HIGH (top) to LOW (bottom)
fn attach_legend(overlay: &RgbImage) -> RgbImage {
    let (width, height) = overlay.dimensions();
    let scale = (height / 160).max(1);
    let pad = 2 * scale;
    let bar_width = (width / 20).max(6);
    let label_width = text_width("HIGH", scale);

    let canvas_width = width + pad + bar_width + pad + label_width + pad;
    let mut canvas = RgbImage::from_pixel(canvas_width, height, LEGEND_BACKGROUND);
    imageops::replace(&mut canvas, overlay, 0, 0);

    let bar_x = width + pad;
    let bar_top = if height > 4 * pad { pad } else { 0 };
    let bar_len = height - 2 * bar_top;

    for dy in 0..bar_len {
        let level = if bar_len > 1 {
            (255 * (bar_len - 1 - dy) / (bar_len - 1)) as u8
        } else {
            255
        };
        let color = jet(level);
        for dx in 0..bar_width {
            canvas.put_pixel(bar_x + dx, bar_top + dy, color);
        }
    }
    draw_hollow_rect_mut(
        &mut canvas,
        Rect::at(bar_x as i32, bar_top as i32).of_size(bar_width, bar_len),
        LEGEND_INK,
    );

    let label_x = bar_x + bar_width + pad;
    draw_label(&mut canvas, "HIGH", label_x, bar_top, scale);
    let low_y = (bar_top + bar_len).saturating_sub(5 * scale);
    draw_label(&mut canvas, "LOW", label_x, low_y, scale);

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn map() -> SaliencyMap {
        SaliencyMap::from_raw(array![[0.0, 0.5], [1.0, 0.25]])
    }

    fn reference() -> RgbImage {
        RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 4) as u8, (y * 8) as u8, 100]))
    }

    fn no_legend() -> RenderOptions {
        RenderOptions {
            with_legend: false,
            ..RenderOptions::default()
        }
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0), Rgb([0, 0, 128]));
        assert_eq!(jet(255), Rgb([128, 0, 0]));
        let mid = jet(128);
        assert!(mid[1] > 200);
    }

    #[test]
    fn test_render_matches_reference_size() {
        let rendered = render(&map(), &reference(), &no_legend()).unwrap();
        assert_eq!(rendered.dimensions(), (32, 24));
    }

    #[test]
    fn test_render_is_deterministic() {
        let options = RenderOptions::default();
        let first = render(&map(), &reference(), &options).unwrap();
        let second = render(&map(), &reference(), &options).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn test_blend_formula_on_zero_map() {
        let zero = SaliencyMap::from_raw(Array2::zeros((3, 3)));
        let base = RgbImage::from_pixel(4, 4, Rgb([200, 100, 50]));
        let options = RenderOptions {
            alpha: 0.5,
            ..no_legend()
        };
        let rendered = render(&zero, &base, &options).unwrap();

        // jet(0) = (0, 0, 128)
        assert_eq!(rendered.get_pixel(2, 2), &Rgb([100, 50, 89]));
    }

    #[test]
    fn test_legend_widens_canvas() {
        let rendered = render(&map(), &reference(), &RenderOptions::default()).unwrap();
        let (w, h) = rendered.dimensions();
        assert!(w > 32);
        assert_eq!(h, 24);
        // Bar top is hot, bottom is cold
        let bar_x = 32 + 2 + 3;
        let top = rendered.get_pixel(bar_x, 3);
        let bottom = rendered.get_pixel(bar_x, 20);
        assert!(top[0] > top[2]);
        assert!(bottom[2] > bottom[0]);
    }

    #[test]
    fn test_empty_map_and_bad_alpha() {
        let empty = SaliencyMap::from_raw(Array2::zeros((0, 0)));
        assert!(render(&empty, &reference(), &no_legend()).is_none());

        let options = RenderOptions {
            alpha: 1.0,
            ..no_legend()
        };
        assert!(render(&map(), &reference(), &options).is_none());
    }

    #[test]
    fn test_missing_reference_is_none() {
        assert!(render_path(&map(), "/nonexistent/xray.jpeg", &no_legend()).is_none());
    }

    #[test]
    fn test_grayscale_export() {
        let gray = grayscale(&map());
        assert_eq!(gray.dimensions(), (2, 2));
        assert_eq!(gray.get_pixel(0, 1)[0], 255);
        assert_eq!(gray.get_pixel(1, 0)[0], 127);
    }
}
