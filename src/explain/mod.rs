//! Saliency maps and their visualization

pub mod render;
pub mod saliency;

pub use render::{grayscale, render, render_path, Interpolation, RenderOptions};
pub use saliency::{compute_saliency, SaliencyOutput};
