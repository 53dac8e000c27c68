//! Utility functions.

pub mod image;

pub use image::{load_image, load_images};
