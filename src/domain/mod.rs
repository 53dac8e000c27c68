//! Domain value types exchanged between detectors and their consumers.

pub mod defect;

pub use defect::{CombinedResult, DefectRecord, DetectionResult, PixelRect};
