//! Image processing: preprocessing, caching, deduplication and the shared
//! geometry/pixel toolkits the detectors build on.

pub mod cache;
pub mod geometry;
pub mod nms;
pub mod ops;
pub mod preprocess;

pub use cache::PreprocessCache;
pub use nms::{DefectMerger, NmsFilter};
pub use preprocess::{ImagePreprocessor, PreprocessParams, QualityReport};
