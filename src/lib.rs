//! # surfscan
//!
//! A surface-defect inspection library for manufacturing imagery. It
//! detects scratches, cracks, foreign material and out-of-tolerance
//! dimensions with classical computer-vision pipelines, optionally adds an
//! ONNX-backed learned detector, then deduplicates, scores and reports the
//! findings.
//!
//! ## Components
//!
//! * [`core`] - the detector capability trait, parameter bags, errors and
//!   the constructor registry
//! * [`domain`] - defect records and detection results
//! * [`detectors`] - the scratch/crack/foreign/dimension detectors and the
//!   model-backed learned detector
//! * [`processors`] - adaptive preprocessing, the preprocess cache, NMS and
//!   distance merging, shared geometry
//! * [`scoring`] - weighted scoring, grades and pass/fail verdicts
//! * [`pipeline`] - the [`DetectorManager`](pipeline::DetectorManager)
//!   facade, typed settings and observer callbacks
//! * [`utils`] - image loading helpers
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use surfscan::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = DetectorManager::new();
//! manager.initialize(&DetectorSettings::default());
//!
//! let image = surfscan::utils::load_image(std::path::Path::new("part.png"))?;
//! let combined = manager.detect_all(&image);
//!
//! let scorer = DefectScorer::new();
//! let verdict = scorer.score(&combined.all_defects);
//! println!("{} ({})", verdict.summary, if verdict.is_pass { "PASS" } else { "FAIL" });
//! # Ok(())
//! # }
//! ```
//!
//! Detection runs sequentially on the calling thread; distinct detector
//! instances may run concurrently against different images. The
//! [`processors::PreprocessCache`] is the only internally synchronized
//! component.

pub mod core;
pub mod detectors;
pub mod domain;
pub mod pipeline;
pub mod processors;
pub mod scoring;
pub mod utils;

/// Prelude with the types most integrations need.
pub mod prelude {
    pub use crate::core::{DefectDetector, DetectorFactory, InspectError, InspectResult, ParamMap};
    pub use crate::domain::{CombinedResult, DefectRecord, DetectionResult, PixelRect};
    pub use crate::pipeline::{DetectorManager, DetectorSettings, InspectionObserver};
    pub use crate::processors::{DefectMerger, ImagePreprocessor, NmsFilter, PreprocessCache};
    pub use crate::scoring::{DefectScorer, ScoringResult, SeverityGrade};
}
