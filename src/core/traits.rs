//! The detector capability trait and its shared implementation state.
//!
//! Every defect detector exposes the same surface: identity, lifecycle,
//! parameter management, enable/threshold toggles and a synchronous
//! `detect()` call. The repeated plumbing lives in [`DetectorCommon`];
//! concrete detectors embed one and implement the algorithm.

use crate::core::params::{FromParamValue, ParamMap};
use crate::domain::{DefectRecord, DetectionResult};
use image::DynamicImage;

/// Shared mutable state embedded by every detector.
///
/// Holds the parameter bag, the enabled flag and the confidence threshold.
/// Parameters are re-read from the bag at the top of every `detect()` call,
/// never cached across calls, so external reconfiguration takes effect on
/// the next invocation.
#[derive(Debug, Clone)]
pub struct DetectorCommon {
    /// Whether `initialize()` has completed.
    pub initialized: bool,
    /// Whether the detector participates in multi-detector passes.
    pub enabled: bool,
    /// Minimum confidence a record must carry to be emitted, in `[0, 1]`.
    pub confidence_threshold: f64,
    /// The externally writable parameter bag.
    pub params: ParamMap,
}

impl Default for DetectorCommon {
    fn default() -> Self {
        Self {
            initialized: false,
            enabled: true,
            confidence_threshold: 0.5,
            params: ParamMap::new(),
        }
    }
}

impl DetectorCommon {
    /// Creates common state with a non-default confidence threshold.
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            confidence_threshold: threshold.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Clamps and stores the confidence threshold.
    pub fn set_confidence_threshold(&mut self, threshold: f64) {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    /// Keeps only records whose confidence reaches the active threshold.
    pub fn filter_by_confidence(&self, defects: Vec<DefectRecord>) -> Vec<DefectRecord> {
        defects
            .into_iter()
            .filter(|d| d.confidence >= self.confidence_threshold)
            .collect()
    }

    /// Typed parameter accessor with a default value.
    pub fn param_or<T: FromParamValue>(&self, key: &str, default: T) -> T {
        self.params.get_or(key, default)
    }
}

/// Capability interface implemented by every defect detector.
///
/// Detectors are synchronous and single-threaded: a `detect()` call blocks
/// the calling thread for a duration proportional to image size and
/// algorithm cost. Distinct instances may run concurrently against
/// different images; a single instance must not be reconfigured while it is
/// detecting.
pub trait DefectDetector: Send {
    /// Human-readable detector name.
    fn name(&self) -> &str;

    /// Stable registry key ("scratch", "crack", ...).
    fn kind(&self) -> &'static str;

    /// Shared state accessor.
    fn common(&self) -> &DetectorCommon;

    /// Mutable shared state accessor.
    fn common_mut(&mut self) -> &mut DetectorCommon;

    /// Prepares the detector for detection. Returns false on failure, in
    /// which case the detector stays uninitialized.
    fn initialize(&mut self) -> bool;

    /// Runs detection on one image. Failures are reported inside the result,
    /// never as a panic or error return.
    fn detect(&mut self, image: &DynamicImage) -> DetectionResult;

    /// Releases any held resources and marks the detector uninitialized.
    fn release(&mut self) {
        self.common_mut().initialized = false;
    }

    /// Whether `initialize()` has completed.
    fn is_initialized(&self) -> bool {
        self.common().initialized
    }

    /// Replaces the parameter bag. Takes effect on the next `detect()`.
    fn set_params(&mut self, params: ParamMap) {
        self.common_mut().params = params;
    }

    /// Returns a copy of the parameter bag.
    fn params(&self) -> ParamMap {
        self.common().params.clone()
    }

    /// Enables or disables the detector for multi-detector passes.
    fn set_enabled(&mut self, enabled: bool) {
        self.common_mut().enabled = enabled;
    }

    /// Whether the detector is enabled.
    fn is_enabled(&self) -> bool {
        self.common().enabled
    }

    /// Sets the confidence threshold, clamped to `[0, 1]`.
    fn set_confidence_threshold(&mut self, threshold: f64) {
        self.common_mut().set_confidence_threshold(threshold);
    }

    /// The active confidence threshold.
    fn confidence_threshold(&self) -> f64 {
        self.common().confidence_threshold
    }
}

/// Returns true when an image has a zero dimension.
pub fn image_is_empty(image: &DynamicImage) -> bool {
    image.width() == 0 || image.height() == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PixelRect;

    #[test]
    fn threshold_is_clamped() {
        let mut common = DetectorCommon::default();
        common.set_confidence_threshold(1.5);
        assert_eq!(common.confidence_threshold, 1.0);
        common.set_confidence_threshold(-0.2);
        assert_eq!(common.confidence_threshold, 0.0);
    }

    #[test]
    fn filter_by_confidence_keeps_boundary_value() {
        let mut common = DetectorCommon::default();
        common.set_confidence_threshold(0.5);

        let mut low = DefectRecord::new(0, "Scratch", PixelRect::new(0, 0, 5, 5));
        low.confidence = 0.49;
        let mut exact = DefectRecord::new(0, "Scratch", PixelRect::new(0, 0, 5, 5));
        exact.confidence = 0.5;
        let mut high = DefectRecord::new(0, "Scratch", PixelRect::new(0, 0, 5, 5));
        high.confidence = 0.9;

        let kept = common.filter_by_confidence(vec![low, exact, high]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|d| d.confidence >= 0.5));
    }
}
