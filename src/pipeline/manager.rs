//! The detection facade: owns the detector set and coordinates passes.
//!
//! The manager instantiates built-in detectors through the factory, applies
//! typed settings to their parameter bags, runs every enabled detector
//! sequentially over one image, and aggregates the per-detector results
//! into a [`CombinedResult`]. Individual detector failures are tolerated
//! and recorded; only an invalid input image fails the whole pass.

use crate::core::registry::{
    DetectorFactory, KIND_CRACK, KIND_DIMENSION, KIND_FOREIGN, KIND_LEARNED, KIND_SCRATCH,
};
use crate::core::traits::{image_is_empty, DefectDetector};
use crate::domain::{CombinedResult, DetectionResult};
use crate::pipeline::observer::InspectionObserver;
use crate::pipeline::settings::{
    CrackSettings, DetectorSettings, DimensionSettings, ForeignSettings, LearnedSettings,
    ScratchSettings,
};
use image::DynamicImage;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Owner and coordinator of the detector set.
pub struct DetectorManager {
    detectors: BTreeMap<String, Box<dyn DefectDetector>>,
    factory: DetectorFactory,
    observers: Vec<Box<dyn InspectionObserver>>,
    initialized: bool,
}

impl std::fmt::Debug for DetectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorManager")
            .field("detectors", &self.detector_names())
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl Default for DetectorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorManager {
    /// Creates a manager over the built-in detector factory.
    pub fn new() -> Self {
        Self::with_factory(DetectorFactory::with_builtins())
    }

    /// Creates a manager over a caller-supplied factory.
    pub fn with_factory(factory: DetectorFactory) -> Self {
        Self {
            detectors: BTreeMap::new(),
            factory,
            observers: Vec::new(),
            initialized: false,
        }
    }

    /// Registers an observer for lifecycle and detection notifications.
    pub fn add_observer(&mut self, observer: Box<dyn InspectionObserver>) {
        self.observers.push(observer);
    }

    /// Instantiates the built-in detectors, applies the given settings and
    /// initializes every detector. A detector that fails to initialize is
    /// kept (disabled detections will simply fail fast) and logged.
    pub fn initialize(&mut self, settings: &DetectorSettings) -> bool {
        if self.initialized {
            return true;
        }
        info!("detector manager initializing");

        for kind in [
            KIND_SCRATCH,
            KIND_CRACK,
            KIND_FOREIGN,
            KIND_DIMENSION,
            KIND_LEARNED,
        ] {
            if let Some(detector) = self.factory.create(kind) {
                self.add_detector(kind, detector);
            }
        }

        self.apply_settings(settings);

        for (name, detector) in self.detectors.iter_mut() {
            if !detector.initialize() {
                warn!(detector = %name, "failed to initialize detector");
            }
        }

        self.initialized = true;
        info!(count = self.detectors.len(), "detector manager initialized");
        true
    }

    /// Releases every detector and empties the set.
    pub fn release(&mut self) {
        for detector in self.detectors.values_mut() {
            detector.release();
        }
        self.detectors.clear();
        self.initialized = false;
        info!("detector manager released");
    }

    /// Adds a detector under a name, replacing any existing entry.
    pub fn add_detector(&mut self, name: &str, detector: Box<dyn DefectDetector>) {
        self.detectors.insert(name.to_string(), detector);
        for observer in self.observers.iter_mut() {
            observer.detector_added(name);
        }
        debug!(detector = %name, "detector added");
    }

    /// Removes and releases a detector.
    pub fn remove_detector(&mut self, name: &str) {
        if let Some(mut detector) = self.detectors.remove(name) {
            detector.release();
            for observer in self.observers.iter_mut() {
                observer.detector_removed(name);
            }
            debug!(detector = %name, "detector removed");
        }
    }

    /// Shared access to a detector by name.
    pub fn detector(&self, name: &str) -> Option<&dyn DefectDetector> {
        self.detectors.get(name).map(|d| d.as_ref())
    }

    /// Mutable access to a detector by name.
    pub fn detector_mut(&mut self, name: &str) -> Option<&mut Box<dyn DefectDetector>> {
        self.detectors.get_mut(name)
    }

    /// Names of the owned detectors in sorted order.
    pub fn detector_names(&self) -> Vec<String> {
        self.detectors.keys().cloned().collect()
    }

    /// Enables or disables a named detector.
    pub fn set_detector_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(detector) = self.detectors.get_mut(name) {
            detector.set_enabled(enabled);
        }
    }

    /// Whether a named detector exists and is enabled.
    pub fn is_detector_enabled(&self, name: &str) -> bool {
        self.detector(name).map(|d| d.is_enabled()).unwrap_or(false)
    }

    /// Applies typed settings to the built-in detectors (enabled flags and
    /// parameter bags). Unknown detectors are left untouched.
    pub fn apply_settings(&mut self, settings: &DetectorSettings) {
        if let Some(d) = self.detectors.get_mut(KIND_SCRATCH) {
            d.set_enabled(settings.scratch.enabled);
            d.set_params(settings.scratch.to_params());
        }
        if let Some(d) = self.detectors.get_mut(KIND_CRACK) {
            d.set_enabled(settings.crack.enabled);
            d.set_params(settings.crack.to_params());
        }
        if let Some(d) = self.detectors.get_mut(KIND_FOREIGN) {
            d.set_enabled(settings.foreign.enabled);
            d.set_params(settings.foreign.to_params());
        }
        if let Some(d) = self.detectors.get_mut(KIND_DIMENSION) {
            d.set_enabled(settings.dimension.enabled);
            d.set_params(settings.dimension.to_params());
        }
        if let Some(d) = self.detectors.get_mut(KIND_LEARNED) {
            d.set_enabled(settings.learned.enabled);
            d.set_params(settings.learned.to_params());
        }
        debug!("detector settings applied");
    }

    /// Collects the current detector state back into typed settings.
    pub fn collect_settings(&self) -> DetectorSettings {
        let mut settings = DetectorSettings::default();
        if let Some(d) = self.detector(KIND_SCRATCH) {
            settings.scratch = ScratchSettings::from_params(&d.params(), d.is_enabled());
        }
        if let Some(d) = self.detector(KIND_CRACK) {
            settings.crack = CrackSettings::from_params(&d.params(), d.is_enabled());
        }
        if let Some(d) = self.detector(KIND_FOREIGN) {
            settings.foreign = ForeignSettings::from_params(&d.params(), d.is_enabled());
        }
        if let Some(d) = self.detector(KIND_DIMENSION) {
            settings.dimension = DimensionSettings::from_params(&d.params(), d.is_enabled());
        }
        if let Some(d) = self.detector(KIND_LEARNED) {
            settings.learned = LearnedSettings::from_params(&d.params(), d.is_enabled());
        }
        settings
    }

    /// Runs every enabled detector sequentially over one image.
    ///
    /// An empty image fails the whole pass; an individual detector failure
    /// is recorded against its named result and the pass continues.
    pub fn detect_all(&mut self, image: &DynamicImage) -> CombinedResult {
        let started = Instant::now();
        let mut result = CombinedResult {
            success: true,
            ..Default::default()
        };

        for observer in self.observers.iter_mut() {
            observer.detection_started();
        }

        if image_is_empty(image) {
            result.success = false;
            result.error_message = "Empty input image".to_string();
            for observer in self.observers.iter_mut() {
                observer.detection_finished(&result);
            }
            return result;
        }

        for (name, detector) in self.detectors.iter_mut() {
            if !detector.is_enabled() {
                continue;
            }

            let detection = detector.detect(image);
            if detection.success {
                result.all_defects.extend(detection.defects.iter().cloned());
            } else {
                warn!(detector = %name, error = %detection.error_message, "detector failed");
            }

            for observer in self.observers.iter_mut() {
                observer.detector_result(name, &detection);
            }
            result.detector_results.insert(name.clone(), detection);
        }

        result.total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        for observer in self.observers.iter_mut() {
            observer.detection_finished(&result);
        }

        debug!(
            defects = result.all_defects.len(),
            total_ms = result.total_time_ms,
            "detection pass complete"
        );
        result
    }

    /// Runs a single named detector; unknown names yield an error result.
    pub fn detect_with(&mut self, name: &str, image: &DynamicImage) -> DetectionResult {
        match self.detectors.get_mut(name) {
            Some(detector) => detector.detect(image),
            None => DetectionResult::error(format!("Detector not found: {name}")),
        }
    }
}

impl Drop for DetectorManager {
    fn drop(&mut self) {
        if self.initialized {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::DetectorCommon;
    use crate::domain::{DefectRecord, PixelRect};
    use image::{GrayImage, Luma};
    use std::sync::{Arc, Mutex};

    fn gray_image(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([v])))
    }

    fn initialized_manager() -> DetectorManager {
        let mut manager = DetectorManager::new();
        assert!(manager.initialize(&DetectorSettings::default()));
        manager
    }

    #[test]
    fn initialize_registers_builtins() {
        let manager = initialized_manager();
        let names = manager.detector_names();
        for kind in ["scratch", "crack", "foreign", "dimension", "learned"] {
            assert!(names.iter().any(|n| n == kind), "missing {kind}");
        }
    }

    #[test]
    fn detect_all_rejects_empty_image() {
        let mut manager = initialized_manager();
        let result = manager.detect_all(&gray_image(0, 0, 0));
        assert!(!result.success);
        assert!(!result.error_message.is_empty());
        assert!(result.all_defects.is_empty());
    }

    #[test]
    fn detect_all_runs_enabled_detectors_and_collects_named_results() {
        let mut manager = initialized_manager();
        // The learned detector is disabled by default (no model).
        let result = manager.detect_all(&gray_image(96, 96, 128));
        assert!(result.success);
        assert!(result.detector_results.contains_key("scratch"));
        assert!(result.detector_results.contains_key("crack"));
        assert!(result.detector_results.contains_key("foreign"));
        assert!(result.detector_results.contains_key("dimension"));
        assert!(!result.detector_results.contains_key("learned"));
        assert!(result.total_time_ms >= 0.0);
    }

    #[test]
    fn disabling_a_detector_skips_it() {
        let mut manager = initialized_manager();
        manager.set_detector_enabled("scratch", false);
        let result = manager.detect_all(&gray_image(64, 64, 128));
        assert!(result.success);
        assert!(!result.detector_results.contains_key("scratch"));
    }

    #[test]
    fn detect_with_unknown_name_is_an_error_result() {
        let mut manager = initialized_manager();
        let result = manager.detect_with("bogus", &gray_image(32, 32, 128));
        assert!(!result.success);
        assert!(result.error_message.contains("bogus"));
    }

    #[test]
    fn settings_round_trip_preserves_flags_and_values() {
        let mut manager = initialized_manager();

        let mut settings = DetectorSettings::default();
        settings.scratch.enabled = false;
        settings.scratch.sensitivity = 33;
        settings.crack.min_area = 77;
        settings.dimension.tolerance = 2.5;
        settings.foreign.contrast = 0.45;
        settings.learned.model_path = "models/defects.onnx".to_string();
        manager.apply_settings(&settings);

        let collected = manager.collect_settings();
        assert_eq!(collected, settings);
    }

    /// A detector that always fails, for partial-failure aggregation tests.
    #[derive(Debug, Default)]
    struct FailingDetector {
        common: DetectorCommon,
    }

    impl DefectDetector for FailingDetector {
        fn name(&self) -> &str {
            "Failing Detector"
        }
        fn kind(&self) -> &'static str {
            "failing"
        }
        fn common(&self) -> &DetectorCommon {
            &self.common
        }
        fn common_mut(&mut self) -> &mut DetectorCommon {
            &mut self.common
        }
        fn initialize(&mut self) -> bool {
            self.common.initialized = true;
            true
        }
        fn detect(&mut self, _image: &DynamicImage) -> DetectionResult {
            DetectionResult::error("synthetic failure")
        }
    }

    /// A detector that always reports one defect.
    #[derive(Debug, Default)]
    struct OneDefectDetector {
        common: DetectorCommon,
    }

    impl DefectDetector for OneDefectDetector {
        fn name(&self) -> &str {
            "One Defect Detector"
        }
        fn kind(&self) -> &'static str {
            "one"
        }
        fn common(&self) -> &DetectorCommon {
            &self.common
        }
        fn common_mut(&mut self) -> &mut DetectorCommon {
            &mut self.common
        }
        fn initialize(&mut self) -> bool {
            self.common.initialized = true;
            true
        }
        fn detect(&mut self, _image: &DynamicImage) -> DetectionResult {
            let mut record = DefectRecord::new(9, "Synthetic", PixelRect::new(1, 1, 4, 4));
            record.confidence = 0.9;
            DetectionResult::success(vec![record], 0.1)
        }
    }

    #[test]
    fn one_failing_detector_does_not_sink_the_pass() {
        let mut manager = DetectorManager::with_factory(DetectorFactory::new());
        manager.add_detector("failing", Box::new(FailingDetector::default()));
        manager.add_detector("one", Box::new(OneDefectDetector::default()));

        let result = manager.detect_all(&gray_image(32, 32, 100));
        assert!(result.success, "pass succeeds despite one failure");
        assert_eq!(result.all_defects.len(), 1);
        assert!(!result.detector_results["failing"].success);
        assert!(result.detector_results["one"].success);
    }

    #[derive(Default)]
    struct EventLog {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl InspectionObserver for EventLog {
        fn detector_added(&mut self, name: &str) {
            self.events.lock().unwrap().push(format!("added:{name}"));
        }
        fn detection_started(&mut self) {
            self.events.lock().unwrap().push("started".to_string());
        }
        fn detector_result(&mut self, name: &str, result: &DetectionResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("result:{name}:{}", result.success));
        }
        fn detection_finished(&mut self, _result: &CombinedResult) {
            self.events.lock().unwrap().push("finished".to_string());
        }
    }

    #[test]
    fn observers_fire_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut manager = DetectorManager::with_factory(DetectorFactory::new());
        manager.add_observer(Box::new(EventLog {
            events: events.clone(),
        }));
        manager.add_detector("one", Box::new(OneDefectDetector::default()));
        manager.detect_all(&gray_image(16, 16, 10));

        let log = events.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "added:one".to_string(),
                "started".to_string(),
                "result:one:true".to_string(),
                "finished".to_string(),
            ]
        );
    }
}
