//! Model-backed detection through ONNX Runtime.
//!
//! Wraps a pretrained YOLO-family object detection network. The image is
//! letterbox-resized into the model's fixed input, normalized to an NCHW
//! float tensor and run through an `ort` session; raw output rows are
//! decoded (object confidence times best class score), inverse-mapped
//! through the letterbox transform, clamped to image bounds and passed
//! through a standard NMS before confidence filtering. Missing or
//! unparseable model files leave the detector uninitialized; inference
//! failures become error results rather than panics.

use crate::core::errors::{InspectError, InspectResult};
use crate::core::registry::KIND_LEARNED;
use crate::core::traits::{image_is_empty, DefectDetector, DetectorCommon};
use crate::domain::{DefectRecord, DetectionResult, PixelRect};
use crate::processors::nms::NmsFilter;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;
use ort::logging::LogLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const CLASS_ID_BASE: i32 = 100;

/// Default label table of the bundled defect models.
const DEFAULT_CLASSES: [&str; 6] = ["scratch", "crack", "foreign", "stain", "dent", "hole"];

/// Letterbox padding fill value.
const PAD_COLOR: u8 = 114;

/// Geometry of one letterbox resize, needed to map detections back.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LetterboxTransform {
    scale: f64,
    pad_x: f64,
    pad_y: f64,
}

/// Detector running a pretrained object-detection network.
pub struct LearnedDetector {
    common: DetectorCommon,
    session: Option<Session>,
    input_name: String,
    output_name: String,
    class_names: Vec<String>,
    model_path: String,
    use_gpu: bool,
}

impl std::fmt::Debug for LearnedDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnedDetector")
            .field("model_path", &self.model_path)
            .field("loaded", &self.session.is_some())
            .field("classes", &self.class_names.len())
            .field("use_gpu", &self.use_gpu)
            .finish()
    }
}

impl Default for LearnedDetector {
    fn default() -> Self {
        Self {
            common: DetectorCommon::default(),
            session: None,
            input_name: "images".to_string(),
            output_name: String::new(),
            class_names: DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect(),
            model_path: String::new(),
            use_gpu: false,
        }
    }
}

impl LearnedDetector {
    /// Creates an unloaded learned detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the class label table.
    pub fn set_class_names(&mut self, names: Vec<String>) {
        self.class_names = names;
    }

    /// One-line description of the loaded model, or a placeholder when no
    /// model is loaded.
    pub fn model_info(&self) -> String {
        if self.session.is_none() {
            return "No model loaded".to_string();
        }
        let file = Path::new(&self.model_path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(&self.model_path);
        let (w, h) = self.input_size();
        format!(
            "Model: {file}, Input: {w}x{h}, Classes: {}, Backend: {}",
            self.class_names.len(),
            if self.use_gpu { "accelerated" } else { "CPU" },
        )
    }

    fn input_size(&self) -> (u32, u32) {
        (
            self.common.param_or("inputWidth", 640u32).max(32),
            self.common.param_or("inputHeight", 640u32).max(32),
        )
    }

    fn build_session(path: &str, use_gpu: bool) -> InspectResult<Session> {
        let mut builder = Session::builder()?.with_log_level(LogLevel::Error)?;
        if use_gpu {
            builder = Self::with_accelerated_provider(builder)?;
        }
        builder
            .commit_from_file(path)
            .map_err(|e| InspectError::model_load(path, e.to_string()))
    }

    #[cfg(feature = "cuda")]
    fn with_accelerated_provider(
        builder: ort::session::builder::SessionBuilder,
    ) -> InspectResult<ort::session::builder::SessionBuilder> {
        Ok(builder.with_execution_providers([
            ort::execution_providers::CUDAExecutionProvider::default().build(),
        ])?)
    }

    #[cfg(not(feature = "cuda"))]
    fn with_accelerated_provider(
        builder: ort::session::builder::SessionBuilder,
    ) -> InspectResult<ort::session::builder::SessionBuilder> {
        warn!("accelerated backend requested but no GPU feature is enabled, using CPU");
        Ok(builder)
    }

    /// Letterbox resize preserving aspect ratio, padding with neutral gray.
    fn letterbox(image: &RgbImage, target_w: u32, target_h: u32) -> (RgbImage, LetterboxTransform) {
        let (iw, ih) = image.dimensions();
        let scale = (target_w as f64 / iw as f64).min(target_h as f64 / ih as f64);
        let new_w = ((iw as f64 * scale) as u32).max(1);
        let new_h = ((ih as f64 * scale) as u32).max(1);

        let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
        let pad_x = (target_w - new_w) / 2;
        let pad_y = (target_h - new_h) / 2;

        let mut canvas = RgbImage::from_pixel(target_w, target_h, Rgb([PAD_COLOR; 3]));
        imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        (
            canvas,
            LetterboxTransform {
                scale,
                pad_x: pad_x as f64,
                pad_y: pad_y as f64,
            },
        )
    }

    /// Normalizes the letterboxed image into an NCHW float tensor.
    fn to_tensor(image: &RgbImage) -> Array4<f32> {
        let (w, h) = image.dimensions();
        let mut tensor = Array4::zeros((1, 3, h as usize, w as usize));
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }
        tensor
    }

    /// Decodes raw output rows `[cx, cy, w, h, obj, class scores...]` into
    /// records in original-image coordinates.
    fn decode_rows(
        &self,
        data: &[f32],
        rows: usize,
        row_len: usize,
        transform: LetterboxTransform,
        image_w: u32,
        image_h: u32,
        confidence_threshold: f64,
    ) -> Vec<DefectRecord> {
        let mut records = Vec::new();
        if row_len < 6 {
            return records;
        }
        let num_classes = row_len - 5;

        for r in 0..rows {
            let row = &data[r * row_len..(r + 1) * row_len];
            let obj_conf = row[4] as f64;
            if obj_conf < confidence_threshold {
                continue;
            }

            let (mut best_class, mut best_score) = (0usize, 0.0f64);
            for (c, &score) in row[5..5 + num_classes].iter().enumerate() {
                if score as f64 > best_score {
                    best_score = score as f64;
                    best_class = c;
                }
            }
            let confidence = obj_conf * best_score;
            if confidence < confidence_threshold {
                continue;
            }

            // Inverse letterbox mapping back to the source image.
            let cx = (row[0] as f64 - transform.pad_x) / transform.scale;
            let cy = (row[1] as f64 - transform.pad_y) / transform.scale;
            let w = row[2] as f64 / transform.scale;
            let h = row[3] as f64 / transform.scale;

            let bbox = PixelRect::new(
                (cx - w / 2.0).round() as i32,
                (cy - h / 2.0).round() as i32,
                w.round().max(1.0) as u32,
                h.round().max(1.0) as u32,
            )
            .clamp_to(image_w, image_h);
            if bbox.is_empty() {
                continue;
            }

            let class_name = self
                .class_names
                .get(best_class)
                .cloned()
                .unwrap_or_else(|| format!("class_{best_class}"));

            let mut record =
                DefectRecord::new(CLASS_ID_BASE + best_class as i32, &class_name, bbox);
            record.confidence = confidence;
            record.severity = confidence;
            record.set_attr("objectConfidence", obj_conf);
            record.set_attr("classScore", best_score);
            record.set_attr("method", "model");
            records.push(record);
        }
        records
    }

    fn run_inference(
        &mut self,
        image: &DynamicImage,
        confidence_threshold: f64,
        nms_threshold: f64,
    ) -> InspectResult<Vec<DefectRecord>> {
        let (input_w, input_h) = self.input_size();
        let rgb = image.to_rgb8();
        let (letterboxed, transform) = Self::letterbox(&rgb, input_w, input_h);
        let tensor = Self::to_tensor(&letterboxed);

        let (rows, row_len, data) = {
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| InspectError::invalid_input("model not loaded"))?;

            let input_tensor = TensorRef::from_array_view(tensor.view())?;
            let inputs = ort::inputs![self.input_name.as_str() => input_tensor];
            let outputs = session.run(inputs)?;
            let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

            let (rows, row_len) = match shape.len() {
                3 => (shape[1] as usize, shape[2] as usize),
                2 => (shape[0] as usize, shape[1] as usize),
                _ => {
                    return Err(InspectError::invalid_input(format!(
                        "unsupported model output shape {shape:?}"
                    )));
                }
            };
            (rows, row_len, data.to_vec())
        };

        let raw = self.decode_rows(
            &data,
            rows,
            row_len,
            transform,
            image.width(),
            image.height(),
            confidence_threshold,
        );
        Ok(NmsFilter::new(nms_threshold).filter(raw))
    }
}

impl DefectDetector for LearnedDetector {
    fn name(&self) -> &str {
        "Learned Detector"
    }

    fn kind(&self) -> &'static str {
        KIND_LEARNED
    }

    fn common(&self) -> &DetectorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DetectorCommon {
        &mut self.common
    }

    fn initialize(&mut self) -> bool {
        self.model_path = self.common.param_or("modelPath", String::new());
        self.use_gpu = self.common.param_or("useGPU", false);
        let threshold = self.common.param_or("confidence", self.common.confidence_threshold);
        self.common.set_confidence_threshold(threshold);

        if self.model_path.is_empty() {
            warn!("learned detector: no model path configured");
            self.common.initialized = false;
            return false;
        }
        if !Path::new(&self.model_path).exists() {
            error!(path = %self.model_path, "learned detector: model file not found");
            self.common.initialized = false;
            return false;
        }

        match Self::build_session(&self.model_path, self.use_gpu) {
            Ok(session) => {
                self.input_name = session
                    .inputs()
                    .first()
                    .map(|i| i.name().to_string())
                    .unwrap_or_else(|| "images".to_string());
                self.output_name = session
                    .outputs()
                    .first()
                    .map(|o| o.name().to_string())
                    .unwrap_or_else(|| "output0".to_string());
                self.session = Some(session);
                self.common.initialized = true;
                info!(path = %self.model_path, info = %self.model_info(), "model loaded");
                true
            }
            Err(e) => {
                error!(path = %self.model_path, error = %e, "failed to load model");
                self.session = None;
                self.common.initialized = false;
                false
            }
        }
    }

    fn release(&mut self) {
        self.session = None;
        self.common.initialized = false;
        info!("learned detector released");
    }

    fn detect(&mut self, image: &DynamicImage) -> DetectionResult {
        let started = Instant::now();

        if image_is_empty(image) {
            error!("learned detect: empty input image");
            return DetectionResult::error("Empty input image");
        }
        if self.session.is_none() {
            return DetectionResult::error("Model not loaded");
        }

        // Runtime tunables are re-read on every call.
        let threshold = self.common.param_or("confidence", self.common.confidence_threshold);
        self.common.set_confidence_threshold(threshold);
        let nms_threshold = self.common.param_or("nmsThreshold", 0.45f64);
        let confidence_threshold = self.common.confidence_threshold;

        debug!(
            width = image.width(),
            height = image.height(),
            confidence = confidence_threshold,
            nms = nms_threshold,
            "learned detect"
        );

        match self.run_inference(image, confidence_threshold, nms_threshold) {
            Ok(raw) => {
                let defects = self.common.filter_by_confidence(raw);
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                info!(found = defects.len(), elapsed_ms, "learned detect complete");
                DetectionResult::success(defects, elapsed_ms)
            }
            Err(e) => {
                error!(error = %e, "inference failed");
                DetectionResult::error(format!("Inference error: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    #[test]
    fn initialize_fails_cleanly_without_model_path() {
        let mut d = LearnedDetector::new();
        assert!(!d.initialize());
        assert!(!d.is_initialized());
    }

    #[test]
    fn initialize_fails_cleanly_for_missing_file() {
        let mut d = LearnedDetector::new();
        let mut params = d.params();
        params.set("modelPath", "/nonexistent/model.onnx");
        d.set_params(params);
        assert!(!d.initialize());
        assert!(!d.is_initialized());
    }

    #[test]
    fn detect_without_model_fails_fast() {
        let mut d = LearnedDetector::new();
        let img = DynamicImage::ImageLuma8(GrayImage::new(32, 32));
        let result = d.detect(&img);
        assert!(!result.success);
        assert_eq!(result.error_message, "Model not loaded");
    }

    #[test]
    fn letterbox_centers_and_scales() {
        let img = RgbImage::from_pixel(200, 100, Rgb([50, 60, 70]));
        let (canvas, transform) = LearnedDetector::letterbox(&img, 640, 640);
        assert_eq!(canvas.dimensions(), (640, 640));
        assert!((transform.scale - 3.2).abs() < 1e-9);
        assert_eq!(transform.pad_x, 0.0);
        assert_eq!(transform.pad_y, 160.0);
        // Above the content band is padding, inside it is image data.
        assert_eq!(canvas.get_pixel(320, 10).0, [PAD_COLOR; 3]);
        assert_eq!(canvas.get_pixel(320, 320).0, [50, 60, 70]);
    }

    #[test]
    fn decode_rows_maps_back_through_letterbox_and_applies_threshold() {
        let d = LearnedDetector::new();
        let transform = LetterboxTransform {
            scale: 3.2,
            pad_x: 0.0,
            pad_y: 160.0,
        };
        // Two rows: one confident scratch centered at source (50, 50), one
        // below the object-confidence cut.
        #[rustfmt::skip]
        let data: Vec<f32> = vec![
            160.0, 320.0, 64.0, 32.0, 0.9, 0.8, 0.1, 0.0, 0.0, 0.0, 0.0,
            160.0, 320.0, 64.0, 32.0, 0.2, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let records = d.decode_rows(&data, 2, 11, transform, 200, 100, 0.5);
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.class_name, "scratch");
        assert!((record.confidence - 0.72).abs() < 1e-6);
        let (cx, cy) = record.bbox.center();
        assert!((cx - 50.0).abs() <= 1.0, "cx {cx}");
        assert!((cy - 50.0).abs() <= 1.0, "cy {cy}");
        assert_eq!(record.bbox.width, 20);
        assert_eq!(record.bbox.height, 10);
    }

    #[test]
    fn decode_rows_falls_back_to_generated_class_names() {
        let mut d = LearnedDetector::new();
        d.set_class_names(vec!["scratch".to_string()]);
        let transform = LetterboxTransform {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        // Best class is index 2, beyond the 1-entry table.
        let data: Vec<f32> = vec![50.0, 50.0, 20.0, 20.0, 0.9, 0.1, 0.2, 0.9];
        let records = d.decode_rows(&data, 1, 8, transform, 100, 100, 0.5);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].class_name, "class_2");
    }

    #[test]
    fn model_info_reports_unloaded_state() {
        let d = LearnedDetector::new();
        assert_eq!(d.model_info(), "No model loaded");
    }
}
