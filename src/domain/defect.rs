//! Defect and detection result value types.
//!
//! These are the value objects every detector produces: one [`DefectRecord`]
//! per anomaly candidate, one [`DetectionResult`] per `detect()` call, and
//! one [`CombinedResult`] per multi-detector pass. Records are created fresh
//! on every call and owned by the caller; detectors retain nothing between
//! invocations.

use crate::core::params::ParamValue;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An axis-aligned rectangle in integer pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    /// X-coordinate of the top-left corner.
    pub x: i32,
    /// Y-coordinate of the top-left corner.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// Creates a rectangle from its top-left corner and size.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates the tightest rectangle covering both corner points.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        Self {
            x: left,
            y: top,
            width: (right - left + 1) as u32,
            height: (bottom - top + 1) as u32,
        }
    }

    /// X-coordinate one past the right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    /// Y-coordinate one past the bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// Rectangle area in pixels.
    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Returns true when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection with another rectangle, if non-empty.
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(PixelRect::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32))
    }

    /// Smallest rectangle containing both rectangles.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        PixelRect::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32)
    }

    /// Intersection-over-union with another rectangle.
    pub fn iou(&self, other: &PixelRect) -> f64 {
        let Some(inter) = self.intersect(other) else {
            return 0.0;
        };
        let union = self.area() + other.area() - inter.area();
        if union > 0.0 {
            inter.area() / union
        } else {
            0.0
        }
    }

    /// Minimum edge-to-edge distance between two rectangles.
    ///
    /// Zero when the rectangles touch or overlap.
    pub fn gap_distance(&self, other: &PixelRect) -> f64 {
        let h = (other.x - self.right()).max(self.x - other.right()).max(0);
        let v = (other.y - self.bottom())
            .max(self.y - other.bottom())
            .max(0);
        ((h as f64).powi(2) + (v as f64).powi(2)).sqrt()
    }

    /// Clamps the rectangle to an image of the given dimensions.
    ///
    /// Returns an empty rectangle when there is no overlap with the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> PixelRect {
        let bounds = PixelRect::new(0, 0, image_width, image_height);
        self.intersect(&bounds).unwrap_or_default()
    }
}

/// One detected anomaly candidate.
#[derive(Debug, Clone, Default)]
pub struct DefectRecord {
    /// Bounding box in image coordinates, clamped to image bounds.
    pub bbox: PixelRect,
    /// Detector belief that the region is a real defect, in `[0, 1]`.
    pub confidence: f64,
    /// Impact magnitude in `[0, 1]`, independent of `confidence`.
    pub severity: f64,
    /// Numeric defect category.
    pub class_id: i32,
    /// Human-readable defect category ("Scratch", "Crack", ...).
    pub class_name: String,
    /// Optional human-readable summary (measurement text and the like).
    pub description: String,
    /// Optional ordered contour points; empty when not applicable.
    pub contour: Vec<(i32, i32)>,
    /// Algorithm-specific measurements keyed by stable, detector-specific names.
    pub attributes: BTreeMap<String, ParamValue>,
}

impl DefectRecord {
    /// Creates a record with the given class and geometry; remaining fields default.
    pub fn new(class_id: i32, class_name: &str, bbox: PixelRect) -> Self {
        Self {
            bbox,
            class_id,
            class_name: class_name.to_string(),
            ..Default::default()
        }
    }

    /// Sets an attribute value.
    pub fn set_attr(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    /// Reads a numeric attribute.
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(ParamValue::as_f64)
    }
}

/// Outcome of one detector invocation.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    /// Whether the detection pass ran to completion.
    pub success: bool,
    /// Populated when `success` is false; `defects` is then empty.
    pub error_message: String,
    /// Detected defects in detector-defined order.
    pub defects: Vec<DefectRecord>,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: f64,
    /// Optional diagnostic visualization; never required for correctness.
    pub debug_image: Option<GrayImage>,
}

impl DetectionResult {
    /// Creates a successful result.
    pub fn success(defects: Vec<DefectRecord>, processing_time_ms: f64) -> Self {
        Self {
            success: true,
            defects,
            processing_time_ms,
            ..Default::default()
        }
    }

    /// Creates a failed result with a descriptive message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            ..Default::default()
        }
    }
}

/// Aggregated outcome of one multi-detector pass.
#[derive(Debug, Clone, Default)]
pub struct CombinedResult {
    /// False only when the input image itself was invalid.
    pub success: bool,
    /// Populated when `success` is false.
    pub error_message: String,
    /// Concatenation of the defects of every successful detector.
    pub all_defects: Vec<DefectRecord>,
    /// Total wall-clock time of the pass in milliseconds.
    pub total_time_ms: f64,
    /// Per-detector results keyed by detector name, for traceability.
    pub detector_results: BTreeMap<String, DetectionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_rects_is_one() {
        let r = PixelRect::new(10, 10, 50, 40);
        assert!((r.iou(&r) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn iou_of_disjoint_rects_is_zero() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(100, 100, 10, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn gap_distance_zero_for_overlap_and_euclidean_otherwise() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(5, 5, 10, 10);
        assert_eq!(a.gap_distance(&b), 0.0);

        let c = PixelRect::new(13, 14, 5, 5);
        // horizontal gap 3, vertical gap 4
        assert!((a.gap_distance(&c) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn clamp_keeps_rect_within_image() {
        let r = PixelRect::new(-5, -5, 20, 20);
        let clamped = r.clamp_to(100, 100);
        assert_eq!(clamped, PixelRect::new(0, 0, 15, 15));

        let outside = PixelRect::new(200, 200, 10, 10);
        assert!(outside.clamp_to(100, 100).is_empty());
    }

    #[test]
    fn error_result_has_empty_defects() {
        let result = DetectionResult::error("empty input image");
        assert!(!result.success);
        assert!(result.defects.is_empty());
        assert_eq!(result.error_message, "empty input image");
    }
}
