//! Scratch detection: thin, elongated linear defects.
//!
//! Two complementary strategies run at full and half resolution: a
//! gradient-orientation segment grower that recovers line segments with an
//! estimated width and significance score, and a Canny/contour path that
//! keeps elongated minimum-area rectangles. Candidates are refined by
//! sampling the grayscale profile perpendicular to their long axis to
//! measure the actual mark width, then pooled, deduplicated and
//! confidence-filtered.

use crate::core::registry::KIND_SCRATCH;
use crate::core::traits::{image_is_empty, DefectDetector, DetectorCommon};
use crate::domain::{DefectRecord, DetectionResult, PixelRect};
use crate::processors::geometry::{self, min_area_rect};
use crate::processors::nms::NmsFilter;
use crate::processors::ops;
use image::{imageops, DynamicImage, GrayImage};
use imageproc::contours::find_contours;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use std::time::Instant;
use tracing::{debug, error, info};

const CLASS_ID: i32 = 0;
const CLASS_NAME: &str = "Scratch";

/// Working scales of the multi-scale pass.
const SCALES: [f64; 2] = [1.0, 0.5];

/// Orientation tolerance of the segment grower, degrees.
const GROW_TOLERANCE_DEG: f64 = 22.5;

#[derive(Debug, Clone, Copy)]
struct ScratchParams {
    sensitivity: i64,
    min_length: f64,
    max_width: f64,
    contrast_threshold: f64,
}

impl ScratchParams {
    fn read(common: &DetectorCommon) -> Self {
        Self {
            sensitivity: common.param_or("sensitivity", 75i64),
            min_length: common.param_or("minLength", 10i64) as f64,
            max_width: common.param_or("maxWidth", 5i64) as f64,
            contrast_threshold: common.param_or("contrastThreshold", 30i64) as f64,
        }
    }
}

/// A recovered line segment with width and support-density estimates.
#[derive(Debug, Clone, Copy)]
struct LineSegment {
    p0: (f64, f64),
    p1: (f64, f64),
    width: f64,
    significance: f64,
}

impl LineSegment {
    fn length(&self) -> f64 {
        let dx = self.p1.0 - self.p0.0;
        let dy = self.p1.1 - self.p0.1;
        (dx * dx + dy * dy).sqrt()
    }

    fn angle_deg(&self) -> f64 {
        (self.p1.1 - self.p0.1)
            .atan2(self.p1.0 - self.p0.0)
            .to_degrees()
    }
}

/// Detector for thin, elongated linear surface marks.
#[derive(Debug, Default)]
pub struct ScratchDetector {
    common: DetectorCommon,
}

impl ScratchDetector {
    /// Creates a scratch detector with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    fn scratch_confidence(length: f64, quality: f64) -> f64 {
        0.6 * (length / 150.0).min(1.0) + 0.4 * quality.clamp(0.0, 1.0)
    }

    fn scratch_severity(length: f64, width: f64) -> f64 {
        0.7 * (length / 200.0).min(1.0) + 0.3 * (width / 10.0).min(1.0)
    }

    /// Segment-grower strategy: clusters of gradient pixels with a common
    /// orientation become line-segment candidates.
    fn detect_segments(&self, gray: &GrayImage, params: &ScratchParams) -> Vec<DefectRecord> {
        let mut defects = Vec::new();
        for segment in grow_line_segments(gray, params.contrast_threshold as f32) {
            let length = segment.length();
            if length < params.min_length || segment.width > params.max_width {
                continue;
            }

            let bbox = PixelRect::from_corners(
                segment.p0.0.round() as i32,
                segment.p0.1.round() as i32,
                segment.p1.0.round() as i32,
                segment.p1.1.round() as i32,
            );
            let mut defect = DefectRecord::new(CLASS_ID, CLASS_NAME, bbox);
            defect.confidence = Self::scratch_confidence(length, segment.significance);
            defect.severity = Self::scratch_severity(length, segment.width);
            defect.set_attr("length", length);
            defect.set_attr("width", segment.width);
            defect.set_attr("angle", segment.angle_deg());
            defect.set_attr("method", "segment");
            defects.push(defect);
        }
        defects
    }

    /// Edge strategy: Canny with sensitivity-derived thresholds, a
    /// directional closing to bridge broken edges, then contours whose
    /// minimum-area rectangle is sufficiently elongated.
    fn detect_edge_contours(&self, gray: &GrayImage, params: &ScratchParams) -> Vec<DefectRecord> {
        let low = (100 - params.sensitivity).max(10) as f32;
        let edges = canny(gray, low, low * 3.0);
        // Close along each axis so the two flanking edges of a thin mark
        // merge into one band regardless of its orientation.
        let closed = ops::close_binary_directional(
            &ops::close_binary_directional(&edges, 3, true),
            3,
            false,
        );

        let mut defects = Vec::new();
        for contour in find_contours::<i32>(&closed) {
            if contour.points.len() < 5 {
                continue;
            }
            if geometry::contour_area(&contour.points) < 10.0 {
                continue;
            }

            let rect = min_area_rect(&contour.points);
            let (length, width) = (rect.length, rect.width);
            if length < params.min_length || width > params.max_width {
                continue;
            }
            let aspect = rect.aspect_ratio();
            if aspect < 3.0 {
                continue;
            }

            let mut defect =
                DefectRecord::new(CLASS_ID, CLASS_NAME, geometry::bounding_rect(&contour.points));
            defect.contour = contour.points.iter().map(|p| (p.x, p.y)).collect();
            defect.confidence = Self::scratch_confidence(length, (aspect / 10.0).min(1.0));
            defect.severity = Self::scratch_severity(length, width);
            defect.set_attr("length", length);
            defect.set_attr("width", width);
            defect.set_attr("aspectRatio", aspect);
            defect.set_attr("angle", rect.angle_deg);
            defect.set_attr("method", "edge");
            defects.push(defect);
        }
        defects
    }

    /// Measures the true mark width by sampling grayscale profiles
    /// perpendicular to the candidate's long axis and locating where the
    /// intensity drops below ~80% of the local background, then recomputes
    /// severity from the measurement.
    fn refine_width(&self, gray: &GrayImage, defect: &mut DefectRecord, params: &ScratchParams) {
        let Some(length) = defect.attr_f64("length") else {
            return;
        };
        let angle = defect.attr_f64("angle").unwrap_or(0.0).to_radians();
        let (cx, cy) = defect.bbox.center();
        let (dir_x, dir_y) = (angle.cos(), angle.sin());
        let (perp_x, perp_y) = (-dir_y, dir_x);

        let profile_half = (params.max_width * 2.0).ceil().max(4.0) as i32;
        let sample = |x: f64, y: f64| -> Option<f64> {
            let (xi, yi) = (x.round() as i64, y.round() as i64);
            if xi < 0 || yi < 0 || xi >= gray.width() as i64 || yi >= gray.height() as i64 {
                return None;
            }
            Some(gray.get_pixel(xi as u32, yi as u32).0[0] as f64)
        };

        let mut widths = Vec::new();
        for t in [-0.3, -0.15, 0.0, 0.15, 0.3] {
            let px = cx + dir_x * t * length;
            let py = cy + dir_y * t * length;

            let profile: Vec<Option<f64>> = (-profile_half..=profile_half)
                .map(|o| sample(px + perp_x * o as f64, py + perp_y * o as f64))
                .collect();
            let valid: Vec<f64> = profile.iter().flatten().copied().collect();
            if valid.len() < 5 {
                continue;
            }

            // Local background from the profile ends.
            let edge_count = 2.min(valid.len() / 2);
            let head: f64 = valid[..edge_count].iter().sum::<f64>() / edge_count as f64;
            let tail: f64 =
                valid[valid.len() - edge_count..].iter().sum::<f64>() / edge_count as f64;
            let background = head.max(tail);
            if background < 1.0 {
                continue;
            }

            let cut = background * 0.8;
            let center = valid.len() / 2;
            if valid[center] >= cut {
                continue;
            }
            let mut lo = center;
            while lo > 0 && valid[lo - 1] < cut {
                lo -= 1;
            }
            let mut hi = center;
            while hi + 1 < valid.len() && valid[hi + 1] < cut {
                hi += 1;
            }
            widths.push((hi - lo + 1) as f64);
        }

        if widths.is_empty() {
            return;
        }
        widths.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let measured = widths[widths.len() / 2];
        defect.set_attr("width", measured);
        defect.severity = Self::scratch_severity(length, measured);
    }
}

/// Rescales candidate geometry from a reduced working scale back to full
/// resolution.
fn rescale_candidates(defects: &mut [DefectRecord], factor: f64) {
    for defect in defects.iter_mut() {
        defect.bbox = PixelRect::new(
            (defect.bbox.x as f64 * factor) as i32,
            (defect.bbox.y as f64 * factor) as i32,
            (defect.bbox.width as f64 * factor) as u32,
            (defect.bbox.height as f64 * factor) as u32,
        );
        for key in ["length", "width"] {
            if let Some(value) = defect.attr_f64(key) {
                defect.set_attr(key, value * factor);
            }
        }
        for point in defect.contour.iter_mut() {
            point.0 = (point.0 as f64 * factor) as i32;
            point.1 = (point.1 as f64 * factor) as i32;
        }
    }
}

/// Groups gradient pixels into line-support regions by orientation and fits
/// a segment through each region.
///
/// Orientations are averaged in doubled-angle space so the two anti-parallel
/// gradients flanking a dark line fall into one region.
fn grow_line_segments(gray: &GrayImage, magnitude_threshold: f32) -> Vec<LineSegment> {
    let (w, h) = (gray.width() as i32, gray.height() as i32);
    if w < 3 || h < 3 {
        return Vec::new();
    }
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);

    let idx = |x: i32, y: i32| (y * w + x) as usize;
    let mut magnitude = vec![0.0f32; (w * h) as usize];
    let mut orientation = vec![0.0f64; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let dx = gx.get_pixel(x as u32, y as u32).0[0] as f32;
            let dy = gy.get_pixel(x as u32, y as u32).0[0] as f32;
            magnitude[idx(x, y)] = (dx * dx + dy * dy).sqrt();
            orientation[idx(x, y)] = (dy as f64).atan2(dx as f64);
        }
    }

    // Sobel magnitudes scale the source contrast by roughly 4.
    let threshold = magnitude_threshold * 4.0;
    let tolerance = GROW_TOLERANCE_DEG.to_radians();

    let mut visited = vec![false; (w * h) as usize];
    let mut segments = Vec::new();
    let mut stack = Vec::new();
    let mut region: Vec<(i32, i32)> = Vec::new();

    for seed_y in 0..h {
        for seed_x in 0..w {
            let seed = idx(seed_x, seed_y);
            if visited[seed] || magnitude[seed] < threshold {
                continue;
            }

            region.clear();
            stack.push((seed_x, seed_y));
            visited[seed] = true;
            // Doubled-angle running mean of the region orientation.
            let mut sum_cos = (2.0 * orientation[seed]).cos();
            let mut sum_sin = (2.0 * orientation[seed]).sin();

            while let Some((x, y)) = stack.pop() {
                region.push((x, y));
                let mean_angle = sum_sin.atan2(sum_cos) / 2.0;

                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (nx, ny) = (x + dx, y + dy);
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            continue;
                        }
                        let n = idx(nx, ny);
                        if visited[n] || magnitude[n] < threshold {
                            continue;
                        }
                        let mut diff = (orientation[n] - mean_angle).abs() % std::f64::consts::PI;
                        if diff > std::f64::consts::FRAC_PI_2 {
                            diff = std::f64::consts::PI - diff;
                        }
                        if diff > tolerance {
                            continue;
                        }
                        visited[n] = true;
                        sum_cos += (2.0 * orientation[n]).cos();
                        sum_sin += (2.0 * orientation[n]).sin();
                        stack.push((nx, ny));
                    }
                }
            }

            if region.len() < 10 {
                continue;
            }
            if let Some(segment) = fit_segment(&region) {
                segments.push(segment);
            }
        }
    }
    segments
}

/// Fits a segment through a line-support region via its principal axis.
///
/// The width estimate is the separation between the centroids of the two
/// gradient lobes flanking the mark (points on either side of the axis),
/// which tracks the mark width rather than the full support-band extent.
fn fit_segment(region: &[(i32, i32)]) -> Option<LineSegment> {
    let points: Vec<[f64; 2]> = region.iter().map(|&(x, y)| [x as f64, y as f64]).collect();
    let line = geometry::fit_line_least_squares(&points)?;

    let mut min_t = f64::MAX;
    let mut max_t = f64::MIN;
    let (mut pos_sum, mut pos_n) = (0.0f64, 0usize);
    let (mut neg_sum, mut neg_n) = (0.0f64, 0usize);
    for p in &points {
        let vx = p[0] - line.point[0];
        let vy = p[1] - line.point[1];
        let t = vx * line.dir[0] + vy * line.dir[1];
        let perp = vx * line.dir[1] - vy * line.dir[0];
        min_t = min_t.min(t);
        max_t = max_t.max(t);
        if perp >= 0.0 {
            pos_sum += perp;
            pos_n += 1;
        } else {
            neg_sum += perp;
            neg_n += 1;
        }
    }

    let length = max_t - min_t;
    if length < 1.0 {
        return None;
    }
    let pos_mean = if pos_n > 0 { pos_sum / pos_n as f64 } else { 0.0 };
    let neg_mean = if neg_n > 0 { neg_sum / neg_n as f64 } else { 0.0 };
    let width = (pos_mean - neg_mean).max(1.0);
    let significance = (region.len() as f64 / (length * width)).clamp(0.0, 1.0);

    Some(LineSegment {
        p0: (
            line.point[0] + line.dir[0] * min_t,
            line.point[1] + line.dir[1] * min_t,
        ),
        p1: (
            line.point[0] + line.dir[0] * max_t,
            line.point[1] + line.dir[1] * max_t,
        ),
        width,
        significance,
    })
}

impl DefectDetector for ScratchDetector {
    fn name(&self) -> &str {
        "Scratch Detector"
    }

    fn kind(&self) -> &'static str {
        KIND_SCRATCH
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

    fn detect(&mut self, image: &DynamicImage) -> DetectionResult {
        let started = Instant::now();

        if image_is_empty(image) {
            error!("scratch detect: empty input image");
            return DetectionResult::error("Empty input image");
        }

        let params = ScratchParams::read(&self.common);
        debug!(
            width = image.width(),
            height = image.height(),
            sensitivity = params.sensitivity,
            min_length = params.min_length,
            max_width = params.max_width,
            "scratch detect"
        );

        let gray = image.to_luma8();
        let blurred = imageproc::filter::gaussian_blur_f32(&gray, 1.0);

        let mut pooled = Vec::new();
        for &scale in &SCALES {
            let scaled = if scale < 1.0 {
                imageops::resize(
                    &blurred,
                    ((blurred.width() as f64 * scale) as u32).max(1),
                    ((blurred.height() as f64 * scale) as u32).max(1),
                    imageops::FilterType::Triangle,
                )
            } else {
                blurred.clone()
            };

            let mut candidates = self.detect_segments(&scaled, &params);
            candidates.extend(self.detect_edge_contours(&scaled, &params));
            if scale < 1.0 {
                rescale_candidates(&mut candidates, 1.0 / scale);
            }
            pooled.extend(candidates);
        }

        for defect in pooled.iter_mut() {
            self.refine_width(&gray, defect, &params);
            defect.bbox = defect.bbox.clamp_to(image.width(), image.height());
        }

        let before_nms = pooled.len();
        let deduped = NmsFilter::new(0.5).filter(pooled);
        let before_filter = deduped.len();
        let defects = self.common.filter_by_confidence(deduped);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            found = defects.len(),
            pooled = before_nms,
            after_nms = before_filter,
            elapsed_ms,
            "scratch detect complete"
        );
        DetectionResult::success(defects, elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn bright_background(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([220]))
    }

    fn detector() -> ScratchDetector {
        let mut d = ScratchDetector::new();
        assert!(d.initialize());
        d
    }

    #[test]
    fn finds_single_horizontal_scratch_with_expected_length() {
        let mut img = bright_background(200, 200);
        // 60 px long, 2 px wide dark line.
        for x in 70..130 {
            for y in 100..102 {
                img.put_pixel(x, y, Luma([40]));
            }
        }

        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert_eq!(result.defects.len(), 1, "expected exactly one scratch");

        let defect = &result.defects[0];
        assert_eq!(defect.class_name, "Scratch");
        assert!(defect.confidence >= 0.5, "confidence {}", defect.confidence);
        let length = defect.attr_f64("length").expect("length attribute");
        assert!(
            (length - 60.0).abs() <= 6.0,
            "length {length} outside 60 +/- 10%"
        );
    }

    #[test]
    fn uniform_image_yields_no_defects() {
        let img = bright_background(128, 128);
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert!(result.defects.is_empty());
    }

    #[test]
    fn empty_image_is_an_error_not_a_panic() {
        let img = GrayImage::new(0, 0);
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(!result.success);
        assert!(!result.error_message.is_empty());
    }

    #[test]
    fn round_blob_is_not_a_scratch() {
        let mut img = bright_background(120, 120);
        for y in 0..120i32 {
            for x in 0..120i32 {
                let (dx, dy) = ((x - 60) as f64, (y - 60) as f64);
                if (dx * dx + dy * dy).sqrt() < 15.0 {
                    img.put_pixel(x as u32, y as u32, Luma([40]));
                }
            }
        }
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert!(
            result.defects.is_empty(),
            "a disc must not be classified as a scratch"
        );
    }

    #[test]
    fn min_length_parameter_is_reread_between_calls() {
        let mut img = bright_background(140, 100);
        for x in 30..90 {
            img.put_pixel(x, 50, Luma([30]));
            img.put_pixel(x, 51, Luma([30]));
        }
        let image = DynamicImage::ImageLuma8(img);

        let mut d = detector();
        let with_default = d.detect(&image);
        assert!(with_default.success);
        assert!(!with_default.defects.is_empty());

        // Raise the minimum length beyond the mark; the next call must
        // pick the new value up without re-initialization.
        let mut params = d.params();
        params.set("minLength", 80);
        d.set_params(params);
        let with_long_min = d.detect(&image);
        assert!(with_long_min.success);
        assert!(with_long_min.defects.is_empty());
    }

    #[test]
    fn all_emitted_confidences_respect_threshold() {
        let mut img = bright_background(160, 160);
        for x in 20..140 {
            img.put_pixel(x, 60, Luma([50]));
        }
        for x in 40..70 {
            img.put_pixel(x, 110, Luma([120]));
        }

        let mut d = detector();
        d.set_confidence_threshold(0.6);
        let result = d.detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        for defect in &result.defects {
            assert!(defect.confidence >= 0.6);
        }
    }
}
