//! Crack detection: branching, irregular linear defects.
//!
//! The grayscale input is enhanced either by a bank of four oriented Gabor
//! filters (per-pixel maximum response) or by plain local contrast
//! normalization, then binarized with an inverted local-mean adaptive
//! threshold and morphologically closed. Two analyses run on the binary
//! mask: a contour pass keyed on shape complexity, and a skeleton pass that
//! thins each component and counts branch points. Candidates pool, pass
//! through NMS and are confidence-filtered.

use crate::core::registry::KIND_CRACK;
use crate::core::traits::{image_is_empty, DefectDetector, DetectorCommon};
use crate::domain::{DefectRecord, DetectionResult};
use crate::processors::geometry;
use crate::processors::nms::NmsFilter;
use crate::processors::ops;
use image::{DynamicImage, GrayImage};
use imageproc::contours::find_contours;
use imageproc::filter::gaussian_blur_f32;
use std::time::Instant;
use tracing::{debug, error, info};

const CLASS_ID: i32 = 1;
const CLASS_NAME: &str = "Crack";

/// Contours rounder than this complexity are rejected as non-cracks.
const MIN_COMPLEXITY: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
struct CrackParams {
    threshold: i64,
    min_area: f64,
    morph_kernel_size: i64,
    binary_threshold: i64,
    use_gabor: bool,
}

impl CrackParams {
    fn read(common: &DetectorCommon) -> Self {
        Self {
            threshold: common.param_or("threshold", 80i64),
            min_area: common.param_or("minArea", 20i64) as f64,
            morph_kernel_size: common.param_or("morphKernelSize", 3i64),
            binary_threshold: common.param_or("binaryThreshold", 128i64),
            use_gabor: common.param_or("useGabor", true),
        }
    }
}

/// Detector for branching crack patterns.
#[derive(Debug, Default)]
pub struct CrackDetector {
    common: DetectorCommon,
}

impl CrackDetector {
    /// Creates a crack detector with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    fn severity(area: f64, length: f64, branches: f64) -> f64 {
        0.3 * (area / 1000.0).min(1.0)
            + 0.5 * (length / 100.0).min(1.0)
            + 0.2 * (branches / 5.0).min(1.0)
    }

    /// Line enhancement: maximum response over four Gabor orientations,
    /// normalized to 8 bits. Responses below the configured threshold are
    /// floored so flat texture does not survive normalization.
    fn enhance_gabor(gray: &GrayImage, params: &CrackParams) -> GrayImage {
        let radius = 5;
        let (w, h) = gray.dimensions();
        let mut best = vec![0.0f32; (w * h) as usize];
        for k in 0..4 {
            let theta = k as f32 * std::f32::consts::PI / 4.0;
            let kernel = ops::gabor_kernel(radius, theta, 2.5, 8.0, 0.5);
            let response = ops::convolve_f32(gray, &kernel, radius);
            for (b, r) in best.iter_mut().zip(response) {
                *b = b.max(r.abs());
            }
        }
        let floor = params.threshold as f32;
        for v in best.iter_mut() {
            if *v < floor {
                *v = 0.0;
            }
        }
        ops::f32_to_gray_normalized(&best, w, h)
    }

    /// Fallback enhancement: min-max contrast normalization.
    fn enhance_contrast(gray: &GrayImage) -> GrayImage {
        let field = ops::gray_to_f32(gray);
        ops::f32_to_gray_normalized(&field, gray.width(), gray.height())
    }

    fn binarize(&self, gray: &GrayImage, params: &CrackParams) -> GrayImage {
        let enhanced = if params.use_gabor {
            // Gabor responses are bright where cracks are; invert so the
            // downstream dark-feature threshold applies uniformly.
            let e = Self::enhance_gabor(gray, params);
            let mut inverted = e;
            for p in inverted.pixels_mut() {
                p.0[0] = 255 - p.0[0];
            }
            inverted
        } else {
            Self::enhance_contrast(gray)
        };

        let blurred = gaussian_blur_f32(&enhanced, 1.0);
        let binary = ops::adaptive_threshold_inv(&blurred, 5, 2);

        let radius = ((params.morph_kernel_size | 1) / 2).max(1) as u32;
        ops::gray_close(&binary, radius)
    }

    /// Contour analysis: external contours scored by shape complexity
    /// (`perimeter^2 / 4*pi*area`), rejecting near-circular blobs.
    fn analyze_contours(&self, binary: &GrayImage, params: &CrackParams) -> Vec<DefectRecord> {
        let mut defects = Vec::new();
        for contour in find_contours::<i32>(binary) {
            if contour.points.len() < 5 {
                continue;
            }
            let area = geometry::contour_area(&contour.points);
            if area < params.min_area {
                continue;
            }
            let perimeter = geometry::contour_perimeter(&contour.points);
            let complexity = perimeter * perimeter / (4.0 * std::f64::consts::PI * area);
            if complexity < MIN_COMPLEXITY {
                continue;
            }

            let rect = geometry::min_area_rect(&contour.points);
            let (length, width) = (rect.length, rect.width);

            let mut defect =
                DefectRecord::new(CLASS_ID, CLASS_NAME, geometry::bounding_rect(&contour.points));
            defect.contour = contour.points.iter().map(|p| (p.x, p.y)).collect();
            let complexity_score = ((complexity - MIN_COMPLEXITY) / 10.0).min(1.0);
            let area_score = (area / 500.0).min(1.0);
            defect.confidence = 0.6 * complexity_score + 0.4 * area_score;
            defect.severity = Self::severity(area, length, 0.0);
            defect.set_attr("area", area);
            defect.set_attr("perimeter", perimeter);
            defect.set_attr("complexity", complexity);
            defect.set_attr("length", length);
            defect.set_attr("width", width);
            defect.set_attr("method", "contour");
            defects.push(defect);
        }
        defects
    }

    /// Skeleton analysis: thin the mask to one-pixel centerlines, then score
    /// each connected component by skeleton length, branch-point count and
    /// the `length^2 / area` elongation measure.
    fn analyze_skeleton(&self, binary: &GrayImage, params: &CrackParams) -> Vec<DefectRecord> {
        let skeleton = ops::thin_skeleton(binary);
        let (w, h) = skeleton.dimensions();
        if w == 0 || h == 0 {
            return Vec::new();
        }

        // Connected components over skeleton pixels (8-connectivity).
        let idx = |x: u32, y: u32| (y * w + x) as usize;
        let mut labels = vec![0u32; (w * h) as usize];
        let mut next_label = 0u32;
        let mut components: Vec<Vec<(u32, u32)>> = Vec::new();
        let mut stack = Vec::new();

        for sy in 0..h {
            for sx in 0..w {
                if skeleton.get_pixel(sx, sy).0[0] == 0 || labels[idx(sx, sy)] != 0 {
                    continue;
                }
                next_label += 1;
                let mut pixels = Vec::new();
                labels[idx(sx, sy)] = next_label;
                stack.push((sx, sy));
                while let Some((x, y)) = stack.pop() {
                    pixels.push((x, y));
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let nx = x as i64 + dx;
                            let ny = y as i64 + dy;
                            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                                continue;
                            }
                            let (nx, ny) = (nx as u32, ny as u32);
                            if skeleton.get_pixel(nx, ny).0[0] > 0 && labels[idx(nx, ny)] == 0 {
                                labels[idx(nx, ny)] = next_label;
                                stack.push((nx, ny));
                            }
                        }
                    }
                }
                components.push(pixels);
            }
        }

        let neighbor_count = |x: u32, y: u32| -> u32 {
            let mut count = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx >= 0
                        && ny >= 0
                        && nx < w as i64
                        && ny < h as i64
                        && skeleton.get_pixel(nx as u32, ny as u32).0[0] > 0
                    {
                        count += 1;
                    }
                }
            }
            count
        };

        let mut defects = Vec::new();
        for pixels in components {
            let length = pixels.len() as f64;
            if length < params.min_area {
                continue;
            }

            let branch_points = pixels
                .iter()
                .filter(|&&(x, y)| neighbor_count(x, y) >= 3)
                .count() as f64;

            let points: Vec<imageproc::point::Point<i32>> = pixels
                .iter()
                .map(|&(x, y)| imageproc::point::Point::new(x as i32, y as i32))
                .collect();
            let bbox = geometry::bounding_rect(&points);

            // Mask area under the component's bounding box.
            let mut mask_area = 0.0f64;
            let x1 = (bbox.right() - 1).max(0) as u32;
            let y1 = (bbox.bottom() - 1).max(0) as u32;
            for y in bbox.y.max(0) as u32..=y1.min(h - 1) {
                for x in bbox.x.max(0) as u32..=x1.min(w - 1) {
                    if binary.get_pixel(x, y).0[0] > 0 {
                        mask_area += 1.0;
                    }
                }
            }
            let area = mask_area.max(length);
            let complexity = length * length / area;

            // Dot-like noise: short, unbranched and compact.
            if complexity < MIN_COMPLEXITY && branch_points == 0.0 {
                continue;
            }

            let mut defect = DefectRecord::new(CLASS_ID, CLASS_NAME, bbox);
            defect.confidence = 0.4 * (length / 100.0).min(1.0)
                + 0.4 * (complexity / 10.0).min(1.0)
                + 0.2 * (branch_points / 5.0).min(1.0);
            defect.severity = Self::severity(area, length, branch_points);
            defect.set_attr("area", area);
            defect.set_attr("length", length);
            defect.set_attr("branchCount", branch_points);
            defect.set_attr("complexity", complexity);
            defect.set_attr("method", "skeleton");
            defects.push(defect);
        }
        defects
    }
}

impl DefectDetector for CrackDetector {
    fn name(&self) -> &str {
        "Crack Detector"
    }

    fn kind(&self) -> &'static str {
        KIND_CRACK
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
            error!("crack detect: empty input image");
            return DetectionResult::error("Empty input image");
        }

        let params = CrackParams::read(&self.common);
        debug!(
            width = image.width(),
            height = image.height(),
            min_area = params.min_area,
            use_gabor = params.use_gabor,
            binary_threshold = params.binary_threshold,
            "crack detect"
        );

        let gray = image.to_luma8();
        let binary = self.binarize(&gray, &params);

        let mut pooled = self.analyze_contours(&binary, &params);
        pooled.extend(self.analyze_skeleton(&binary, &params));
        for defect in pooled.iter_mut() {
            defect.bbox = defect.bbox.clamp_to(image.width(), image.height());
        }

        let before_nms = pooled.len();
        let deduped = NmsFilter::new(0.5).filter(pooled);
        let defects = self.common.filter_by_confidence(deduped);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            found = defects.len(),
            pooled = before_nms,
            elapsed_ms,
            "crack detect complete"
        );
        DetectionResult::success(defects, elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn detector() -> CrackDetector {
        let mut d = CrackDetector::new();
        assert!(d.initialize());
        d
    }

    /// Draws a dark zig-zag polyline with a side branch.
    fn branched_crack_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(160, 160, Luma([200]));
        let mut draw = |x0: i32, y0: i32, x1: i32, y1: i32| {
            let steps = (x1 - x0).abs().max((y1 - y0).abs());
            for s in 0..=steps {
                let t = s as f64 / steps.max(1) as f64;
                let x = (x0 as f64 + t * (x1 - x0) as f64).round() as i32;
                let y = (y0 as f64 + t * (y1 - y0) as f64).round() as i32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let (px, py) = ((x + dx).clamp(0, 159), (y + dy).clamp(0, 159));
                        img.put_pixel(px as u32, py as u32, Luma([35]));
                    }
                }
            }
        };
        draw(20, 40, 70, 80);
        draw(70, 80, 130, 60);
        draw(70, 80, 80, 130);
        img
    }

    #[test]
    fn finds_branched_crack() {
        let result = detector().detect(&DynamicImage::ImageLuma8(branched_crack_image()));
        assert!(result.success);
        assert!(!result.defects.is_empty(), "crack should be detected");
        assert!(result.defects.iter().all(|d| d.class_name == "Crack"));
    }

    #[test]
    fn uniform_image_yields_no_defects() {
        let img = GrayImage::from_pixel(128, 128, Luma([128]));
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert!(result.defects.is_empty());
    }

    #[test]
    fn works_without_gabor_enhancement() {
        let mut d = detector();
        let mut params = d.params();
        params.set("useGabor", false);
        d.set_params(params);

        let result = d.detect(&DynamicImage::ImageLuma8(branched_crack_image()));
        assert!(result.success);
        assert!(!result.defects.is_empty());
    }

    #[test]
    fn small_dot_is_rejected_as_noise() {
        let mut img = GrayImage::from_pixel(120, 120, Luma([200]));
        for y in 0..120i32 {
            for x in 0..120i32 {
                let dx = (x - 60) as f64;
                let dy = (y - 60) as f64;
                if (dx * dx + dy * dy).sqrt() < 3.5 {
                    img.put_pixel(x as u32, y as u32, Luma([40]));
                }
            }
        }
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert!(
            result.defects.is_empty(),
            "a compact dot is not crack-shaped"
        );
    }

    #[test]
    fn empty_image_is_an_error() {
        let result = detector().detect(&DynamicImage::ImageLuma8(GrayImage::new(0, 0)));
        assert!(!result.success);
    }

    #[test]
    fn skeleton_candidates_report_branch_counts() {
        let mut d = detector();
        d.set_confidence_threshold(0.0);
        let result = d.detect(&DynamicImage::ImageLuma8(branched_crack_image()));
        assert!(result.success);
        let has_skeleton_method = result.defects.iter().any(|defect| {
            defect
                .attributes
                .get("method")
                .map(|m| m == &crate::core::params::ParamValue::Text("skeleton".into()))
                .unwrap_or(false)
        });
        // After NMS either method may win; branch data must survive when the
        // skeleton candidate does.
        if has_skeleton_method {
            assert!(result
                .defects
                .iter()
                .any(|d| d.attr_f64("branchCount").is_some()));
        }
    }
}
