//! Foreign-object detection: contaminants and contrast anomalies.
//!
//! Three independent strategies pool their candidates: a morphological
//! top-hat/black-hat pass for gray-level contrast anomalies, a Lab color
//! anomaly pass for color images, and a local-binary-pattern texture pass
//! that flags blocks whose texture statistics deviate from the image-wide
//! distribution. Every candidate is re-scored with shape descriptors
//! (circularity, solidity, rectangularity, aspect) before NMS and
//! confidence filtering.

use crate::core::registry::KIND_FOREIGN;
use crate::core::traits::{image_is_empty, DefectDetector, DetectorCommon};
use crate::domain::{DefectRecord, DetectionResult};
use crate::processors::geometry;
use crate::processors::nms::NmsFilter;
use crate::processors::ops;
use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::contours::find_contours;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::median_filter;
use imageproc::point::Point;
use std::time::Instant;
use tracing::{debug, error, info};

const CLASS_ID: i32 = 2;
const CLASS_NAME: &str = "Foreign";

/// Chroma deviation multiplier of the color anomaly pass.
const COLOR_SIGMA_FACTOR: f32 = 2.5;

/// Texture block edge length; blocks slide with 50% overlap.
const TEXTURE_BLOCK: u32 = 32;

/// Texture deviation score above which a block is inspected.
const TEXTURE_SCORE_CUT: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
struct ForeignParams {
    min_area: f64,
    contrast: f64,
    color_threshold: i64,
}

impl ForeignParams {
    fn read(common: &DetectorCommon) -> Self {
        Self {
            min_area: common.param_or("minArea", 5i64) as f64,
            contrast: common.param_or("contrast", 0.3f64),
            color_threshold: common.param_or("colorThreshold", 50i64),
        }
    }
}

/// Detector for foreign material and appearance anomalies.
#[derive(Debug, Default)]
pub struct ForeignDetector {
    common: DetectorCommon,
}

impl ForeignDetector {
    /// Creates a foreign-object detector with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    fn severity(area: f64, contrast: f64) -> f64 {
        0.4 * (area / 200.0).min(1.0) + 0.6 * (contrast / 0.5).min(1.0)
    }

    /// Gray-level strategy: top-hat plus black-hat response thresholded at
    /// a `contrast` fraction of full range, opened to drop speckle.
    fn detect_morphological(&self, gray: &GrayImage, params: &ForeignParams) -> Vec<DefectRecord> {
        let denoised = median_filter(gray, 2, 2);
        let tophat = ops::top_hat(&denoised, 7);
        let blackhat = ops::black_hat(&denoised, 7);
        let combined = ops::saturating_add(&tophat, &blackhat);

        let cut = (255.0 * params.contrast) as u8;
        let binary = threshold(&combined, cut, ThresholdType::Binary);
        let cleaned = ops::gray_open(&binary, 1);

        let mean_brightness = ops::region_mean_std(
            gray,
            0,
            0,
            gray.width().saturating_sub(1),
            gray.height().saturating_sub(1),
        )
        .0;

        let mut defects = Vec::new();
        for contour in find_contours::<i32>(&cleaned) {
            let area = geometry::contour_area(&contour.points);
            if area < params.min_area {
                continue;
            }

            let bbox = geometry::bounding_rect(&contour.points);
            let x1 = (bbox.right() - 1).max(0) as u32;
            let y1 = (bbox.bottom() - 1).max(0) as u32;
            let (roi_mean, _) =
                ops::region_mean_std(gray, bbox.x.max(0) as u32, bbox.y.max(0) as u32, x1, y1);
            let contrast = (roi_mean - mean_brightness).abs() / 255.0;

            let mut defect = DefectRecord::new(CLASS_ID, CLASS_NAME, bbox);
            defect.contour = contour.points.iter().map(|p| (p.x, p.y)).collect();
            let contrast_score = (contrast / 0.5).min(1.0);
            let area_score = (area / 100.0).min(1.0);
            defect.confidence = 0.7 * contrast_score + 0.3 * area_score;
            defect.severity = Self::severity(area, contrast);
            defect.set_attr("area", area);
            defect.set_attr("contrast", contrast);
            defect.set_attr("meanBrightness", roi_mean);
            defect.set_attr("method", "morph");
            Self::apply_shape_descriptors(&mut defect, &contour.points);
            defects.push(defect);
        }
        defects
    }

    /// Color strategy: pixels whose Lab chroma deviates more than 2.5 sigma
    /// from the image mean are flagged, cleaned and contoured.
    fn detect_color_anomalies(&self, rgb: &RgbImage, params: &ForeignParams) -> Vec<DefectRecord> {
        let (w, h) = rgb.dimensions();
        let (_, a_plane, b_plane) = ops::rgb_to_lab_planes(rgb);
        let (mean_a, std_a) = ops::plane_mean_std(&a_plane);
        let (mean_b, std_b) = ops::plane_mean_std(&b_plane);

        // colorThreshold caps how tight the deviation cut may become on
        // almost monochrome images (tiny sigmas flag everything otherwise).
        let floor = params.color_threshold as f32 / 50.0;
        let cut = (std_a.max(std_b) * COLOR_SIGMA_FACTOR).max(floor);

        let mut binary = GrayImage::new(w, h);
        for (i, p) in binary.pixels_mut().enumerate() {
            let dev_a = (a_plane[i] - mean_a).abs();
            let dev_b = (b_plane[i] - mean_b).abs();
            if dev_a.max(dev_b) > cut {
                p.0[0] = 255;
            }
        }
        let cleaned = ops::gray_close(&ops::gray_open(&binary, 2), 2);

        let mut defects = Vec::new();
        for contour in find_contours::<i32>(&cleaned) {
            let area = geometry::contour_area(&contour.points);
            if area < params.min_area {
                continue;
            }
            let mut defect =
                DefectRecord::new(CLASS_ID, CLASS_NAME, geometry::bounding_rect(&contour.points));
            defect.contour = contour.points.iter().map(|p| (p.x, p.y)).collect();
            defect.confidence = (area / 100.0).min(1.0);
            defect.severity = (area / 200.0).min(1.0);
            defect.set_attr("area", area);
            defect.set_attr("method", "color");
            Self::apply_shape_descriptors(&mut defect, &contour.points);
            defects.push(defect);
        }
        defects
    }

    /// Texture strategy: slide a block window over the LBP map with 50%
    /// overlap, flag blocks whose local statistics deviate from the global
    /// distribution, then Otsu-threshold and contour within flagged blocks
    /// only.
    fn detect_texture_anomalies(&self, gray: &GrayImage, params: &ForeignParams) -> Vec<DefectRecord> {
        let (w, h) = gray.dimensions();
        if w < TEXTURE_BLOCK * 2 || h < TEXTURE_BLOCK * 2 {
            return Vec::new();
        }

        let lbp = ops::lbp_map(gray);
        let (global_mean, global_std) = ops::region_mean_std(&lbp, 0, 0, w - 1, h - 1);
        if global_std < 1e-6 {
            return Vec::new();
        }

        let step = TEXTURE_BLOCK / 2;
        let mut defects = Vec::new();

        let mut by = 0;
        while by + TEXTURE_BLOCK <= h {
            let mut bx = 0;
            while bx + TEXTURE_BLOCK <= w {
                let x1 = bx + TEXTURE_BLOCK - 1;
                let y1 = by + TEXTURE_BLOCK - 1;
                let (local_mean, local_std) = ops::region_mean_std(&lbp, bx, by, x1, y1);
                let score = (local_mean - global_mean).abs() / global_std
                    + (local_std - global_std).abs() / global_std;

                if score > TEXTURE_SCORE_CUT {
                    defects.extend(self.contour_block(gray, bx, by, params, score));
                }
                bx += step;
            }
            by += step;
        }
        defects
    }

    /// Re-thresholds a flagged texture block with Otsu and contours the
    /// minority side, translating coordinates back to image space.
    fn contour_block(
        &self,
        gray: &GrayImage,
        bx: u32,
        by: u32,
        params: &ForeignParams,
        score: f64,
    ) -> Vec<DefectRecord> {
        let block = image::imageops::crop_imm(gray, bx, by, TEXTURE_BLOCK, TEXTURE_BLOCK).to_image();
        let level = otsu_level(&block);
        let binary = threshold(&block, level, ThresholdType::Binary);

        // The anomaly is the minority side of the split.
        let foreground: u32 = binary.pixels().filter(|p| p.0[0] > 0).count() as u32;
        let total = TEXTURE_BLOCK * TEXTURE_BLOCK;
        let mask = if foreground * 2 > total {
            let mut inverted = binary;
            for p in inverted.pixels_mut() {
                p.0[0] = 255 - p.0[0];
            }
            inverted
        } else {
            binary
        };

        let mut defects = Vec::new();
        for contour in find_contours::<i32>(&mask) {
            let area = geometry::contour_area(&contour.points);
            if area < params.min_area {
                continue;
            }
            let translated: Vec<Point<i32>> = contour
                .points
                .iter()
                .map(|p| Point::new(p.x + bx as i32, p.y + by as i32))
                .collect();

            let mut defect =
                DefectRecord::new(CLASS_ID, CLASS_NAME, geometry::bounding_rect(&translated));
            defect.contour = translated.iter().map(|p| (p.x, p.y)).collect();
            defect.confidence = 0.7 * (score / 4.0).min(1.0) + 0.3 * (area / 100.0).min(1.0);
            defect.severity = Self::severity(area, score / 10.0);
            defect.set_attr("area", area);
            defect.set_attr("textureScore", score);
            defect.set_attr("method", "texture");
            Self::apply_shape_descriptors(&mut defect, &translated);
            defects.push(defect);
        }
        defects
    }

    /// Blends a shape irregularity score into the candidate confidence and
    /// records the descriptors. Foreign objects skew low-circularity,
    /// low-rectangularity and high-solidity.
    fn apply_shape_descriptors(defect: &mut DefectRecord, points: &[Point<i32>]) {
        if points.len() < 5 {
            return;
        }
        let area = geometry::contour_area(points);
        let perimeter = geometry::contour_perimeter(points);
        if area <= 0.0 || perimeter <= 0.0 {
            return;
        }

        let circularity = (4.0 * std::f64::consts::PI * area / (perimeter * perimeter)).min(1.0);
        let hull_area = geometry::convex_hull_area(points);
        let solidity = if hull_area > 0.0 {
            (area / hull_area).min(1.0)
        } else {
            1.0
        };
        let rect = geometry::min_area_rect(points);
        let rect_area = rect.length * rect.width;
        let rectangularity = if rect_area > 0.0 {
            (area / rect_area).min(1.0)
        } else {
            1.0
        };
        let aspect = rect.aspect_ratio();

        let irregularity = (0.4 * (1.0 - circularity)
            + 0.3 * (1.0 - rectangularity)
            + 0.3 * solidity)
            .clamp(0.0, 1.0);
        defect.confidence = (0.7 * defect.confidence + 0.3 * irregularity).clamp(0.0, 1.0);

        defect.set_attr("circularity", circularity);
        defect.set_attr("solidity", solidity);
        defect.set_attr("rectangularity", rectangularity);
        defect.set_attr("aspectRatio", aspect);
    }
}

impl DefectDetector for ForeignDetector {
    fn name(&self) -> &str {
        "Foreign Object Detector"
    }

    fn kind(&self) -> &'static str {
        KIND_FOREIGN
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
            error!("foreign detect: empty input image");
            return DetectionResult::error("Empty input image");
        }

        let params = ForeignParams::read(&self.common);
        debug!(
            width = image.width(),
            height = image.height(),
            min_area = params.min_area,
            contrast = params.contrast,
            "foreign detect"
        );

        let gray = image.to_luma8();
        let mut pooled = self.detect_morphological(&gray, &params);

        let is_color = !matches!(image, DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_));
        let color_count = if is_color {
            let colors = self.detect_color_anomalies(&image.to_rgb8(), &params);
            let count = colors.len();
            pooled.extend(colors);
            count
        } else {
            0
        };

        pooled.extend(self.detect_texture_anomalies(&gray, &params));
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
            color_candidates = color_count,
            elapsed_ms,
            "foreign detect complete"
        );
        DetectionResult::success(defects, elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn detector() -> ForeignDetector {
        let mut d = ForeignDetector::new();
        assert!(d.initialize());
        d
    }

    #[test]
    fn finds_dark_contaminant_on_bright_surface() {
        let mut img = GrayImage::from_pixel(128, 128, Luma([200]));
        for y in 60..72 {
            for x in 50..64 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert!(!result.defects.is_empty(), "contaminant should be found");
        let best = &result.defects[0];
        assert_eq!(best.class_name, "Foreign");
        assert!(best.attr_f64("area").unwrap_or(0.0) > 0.0);
    }

    #[test]
    fn uniform_image_yields_no_defects() {
        let img = GrayImage::from_pixel(128, 128, Luma([128]));
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert!(result.defects.is_empty());
    }

    #[test]
    fn color_anomaly_is_found_in_color_image() {
        let mut img = RgbImage::from_pixel(96, 96, Rgb([120, 120, 120]));
        for y in 40..52 {
            for x in 40..52 {
                img.put_pixel(x, y, Rgb([200, 40, 40]));
            }
        }
        let mut d = detector();
        d.set_confidence_threshold(0.3);
        let result = d.detect(&DynamicImage::ImageRgb8(img));
        assert!(result.success);
        assert!(
            !result.defects.is_empty(),
            "red patch should register as a color anomaly"
        );
    }

    #[test]
    fn gray_input_skips_color_strategy_without_failing() {
        let mut img = GrayImage::from_pixel(96, 96, Luma([150]));
        img.put_pixel(48, 48, Luma([30]));
        let result = detector().detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
    }

    #[test]
    fn min_area_filters_single_pixel_speckle() {
        let mut img = GrayImage::from_pixel(64, 64, Luma([180]));
        img.put_pixel(30, 30, Luma([20]));

        let mut d = detector();
        let mut params = d.params();
        params.set("minArea", 50);
        d.set_params(params);

        let result = d.detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        assert!(result.defects.is_empty());
    }

    #[test]
    fn emitted_records_carry_shape_descriptors() {
        let mut img = GrayImage::from_pixel(128, 128, Luma([200]));
        for y in 60..75 {
            for x in 50..70 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        let mut d = detector();
        d.set_confidence_threshold(0.1);
        let result = d.detect(&DynamicImage::ImageLuma8(img));
        assert!(result.success);
        let with_shape = result
            .defects
            .iter()
            .filter(|r| r.attr_f64("circularity").is_some())
            .count();
        assert!(with_shape > 0, "shape descriptors missing from records");
    }
}
