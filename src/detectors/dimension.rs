//! Dimensional verification: tolerance checks on measured part geometry.
//!
//! The product outline comes from an Otsu threshold and the largest
//! external contour. Canny edge pixels around the outline are optionally
//! refined to sub-pixel positions by fitting a parabola to the gradient
//! magnitude along the dominant gradient axis, partitioned into left/right
//! and top/bottom point sets, and each set is fitted with a RANSAC line
//! (least squares below the point-count cutoff). Width and height are the
//! perpendicular distances between the fitted line pairs, converted to
//! physical units through the calibration factor; a defect is emitted only
//! when the measurement deviates from its target by more than the
//! tolerance.

use crate::core::registry::KIND_DIMENSION;
use crate::core::traits::{image_is_empty, DefectDetector, DetectorCommon};
use crate::domain::{DefectRecord, DetectionResult, PixelRect};
use crate::processors::geometry::{self, fit_line_least_squares, Line2D};
use crate::processors::nms::NmsFilter;
use image::{DynamicImage, GrayImage};
use imageproc::contours::find_contours;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tracing::{debug, error, info};

const CLASS_ID: i32 = 3;
const CLASS_NAME: &str = "Dimension";

/// Point count at or above which the robust fitter is used.
const RANSAC_MIN_POINTS: usize = 10;

/// Inlier distance threshold of the robust fitter, pixels.
const RANSAC_INLIER_DIST: f64 = 1.5;

/// Minimum fit confidence (inlier ratio) for a measurement to count.
const FIT_CONFIDENCE_FLOOR: f64 = 0.3;

#[derive(Debug, Clone, Copy)]
struct DimensionParams {
    tolerance: f64,
    calibration: f64,
    target_width: f64,
    target_height: f64,
    use_subpixel: bool,
    ransac_iterations: u32,
}

impl DimensionParams {
    fn read(common: &DetectorCommon) -> Self {
        Self {
            tolerance: common.param_or("tolerance", 0.5f64),
            calibration: common.param_or("calibration", 0.1f64),
            target_width: common.param_or("targetWidth", 100.0f64),
            target_height: common.param_or("targetHeight", 100.0f64),
            use_subpixel: common.param_or("useSubpixel", true),
            ransac_iterations: common.param_or("ransacIterations", 64u32),
        }
    }
}

/// An edge point with its dominant gradient axis.
#[derive(Debug, Clone, Copy)]
struct EdgePoint {
    pos: [f64; 2],
    gradient_is_horizontal: bool,
}

/// A fitted measurement line with its support quality.
#[derive(Debug, Clone, Copy)]
struct FittedLine {
    line: Line2D,
    confidence: f64,
}

/// Detector verifying part dimensions against configured targets.
#[derive(Debug)]
pub struct DimensionDetector {
    common: DetectorCommon,
}

impl Default for DimensionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DimensionDetector {
    /// Creates a dimension detector. The default confidence threshold is
    /// lower than the other detectors because measurement confidence grows
    /// with the deviation magnitude.
    pub fn new() -> Self {
        Self {
            common: DetectorCommon::with_threshold(0.3),
        }
    }

    fn severity(deviation: f64, tolerance: f64) -> f64 {
        let ratio = deviation / tolerance;
        if ratio <= 1.0 {
            0.0
        } else if ratio <= 2.0 {
            0.3
        } else if ratio <= 3.0 {
            0.6
        } else {
            0.9
        }
    }

    /// Binarizes the image and returns the largest external contour.
    fn main_contour(gray: &GrayImage) -> Option<Vec<imageproc::point::Point<i32>>> {
        let blurred = imageproc::filter::gaussian_blur_f32(gray, 1.0);
        let level = otsu_level(&blurred);
        let binary = threshold(&blurred, level, ThresholdType::Binary);
        let closed = crate::processors::ops::gray_close(&binary, 2);

        find_contours::<i32>(&closed)
            .into_iter()
            .map(|c| c.points)
            .filter(|points| points.len() >= 5)
            .max_by(|a, b| {
                geometry::contour_area(a)
                    .partial_cmp(&geometry::contour_area(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Collects edge points inside the outline's bounding box (with margin),
    /// refined to sub-pixel positions when enabled.
    fn edge_points(gray: &GrayImage, bbox: &PixelRect, use_subpixel: bool) -> Vec<EdgePoint> {
        let edges = canny(gray, 50.0, 150.0);
        let gx = horizontal_sobel(gray);
        let gy = vertical_sobel(gray);
        let (w, h) = (gray.width() as i64, gray.height() as i64);

        let magnitude = |x: i64, y: i64| -> f64 {
            if x < 0 || y < 0 || x >= w || y >= h {
                return 0.0;
            }
            let dx = gx.get_pixel(x as u32, y as u32).0[0] as f64;
            let dy = gy.get_pixel(x as u32, y as u32).0[0] as f64;
            (dx * dx + dy * dy).sqrt()
        };

        let margin = 2i64;
        let mut points = Vec::new();
        for y in 0..h {
            for x in 0..w {
                if edges.get_pixel(x as u32, y as u32).0[0] == 0 {
                    continue;
                }
                if x < bbox.x as i64 - margin
                    || y < bbox.y as i64 - margin
                    || x >= bbox.right() as i64 + margin
                    || y >= bbox.bottom() as i64 + margin
                {
                    continue;
                }

                let dx = gx.get_pixel(x as u32, y as u32).0[0] as f64;
                let dy = gy.get_pixel(x as u32, y as u32).0[0] as f64;
                let horizontal = dx.abs() >= dy.abs();

                let mut pos = [x as f64, y as f64];
                if use_subpixel {
                    // Parabola through three magnitude samples along the
                    // dominant gradient axis locates the edge between pixels.
                    let (m_minus, m_center, m_plus) = if horizontal {
                        (magnitude(x - 1, y), magnitude(x, y), magnitude(x + 1, y))
                    } else {
                        (magnitude(x, y - 1), magnitude(x, y), magnitude(x, y + 1))
                    };
                    let denom = m_minus - 2.0 * m_center + m_plus;
                    if denom.abs() > 1e-9 {
                        let delta = (0.5 * (m_minus - m_plus) / denom).clamp(-0.5, 0.5);
                        if horizontal {
                            pos[0] += delta;
                        } else {
                            pos[1] += delta;
                        }
                    }
                }
                points.push(EdgePoint {
                    pos,
                    gradient_is_horizontal: horizontal,
                });
            }
        }
        points
    }

    /// RANSAC line fit: random 2-point hypotheses scored by inlier count,
    /// refit on the full inlier set. When the best hypothesis collects
    /// fewer than 2 inliers the refit is skipped and the best hypothesis
    /// line is retained as-is.
    fn ransac_fit_line(
        points: &[[f64; 2]],
        iterations: u32,
        rng: &mut StdRng,
    ) -> Option<FittedLine> {
        let n = points.len();
        if n < 2 {
            return None;
        }

        let mut best_line: Option<Line2D> = None;
        let mut best_inliers = 0usize;

        for _ in 0..iterations {
            let i = rng.gen_range(0..n);
            let mut j = rng.gen_range(0..n);
            if i == j {
                j = (j + 1) % n;
            }
            let Some(candidate) = Line2D::through(points[i], points[j]) else {
                continue;
            };
            let inliers = points
                .iter()
                .filter(|p| candidate.distance_to(**p) < RANSAC_INLIER_DIST)
                .count();
            if inliers > best_inliers {
                best_inliers = inliers;
                best_line = Some(candidate);
                if best_inliers * 10 > n * 9 {
                    break;
                }
            }
        }

        let best_line = best_line?;
        let refit = if best_inliers >= 2 {
            let inlier_points: Vec<[f64; 2]> = points
                .iter()
                .filter(|p| best_line.distance_to(**p) < RANSAC_INLIER_DIST)
                .copied()
                .collect();
            fit_line_least_squares(&inlier_points).unwrap_or(best_line)
        } else {
            best_line
        };

        let final_inliers = points
            .iter()
            .filter(|p| refit.distance_to(**p) < RANSAC_INLIER_DIST)
            .count();
        Some(FittedLine {
            line: refit,
            confidence: final_inliers as f64 / n as f64,
        })
    }

    /// Fits a line to a point set: robust above the cutoff, plain least
    /// squares below it.
    fn fit_side(points: &[[f64; 2]], iterations: u32, rng: &mut StdRng) -> Option<FittedLine> {
        if points.len() >= RANSAC_MIN_POINTS {
            Self::ransac_fit_line(points, iterations, rng)
        } else {
            let line = fit_line_least_squares(points)?;
            let inliers = points
                .iter()
                .filter(|p| line.distance_to(**p) < RANSAC_INLIER_DIST)
                .count();
            Some(FittedLine {
                line,
                confidence: inliers as f64 / points.len() as f64,
            })
        }
    }

    /// Builds one measurement defect record.
    #[allow(clippy::too_many_arguments)]
    fn measurement_defect(
        kind: &str,
        measured: f64,
        target: f64,
        params: &DimensionParams,
        bbox: PixelRect,
        contour: &[imageproc::point::Point<i32>],
        fit_confidence: f64,
    ) -> DefectRecord {
        let deviation = (measured - target).abs();
        let mut defect = DefectRecord::new(CLASS_ID, CLASS_NAME, bbox);
        defect.contour = contour.iter().map(|p| (p.x, p.y)).collect();
        defect.confidence = (deviation / (params.tolerance * 3.0)).min(1.0);
        defect.severity = Self::severity(deviation, params.tolerance);
        defect.description = format!(
            "{} deviation: {:.2} (target: {:.2}, actual: {:.2})",
            if kind == "width" { "Width" } else { "Height" },
            deviation,
            target,
            measured,
        );
        defect.set_attr("measureType", kind);
        defect.set_attr("targetValue", target);
        defect.set_attr("actualValue", measured);
        defect.set_attr("deviation", deviation);
        defect.set_attr("tolerance", params.tolerance);
        defect.set_attr("fitConfidence", fit_confidence);
        defect
    }

    /// Circularity of the product outline (`4*pi*area / perimeter^2`), or
    /// `None` when no outline is found. Values near 1.0 indicate a circular
    /// part.
    pub fn measure_circularity(&self, image: &DynamicImage) -> Option<f64> {
        if image_is_empty(image) {
            return None;
        }
        let contour = Self::main_contour(&image.to_luma8())?;
        let area = geometry::contour_area(&contour);
        let perimeter = geometry::contour_perimeter(&contour);
        if perimeter <= 0.0 {
            return None;
        }
        Some(4.0 * std::f64::consts::PI * area / (perimeter * perimeter))
    }

    /// Angle between two measurement lines in degrees; zero for perfectly
    /// parallel edges.
    pub fn line_parallelism(a: &Line2D, b: &Line2D) -> f64 {
        a.angle_to(b)
    }
}

impl DefectDetector for DimensionDetector {
    fn name(&self) -> &str {
        "Dimension Detector"
    }

    fn kind(&self) -> &'static str {
        KIND_DIMENSION
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
            error!("dimension detect: empty input image");
            return DetectionResult::error("Empty input image");
        }

        let params = DimensionParams::read(&self.common);
        debug!(
            width = image.width(),
            height = image.height(),
            tolerance = params.tolerance,
            calibration = params.calibration,
            use_subpixel = params.use_subpixel,
            "dimension detect"
        );

        let gray = image.to_luma8();
        let Some(contour) = Self::main_contour(&gray) else {
            // No product outline is a valid no-measurement outcome.
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            info!(elapsed_ms, "dimension detect: no outline found");
            return DetectionResult::success(Vec::new(), elapsed_ms);
        };
        let bbox = geometry::bounding_rect(&contour).clamp_to(image.width(), image.height());

        let edge_points = Self::edge_points(&gray, &bbox, params.use_subpixel);
        let (cx, cy) = bbox.center();

        let mut left = Vec::new();
        let mut right = Vec::new();
        let mut top = Vec::new();
        let mut bottom = Vec::new();
        for p in &edge_points {
            if p.gradient_is_horizontal {
                if p.pos[0] < cx {
                    left.push(p.pos);
                } else {
                    right.push(p.pos);
                }
            } else if p.pos[1] < cy {
                top.push(p.pos);
            } else {
                bottom.push(p.pos);
            }
        }

        let mut rng = StdRng::seed_from_u64(0x5eed_d1);
        let fit = |points: &[[f64; 2]], rng: &mut StdRng| {
            Self::fit_side(points, params.ransac_iterations, rng)
        };
        let left_fit = fit(&left, &mut rng);
        let right_fit = fit(&right, &mut rng);
        let top_fit = fit(&top, &mut rng);
        let bottom_fit = fit(&bottom, &mut rng);

        let mut defects = Vec::new();

        if let (Some(l), Some(r)) = (left_fit, right_fit) {
            let fit_confidence = l.confidence.min(r.confidence);
            if fit_confidence >= FIT_CONFIDENCE_FLOOR {
                let width_px = geometry::parallel_line_distance(&l.line, &r.line);
                let measured = width_px * params.calibration;
                let deviation = (measured - params.target_width).abs();
                // A deviation exactly at the tolerance is still in tolerance.
                if deviation > params.tolerance + 1e-9 {
                    let mut defect = Self::measurement_defect(
                        "width",
                        measured,
                        params.target_width,
                        &params,
                        bbox,
                        &contour,
                        fit_confidence,
                    );
                    defect.set_attr("parallelism", Self::line_parallelism(&l.line, &r.line));
                    defects.push(defect);
                }
            }
        }

        if let (Some(t), Some(b)) = (top_fit, bottom_fit) {
            let fit_confidence = t.confidence.min(b.confidence);
            if fit_confidence >= FIT_CONFIDENCE_FLOOR {
                let height_px = geometry::parallel_line_distance(&t.line, &b.line);
                let measured = height_px * params.calibration;
                let deviation = (measured - params.target_height).abs();
                if deviation > params.tolerance + 1e-9 {
                    let mut defect = Self::measurement_defect(
                        "height",
                        measured,
                        params.target_height,
                        &params,
                        bbox,
                        &contour,
                        fit_confidence,
                    );
                    defect.set_attr("parallelism", Self::line_parallelism(&t.line, &b.line));
                    defects.push(defect);
                }
            }
        }

        let deduped = NmsFilter::new(0.5).filter(defects);
        let defects = self.common.filter_by_confidence(deduped);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            found = defects.len(),
            edge_points = edge_points.len(),
            elapsed_ms,
            "dimension detect complete"
        );
        DetectionResult::success(defects, elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Bright rectangle of the given pixel width/height on a dark field.
    fn part_image(part_width: u32, part_height: u32) -> DynamicImage {
        let mut img = GrayImage::from_pixel(300, 300, Luma([20]));
        let x0 = (300 - part_width) / 2;
        let y0 = (300 - part_height) / 2;
        for y in y0..y0 + part_height {
            for x in x0..x0 + part_width {
                img.put_pixel(x, y, Luma([230]));
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    fn configured_detector(target_width: f64, tolerance: f64) -> DimensionDetector {
        let mut d = DimensionDetector::new();
        assert!(d.initialize());
        let mut params = d.params();
        params.set("targetWidth", target_width);
        params.set("targetHeight", 100.0);
        params.set("tolerance", tolerance);
        params.set("calibration", 1.0);
        d.set_params(params);
        d
    }

    #[test]
    fn in_tolerance_part_produces_no_defect() {
        let mut d = configured_detector(100.0, 0.5);
        let result = d.detect(&part_image(100, 100));
        assert!(result.success);
        let width_defects: Vec<_> = result
            .defects
            .iter()
            .filter(|r| r.attributes.get("measureType").map(|v| v == &"width".into()) == Some(true))
            .collect();
        assert!(
            width_defects.is_empty(),
            "100 px part at target 100 must pass: {width_defects:?}"
        );
    }

    #[test]
    fn oversized_part_produces_one_width_defect_with_deviation() {
        let mut d = configured_detector(100.0, 0.5);
        let result = d.detect(&part_image(102, 100));
        assert!(result.success);

        let width_defects: Vec<_> = result
            .defects
            .iter()
            .filter(|r| r.attributes.get("measureType").map(|v| v == &"width".into()) == Some(true))
            .collect();
        assert_eq!(width_defects.len(), 1, "expected exactly one width defect");
        let deviation = width_defects[0].attr_f64("deviation").unwrap();
        assert!(
            (deviation - 2.0).abs() < 0.6,
            "deviation {deviation} should be near 2.0"
        );
        assert_eq!(width_defects[0].class_name, "Dimension");
    }

    #[test]
    fn boundary_deviation_equal_to_tolerance_is_accepted() {
        // target 101 vs measured ~100: deviation ~1.0 == tolerance 1.0.
        let mut d = configured_detector(101.0, 1.0);
        let result = d.detect(&part_image(100, 100));
        assert!(result.success);
        let width_defects = result
            .defects
            .iter()
            .filter(|r| r.attributes.get("measureType").map(|v| v == &"width".into()) == Some(true))
            .count();
        assert_eq!(width_defects, 0, "boundary is inclusive of within-tolerance");
    }

    #[test]
    fn severity_steps_with_deviation_ratio() {
        assert_eq!(DimensionDetector::severity(0.4, 0.5), 0.0);
        assert_eq!(DimensionDetector::severity(0.8, 0.5), 0.3);
        assert_eq!(DimensionDetector::severity(1.2, 0.5), 0.6);
        assert_eq!(DimensionDetector::severity(5.0, 0.5), 0.9);
    }

    #[test]
    fn featureless_image_yields_no_measurements() {
        let mut d = configured_detector(100.0, 0.5);
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128])));
        let result = d.detect(&img);
        assert!(result.success);
        assert!(result.defects.is_empty());
    }

    #[test]
    fn empty_image_is_an_error() {
        let mut d = DimensionDetector::new();
        d.initialize();
        let result = d.detect(&DynamicImage::ImageLuma8(GrayImage::new(0, 0)));
        assert!(!result.success);
    }

    #[test]
    fn circularity_near_one_for_a_disc() {
        let mut img = GrayImage::from_pixel(200, 200, Luma([20]));
        for y in 0..200i32 {
            for x in 0..200i32 {
                let (dx, dy) = ((x - 100) as f64, (y - 100) as f64);
                if (dx * dx + dy * dy).sqrt() <= 60.0 {
                    img.put_pixel(x as u32, y as u32, Luma([230]));
                }
            }
        }
        let d = DimensionDetector::new();
        let circ = d
            .measure_circularity(&DynamicImage::ImageLuma8(img))
            .expect("disc outline");
        assert!(circ > 0.85, "disc circularity {circ}");

        let rect_circ = d
            .measure_circularity(&part_image(160, 40))
            .expect("rect outline");
        assert!(rect_circ < circ, "elongated part must be less circular");
    }

    #[test]
    fn ransac_ignores_outliers() {
        let mut points: Vec<[f64; 2]> = (0..40).map(|i| [50.0, i as f64 * 2.0]).collect();
        // A cluster of gross outliers.
        points.extend((0..8).map(|i| [80.0 + i as f64 * 3.0, 10.0]));

        let mut rng = StdRng::seed_from_u64(7);
        let fit = DimensionDetector::ransac_fit_line(&points, 128, &mut rng).unwrap();
        // The recovered line is the vertical x = 50.
        assert!(fit.line.distance_to([50.0, 33.0]) < 0.5);
        assert!(fit.confidence > 0.7);
    }
}
