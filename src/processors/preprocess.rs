//! Image conditioning ahead of detection.
//!
//! [`ImagePreprocessor`] holds a manually configured parameter set (ROI,
//! denoise strength, brightness, contrast, gamma) applied by [`process`],
//! plus the enhancement operations (histogram equalization, CLAHE, Retinex,
//! MSRCR) and an automatic path: [`analyze_quality`] measures the image,
//! [`suggest_params`] maps the measurements to parameters, and
//! [`process_adaptive`] applies them in a fixed stage order.
//!
//! [`process`]: ImagePreprocessor::process
//! [`analyze_quality`]: ImagePreprocessor::analyze_quality
//! [`suggest_params`]: ImagePreprocessor::suggest_params
//! [`process_adaptive`]: ImagePreprocessor::process_adaptive

use crate::domain::PixelRect;
use crate::processors::ops;
use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use tracing::debug;

/// Sigmas of the multi-scale Retinex stages.
pub const MSR_SIGMAS: [f32; 3] = [15.0, 80.0, 250.0];

/// Measured quality characteristics of an input image.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    /// Mean luminance.
    pub brightness: f64,
    /// Luminance standard deviation.
    pub contrast: f64,
    /// Spread between the darkest and brightest pixel values.
    pub dynamic_range: u8,
    /// Variance of the Laplacian response; low values indicate blur.
    pub sharpness: f64,
    /// Immerkaer noise standard deviation estimate.
    pub noise_sigma: f64,
    /// Mean luminance below the under-exposure cut.
    pub under_exposed: bool,
    /// Mean luminance above the over-exposure cut.
    pub over_exposed: bool,
    /// Contrast below the low-contrast cut.
    pub low_contrast: bool,
    /// Sharpness below the blur cut.
    pub blurry: bool,
    /// Noise estimate above the noisy cut.
    pub noisy: bool,
}

/// Concrete preprocessing parameters, manually set or derived from a
/// [`QualityReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessParams {
    /// Denoise strength 0..=100 selecting the filter tier.
    pub denoise_strength: i32,
    /// Gamma correction exponent.
    pub gamma: f64,
    /// Additive brightness delta.
    pub brightness_delta: i32,
    /// Multiplicative contrast factor about mid-gray.
    pub contrast_factor: f64,
    /// Whether CLAHE should replace plain contrast scaling.
    pub use_clahe: bool,
    /// Whether multi-scale Retinex should run before denoising.
    pub use_retinex: bool,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            denoise_strength: 0,
            gamma: 1.0,
            brightness_delta: 0,
            contrast_factor: 1.0,
            use_clahe: false,
            use_retinex: false,
        }
    }
}

/// Deterministic image conditioning with manual and adaptive parameter paths.
#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    roi: Option<PixelRect>,
    denoise_strength: i32,
    contrast_factor: f64,
    brightness_delta: i32,
    gamma: f64,
}

impl ImagePreprocessor {
    /// Creates a preprocessor with no-op parameters.
    pub fn new() -> Self {
        Self {
            roi: None,
            denoise_strength: 0,
            contrast_factor: 1.0,
            brightness_delta: 0,
            gamma: 1.0,
        }
    }

    /// Restricts processing to a region of interest.
    pub fn set_roi(&mut self, roi: PixelRect) {
        self.roi = Some(roi);
    }

    /// Removes the region of interest.
    pub fn clear_roi(&mut self) {
        self.roi = None;
    }

    /// Sets the denoise strength, clamped to 0..=100.
    pub fn set_denoise_strength(&mut self, strength: i32) {
        self.denoise_strength = strength.clamp(0, 100);
    }

    /// Sets the contrast factor, clamped to 0.5..=2.0.
    pub fn set_contrast_enhance(&mut self, factor: f64) {
        self.contrast_factor = factor.clamp(0.5, 2.0);
    }

    /// Sets the brightness delta, clamped to -100..=100.
    pub fn set_brightness_adjust(&mut self, delta: i32) {
        self.brightness_delta = delta.clamp(-100, 100);
    }

    /// Sets the gamma exponent, clamped to 0.1..=3.0.
    pub fn set_gamma_correction(&mut self, gamma: f64) {
        self.gamma = gamma.clamp(0.1, 3.0);
    }

    /// Applies the manually configured stages in fixed order, skipping
    /// stages left at their no-op defaults:
    /// ROI -> denoise -> brightness -> contrast -> gamma.
    pub fn process(&self, input: &DynamicImage) -> DynamicImage {
        if input.width() == 0 || input.height() == 0 {
            return input.clone();
        }

        let mut result = self.apply_roi(input);
        if self.denoise_strength > 0 {
            result = self.denoise(&result, self.denoise_strength);
        }
        if self.brightness_delta != 0 {
            result = self.adjust_brightness(&result, self.brightness_delta);
        }
        if (self.contrast_factor - 1.0).abs() > 0.01 {
            result = self.enhance_contrast(&result, self.contrast_factor);
        }
        if (self.gamma - 1.0).abs() > 0.01 {
            result = self.correct_gamma(&result, self.gamma);
        }
        result
    }

    /// Measures quality, derives parameters and applies them in fixed order:
    /// ROI -> Retinex (if suggested) -> denoise -> brightness ->
    /// CLAHE-or-contrast -> gamma.
    pub fn process_adaptive(&self, input: &DynamicImage) -> DynamicImage {
        if input.width() == 0 || input.height() == 0 {
            return input.clone();
        }

        let quality = self.analyze_quality(input);
        let params = self.suggest_params(&quality);
        debug!(
            brightness = quality.brightness,
            contrast = quality.contrast,
            noise = quality.noise_sigma,
            ?params,
            "adaptive preprocessing"
        );

        let mut result = self.apply_roi(input);
        if params.use_retinex {
            result = self.retinex_multi(&result, &MSR_SIGMAS);
        }
        if params.denoise_strength > 0 {
            result = self.denoise(&result, params.denoise_strength);
        }
        if params.brightness_delta != 0 {
            result = self.adjust_brightness(&result, params.brightness_delta);
        }
        if params.use_clahe {
            result = self.clahe(&result, 2.0);
        } else if (params.contrast_factor - 1.0).abs() > 0.01 {
            result = self.enhance_contrast(&result, params.contrast_factor);
        }
        if (params.gamma - 1.0).abs() > 0.01 {
            result = self.correct_gamma(&result, params.gamma);
        }
        result
    }

    /// Crops to the configured ROI, intersected with the image bounds.
    /// Returns the input unchanged when no valid ROI is set.
    pub fn apply_roi(&self, input: &DynamicImage) -> DynamicImage {
        let Some(roi) = self.roi else {
            return input.clone();
        };
        let valid = roi.clamp_to(input.width(), input.height());
        if valid.is_empty() {
            return input.clone();
        }
        input.crop_imm(valid.x as u32, valid.y as u32, valid.width, valid.height)
    }

    /// Strength-tiered denoising: Gaussian blur up to 30, bilateral up to
    /// 60, non-local means above.
    pub fn denoise(&self, input: &DynamicImage, strength: i32) -> DynamicImage {
        if strength <= 30 {
            match input {
                DynamicImage::ImageLuma8(gray) => {
                    DynamicImage::ImageLuma8(gaussian_blur_f32(gray, 0.8))
                }
                other => DynamicImage::ImageRgb8(gaussian_blur_f32(&other.to_rgb8(), 0.8)),
            }
        } else if strength <= 60 {
            Self::per_luma_channel(input, |gray| ops::bilateral_filter_gray(gray, 2, 25.0, 25.0))
        } else {
            Self::per_luma_channel(input, |gray| ops::nlm_denoise_gray(gray, 10.0))
        }
    }

    /// Adds a constant brightness offset with saturation.
    pub fn adjust_brightness(&self, input: &DynamicImage, delta: i32) -> DynamicImage {
        Self::map_values(input, |v| (v as i32 + delta).clamp(0, 255) as u8)
    }

    /// Scales contrast about mid-gray 128.
    pub fn enhance_contrast(&self, input: &DynamicImage, factor: f64) -> DynamicImage {
        Self::map_values(input, |v| {
            ((v as f64 - 128.0) * factor + 128.0).round().clamp(0.0, 255.0) as u8
        })
    }

    /// Gamma correction through a 256-entry lookup table.
    pub fn correct_gamma(&self, input: &DynamicImage, gamma: f64) -> DynamicImage {
        let inv = 1.0 / gamma;
        let mut lut = [0u8; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = ((i as f64 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        Self::map_values(input, |v| lut[v as usize])
    }

    /// Min-max normalization to the full 0..=255 range.
    pub fn normalize(&self, input: &DynamicImage) -> DynamicImage {
        let gray = input.to_luma8();
        let (mut min, mut max) = (255u8, 0u8);
        for p in gray.pixels() {
            min = min.min(p.0[0]);
            max = max.max(p.0[0]);
        }
        if max <= min {
            return input.clone();
        }
        let range = (max - min) as f64;
        let offset = min as f64;
        Self::map_values(input, move |v| {
            (((v as f64 - offset) / range) * 255.0).round().clamp(0.0, 255.0) as u8
        })
    }

    /// Unsharp 3x3 sharpening kernel.
    pub fn sharpen(&self, input: &DynamicImage) -> DynamicImage {
        let sharpen_one = |gray: &GrayImage| -> GrayImage {
            let kernel: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
            let field = ops::convolve_f32(gray, &kernel, 1);
            let mut out = GrayImage::new(gray.width(), gray.height());
            for (i, p) in out.pixels_mut().enumerate() {
                p.0[0] = field[i].round().clamp(0.0, 255.0) as u8;
            }
            out
        };
        Self::per_luma_channel(input, sharpen_one)
    }

    /// Global histogram equalization; color images are equalized on the
    /// luminance channel only.
    pub fn equalize_histogram(&self, input: &DynamicImage) -> DynamicImage {
        match input {
            DynamicImage::ImageLuma8(gray) => {
                DynamicImage::ImageLuma8(imageproc::contrast::equalize_histogram(gray))
            }
            other => Self::on_luminance(&other.to_rgb8(), |l| {
                imageproc::contrast::equalize_histogram(l)
            }),
        }
    }

    /// Contrast-limited adaptive histogram equalization; color images are
    /// processed on the luminance channel only.
    pub fn clahe(&self, input: &DynamicImage, clip_limit: f64) -> DynamicImage {
        match input {
            DynamicImage::ImageLuma8(gray) => {
                DynamicImage::ImageLuma8(ops::clahe_gray(gray, clip_limit, 8))
            }
            other => Self::on_luminance(&other.to_rgb8(), |l| ops::clahe_gray(l, clip_limit, 8)),
        }
    }

    /// Single-scale Retinex: log-domain subtraction of a Gaussian surround.
    pub fn retinex_single(&self, input: &DynamicImage, sigma: f32) -> DynamicImage {
        self.retinex_multi(input, &[sigma])
    }

    /// Multi-scale Retinex averaged over the given sigmas, applied to the
    /// luminance channel and min-max normalized.
    pub fn retinex_multi(&self, input: &DynamicImage, sigmas: &[f32]) -> DynamicImage {
        let apply = |gray: &GrayImage| -> GrayImage {
            let field = ops::gray_to_f32(gray);
            let msr = Self::retinex_field(&field, gray.width(), gray.height(), sigmas);
            ops::f32_to_gray_normalized(&msr, gray.width(), gray.height())
        };
        match input {
            DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(apply(gray)),
            other => Self::on_luminance(&other.to_rgb8(), apply),
        }
    }

    /// Multi-scale Retinex with per-channel color restoration.
    ///
    /// Each channel receives the multi-scale Retinex response weighted by a
    /// log-ratio color restoration factor, then the result is min-max
    /// normalized per channel.
    pub fn msrcr(&self, input: &DynamicImage, sigmas: &[f32]) -> DynamicImage {
        const ALPHA: f32 = 125.0;
        const BETA: f32 = 46.0;

        let rgb = input.to_rgb8();
        let (w, h) = rgb.dimensions();
        let n = (w * h) as usize;

        let mut channels: [Vec<f32>; 3] = [
            Vec::with_capacity(n),
            Vec::with_capacity(n),
            Vec::with_capacity(n),
        ];
        for p in rgb.pixels() {
            for c in 0..3 {
                channels[c].push(p.0[c] as f32);
            }
        }

        let mut restored: Vec<Vec<f32>> = Vec::with_capacity(3);
        for c in 0..3 {
            let msr = Self::retinex_field(&channels[c], w, h, sigmas);
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                let sum = channels[0][i] + channels[1][i] + channels[2][i] + 3.0;
                let restoration = BETA * ((ALPHA * (channels[c][i] + 1.0)).ln() - sum.ln());
                out.push(restoration * msr[i]);
            }
            restored.push(out);
        }

        let mut out = RgbImage::new(w, h);
        for (c, plane_data) in restored.iter().enumerate() {
            let plane = ops::f32_to_gray_normalized(plane_data, w, h);
            for (x, y, p) in plane.enumerate_pixels() {
                out.get_pixel_mut(x, y).0[c] = p.0[0];
            }
        }
        DynamicImage::ImageRgb8(out)
    }

    fn retinex_field(field: &[f32], width: u32, height: u32, sigmas: &[f32]) -> Vec<f32> {
        let log_input: Vec<f32> = field.iter().map(|&v| (v + 1.0).ln()).collect();
        let mut acc = vec![0.0f32; field.len()];
        for &sigma in sigmas {
            let blurred = ops::blur_field(field, width, height, sigma);
            for i in 0..field.len() {
                acc[i] += log_input[i] - (blurred[i] + 1.0).ln();
            }
        }
        let scale = 1.0 / sigmas.len().max(1) as f32;
        for v in acc.iter_mut() {
            *v *= scale;
        }
        acc
    }

    /// Measures brightness, contrast, dynamic range, sharpness and noise,
    /// and derives quality flags.
    pub fn analyze_quality(&self, input: &DynamicImage) -> QualityReport {
        let gray = input.to_luma8();
        let (w, h) = gray.dimensions();
        let n = (w as f64) * (h as f64);

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let (mut min, mut max) = (255u8, 0u8);
        for p in gray.pixels() {
            let v = p.0[0];
            sum += v as f64;
            sum_sq += (v as f64) * (v as f64);
            min = min.min(v);
            max = max.max(v);
        }
        let brightness = sum / n;
        let contrast = (sum_sq / n - brightness * brightness).max(0.0).sqrt();
        let dynamic_range = max.saturating_sub(min);

        // Laplacian variance as the sharpness estimate.
        let lap = imageproc::filter::laplacian_filter(&gray);
        let lap_n = (lap.width() as f64) * (lap.height() as f64);
        let lap_mean = lap.pixels().map(|p| p.0[0] as f64).sum::<f64>() / lap_n;
        let sharpness = lap
            .pixels()
            .map(|p| {
                let d = p.0[0] as f64 - lap_mean;
                d * d
            })
            .sum::<f64>()
            / lap_n;

        let noise_sigma = Self::immerkaer_noise(&gray);

        QualityReport {
            brightness,
            contrast,
            dynamic_range,
            sharpness,
            noise_sigma,
            under_exposed: brightness < 60.0,
            over_exposed: brightness > 190.0,
            low_contrast: contrast < 30.0,
            blurry: sharpness < 100.0,
            noisy: noise_sigma > 5.0,
        }
    }

    /// Immerkaer fast noise estimate: mean absolute response to the
    /// `[1,-2,1; -2,4,-2; 1,-2,1]` kernel scaled by `sqrt(pi/2)`.
    fn immerkaer_noise(gray: &GrayImage) -> f64 {
        let (w, h) = (gray.width() as i64, gray.height() as i64);
        if w < 3 || h < 3 {
            return 0.0;
        }
        let at = |x: i64, y: i64| gray.get_pixel(x as u32, y as u32).0[0] as f64;
        let mut acc = 0.0;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let response = at(x - 1, y - 1) - 2.0 * at(x, y - 1) + at(x + 1, y - 1)
                    - 2.0 * at(x - 1, y)
                    + 4.0 * at(x, y)
                    - 2.0 * at(x + 1, y)
                    + at(x - 1, y + 1)
                    - 2.0 * at(x, y + 1)
                    + at(x + 1, y + 1);
                acc += response.abs();
            }
        }
        (std::f64::consts::PI / 2.0).sqrt() * acc / (6.0 * ((w - 2) * (h - 2)) as f64)
    }

    /// Maps a quality report to concrete preprocessing parameters.
    pub fn suggest_params(&self, quality: &QualityReport) -> PreprocessParams {
        let denoise_strength = if quality.noise_sigma > 10.0 {
            70
        } else if quality.noise_sigma > 7.0 {
            40
        } else if quality.noisy {
            20
        } else {
            0
        };

        let (brightness_delta, gamma) = if quality.under_exposed {
            (30, 0.75)
        } else if quality.over_exposed {
            (-30, 1.3)
        } else {
            (0, 1.0)
        };

        let use_clahe = quality.low_contrast && quality.dynamic_range < 120;
        let contrast_factor = if quality.low_contrast && !use_clahe {
            1.4
        } else {
            1.0
        };
        let use_retinex = quality.under_exposed && quality.low_contrast;

        PreprocessParams {
            denoise_strength,
            gamma,
            brightness_delta,
            contrast_factor,
            use_clahe,
            use_retinex,
        }
    }

    /// Applies a value mapping to every channel of every pixel, preserving
    /// the gray/color kind of the input.
    fn map_values(input: &DynamicImage, f: impl Fn(u8) -> u8) -> DynamicImage {
        match input {
            DynamicImage::ImageLuma8(gray) => {
                let mut out = gray.clone();
                for p in out.pixels_mut() {
                    p.0[0] = f(p.0[0]);
                }
                DynamicImage::ImageLuma8(out)
            }
            other => {
                let mut out = other.to_rgb8();
                for p in out.pixels_mut() {
                    for c in 0..3 {
                        p.0[c] = f(p.0[c]);
                    }
                }
                DynamicImage::ImageRgb8(out)
            }
        }
    }

    /// Applies a grayscale transform per channel for color inputs, or
    /// directly for grayscale inputs.
    fn per_luma_channel(input: &DynamicImage, f: impl Fn(&GrayImage) -> GrayImage) -> DynamicImage {
        match input {
            DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(f(gray)),
            other => {
                let rgb = other.to_rgb8();
                let (w, h) = rgb.dimensions();
                let mut planes = Vec::with_capacity(3);
                for c in 0..3 {
                    let plane = GrayImage::from_fn(w, h, |x, y| {
                        image::Luma([rgb.get_pixel(x, y).0[c]])
                    });
                    planes.push(f(&plane));
                }
                let mut out = RgbImage::new(w, h);
                for (x, y, p) in out.enumerate_pixels_mut() {
                    for c in 0..3 {
                        p.0[c] = planes[c].get_pixel(x, y).0[0];
                    }
                }
                DynamicImage::ImageRgb8(out)
            }
        }
    }

    /// Runs a transform on the L channel of a color image, keeping a/b.
    fn on_luminance(rgb: &RgbImage, f: impl Fn(&GrayImage) -> GrayImage) -> DynamicImage {
        let (w, h) = rgb.dimensions();
        let (l, a, b) = ops::rgb_to_lab_planes(rgb);
        let l_gray = GrayImage::from_fn(w, h, |x, y| {
            let v = l[(y * w + x) as usize];
            image::Luma([(v / 100.0 * 255.0).clamp(0.0, 255.0) as u8])
        });
        let transformed = f(&l_gray);
        let l_new: Vec<f32> = transformed
            .pixels()
            .map(|p| p.0[0] as f32 / 255.0 * 100.0)
            .collect();
        DynamicImage::ImageRgb8(ops::lab_planes_to_rgb(&l_new, &a, &b, w, h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray_image(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(w, h, Luma([v])))
    }

    #[test]
    fn defaults_are_noop() {
        let pre = ImagePreprocessor::new();
        let input = gray_image(16, 16, 77);
        let output = pre.process(&input);
        assert_eq!(input.to_luma8().as_raw(), output.to_luma8().as_raw());
    }

    #[test]
    fn roi_crops_and_clamps() {
        let mut pre = ImagePreprocessor::new();
        pre.set_roi(PixelRect::new(10, 10, 1000, 1000));
        let out = pre.process(&gray_image(64, 48, 10));
        assert_eq!(out.width(), 54);
        assert_eq!(out.height(), 38);
    }

    #[test]
    fn brightness_and_contrast_adjustments_saturate() {
        let pre = ImagePreprocessor::new();
        let bright = pre.adjust_brightness(&gray_image(4, 4, 250), 30);
        assert_eq!(bright.to_luma8().get_pixel(0, 0).0[0], 255);

        let contrasted = pre.enhance_contrast(&gray_image(4, 4, 160), 2.0);
        assert_eq!(contrasted.to_luma8().get_pixel(0, 0).0[0], 192);
    }

    #[test]
    fn gamma_above_one_brightens_midtones() {
        let pre = ImagePreprocessor::new();
        let out = pre.correct_gamma(&gray_image(4, 4, 64), 2.0);
        assert!(out.to_luma8().get_pixel(0, 0).0[0] > 64);
        let darker = pre.correct_gamma(&gray_image(4, 4, 64), 0.5);
        assert!(darker.to_luma8().get_pixel(0, 0).0[0] < 64);
    }

    #[test]
    fn normalize_stretches_to_full_range() {
        let mut img = GrayImage::new(16, 1);
        for (x, _, p) in img.enumerate_pixels_mut() {
            p.0[0] = 100 + x as u8;
        }
        let pre = ImagePreprocessor::new();
        let out = pre.normalize(&DynamicImage::ImageLuma8(img)).to_luma8();
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(15, 0).0[0], 255);
    }

    #[test]
    fn quality_flags_on_dark_flat_image() {
        let pre = ImagePreprocessor::new();
        let report = pre.analyze_quality(&gray_image(32, 32, 20));
        assert!(report.under_exposed);
        assert!(report.low_contrast);
        assert!(report.blurry);
        assert!(!report.over_exposed);
        assert!(!report.noisy);
    }

    #[test]
    fn suggestions_follow_flags() {
        let pre = ImagePreprocessor::new();
        let report = QualityReport {
            brightness: 40.0,
            contrast: 10.0,
            dynamic_range: 60,
            sharpness: 20.0,
            noise_sigma: 1.0,
            under_exposed: true,
            over_exposed: false,
            low_contrast: true,
            blurry: true,
            noisy: false,
        };
        let params = pre.suggest_params(&report);
        assert!(params.brightness_delta > 0);
        assert!(params.gamma < 1.0);
        assert!(params.use_clahe);
        assert!(params.use_retinex);
        assert_eq!(params.denoise_strength, 0);
    }

    #[test]
    fn adaptive_processing_preserves_dimensions() {
        let pre = ImagePreprocessor::new();
        let out = pre.process_adaptive(&gray_image(40, 30, 35));
        assert_eq!((out.width(), out.height()), (40, 30));
    }

    #[test]
    fn retinex_flattens_illumination_gradient() {
        // Bright-to-dark ramp: Retinex should compress the large-scale
        // gradient relative to the raw image.
        let mut img = GrayImage::new(64, 64);
        for (x, _, p) in img.enumerate_pixels_mut() {
            p.0[0] = (40 + x * 3).min(255) as u8;
        }
        let pre = ImagePreprocessor::new();
        let out = pre
            .retinex_single(&DynamicImage::ImageLuma8(img), 10.0)
            .to_luma8();
        // The output keeps the image size and stays 8-bit normalized.
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn heavy_denoise_reduces_pixel_spread() {
        // Aperiodic low-amplitude noise around mid-gray.
        let mut img = GrayImage::new(32, 32);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let h = x
                .wrapping_mul(2_654_435_761)
                .wrapping_add(y.wrapping_mul(2_246_822_519));
            p.0[0] = (123 + (h >> 16) % 11) as u8;
        }
        let pre = ImagePreprocessor::new();
        let input = DynamicImage::ImageLuma8(img);
        let before = pre.analyze_quality(&input).contrast;
        let out = pre.denoise(&input, 80);
        let after = pre.analyze_quality(&out).contrast;
        assert!(after < before, "contrast {after} not below {before}");
    }
}
