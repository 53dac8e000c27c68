//! Typed detector settings and their parameter-bag translation.
//!
//! The external configuration subsystem owns the on-disk format; this
//! module is the boundary structure it exchanges with the manager. Each
//! per-detector struct mirrors the recognized parameter keys of its
//! detector plus the enabled flag, serializes in camelCase, and converts
//! to/from the flat [`ParamMap`] the detectors actually read.

use crate::core::params::ParamMap;
use serde::{Deserialize, Serialize};

/// Scratch detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScratchSettings {
    /// Whether the detector runs in multi-detector passes.
    pub enabled: bool,
    /// Edge sensitivity 0..=100.
    pub sensitivity: i64,
    /// Minimum scratch length, pixels.
    pub min_length: i64,
    /// Maximum scratch width, pixels.
    pub max_width: i64,
    /// Gradient contrast threshold of the segment grower.
    pub contrast_threshold: i64,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 75,
            min_length: 10,
            max_width: 5,
            contrast_threshold: 30,
        }
    }
}

impl ScratchSettings {
    /// Converts into the detector's parameter bag.
    pub fn to_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.set("sensitivity", self.sensitivity);
        params.set("minLength", self.min_length);
        params.set("maxWidth", self.max_width);
        params.set("contrastThreshold", self.contrast_threshold);
        params
    }

    /// Reads settings back from a parameter bag.
    pub fn from_params(params: &ParamMap, enabled: bool) -> Self {
        let defaults = Self::default();
        Self {
            enabled,
            sensitivity: params.get_or("sensitivity", defaults.sensitivity),
            min_length: params.get_or("minLength", defaults.min_length),
            max_width: params.get_or("maxWidth", defaults.max_width),
            contrast_threshold: params.get_or("contrastThreshold", defaults.contrast_threshold),
        }
    }
}

/// Crack detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrackSettings {
    /// Whether the detector runs in multi-detector passes.
    pub enabled: bool,
    /// Enhancement response threshold.
    pub threshold: i64,
    /// Minimum crack area, pixels.
    pub min_area: i64,
    /// Closing kernel size (forced odd).
    pub morph_kernel_size: i64,
    /// Binary threshold of the fallback enhancement path.
    pub binary_threshold: i64,
    /// Whether the Gabor enhancement runs.
    pub use_gabor: bool,
}

impl Default for CrackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 80,
            min_area: 20,
            morph_kernel_size: 3,
            binary_threshold: 128,
            use_gabor: true,
        }
    }
}

impl CrackSettings {
    /// Converts into the detector's parameter bag.
    pub fn to_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.set("threshold", self.threshold);
        params.set("minArea", self.min_area);
        params.set("morphKernelSize", self.morph_kernel_size);
        params.set("binaryThreshold", self.binary_threshold);
        params.set("useGabor", self.use_gabor);
        params
    }

    /// Reads settings back from a parameter bag.
    pub fn from_params(params: &ParamMap, enabled: bool) -> Self {
        let defaults = Self::default();
        Self {
            enabled,
            threshold: params.get_or("threshold", defaults.threshold),
            min_area: params.get_or("minArea", defaults.min_area),
            morph_kernel_size: params.get_or("morphKernelSize", defaults.morph_kernel_size),
            binary_threshold: params.get_or("binaryThreshold", defaults.binary_threshold),
            use_gabor: params.get_or("useGabor", defaults.use_gabor),
        }
    }
}

/// Foreign-object detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForeignSettings {
    /// Whether the detector runs in multi-detector passes.
    pub enabled: bool,
    /// Minimum anomaly area, pixels.
    pub min_area: i64,
    /// Contrast fraction of full range for the morphological pass.
    pub contrast: f64,
    /// Chroma deviation floor of the color pass.
    pub color_threshold: i64,
}

impl Default for ForeignSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_area: 5,
            contrast: 0.3,
            color_threshold: 50,
        }
    }
}

impl ForeignSettings {
    /// Converts into the detector's parameter bag.
    pub fn to_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.set("minArea", self.min_area);
        params.set("contrast", self.contrast);
        params.set("colorThreshold", self.color_threshold);
        params
    }

    /// Reads settings back from a parameter bag.
    pub fn from_params(params: &ParamMap, enabled: bool) -> Self {
        let defaults = Self::default();
        Self {
            enabled,
            min_area: params.get_or("minArea", defaults.min_area),
            contrast: params.get_or("contrast", defaults.contrast),
            color_threshold: params.get_or("colorThreshold", defaults.color_threshold),
        }
    }
}

/// Dimension detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DimensionSettings {
    /// Whether the detector runs in multi-detector passes.
    pub enabled: bool,
    /// Allowed deviation in physical units, boundary inclusive.
    pub tolerance: f64,
    /// Physical units per pixel.
    pub calibration: f64,
    /// Target width in physical units.
    pub target_width: f64,
    /// Target height in physical units.
    pub target_height: f64,
    /// Whether edge points are refined to sub-pixel precision.
    pub use_subpixel: bool,
    /// Robust-fit iteration budget.
    pub ransac_iterations: i64,
}

impl Default for DimensionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerance: 0.5,
            calibration: 0.1,
            target_width: 100.0,
            target_height: 100.0,
            use_subpixel: true,
            ransac_iterations: 64,
        }
    }
}

impl DimensionSettings {
    /// Converts into the detector's parameter bag.
    pub fn to_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.set("tolerance", self.tolerance);
        params.set("calibration", self.calibration);
        params.set("targetWidth", self.target_width);
        params.set("targetHeight", self.target_height);
        params.set("useSubpixel", self.use_subpixel);
        params.set("ransacIterations", self.ransac_iterations);
        params
    }

    /// Reads settings back from a parameter bag.
    pub fn from_params(params: &ParamMap, enabled: bool) -> Self {
        let defaults = Self::default();
        Self {
            enabled,
            tolerance: params.get_or("tolerance", defaults.tolerance),
            calibration: params.get_or("calibration", defaults.calibration),
            target_width: params.get_or("targetWidth", defaults.target_width),
            target_height: params.get_or("targetHeight", defaults.target_height),
            use_subpixel: params.get_or("useSubpixel", defaults.use_subpixel),
            ransac_iterations: params.get_or("ransacIterations", defaults.ransac_iterations),
        }
    }
}

/// Learned detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearnedSettings {
    /// Whether the detector runs in multi-detector passes. Disabled by
    /// default because it needs a model file to be useful.
    pub enabled: bool,
    /// Path to the ONNX model file.
    pub model_path: String,
    /// Confidence threshold applied to decoded detections.
    pub confidence: f64,
    /// IoU threshold of the post-inference NMS pass.
    pub nms_threshold: f64,
    /// Whether to request the accelerated execution provider.
    pub use_gpu: bool,
    /// Model input width.
    pub input_width: i64,
    /// Model input height.
    pub input_height: i64,
}

impl Default for LearnedSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            model_path: String::new(),
            confidence: 0.5,
            nms_threshold: 0.45,
            use_gpu: false,
            input_width: 640,
            input_height: 640,
        }
    }
}

impl LearnedSettings {
    /// Converts into the detector's parameter bag.
    pub fn to_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.set("modelPath", self.model_path.clone());
        params.set("confidence", self.confidence);
        params.set("nmsThreshold", self.nms_threshold);
        params.set("useGPU", self.use_gpu);
        params.set("inputWidth", self.input_width);
        params.set("inputHeight", self.input_height);
        params
    }

    /// Reads settings back from a parameter bag.
    pub fn from_params(params: &ParamMap, enabled: bool) -> Self {
        let defaults = Self::default();
        Self {
            enabled,
            model_path: params.get_or("modelPath", defaults.model_path),
            confidence: params.get_or("confidence", defaults.confidence),
            nms_threshold: params.get_or("nmsThreshold", defaults.nms_threshold),
            use_gpu: params.get_or("useGPU", defaults.use_gpu),
            input_width: params.get_or("inputWidth", defaults.input_width),
            input_height: params.get_or("inputHeight", defaults.input_height),
        }
    }
}

/// Settings for the full built-in detector set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Scratch detector settings.
    pub scratch: ScratchSettings,
    /// Crack detector settings.
    pub crack: CrackSettings,
    /// Foreign-object detector settings.
    pub foreign: ForeignSettings,
    /// Dimension detector settings.
    pub dimension: DimensionSettings,
    /// Learned detector settings.
    pub learned: LearnedSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serialize_in_camel_case() {
        let json = serde_json::to_string(&DetectorSettings::default()).unwrap();
        assert!(json.contains("minLength"));
        assert!(json.contains("morphKernelSize"));
        assert!(json.contains("targetWidth"));
        assert!(json.contains("modelPath"));
    }

    #[test]
    fn json_round_trip() {
        let mut settings = DetectorSettings::default();
        settings.scratch.sensitivity = 42;
        settings.dimension.tolerance = 1.25;
        settings.learned.model_path = "models/det.onnx".to_string();
        settings.crack.enabled = false;

        let json = serde_json::to_string_pretty(&settings).unwrap();
        let back: DetectorSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn params_round_trip_preserves_values() {
        let mut settings = ScratchSettings::default();
        settings.sensitivity = 90;
        settings.max_width = 7;

        let params = settings.to_params();
        let back = ScratchSettings::from_params(&params, settings.enabled);
        assert_eq!(back, settings);
    }

    #[test]
    fn missing_json_fields_fall_back_to_defaults() {
        let settings: DetectorSettings = serde_json::from_str(r#"{"scratch":{"sensitivity":10}}"#).unwrap();
        assert_eq!(settings.scratch.sensitivity, 10);
        assert_eq!(settings.scratch.min_length, 10);
        assert_eq!(settings.crack, CrackSettings::default());
    }
}
