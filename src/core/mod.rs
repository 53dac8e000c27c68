//! Core abstractions: errors, parameter bags, the detector trait and the
//! constructor registry.

pub mod errors;
pub mod params;
pub mod registry;
pub mod traits;

pub use errors::{InspectError, InspectResult, ProcessingStage};
pub use params::{FromParamValue, ParamMap, ParamValue};
pub use registry::DetectorFactory;
pub use traits::{DefectDetector, DetectorCommon};
