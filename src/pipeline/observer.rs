//! Notification hooks for the orchestration layer.
//!
//! The run-flow state machine, GUI and persistence collaborators observe
//! the manager through this callback trait. Notifications are informational
//! only: they fire strictly after the corresponding state change, in call
//! order, on the calling thread, and correctness of the detection
//! computation never depends on them.

use crate::domain::{CombinedResult, DetectionResult};

/// Callback interface for manager lifecycle and detection events.
#[allow(unused_variables)]
pub trait InspectionObserver: Send {
    /// A detector was added to the manager.
    fn detector_added(&mut self, name: &str) {}

    /// A detector was removed from the manager.
    fn detector_removed(&mut self, name: &str) {}

    /// A multi-detector pass started.
    fn detection_started(&mut self) {}

    /// One detector finished within a multi-detector pass.
    fn detector_result(&mut self, name: &str, result: &DetectionResult) {}

    /// A multi-detector pass finished.
    fn detection_finished(&mut self, result: &CombinedResult) {}
}
