//! Detector constructor registry.
//!
//! Maps a stable type tag to a constructor so the manager (and external
//! orchestration) can instantiate detectors by name. Registration is
//! explicit; the factory is an ordinary owned value passed to whoever needs
//! it, with the expectation of one registry per process.

use crate::core::traits::DefectDetector;
use crate::detectors::{
    CrackDetector, DimensionDetector, ForeignDetector, LearnedDetector, ScratchDetector,
};
use std::collections::BTreeMap;

/// Registry key of the scratch detector.
pub const KIND_SCRATCH: &str = "scratch";
/// Registry key of the crack detector.
pub const KIND_CRACK: &str = "crack";
/// Registry key of the foreign-object detector.
pub const KIND_FOREIGN: &str = "foreign";
/// Registry key of the dimension detector.
pub const KIND_DIMENSION: &str = "dimension";
/// Registry key of the learned (model-backed) detector.
pub const KIND_LEARNED: &str = "learned";

type Constructor = Box<dyn Fn() -> Box<dyn DefectDetector> + Send + Sync>;

/// Name-to-constructor registry for defect detectors.
#[derive(Default)]
pub struct DetectorFactory {
    creators: BTreeMap<String, Constructor>,
}

impl std::fmt::Debug for DetectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorFactory")
            .field("registered", &self.registered_kinds())
            .finish()
    }
}

impl DetectorFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with all built-in detectors registered.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(KIND_SCRATCH, || Box::new(ScratchDetector::new()));
        factory.register(KIND_CRACK, || Box::new(CrackDetector::new()));
        factory.register(KIND_FOREIGN, || Box::new(ForeignDetector::new()));
        factory.register(KIND_DIMENSION, || Box::new(DimensionDetector::new()));
        factory.register(KIND_LEARNED, || Box::new(LearnedDetector::new()));
        factory
    }

    /// Registers a constructor under a type tag, replacing any previous one.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        creator: impl Fn() -> Box<dyn DefectDetector> + Send + Sync + 'static,
    ) {
        self.creators.insert(kind.into(), Box::new(creator));
    }

    /// Instantiates a detector by type tag; `None` for unknown tags.
    pub fn create(&self, kind: &str) -> Option<Box<dyn DefectDetector>> {
        self.creators.get(kind).map(|creator| creator())
    }

    /// Whether a type tag is registered.
    pub fn is_registered(&self, kind: &str) -> bool {
        self.creators.contains_key(kind)
    }

    /// All registered type tags in sorted order.
    pub fn registered_kinds(&self) -> Vec<String> {
        self.creators.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_and_constructible() {
        let factory = DetectorFactory::with_builtins();
        for kind in [
            KIND_SCRATCH,
            KIND_CRACK,
            KIND_FOREIGN,
            KIND_DIMENSION,
            KIND_LEARNED,
        ] {
            assert!(factory.is_registered(kind), "{kind} not registered");
            let detector = factory.create(kind).expect("constructor failed");
            assert_eq!(detector.kind(), kind);
        }
    }

    #[test]
    fn unknown_kind_yields_none() {
        let factory = DetectorFactory::with_builtins();
        assert!(factory.create("holographic").is_none());
        assert!(!factory.is_registered("holographic"));
    }
}
