//! Candidate deduplication: non-maximum suppression and distance merging.
//!
//! Every detector pools candidates from its internal strategies and runs
//! them through [`NmsFilter`] before confidence filtering, which keeps the
//! output idempotent under repeated invocation. [`DefectMerger`] is the
//! evidence-combining alternative used when overlapping candidates should
//! merge into one record instead of one being discarded.

use crate::domain::DefectRecord;
use std::collections::BTreeMap;

/// Greedy IoU-based non-maximum suppression over defect records.
#[derive(Debug, Clone)]
pub struct NmsFilter {
    iou_threshold: f64,
    confidence_threshold: f64,
}

impl Default for NmsFilter {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            confidence_threshold: 0.0,
        }
    }
}

impl NmsFilter {
    /// Creates a filter with the given IoU threshold and a zero confidence
    /// threshold (candidates are confidence-filtered separately).
    pub fn new(iou_threshold: f64) -> Self {
        Self {
            iou_threshold: iou_threshold.clamp(0.0, 1.0),
            confidence_threshold: 0.0,
        }
    }

    /// Sets the IoU threshold, clamped to `[0, 1]`.
    pub fn set_iou_threshold(&mut self, threshold: f64) {
        self.iou_threshold = threshold.clamp(0.0, 1.0);
    }

    /// The active IoU threshold.
    pub fn iou_threshold(&self) -> f64 {
        self.iou_threshold
    }

    /// Sets the confidence threshold, clamped to `[0, 1]`.
    pub fn set_confidence_threshold(&mut self, threshold: f64) {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    /// Suppresses overlapping candidates regardless of class.
    ///
    /// Candidates are visited by descending confidence; the survivor of each
    /// overlap cluster is the highest-confidence member. Surviving pairs
    /// have bounding-box IoU strictly below the threshold, which makes the
    /// operation idempotent.
    pub fn filter(&self, defects: Vec<DefectRecord>) -> Vec<DefectRecord> {
        if defects.is_empty() {
            return defects;
        }

        let mut sorted = defects;
        sorted.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; sorted.len()];
        let mut result = Vec::new();

        for i in 0..sorted.len() {
            if suppressed[i] || sorted[i].confidence < self.confidence_threshold {
                continue;
            }
            for j in (i + 1)..sorted.len() {
                if suppressed[j] {
                    continue;
                }
                if sorted[i].bbox.iou(&sorted[j].bbox) > self.iou_threshold {
                    suppressed[j] = true;
                }
            }
            result.push(sorted[i].clone());
        }

        result
    }

    /// Suppresses overlapping candidates within each class independently.
    pub fn filter_by_class(&self, defects: Vec<DefectRecord>) -> Vec<DefectRecord> {
        let mut by_class: BTreeMap<i32, Vec<DefectRecord>> = BTreeMap::new();
        for defect in defects {
            by_class.entry(defect.class_id).or_default().push(defect);
        }
        by_class
            .into_values()
            .flat_map(|group| self.filter(group))
            .collect()
    }
}

/// Distance-based candidate merging.
///
/// Candidates whose boxes lie within `distance_threshold` pixels of each
/// other are combined into one record rather than one being discarded.
#[derive(Debug, Clone)]
pub struct DefectMerger {
    distance_threshold: f64,
}

impl Default for DefectMerger {
    fn default() -> Self {
        Self {
            distance_threshold: 10.0,
        }
    }
}

impl DefectMerger {
    /// Creates a merger with the given pixel distance threshold.
    pub fn new(distance_threshold: f64) -> Self {
        Self {
            distance_threshold: distance_threshold.max(0.0),
        }
    }

    /// Sets the distance threshold (floored at zero).
    pub fn set_distance_threshold(&mut self, threshold: f64) {
        self.distance_threshold = threshold.max(0.0);
    }

    /// Repeatedly merges the closest eligible pair until no boxes lie
    /// within the distance threshold of each other.
    pub fn merge(&self, defects: Vec<DefectRecord>) -> Vec<DefectRecord> {
        if defects.len() < 2 {
            return defects;
        }

        let mut result = defects;
        loop {
            let mut merged_any = false;
            'scan: for i in 0..result.len() {
                for j in (i + 1)..result.len() {
                    if result[i].bbox.gap_distance(&result[j].bbox) <= self.distance_threshold {
                        let b = result.swap_remove(j);
                        let a = result.swap_remove(i);
                        result.push(Self::merge_pair(a, b));
                        merged_any = true;
                        break 'scan;
                    }
                }
            }
            if !merged_any {
                return result;
            }
        }
    }

    /// Merges within each class independently.
    pub fn merge_by_class(&self, defects: Vec<DefectRecord>) -> Vec<DefectRecord> {
        let mut by_class: BTreeMap<i32, Vec<DefectRecord>> = BTreeMap::new();
        for defect in defects {
            by_class.entry(defect.class_id).or_default().push(defect);
        }
        by_class
            .into_values()
            .flat_map(|group| self.merge(group))
            .collect()
    }

    /// Combines two records: union box, concatenated contour, max
    /// confidence/severity, the dominant record's class, and the union of
    /// attributes keeping the dominant record's values on key clashes.
    fn merge_pair(a: DefectRecord, b: DefectRecord) -> DefectRecord {
        let (primary, secondary) = if a.confidence >= b.confidence {
            (a, b)
        } else {
            (b, a)
        };

        let mut merged = DefectRecord::new(
            primary.class_id,
            &primary.class_name,
            primary.bbox.union(&secondary.bbox),
        );
        merged.confidence = primary.confidence.max(secondary.confidence);
        merged.severity = primary.severity.max(secondary.severity);
        merged.description = primary.description.clone();

        merged.contour = primary.contour;
        merged.contour.extend(secondary.contour);

        merged.attributes = primary.attributes;
        for (key, value) in secondary.attributes {
            merged.attributes.entry(key).or_insert(value);
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PixelRect;

    fn record(x: i32, y: i32, w: u32, h: u32, confidence: f64) -> DefectRecord {
        let mut r = DefectRecord::new(0, "Scratch", PixelRect::new(x, y, w, h));
        r.confidence = confidence;
        r
    }

    #[test]
    fn keeps_highest_confidence_of_overlap_cluster() {
        let filter = NmsFilter::default();
        let result = filter.filter(vec![
            record(0, 0, 20, 20, 0.6),
            record(2, 2, 20, 20, 0.9),
            record(100, 100, 20, 20, 0.7),
        ]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].confidence, 0.9);
    }

    #[test]
    fn filter_is_idempotent() {
        let filter = NmsFilter::default();
        let input = vec![
            record(0, 0, 30, 30, 0.8),
            record(5, 5, 30, 30, 0.7),
            record(8, 8, 30, 30, 0.6),
            record(200, 200, 30, 30, 0.5),
        ];
        let once = filter.filter(input);
        let twice = filter.filter(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.bbox, b.bbox);
            assert_eq!(a.confidence, b.confidence);
        }
    }

    #[test]
    fn survivors_have_iou_below_threshold() {
        let filter = NmsFilter::new(0.3);
        let result = filter.filter(vec![
            record(0, 0, 40, 40, 0.9),
            record(10, 10, 40, 40, 0.8),
            record(60, 0, 40, 40, 0.7),
            record(64, 2, 40, 40, 0.65),
        ]);
        for i in 0..result.len() {
            for j in (i + 1)..result.len() {
                assert!(result[i].bbox.iou(&result[j].bbox) < 0.3);
            }
        }
    }

    #[test]
    fn cross_class_versus_per_class_grouping() {
        let mut crack = record(1, 1, 20, 20, 0.7);
        crack.class_id = 1;
        crack.class_name = "Crack".into();
        let scratch = record(0, 0, 20, 20, 0.9);

        let filter = NmsFilter::default();
        // Cross-class suppression removes the crack.
        assert_eq!(
            filter.filter(vec![scratch.clone(), crack.clone()]).len(),
            1
        );
        // Per-class grouping keeps both.
        assert_eq!(filter.filter_by_class(vec![scratch, crack]).len(), 2);
    }

    #[test]
    fn merger_combines_nearby_records() {
        let merger = DefectMerger::new(10.0);
        let mut a = record(0, 0, 10, 10, 0.8);
        a.set_attr("length", 12.0);
        let mut b = record(15, 0, 10, 10, 0.6);
        b.set_attr("length", 30.0);
        b.set_attr("width", 2.0);

        let merged = merger.merge(vec![a, b]);
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.bbox, PixelRect::new(0, 0, 25, 10));
        assert_eq!(m.confidence, 0.8);
        // Key clash resolves to the higher-confidence record's value.
        assert_eq!(m.attr_f64("length"), Some(12.0));
        assert_eq!(m.attr_f64("width"), Some(2.0));
    }

    #[test]
    fn merger_leaves_distant_records_alone() {
        let merger = DefectMerger::new(5.0);
        let result = merger.merge(vec![record(0, 0, 10, 10, 0.8), record(50, 50, 10, 10, 0.6)]);
        assert_eq!(result.len(), 2);
    }
}
