//! Defect scoring: per-class weighted deductions, grades and pass verdicts.
//!
//! Converts a defect list into a 0..100 quality score. Every defect deducts
//! `base · class_weight · severity · confidence · area_factor` points; the
//! remaining score maps to a four-level grade and a separate pass/fail
//! verdict. The grade thresholds and the pass threshold are independent: a
//! result can be graded Minor yet still fail.

use crate::domain::DefectRecord;
use std::collections::BTreeMap;

/// Base deduction per defect before weighting.
const BASE_DEDUCTION: f64 = 10.0;

/// Four-level severity grading of an inspection outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityGrade {
    /// No significant quality impact.
    Ok,
    /// Minor defects present.
    Minor,
    /// Major defects present.
    Major,
    /// Critical defects present.
    Critical,
}

impl SeverityGrade {
    /// Stable text form of the grade.
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityGrade::Ok => "OK",
            SeverityGrade::Minor => "Minor",
            SeverityGrade::Major => "Major",
            SeverityGrade::Critical => "Critical",
        }
    }

    /// Parses the text form; unknown text maps to `Ok`.
    pub fn from_str(text: &str) -> Self {
        match text {
            "Minor" => SeverityGrade::Minor,
            "Major" => SeverityGrade::Major,
            "Critical" => SeverityGrade::Critical,
            _ => SeverityGrade::Ok,
        }
    }
}

/// Outcome of scoring one defect list.
#[derive(Debug, Clone)]
pub struct ScoringResult {
    /// Remaining score in `[0, 100]`.
    pub total_score: f64,
    /// Grade derived from the score thresholds.
    pub grade: SeverityGrade,
    /// Text form of the grade.
    pub grade_text: String,
    /// Whether the score reaches the pass threshold.
    pub is_pass: bool,
    /// Deduction subtotal per defect class.
    pub category_scores: BTreeMap<String, f64>,
    /// Human-readable summary line.
    pub summary: String,
}

/// Weighted defect scorer with configurable grade and pass thresholds.
#[derive(Debug, Clone)]
pub struct DefectScorer {
    weights: BTreeMap<String, f64>,
    minor_threshold: f64,
    major_threshold: f64,
    critical_threshold: f64,
    pass_threshold: f64,
}

impl Default for DefectScorer {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert("Scratch".to_string(), 1.0);
        weights.insert("Crack".to_string(), 2.0);
        weights.insert("Foreign".to_string(), 1.5);
        weights.insert("Dimension".to_string(), 2.5);
        Self {
            weights,
            minor_threshold: 90.0,
            major_threshold: 75.0,
            critical_threshold: 60.0,
            pass_threshold: 70.0,
        }
    }
}

impl DefectScorer {
    /// Creates a scorer with default class weights and thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deduction weight of a defect class (floored at zero).
    pub fn set_weight(&mut self, class_name: &str, weight: f64) {
        self.weights.insert(class_name.to_string(), weight.max(0.0));
    }

    /// Deduction weight of a defect class; unknown classes weigh 1.0.
    pub fn weight(&self, class_name: &str) -> f64 {
        self.weights.get(class_name).copied().unwrap_or(1.0)
    }

    /// Sets the grade thresholds, expected ordered
    /// `minor >= major >= critical`.
    pub fn set_thresholds(&mut self, minor: f64, major: f64, critical: f64) {
        self.minor_threshold = minor;
        self.major_threshold = major;
        self.critical_threshold = critical;
    }

    /// Sets the pass threshold, clamped to `[0, 100]`. Independent of the
    /// grade thresholds.
    pub fn set_pass_threshold(&mut self, threshold: f64) {
        self.pass_threshold = threshold.clamp(0.0, 100.0);
    }

    /// Deduction for one defect.
    ///
    /// `base · class_weight · severity · confidence · area_factor`, where
    /// the area factor is `min(2, 1 + area/1000)` when the record carries an
    /// `area` attribute and 1.0 otherwise.
    pub fn score_defect(&self, defect: &DefectRecord) -> f64 {
        let area_factor = defect
            .attr_f64("area")
            .map(|area| (1.0 + area / 1000.0).min(2.0))
            .unwrap_or(1.0);

        BASE_DEDUCTION
            * self.weight(&defect.class_name)
            * defect.severity
            * defect.confidence
            * area_factor
    }

    /// Scores a defect list.
    ///
    /// An empty list always yields score 100, grade OK and a passing verdict.
    pub fn score(&self, defects: &[DefectRecord]) -> ScoringResult {
        if defects.is_empty() {
            return ScoringResult {
                total_score: 100.0,
                grade: SeverityGrade::Ok,
                grade_text: SeverityGrade::Ok.as_str().to_string(),
                is_pass: true,
                category_scores: BTreeMap::new(),
                summary: "No defects detected".to_string(),
            };
        }

        let mut category_scores: BTreeMap<String, f64> = BTreeMap::new();
        for defect in defects {
            *category_scores.entry(defect.class_name.clone()).or_default() +=
                self.score_defect(defect);
        }
        let total_deduction: f64 = category_scores.values().sum();
        let total_score = (100.0 - total_deduction).max(0.0);

        let grade = if total_score >= self.minor_threshold {
            SeverityGrade::Ok
        } else if total_score >= self.major_threshold {
            SeverityGrade::Minor
        } else if total_score >= self.critical_threshold {
            SeverityGrade::Major
        } else {
            SeverityGrade::Critical
        };

        let mut parts = vec![
            format!("Total Score: {total_score:.1}"),
            format!("Grade: {}", grade.as_str()),
            format!("Defects: {}", defects.len()),
        ];
        for (class_name, deduction) in &category_scores {
            parts.push(format!("{class_name}: -{deduction:.1} pts"));
        }

        ScoringResult {
            total_score,
            grade,
            grade_text: grade.as_str().to_string(),
            is_pass: total_score >= self.pass_threshold,
            category_scores,
            summary: parts.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PixelRect;

    fn defect(class_name: &str, confidence: f64, severity: f64) -> DefectRecord {
        let mut d = DefectRecord::new(0, class_name, PixelRect::new(0, 0, 10, 10));
        d.confidence = confidence;
        d.severity = severity;
        d
    }

    #[test]
    fn empty_list_scores_perfect_and_passes() {
        let scorer = DefectScorer::new();
        let result = scorer.score(&[]);
        assert_eq!(result.total_score, 100.0);
        assert_eq!(result.grade, SeverityGrade::Ok);
        assert!(result.is_pass);
    }

    #[test]
    fn deduction_uses_class_weight_and_area_factor() {
        let scorer = DefectScorer::new();

        let scratch = defect("Scratch", 1.0, 1.0);
        assert!((scorer.score_defect(&scratch) - 10.0).abs() < 1e-9);

        let crack = defect("Crack", 1.0, 1.0);
        assert!((scorer.score_defect(&crack) - 20.0).abs() < 1e-9);

        let mut large = defect("Scratch", 1.0, 1.0);
        large.set_attr("area", 1000.0);
        assert!((scorer.score_defect(&large) - 20.0).abs() < 1e-9);

        // Area factor saturates at 2.
        let mut huge = defect("Scratch", 1.0, 1.0);
        huge.set_attr("area", 100_000.0);
        assert!((scorer.score_defect(&huge) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_monotone_under_added_defects() {
        let scorer = DefectScorer::new();
        let a = vec![defect("Scratch", 0.8, 0.5)];
        let mut b = a.clone();
        b.push(defect("Crack", 0.9, 0.7));

        assert!(scorer.score(&b).total_score <= scorer.score(&a).total_score);
    }

    #[test]
    fn grade_and_pass_are_independent() {
        let mut scorer = DefectScorer::new();
        scorer.set_thresholds(90.0, 75.0, 60.0);
        scorer.set_pass_threshold(85.0);

        // One moderate defect: deduction 10*1.0*0.8*1.0 = 8 -> score 92 (OK, pass).
        let ok = scorer.score(&[defect("Scratch", 1.0, 0.8)]);
        assert_eq!(ok.grade, SeverityGrade::Ok);
        assert!(ok.is_pass);

        // Deduction 18 -> score 82: graded Minor AND failing the 85 pass bar.
        let minor_fail = scorer.score(&[defect("Crack", 1.0, 0.9)]);
        assert_eq!(minor_fail.grade, SeverityGrade::Minor);
        assert!(!minor_fail.is_pass);
    }

    #[test]
    fn score_clamps_at_zero() {
        let scorer = DefectScorer::new();
        let many: Vec<DefectRecord> = (0..50).map(|_| defect("Dimension", 1.0, 1.0)).collect();
        let result = scorer.score(&many);
        assert_eq!(result.total_score, 0.0);
        assert_eq!(result.grade, SeverityGrade::Critical);
        assert!(!result.is_pass);
    }

    #[test]
    fn grade_text_round_trips() {
        for grade in [
            SeverityGrade::Ok,
            SeverityGrade::Minor,
            SeverityGrade::Major,
            SeverityGrade::Critical,
        ] {
            assert_eq!(SeverityGrade::from_str(grade.as_str()), grade);
        }
    }
}
