//! Correction scoring and winner selection.
//!
//! The concurrent fan-out over correction backends lives in the pipeline
//! crate; this module holds the pure parts: the effectiveness table, the
//! per-strategy correction score, the composite ranking, and the
//! comparison summary with its recommendations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::issues::{DetectedIssue, IssueType};

/// Method name of the zero-cost "keep the generated image" baseline.
pub const ORIGINAL_METHOD: &str = "original";

pub const QUALITY_WEIGHT: f64 = 0.6;
pub const CORRECTION_WEIGHT: f64 = 0.4;

/// Improvement over the baseline composite worth recommending a strategy for.
pub const RECOMMEND_IMPROVEMENT: f64 = 0.1;
/// Issues above this severity are flagged as critical.
pub const CRITICAL_SEVERITY: f64 = 0.7;
/// Effectiveness at which a strategy is considered to address an issue type.
pub const ADDRESSED_EFFECTIVENESS: f64 = 0.5;

// ---------------------------------------------------------------------------
// Effectiveness table
// ---------------------------------------------------------------------------

/// `{method -> {issue type -> effectiveness}}`, read-only at run time.
///
/// Unknown issue-type keys fail deserialisation; values outside `[0, 1]`
/// fail [`EffectivenessTable::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectivenessTable(BTreeMap<String, BTreeMap<IssueType, f64>>);

impl Default for EffectivenessTable {
    fn default() -> Self {
        use IssueType::*;
        let entry = |values: [(IssueType, f64); 5]| values.into_iter().collect::<BTreeMap<_, _>>();
        let mut table = BTreeMap::new();
        table.insert(
            "qwen_image_edit".to_string(),
            entry([
                (PoseDrift, 0.6),
                (Artifact, 0.85),
                (Duplicate, 0.8),
                (LightingMismatch, 0.7),
                (StyleInconsistency, 0.5),
            ]),
        );
        table.insert(
            "nano_banana".to_string(),
            entry([
                (PoseDrift, 0.5),
                (Artifact, 0.6),
                (Duplicate, 0.6),
                (LightingMismatch, 0.75),
                (StyleInconsistency, 0.9),
            ]),
        );
        Self(table)
    }
}

impl EffectivenessTable {
    pub fn new(entries: BTreeMap<String, BTreeMap<IssueType, f64>>) -> Self {
        Self(entries)
    }

    /// Parse and range-check a JSON table.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let table: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid correction effectiveness table: {e}")))?;
        table.validate(&[])?;
        Ok(table)
    }

    /// Check value ranges and that every registered method has an entry.
    pub fn validate(&self, registered_methods: &[&str]) -> Result<(), CoreError> {
        for (method, values) in &self.0 {
            for (issue, value) in values {
                if !(0.0..=1.0).contains(value) {
                    return Err(CoreError::Validation(format!(
                        "Effectiveness of '{method}' for {} must be in [0, 1], got {value}",
                        issue.as_str()
                    )));
                }
            }
        }
        for method in registered_methods {
            if !self.0.contains_key(*method) {
                return Err(CoreError::Validation(format!(
                    "Correction method '{method}' has no effectiveness entry"
                )));
            }
        }
        Ok(())
    }

    /// Effectiveness of `method` against `issue`; 0 when unknown.
    pub fn effectiveness(&self, method: &str, issue: IssueType) -> f64 {
        self.0
            .get(method)
            .and_then(|m| m.get(&issue))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Severity-weighted mean effectiveness of `method` over `issues`.
///
/// No issues scores 1.0 for every method. When every severity is zero the
/// unweighted mean is used.
pub fn correction_score(table: &EffectivenessTable, method: &str, issues: &[DetectedIssue]) -> f64 {
    if issues.is_empty() {
        return 1.0;
    }
    let total_severity: f64 = issues.iter().map(|i| i.severity).sum();
    let score = if total_severity > 0.0 {
        issues
            .iter()
            .map(|i| i.severity * table.effectiveness(method, i.issue_type))
            .sum::<f64>()
            / total_severity
    } else {
        issues
            .iter()
            .map(|i| table.effectiveness(method, i.issue_type))
            .sum::<f64>()
            / issues.len() as f64
    };
    score.clamp(0.0, 1.0)
}

/// Issue types among `issues` that `method` is effective against.
pub fn issues_addressed(table: &EffectivenessTable, method: &str, issues: &[DetectedIssue]) -> Vec<IssueType> {
    let mut types: Vec<IssueType> = issues
        .iter()
        .map(|i| i.issue_type)
        .filter(|t| table.effectiveness(method, *t) >= ADDRESSED_EFFECTIVENESS)
        .collect();
    types.sort();
    types.dedup();
    types
}

pub fn composite_score(quality_score: f64, correction_score: f64) -> f64 {
    QUALITY_WEIGHT * quality_score + CORRECTION_WEIGHT * correction_score
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub image_url: String,
    pub method: String,
    pub processing_time_ms: u64,
    pub quality_score: f64,
    pub correction_score: f64,
    pub issues_addressed: Vec<IssueType>,
    /// Set when the strategy failed and was scored at baseline quality.
    pub failure: Option<String>,
}

impl CorrectionResult {
    pub fn composite(&self) -> f64 {
        composite_score(self.quality_score, self.correction_score)
    }

    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

/// Highest composite score; ties go to the earliest result.
pub fn select_best(results: &[CorrectionResult]) -> Option<&CorrectionResult> {
    let mut best: Option<&CorrectionResult> = None;
    for result in results {
        match best {
            Some(b) if result.composite() <= b.composite() => {}
            _ => best = Some(result),
        }
    }
    best
}

/// Outcome of one arbitration round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionComparison {
    /// One result per strategy in registration order, baseline first.
    pub results: Vec<CorrectionResult>,
    pub best_method: String,
    /// Correction score per method.
    pub effectiveness: BTreeMap<String, f64>,
    /// Composite gain of the winner over the baseline.
    pub improvement: f64,
    pub recommendations: Vec<String>,
}

impl CorrectionComparison {
    /// Summarise strategy results. `results` must contain the baseline.
    pub fn from_results(results: Vec<CorrectionResult>, issues: &[DetectedIssue]) -> Result<Self, CoreError> {
        let baseline = results
            .iter()
            .find(|r| r.method == ORIGINAL_METHOD)
            .ok_or_else(|| CoreError::Internal("correction results are missing the original baseline".into()))?;
        let best = select_best(&results)
            .ok_or_else(|| CoreError::Internal("no correction results to compare".into()))?;

        let improvement = best.composite() - baseline.composite();
        let recommendations = recommendations(&results, best, improvement, issues);
        let effectiveness = results
            .iter()
            .map(|r| (r.method.clone(), r.correction_score))
            .collect();
        let best_method = best.method.clone();

        Ok(Self {
            results,
            best_method,
            effectiveness,
            improvement,
            recommendations,
        })
    }

    pub fn result(&self, method: &str) -> Option<&CorrectionResult> {
        self.results.iter().find(|r| r.method == method)
    }

    pub fn best(&self) -> Option<&CorrectionResult> {
        self.result(&self.best_method)
    }
}

fn recommendations(
    results: &[CorrectionResult],
    best: &CorrectionResult,
    improvement: f64,
    issues: &[DetectedIssue],
) -> Vec<String> {
    let mut out = Vec::new();

    if improvement > RECOMMEND_IMPROVEMENT {
        out.push(format!(
            "Use {} for {:.1}% quality improvement",
            best.method,
            improvement * 100.0
        ));
    }

    if best.method != ORIGINAL_METHOD {
        let runner_up = results
            .iter()
            .filter(|r| r.method != best.method && r.method != ORIGINAL_METHOD && !r.is_degraded())
            .max_by(|a, b| a.composite().total_cmp(&b.composite()));
        if let Some(r) = runner_up {
            out.push(format!(
                "{} outscored {} ({:.2} vs {:.2})",
                best.method,
                r.method,
                best.composite(),
                r.composite()
            ));
        }
    }

    for r in results.iter().filter(|r| r.is_degraded()) {
        out.push(format!("{} failed and was scored at baseline quality", r.method));
    }

    for issue in issues.iter().filter(|i| i.severity > CRITICAL_SEVERITY) {
        out.push(format!(
            "{} (severity {:.2}) is critical — must address before delivery",
            issue.issue_type.as_str(),
            issue.severity
        ));
    }

    if out.is_empty() {
        out.push("Original generation provides optimal results".to_string());
    }
    out
}
