//! Merge stage outcomes into one result and compute speedups.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::build::BuildOutcome;
use crate::domain::{EvaluationResult, FailureKind, Metadata};
use crate::timing::TimingSample;
use crate::verify::CorrectnessReport;

/// What happened to the candidate's performance pass.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingOutcome {
    /// Not requested, or never reached.
    Skipped,
    Measured(TimingSample),
    Failed(String),
}

/// A speedup ratio, or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Speedup {
    Available { ratio: f64 },
    NotAvailable { reason: String },
}

impl Speedup {
    fn unavailable(reason: impl Into<String>) -> Self {
        Speedup::NotAvailable {
            reason: reason.into(),
        }
    }

    pub fn ratio(&self) -> Option<f64> {
        match self {
            Speedup::Available { ratio } => Some(*ratio),
            Speedup::NotAvailable { .. } => None,
        }
    }

    /// `baseline / candidate`, only for a correct candidate with both timings.
    pub fn compute(correctness: bool, candidate_ms: Option<f64>, baseline_ms: Option<f64>) -> Self {
        if !correctness {
            return Self::unavailable("kernel did not pass correctness");
        }
        let Some(candidate) = candidate_ms else {
            return Self::unavailable("candidate runtime not measured");
        };
        let Some(baseline) = baseline_ms else {
            return Self::unavailable("baseline runtime not available");
        };
        if !(candidate > 0.0 && candidate.is_finite()) {
            return Self::unavailable("candidate runtime is zero");
        }
        if !(baseline > 0.0 && baseline.is_finite()) {
            return Self::unavailable("baseline runtime is zero");
        }
        Speedup::Available {
            ratio: baseline / candidate,
        }
    }
}

/// Speedups over both baselines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedupReport {
    pub over_eager: Speedup,
    pub over_optimized: Speedup,
}

impl SpeedupReport {
    pub fn compute(
        result: &EvaluationResult,
        eager: Option<&TimingSample>,
        optimized: Option<&TimingSample>,
    ) -> Self {
        Self {
            over_eager: Speedup::compute(result.correctness, result.runtime, eager.map(|s| s.mean)),
            over_optimized: Speedup::compute(
                result.correctness,
                result.runtime,
                optimized.map(|s| s.mean),
            ),
        }
    }
}

/// Build the terminal result from the outcome of every stage.
///
/// `metadata` carries fields every result gets (device, hardware).
pub fn aggregate(
    mut metadata: Metadata,
    build: &BuildOutcome,
    correctness: Option<&CorrectnessReport>,
    candidate_timing: &TimingOutcome,
    eager: Option<&TimingSample>,
    optimized: Option<&TimingSample>,
) -> (EvaluationResult, SpeedupReport) {
    let result = match build {
        BuildOutcome::CompileFailure(failure) => {
            metadata.insert("compile_error".to_string(), Value::String(failure.message.clone()));
            metadata.insert("build_hash".to_string(), Value::String(failure.digest.to_hex()));
            EvaluationResult::failed(false, FailureKind::CompileFailure, metadata)
        }
        BuildOutcome::InfraFailure(failure) => {
            metadata.insert("build_hash".to_string(), Value::String(failure.digest.to_hex()));
            EvaluationResult::infra_failure(failure.message.clone(), metadata)
        }
        BuildOutcome::Built(artifact) => {
            metadata.insert("build_hash".to_string(), Value::String(artifact.digest.to_hex()));
            metadata.insert("cache_hit".to_string(), Value::Bool(artifact.cache_hit));
            match correctness {
                None => EvaluationResult::infra_failure("correctness was not checked", metadata),
                Some(report) => merge_correctness(metadata, report, candidate_timing),
            }
        }
    };
    let speedup = SpeedupReport::compute(&result, eager, optimized);
    (result, speedup)
}

fn merge_correctness(
    mut metadata: Metadata,
    report: &CorrectnessReport,
    timing: &TimingOutcome,
) -> EvaluationResult {
    metadata.extend(report.metadata.clone());
    match report.failure {
        Some(FailureKind::InfraFailure) => {
            return EvaluationResult::failed(false, FailureKind::InfraFailure, metadata)
        }
        Some(kind) => return EvaluationResult::failed(true, kind, metadata),
        None if !report.passed => {
            return EvaluationResult::failed(true, FailureKind::RuntimeFailure, metadata)
        }
        None => {}
    }

    let mut result = EvaluationResult {
        compiled: true,
        correctness: true,
        runtime: None,
        runtime_stats: None,
        failure: None,
        metadata,
    };
    match timing {
        TimingOutcome::Skipped => {}
        TimingOutcome::Measured(sample) => {
            result.runtime = Some(sample.mean);
            result.runtime_stats = Some(sample.clone());
        }
        TimingOutcome::Failed(message) => {
            result.failure = Some(FailureKind::InfraFailure);
            result
                .metadata
                .insert("error_during_performance".to_string(), json!(message));
        }
    }
    result
}

/// Everything `run_and_check` produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub result: EvaluationResult,
    pub baseline_eager: Option<TimingSample>,
    pub baseline_optimized: Option<TimingSample>,
    /// Baseline label to error text, for baselines that could not be timed.
    #[serde(default)]
    pub baseline_errors: BTreeMap<String, String>,
    pub speedup: SpeedupReport,
}

fn timing_line(out: &mut String, label: &str, sample: Option<&TimingSample>) {
    let _ = match sample {
        Some(s) => writeln!(
            out,
            "[Timing] {label}: {:.4} ms (std {:.4}, min {:.4}, max {:.4}, {} trials)",
            s.mean, s.std, s.min, s.max, s.num_trials
        ),
        None => writeln!(out, "[Timing] {label}: not available"),
    };
}

fn speedup_line(out: &mut String, label: &str, speedup: &Speedup) {
    let _ = match speedup {
        Speedup::Available { ratio } => writeln!(out, "[Speedup] Speedup over {label}: {ratio:.2}x"),
        Speedup::NotAvailable { reason } => {
            writeln!(out, "[Speedup] Speedup over {label}: Not Available ({reason})")
        }
    };
}

/// Human-readable report.
pub fn render_summary(report: &CheckReport) -> String {
    let mut out = String::new();
    let result = &report.result;
    let _ = writeln!(out, "[Eval] {result}");
    if let Some(hardware) = result.metadata.get("hardware").and_then(Value::as_str) {
        let _ = writeln!(out, "[Eval] hardware: {hardware}");
    }
    for key in ["compile_error", "runtime_error", "other_error", "error_during_performance"] {
        if let Some(text) = result.metadata.get(key).and_then(Value::as_str) {
            let _ = writeln!(out, "[Eval] {key}: {text}");
        }
    }

    timing_line(&mut out, "Eager baseline", report.baseline_eager.as_ref());
    timing_line(&mut out, "Optimized baseline", report.baseline_optimized.as_ref());
    timing_line(&mut out, "Candidate", result.runtime_stats.as_ref());
    for (label, error) in &report.baseline_errors {
        let _ = writeln!(out, "[Timing] {label} baseline error: {error}");
    }

    if result.correctness {
        speedup_line(&mut out, "eager", &report.speedup.over_eager);
        speedup_line(&mut out, "optimized", &report.speedup.over_optimized);
    } else {
        let _ = writeln!(
            out,
            "[Speedup] Speedup Not Available as Kernel did not pass correctness"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildFailure;
    use crate::digest::Digest;

    fn sample(mean: f64) -> TimingSample {
        TimingSample::from_samples(&[mean]).unwrap()
    }

    fn passing() -> CorrectnessReport {
        CorrectnessReport {
            passed: true,
            failure: None,
            trials_passed: 5,
            metadata: Metadata::new(),
        }
    }

    fn compile_failure() -> BuildOutcome {
        BuildOutcome::CompileFailure(BuildFailure {
            digest: Digest::of_source("bad"),
            message: "line 1: unexpected `(`".to_string(),
        })
    }

    #[test]
    fn test_speedup_law() {
        assert_eq!(
            Speedup::compute(true, Some(2.0), Some(4.0)),
            Speedup::Available { ratio: 2.0 }
        );
        assert!(Speedup::compute(false, Some(2.0), Some(4.0)).ratio().is_none());
        assert!(Speedup::compute(true, None, Some(4.0)).ratio().is_none());
        assert!(Speedup::compute(true, Some(2.0), None).ratio().is_none());
        assert!(Speedup::compute(true, Some(0.0), Some(4.0)).ratio().is_none());
        assert!(Speedup::compute(true, Some(2.0), Some(0.0)).ratio().is_none());
    }

    #[test]
    fn test_compile_failure_result() {
        let (result, speedup) = aggregate(
            Metadata::new(),
            &compile_failure(),
            None,
            &TimingOutcome::Skipped,
            Some(&sample(1.0)),
            Some(&sample(1.0)),
        );
        assert!(!result.compiled);
        assert_eq!(result.failure, Some(FailureKind::CompileFailure));
        assert!(result.metadata.contains_key("compile_error"));
        assert!(result.runtime.is_none());
        assert!(speedup.over_eager.ratio().is_none());
        assert!(result.is_consistent());
    }

    #[test]
    fn test_merge_correct_and_timed() {
        let result = merge_correctness(
            Metadata::new(),
            &passing(),
            &TimingOutcome::Measured(sample(0.5)),
        );
        assert!(result.correctness);
        assert_eq!(result.runtime, Some(0.5));
        assert!(result.failure.is_none());
        assert!(result.is_consistent());

        let speedup = SpeedupReport::compute(&result, Some(&sample(1.0)), Some(&sample(0.25)));
        assert_eq!(speedup.over_eager.ratio(), Some(2.0));
        assert_eq!(speedup.over_optimized.ratio(), Some(0.5));
    }

    #[test]
    fn test_performance_failure_keeps_correctness() {
        let result = merge_correctness(
            Metadata::new(),
            &passing(),
            &TimingOutcome::Failed("trial 3 failed".to_string()),
        );
        assert!(result.compiled);
        assert!(result.correctness);
        assert!(result.runtime.is_none());
        assert_eq!(result.failure, Some(FailureKind::InfraFailure));
        assert_eq!(result.metadata["error_during_performance"], "trial 3 failed");
    }

    #[test]
    fn test_render_summary_not_available() {
        let (result, speedup) = aggregate(
            Metadata::new(),
            &compile_failure(),
            None,
            &TimingOutcome::Skipped,
            None,
            None,
        );
        let report = CheckReport {
            result,
            baseline_eager: None,
            baseline_optimized: None,
            baseline_errors: BTreeMap::new(),
            speedup,
        };
        let text = render_summary(&report);
        assert!(text.contains("Speedup Not Available as Kernel did not pass correctness"));
        assert!(text.contains("compile_error"));
    }
}
