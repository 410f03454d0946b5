//! The terminal record of one evaluation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timing::TimingSample;

/// Free-form diagnostics attached to a result (error text, device name,
/// mismatch details).
pub type Metadata = BTreeMap<String, Value>;

/// Why a candidate did not pass. Exactly one kind is chosen per failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The toolchain rejected the candidate source.
    CompileFailure,
    /// Candidate output shape differs from the reference.
    ShapeMismatch,
    /// Outputs differ beyond tolerance.
    NumericMismatch,
    /// The candidate raised while running.
    RuntimeFailure,
    /// Anything else, including timeouts.
    InfraFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::CompileFailure => "compile_failure",
            FailureKind::ShapeMismatch => "shape_mismatch",
            FailureKind::NumericMismatch => "numeric_mismatch",
            FailureKind::RuntimeFailure => "runtime_failure",
            FailureKind::InfraFailure => "infra_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one candidate.
///
/// `correctness` implies `compiled`; `runtime` is only present for a
/// compiled, correct candidate whose performance was measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub compiled: bool,
    pub correctness: bool,

    /// Mean candidate latency in milliseconds.
    pub runtime: Option<f64>,

    pub runtime_stats: Option<TimingSample>,

    pub failure: Option<FailureKind>,

    pub metadata: Metadata,
}

impl EvaluationResult {
    /// A failure the harness could not attribute to the candidate.
    pub fn infra_failure(message: impl Into<String>, mut metadata: Metadata) -> Self {
        metadata.insert("other_error".to_string(), Value::String(message.into()));
        Self::failed(false, FailureKind::InfraFailure, metadata)
    }

    /// The evaluation exceeded its wall-clock budget.
    pub fn timed_out(limit_secs: u64, mut metadata: Metadata) -> Self {
        metadata.insert("timeout".to_string(), Value::Bool(true));
        Self::infra_failure(
            format!("evaluation timed out after {limit_secs} seconds"),
            metadata,
        )
    }

    pub(crate) fn failed(compiled: bool, kind: FailureKind, mut metadata: Metadata) -> Self {
        metadata.insert(
            "failure_kind".to_string(),
            Value::String(kind.as_str().to_string()),
        );
        Self {
            compiled,
            correctness: false,
            runtime: None,
            runtime_stats: None,
            failure: Some(kind),
            metadata,
        }
    }

    /// Whether the record satisfies the result invariants.
    pub fn is_consistent(&self) -> bool {
        let correctness_ok = !self.correctness || self.compiled;
        let runtime_ok = self.runtime.is_none() || (self.compiled && self.correctness);
        let failure_ok = !self.correctness || self.failure.is_none() || self.runtime.is_none();
        correctness_ok && runtime_ok && failure_ok
    }

    /// Whether the record timed out.
    pub fn is_timeout(&self) -> bool {
        self.metadata.get("timeout") == Some(&Value::Bool(true))
    }
}

impl fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compiled={} correctness={} runtime=",
            self.compiled, self.correctness
        )?;
        match self.runtime {
            Some(ms) => write!(f, "{ms:.4}ms")?,
            None => f.write_str("n/a")?,
        }
        if let Some(kind) = self.failure {
            write!(f, " failure={kind}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infra_failure_shape() {
        let result = EvaluationResult::infra_failure("boom", Metadata::new());
        assert!(!result.compiled);
        assert!(!result.correctness);
        assert_eq!(result.failure, Some(FailureKind::InfraFailure));
        assert_eq!(result.metadata["other_error"], "boom");
        assert_eq!(result.metadata["failure_kind"], "infra_failure");
        assert!(result.is_consistent());
    }

    #[test]
    fn test_timed_out_is_tagged() {
        let result = EvaluationResult::timed_out(5, Metadata::new());
        assert!(result.is_timeout());
        assert_eq!(result.failure, Some(FailureKind::InfraFailure));
        assert!(result.metadata["other_error"]
            .as_str()
            .unwrap()
            .contains("5 seconds"));
    }

    #[test]
    fn test_inconsistent_result_detected() {
        let result = EvaluationResult {
            compiled: false,
            correctness: true,
            runtime: None,
            runtime_stats: None,
            failure: None,
            metadata: Metadata::new(),
        };
        assert!(!result.is_consistent());
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::NumericMismatch).unwrap();
        assert_eq!(json, "\"numeric_mismatch\"");
    }
}
