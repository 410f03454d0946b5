//! Structured lifecycle events for evaluations.
//!
//! Every evaluation runs inside an [`EvalSpan`]; the `emit_*` functions
//! log one `info!` event per lifecycle step with a stable `event` field
//! (`eval.started`, `build.finished`, `verify.finished`, ...).

use tracing::{info, warn, Instrument};

use crate::domain::FailureKind;
use crate::timing::TimingSample;

/// Span tagging all work of one evaluation with its id.
pub struct EvalSpan {
    span: tracing::Span,
}

impl EvalSpan {
    pub fn new(eval_id: &str) -> Self {
        Self {
            span: tracing::info_span!("kbench.eval", eval_id = %eval_id),
        }
    }

    /// Attach the span to a future.
    pub fn instrument<F: std::future::Future>(&self, fut: F) -> tracing::instrument::Instrumented<F> {
        fut.instrument(self.span.clone())
    }
}

pub fn emit_eval_started(eval_id: &str, device: &str, num_correct_trials: u32, num_perf_trials: u32) {
    info!(
        event = "eval.started",
        eval_id = %eval_id,
        device = %device,
        num_correct_trials,
        num_perf_trials,
    );
}

pub fn emit_build_finished(digest: &str, cache_hit: bool, duration_ms: u64) {
    info!(
        event = "build.finished",
        digest = %digest,
        cache_hit,
        duration_ms,
    );
}

pub fn emit_build_failed(digest: &str, kind: FailureKind, error: &str) {
    warn!(event = "build.failed", digest = %digest, kind = %kind, error = %error);
}

pub fn emit_verify_finished(passed: bool, trials_passed: u32, trials_total: u32) {
    info!(
        event = "verify.finished",
        passed,
        trials_passed,
        trials_total,
    );
}

pub fn emit_timing_finished(label: &str, sample: &TimingSample) {
    info!(
        event = "timing.finished",
        label = %label,
        mean_ms = sample.mean,
        std_ms = sample.std,
        num_trials = sample.num_trials,
    );
}

pub fn emit_eval_finished(eval_id: &str, duration_ms: u64, compiled: bool, correctness: bool) {
    info!(
        event = "eval.finished",
        eval_id = %eval_id,
        duration_ms,
        compiled,
        correctness,
    );
}

/// Failure attributed to the harness rather than the candidate.
pub fn emit_infra_failure(eval_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "eval.infra_failure", eval_id = %eval_id, error = %error);
}
