//! Top-level evaluation entry points.
//!
//! [`evaluate`] never fails: invalid requests, panics, and timeouts all
//! come back as an [`EvaluationResult`] with `failure = infra_failure`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{aggregate, CheckReport, SpeedupReport, TimingOutcome};
use crate::baseline::{measure_reference, BaselineContext, BaselineMode};
use crate::build::{build_uncached, BuildCache, BuildOutcome, LoadedArtifact};
use crate::domain::{EvaluationRequest, EvaluationResult, Metadata};
use crate::inputs::generate_inputs;
use crate::metrics::METRICS;
use crate::obs::{self, EvalSpan};
use crate::timing::{measure, TimingSample, WARMUP_TRIALS};
use crate::toolchain::{BuildOptions, Toolchain};
use crate::verify::{verify, BASE_SEED};

/// Why a guarded task produced no value.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardError {
    TimedOut,
    Panicked(String),
}

/// Run `fut` on its own task under a wall-clock limit. The task is aborted
/// on timeout; a panic inside it is caught and reported.
pub async fn guarded<T, F>(limit: Duration, fut: F) -> Result<T, GuardError>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) if err.is_panic() => Err(GuardError::Panicked(panic_message(err.into_panic()))),
        Ok(Err(err)) => Err(GuardError::Panicked(err.to_string())),
        Err(_) => {
            handle.abort();
            Err(GuardError::TimedOut)
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) fn base_metadata(request: &EvaluationRequest, toolchain: &dyn Toolchain) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("device".to_string(), Value::String(request.device.to_string()));
    metadata.insert(
        "hardware".to_string(),
        Value::String(toolchain.hardware_name(&request.device)),
    );
    metadata
}

/// Evaluate one candidate against its reference.
pub async fn evaluate(request: EvaluationRequest) -> EvaluationResult {
    let eval_id = Uuid::new_v4().to_string();
    METRICS.inc_evaluations();
    let toolchain = request.toolchain.instantiate();
    let metadata = base_metadata(&request, toolchain.as_ref());

    if let Err(err) = request.validate() {
        obs::emit_infra_failure(&eval_id, &err);
        return EvaluationResult::infra_failure(err.to_string(), metadata);
    }

    let start = Instant::now();
    obs::emit_eval_started(
        &eval_id,
        request.device.as_str(),
        request.num_correct_trials,
        request.num_perf_trials,
    );

    let limit_secs = request.timeout_secs;
    let span = EvalSpan::new(&eval_id);
    let pipeline = span.instrument(run_pipeline(request, toolchain, metadata.clone()));
    let result = match guarded(Duration::from_secs(limit_secs), pipeline).await {
        Ok(result) => result,
        Err(GuardError::TimedOut) => {
            METRICS.inc_timeouts();
            obs::emit_infra_failure(&eval_id, &format!("timed out after {limit_secs}s"));
            EvaluationResult::timed_out(limit_secs, metadata)
        }
        Err(GuardError::Panicked(message)) => {
            obs::emit_infra_failure(&eval_id, &message);
            EvaluationResult::infra_failure(format!("evaluation panicked: {message}"), metadata)
        }
    };

    obs::emit_eval_finished(
        &eval_id,
        start.elapsed().as_millis() as u64,
        result.compiled,
        result.correctness,
    );
    result
}

/// Build, verify, and time. Runs inside the guarded task.
async fn run_pipeline(
    request: EvaluationRequest,
    toolchain: Arc<dyn Toolchain>,
    metadata: Metadata,
) -> EvaluationResult {
    let options = BuildOptions {
        arch: request.gpu_arch.clone(),
        device: request.device.clone(),
        optimize: None,
    };

    let build = if request.use_cache {
        BuildCache::new(&request.build_root, Arc::clone(&toolchain))
            .build_and_load(&request.candidate_source, request.clear_cache, &options)
            .await
    } else {
        build_uncached(toolchain.as_ref(), &request.candidate_source, &options).await
    };
    let Some(candidate) = build.artifact() else {
        return aggregate(metadata, &build, None, &TimingOutcome::Skipped, None, None).0;
    };
    if request.verbose {
        info!(path = %candidate.path.display(), cache_hit = candidate.cache_hit, "candidate built");
    }

    let reference = match build_uncached(toolchain.as_ref(), &request.reference_source, &options).await {
        BuildOutcome::Built(artifact) => artifact,
        BuildOutcome::CompileFailure(failure) | BuildOutcome::InfraFailure(failure) => {
            return EvaluationResult::infra_failure(
                format!("reference failed to build: {}", failure.message),
                metadata,
            );
        }
    };

    let report = verify(
        reference.unit.as_ref(),
        candidate.unit.as_ref(),
        request.num_correct_trials,
        &request.tolerance,
        &request.device,
    )
    .await;
    obs::emit_verify_finished(report.passed, report.trials_passed, request.num_correct_trials);

    let timing = if report.passed && request.measure_performance {
        match time_candidate(&reference, candidate, &request).await {
            Ok(sample) => {
                obs::emit_timing_finished("candidate", &sample);
                TimingOutcome::Measured(sample)
            }
            Err(message) => TimingOutcome::Failed(message),
        }
    } else {
        debug!(passed = report.passed, "performance pass skipped");
        TimingOutcome::Skipped
    };

    aggregate(metadata, &build, Some(&report), &timing, None, None).0
}

async fn time_candidate(
    reference: &LoadedArtifact,
    candidate: &LoadedArtifact,
    request: &EvaluationRequest,
) -> Result<TimingSample, String> {
    let signature = reference.unit.signature();
    let init = signature.default_init().map_err(|e| e.to_string())?;
    let mut model = candidate
        .unit
        .instantiate(&init, BASE_SEED, &request.device)
        .await
        .map_err(|e| e.to_string())?;
    let batch = generate_inputs(&signature.inputs, BASE_SEED).map_err(|e| e.to_string())?;
    measure(model.as_mut(), &batch.tensors, request.num_perf_trials, WARMUP_TRIALS)
        .await
        .map_err(|e| e.to_string())
}

/// Evaluate, then time both reference baselines and compute speedups.
pub async fn run_and_check(request: EvaluationRequest, baseline_trials: u32) -> CheckReport {
    let limit = Duration::from_secs(request.timeout_secs.max(1));
    let ctx = BaselineContext {
        toolchain: request.toolchain.instantiate(),
        device: request.device.clone(),
        arch: request.gpu_arch.clone(),
    };
    let reference_source = request.reference_source.clone();

    let result = evaluate(request).await;

    let mut baseline_errors = BTreeMap::new();
    let mut baselines = Vec::new();
    for mode in [BaselineMode::Eager, BaselineMode::optimized()] {
        let label = mode.label().to_string();
        let (source, ctx) = (reference_source.clone(), ctx.clone());
        let run = async move { measure_reference(&source, &mode, baseline_trials, &ctx).await };
        let sample = match guarded(limit, run).await {
            Ok(Ok(sample)) => Some(sample),
            Ok(Err(err)) => {
                baseline_errors.insert(label, err.to_string());
                None
            }
            Err(GuardError::TimedOut) => {
                baseline_errors.insert(label, format!("timed out after {}s", limit.as_secs()));
                None
            }
            Err(GuardError::Panicked(message)) => {
                baseline_errors.insert(label, format!("panicked: {message}"));
                None
            }
        };
        baselines.push(sample);
    }
    let baseline_optimized = baselines.pop().flatten();
    let baseline_eager = baselines.pop().flatten();

    let speedup = SpeedupReport::compute(&result, baseline_eager.as_ref(), baseline_optimized.as_ref());
    CheckReport {
        result,
        baseline_eager,
        baseline_optimized,
        baseline_errors,
        speedup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_returns_value() {
        assert_eq!(guarded(Duration::from_secs(5), async { 3 }).await, Ok(3));
    }

    #[tokio::test]
    async fn test_guarded_catches_panic() {
        let err = guarded(Duration::from_secs(5), async {
            if true {
                panic!("kernel exploded");
            }
            0
        })
        .await
        .unwrap_err();
        assert_eq!(err, GuardError::Panicked("kernel exploded".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_times_out() {
        let err = guarded(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await
        .unwrap_err();
        assert_eq!(err, GuardError::TimedOut);
    }

    #[tokio::test]
    async fn test_invalid_request_is_infra_failure() {
        let request = EvaluationRequest::new("forward(x):\n return x\n", "forward(x):\n return x\n")
            .with_trials(0, 1);
        let result = evaluate(request).await;
        assert!(!result.compiled);
        assert_eq!(result.failure, Some(crate::domain::FailureKind::InfraFailure));
        assert_eq!(result.metadata["device"], "cpu");
        assert!(result.metadata.contains_key("hardware"));
    }
}
