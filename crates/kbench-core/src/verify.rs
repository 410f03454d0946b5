//! Multi-trial correctness verification.
//!
//! Reference and candidate are instantiated once each from the same init
//! seed, then fed identical seeded inputs for every trial. Verification
//! stops at the first failing trial.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{DeviceId, FailureKind, Metadata, Tensor, Tolerance};
use crate::inputs::generate_inputs;
use crate::toolchain::{ExecError, KernelModel, RunnableUnit};

/// Seed for the trial-seed generator and for model instantiation.
pub const BASE_SEED: u64 = 42;

/// How candidate outputs relate to reference outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Match { max_diff: f64, avg_diff: f64 },
    ShapeMismatch { expected: Vec<Vec<usize>>, actual: Vec<Vec<usize>> },
    NumericMismatch { max_diff: f64, avg_diff: f64 },
}

/// Compare two output lists element-wise under `tolerance`.
///
/// Non-finite values must match exactly: NaN against NaN or an infinity
/// against the same-signed infinity. Any other pairing involving a
/// non-finite value is a mismatch.
pub fn compare_outputs(expected: &[Tensor], actual: &[Tensor], tolerance: &Tolerance) -> Comparison {
    let shapes = |ts: &[Tensor]| ts.iter().map(|t| t.shape().to_vec()).collect::<Vec<_>>();
    if expected.len() != actual.len()
        || expected.iter().zip(actual).any(|(e, a)| e.shape() != a.shape())
    {
        return Comparison::ShapeMismatch {
            expected: shapes(expected),
            actual: shapes(actual),
        };
    }

    let mut max_diff = 0.0f64;
    let mut sum_diff = 0.0f64;
    let mut count = 0usize;
    let mut within = true;
    for (e, a) in expected.iter().zip(actual) {
        for (&want, &got) in e.data().iter().zip(a.data()) {
            count += 1;
            if !want.is_finite() || !got.is_finite() {
                let same = (want.is_nan() && got.is_nan()) || want == got;
                if !same {
                    max_diff = f64::INFINITY;
                    sum_diff = f64::INFINITY;
                    within = false;
                }
                continue;
            }
            let diff = f64::from((got - want).abs());
            max_diff = max_diff.max(diff);
            sum_diff += diff;
            if !tolerance.allows(got, want) {
                within = false;
            }
        }
    }
    let avg_diff = if count == 0 { 0.0 } else { sum_diff / count as f64 };

    if within {
        Comparison::Match { max_diff, avg_diff }
    } else {
        Comparison::NumericMismatch { max_diff, avg_diff }
    }
}

/// Verdict of a correctness pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectnessReport {
    pub passed: bool,
    pub failure: Option<FailureKind>,
    pub trials_passed: u32,
    pub metadata: Metadata,
}

impl CorrectnessReport {
    fn fail(kind: FailureKind, trials_passed: u32, metadata: Metadata) -> Self {
        Self {
            passed: false,
            failure: Some(kind),
            trials_passed,
            metadata,
        }
    }
}

fn trials_value(passed: u32, total: u32) -> Value {
    Value::String(format!("({passed} / {total})"))
}

/// Run `num_trials` paired trials of `reference` against `candidate`.
pub async fn verify(
    reference: &dyn RunnableUnit,
    candidate: &dyn RunnableUnit,
    num_trials: u32,
    tolerance: &Tolerance,
    device: &DeviceId,
) -> CorrectnessReport {
    let mut metadata = Metadata::new();
    let spec = &reference.signature().inputs;

    let init = match reference.signature().default_init() {
        Ok(init) => init,
        Err(e) => return reference_failure(&e, 0, num_trials, metadata),
    };
    let mut ref_model = match reference.instantiate(&init, BASE_SEED, device).await {
        Ok(model) => model,
        Err(e) => return reference_failure(&e, 0, num_trials, metadata),
    };
    let mut cand_model = match candidate.instantiate(&init, BASE_SEED, device).await {
        Ok(model) => model,
        Err(e) => return candidate_failure(&e, 0, num_trials, metadata),
    };

    let mut seeds = StdRng::seed_from_u64(BASE_SEED);
    let mut max_seen = 0.0f64;
    for trial in 0..num_trials {
        let batch = match generate_inputs(spec, seeds.gen()) {
            Ok(batch) => batch,
            Err(e) => return reference_failure(&ExecError::from(e), trial, num_trials, metadata),
        };

        let expected = match run_trial(ref_model.as_mut(), &batch.tensors).await {
            Ok(out) => out,
            Err(e) => return reference_failure(&e, trial, num_trials, metadata),
        };
        let actual = match run_trial(cand_model.as_mut(), &batch.tensors).await {
            Ok(out) => out,
            Err(e) => return candidate_failure(&e, trial, num_trials, metadata),
        };

        match compare_outputs(&expected, &actual, tolerance) {
            Comparison::Match { max_diff, .. } => {
                max_seen = max_seen.max(max_diff);
                debug!(trial, max_diff, "trial passed");
            }
            Comparison::ShapeMismatch { expected, actual } => {
                metadata.insert(
                    "shape_info".to_string(),
                    json!({ "expected": expected, "actual": actual, "trial": trial }),
                );
                metadata.insert("trial".to_string(), json!(trial));
                metadata.insert("correctness_trials".to_string(), trials_value(trial, num_trials));
                return CorrectnessReport::fail(FailureKind::ShapeMismatch, trial, metadata);
            }
            Comparison::NumericMismatch { max_diff, avg_diff } => {
                metadata.insert("max_diff".to_string(), float_value(max_diff));
                metadata.insert("avg_diff".to_string(), float_value(avg_diff));
                metadata.insert("trial".to_string(), json!(trial));
                metadata.insert("correctness_trials".to_string(), trials_value(trial, num_trials));
                return CorrectnessReport::fail(FailureKind::NumericMismatch, trial, metadata);
            }
        }
        tokio::task::yield_now().await;
    }

    metadata.insert("max_diff".to_string(), float_value(max_seen));
    metadata.insert("correctness_trials".to_string(), trials_value(num_trials, num_trials));
    CorrectnessReport {
        passed: true,
        failure: None,
        trials_passed: num_trials,
        metadata,
    }
}

/// One forward pass followed by a device synchronization.
async fn run_trial(model: &mut dyn KernelModel, inputs: &[Tensor]) -> Result<Vec<Tensor>, ExecError> {
    let outputs = model.forward(inputs).await?;
    model.synchronize().await?;
    Ok(outputs)
}

/// JSON has no infinity; non-finite diffs are reported as strings.
fn float_value(v: f64) -> Value {
    if v.is_finite() {
        json!(v)
    } else {
        Value::String(v.to_string())
    }
}

fn candidate_failure(err: &ExecError, trial: u32, total: u32, mut metadata: Metadata) -> CorrectnessReport {
    metadata.insert("runtime_error".to_string(), Value::String(err.to_string()));
    metadata.insert("trial".to_string(), json!(trial));
    metadata.insert("correctness_trials".to_string(), trials_value(trial, total));
    CorrectnessReport::fail(FailureKind::RuntimeFailure, trial, metadata)
}

fn reference_failure(err: &ExecError, trial: u32, total: u32, mut metadata: Metadata) -> CorrectnessReport {
    metadata.insert(
        "other_error".to_string(),
        Value::String(format!("reference failed: {err}")),
    );
    metadata.insert("correctness_trials".to_string(), trials_value(trial, total));
    CorrectnessReport::fail(FailureKind::InfraFailure, trial, metadata)
}
