//! Reference latency under eager and optimized execution.
//!
//! Baselines never touch the candidate cache: the reference is built into
//! a throwaway directory for every measurement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::build::{build_uncached, BuildOutcome};
use crate::domain::{DeviceId, GpuArch};
use crate::inputs::generate_inputs;
use crate::obs;
use crate::timing::{measure, TimingError, TimingSample, WARMUP_TRIALS};
use crate::toolchain::{BuildOptions, ExecError, OptimizeProfile, Toolchain};
use crate::verify::BASE_SEED;

/// How the reference is built before timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaselineMode {
    /// As written.
    Eager,
    /// With an ahead-of-time optimization profile.
    Optimized(OptimizeProfile),
}

impl BaselineMode {
    /// Optimized mode with the default backend and mode.
    pub fn optimized() -> Self {
        BaselineMode::Optimized(OptimizeProfile::default())
    }

    pub fn label(&self) -> &'static str {
        match self {
            BaselineMode::Eager => "eager",
            BaselineMode::Optimized(_) => "optimized",
        }
    }
}

/// Where and how a baseline runs.
#[derive(Clone)]
pub struct BaselineContext {
    pub toolchain: Arc<dyn Toolchain>,
    pub device: DeviceId,
    pub arch: Vec<GpuArch>,
}

#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("reference failed to build: {0}")]
    Build(String),

    #[error("reference failed to initialize: {0}")]
    Init(#[from] ExecError),

    #[error("timing failed: {0}")]
    Timing(#[from] TimingError),
}

/// Time the reference program under `mode`.
///
/// Inputs come from the reference's declared shapes, or one
/// fallback-shaped input per forward parameter.
pub async fn measure_reference(
    reference_source: &str,
    mode: &BaselineMode,
    num_trials: u32,
    ctx: &BaselineContext,
) -> Result<TimingSample, BaselineError> {
    let options = BuildOptions {
        arch: ctx.arch.clone(),
        device: ctx.device.clone(),
        optimize: match mode {
            BaselineMode::Eager => None,
            BaselineMode::Optimized(profile) => Some(profile.clone()),
        },
    };

    let artifact = match build_uncached(ctx.toolchain.as_ref(), reference_source, &options).await {
        BuildOutcome::Built(artifact) => artifact,
        BuildOutcome::CompileFailure(failure) | BuildOutcome::InfraFailure(failure) => {
            return Err(BaselineError::Build(failure.message))
        }
    };

    let signature = artifact.unit.signature();
    let init = signature.default_init()?;
    let mut model = artifact.unit.instantiate(&init, BASE_SEED, &ctx.device).await?;
    let batch = generate_inputs(&signature.inputs, BASE_SEED).map_err(ExecError::from)?;

    let sample = measure(model.as_mut(), &batch.tensors, num_trials, WARMUP_TRIALS).await?;
    info!(
        mode = mode.label(),
        mean_ms = sample.mean,
        "reference baseline measured"
    );
    obs::emit_timing_finished(mode.label(), &sample);
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::ScriptToolchain;

    fn ctx() -> BaselineContext {
        BaselineContext {
            toolchain: Arc::new(ScriptToolchain::new()),
            device: DeviceId::cpu(),
            arch: vec![GpuArch::Ada],
        }
    }

    #[test]
    fn test_mode_serde_roundtrip() {
        let optimized = BaselineMode::Optimized(OptimizeProfile::new("inductor", "max-autotune"));
        let json = serde_json::to_value(&optimized).unwrap();
        assert_eq!(json["kind"], "optimized");
        assert_eq!(json["mode"], "max-autotune");

        for mode in [BaselineMode::Eager, BaselineMode::optimized(), optimized] {
            let text = serde_json::to_string(&mode).unwrap();
            let back: BaselineMode = serde_json::from_str(&text).unwrap();
            assert_eq!(back, mode);
        }
    }

    #[tokio::test]
    async fn test_eager_and_optimized_baselines() {
        let src = "input x: [32]\nforward(x):\n let y = x * 1 + 0\n return relu(y) + 2 * 3\n";
        let eager = measure_reference(src, &BaselineMode::Eager, 5, &ctx()).await.unwrap();
        let optimized = measure_reference(src, &BaselineMode::optimized(), 5, &ctx())
            .await
            .unwrap();
        assert_eq!(eager.num_trials, 5);
        assert_eq!(optimized.num_trials, 5);
        assert!(eager.min >= 0.0 && optimized.min >= 0.0);
    }

    #[tokio::test]
    async fn test_arity_fallback_inputs() {
        let src = "forward(a, b):\n return a + b\n";
        let sample = measure_reference(src, &BaselineMode::Eager, 2, &ctx()).await.unwrap();
        assert_eq!(sample.num_trials, 2);
    }

    #[tokio::test]
    async fn test_unknown_optimize_mode_falls_back() {
        let mode = BaselineMode::Optimized(OptimizeProfile::new("inductor", "warp-speed"));
        let src = "input x: [4]\nforward(x):\n return x\n";
        assert!(measure_reference(src, &mode, 1, &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_reference_is_error() {
        let err = measure_reference("forward(", &BaselineMode::Eager, 1, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, BaselineError::Build(_)));
    }

    #[tokio::test]
    async fn test_zero_trials_is_error() {
        let src = "input x: [4]\nforward(x):\n return x\n";
        let err = measure_reference(src, &BaselineMode::Eager, 0, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, BaselineError::Timing(TimingError::NoTrials)));
    }
}
