//! Evaluation requests.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::arch::{DeviceId, GpuArch};
use super::error::{EvalError, Result};
use crate::toolchain::ToolchainConfig;

/// Element-wise comparison tolerance: `|a - b| <= atol + rtol * |b|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub atol: f32,
    pub rtol: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            atol: 1e-2,
            rtol: 1e-2,
        }
    }
}

impl Tolerance {
    pub fn strict() -> Self {
        Self {
            atol: 1e-5,
            rtol: 1e-4,
        }
    }

    pub fn allows(&self, actual: f32, expected: f32) -> bool {
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// Everything one evaluation needs. Immutable once submitted, and
/// serializable so it can be handed to an isolated worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub reference_source: String,
    pub candidate_source: String,

    /// Correctness trials (N).
    pub num_correct_trials: u32,

    /// Timed performance trials (M).
    pub num_perf_trials: u32,

    pub device: DeviceId,

    /// Root of the on-disk build cache.
    pub build_root: PathBuf,

    pub measure_performance: bool,
    pub verbose: bool,

    /// Destroy the cached artifact before building.
    pub clear_cache: bool,

    /// When false, build into a throwaway directory instead of the cache.
    pub use_cache: bool,

    pub tolerance: Tolerance,

    /// Wall-clock bound for the whole evaluation.
    pub timeout_secs: u64,

    pub toolchain: ToolchainConfig,

    /// Target architectures handed to the compiler.
    pub gpu_arch: Vec<GpuArch>,
}

impl EvaluationRequest {
    pub fn new(reference_source: impl Into<String>, candidate_source: impl Into<String>) -> Self {
        Self {
            reference_source: reference_source.into(),
            candidate_source: candidate_source.into(),
            num_correct_trials: 5,
            num_perf_trials: 100,
            device: DeviceId::cpu(),
            build_root: PathBuf::from("build").join("kbench"),
            measure_performance: true,
            verbose: false,
            clear_cache: false,
            use_cache: true,
            tolerance: Tolerance::default(),
            timeout_secs: 300,
            toolchain: ToolchainConfig::default(),
            gpu_arch: vec![GpuArch::Ada],
        }
    }

    pub fn with_trials(mut self, num_correct_trials: u32, num_perf_trials: u32) -> Self {
        self.num_correct_trials = num_correct_trials;
        self.num_perf_trials = num_perf_trials;
        self
    }

    pub fn with_build_root(mut self, build_root: impl Into<PathBuf>) -> Self {
        self.build_root = build_root.into();
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_gpu_arch(mut self, gpu_arch: Vec<GpuArch>) -> Self {
        self.gpu_arch = gpu_arch;
        self
    }

    pub fn without_performance(mut self) -> Self {
        self.measure_performance = false;
        self
    }

    pub fn clearing_cache(mut self) -> Self {
        self.clear_cache = true;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Reject requests the harness cannot meaningfully run.
    pub fn validate(&self) -> Result<()> {
        if self.num_correct_trials == 0 {
            return Err(EvalError::InvalidRequest(
                "num_correct_trials must be at least 1".to_string(),
            ));
        }
        if self.measure_performance && self.num_perf_trials == 0 {
            return Err(EvalError::InvalidRequest(
                "num_perf_trials must be at least 1 when measuring performance".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(EvalError::InvalidRequest(
                "timeout_secs must be positive".to_string(),
            ));
        }
        if !self.tolerance.atol.is_finite()
            || !self.tolerance.rtol.is_finite()
            || self.tolerance.atol < 0.0
            || self.tolerance.rtol < 0.0
        {
            return Err(EvalError::InvalidRequest(format!(
                "tolerance must be finite and non-negative, got {:?}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = EvaluationRequest::new("ref", "cand");
        assert_eq!(req.num_correct_trials, 5);
        assert_eq!(req.num_perf_trials, 100);
        assert_eq!(req.timeout_secs, 300);
        assert!(req.measure_performance);
        assert!(req.use_cache);
        assert!(!req.clear_cache);
        assert_eq!(req.gpu_arch, vec![GpuArch::Ada]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_trials() {
        let req = EvaluationRequest::new("ref", "cand").with_trials(0, 10);
        assert!(matches!(req.validate(), Err(EvalError::InvalidRequest(_))));

        let req = EvaluationRequest::new("ref", "cand").with_trials(1, 0);
        assert!(req.validate().is_err());
        assert!(req.without_performance().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_tolerance() {
        let req = EvaluationRequest::new("ref", "cand").with_tolerance(Tolerance {
            atol: -1.0,
            rtol: 0.0,
        });
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_tolerance_allows() {
        let tol = Tolerance::default();
        assert!(tol.allows(1.005, 1.0));
        assert!(!tol.allows(1.5, 1.0));
        assert!(!tol.allows(f32::NAN, 1.0));
    }

    #[test]
    fn test_request_serde_roundtrip() {
        let req = EvaluationRequest::new("ref", "cand")
            .with_device(DeviceId::cuda(0))
            .with_gpu_arch(vec![GpuArch::Hopper]);
        let json = serde_json::to_string(&req).unwrap();
        let back: EvaluationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }
}
