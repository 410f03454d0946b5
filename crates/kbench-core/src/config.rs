//! Harness-wide settings shared by every request in a run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{DeviceId, EvaluationRequest, GpuArch, Result, Tolerance};
use crate::toolchain::ToolchainConfig;

fn default_build_root() -> PathBuf {
    PathBuf::from("build").join("kbench")
}

fn default_correct_trials() -> u32 {
    5
}

fn default_perf_trials() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_gpu_arch() -> Vec<GpuArch> {
    vec![GpuArch::Ada]
}

fn default_workers() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Settings a run applies to every evaluation it submits.
///
/// Every field has a default, so a partial JSON file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    #[serde(default)]
    pub device: DeviceId,

    #[serde(default = "default_gpu_arch")]
    pub gpu_arch: Vec<GpuArch>,

    #[serde(default)]
    pub toolchain: ToolchainConfig,

    #[serde(default = "default_correct_trials")]
    pub num_correct_trials: u32,

    #[serde(default = "default_perf_trials")]
    pub num_perf_trials: u32,

    /// Trials per reference baseline; falls back to `num_perf_trials`.
    #[serde(default)]
    pub baseline_trials: Option<u32>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub tolerance: Tolerance,

    #[serde(default = "default_true")]
    pub measure_performance: bool,

    #[serde(default = "default_true")]
    pub use_cache: bool,

    #[serde(default)]
    pub clear_cache: bool,

    #[serde(default)]
    pub verbose: bool,

    /// Concurrent evaluations in batch mode.
    #[serde(default = "default_workers")]
    pub max_workers: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            build_root: default_build_root(),
            device: DeviceId::default(),
            gpu_arch: default_gpu_arch(),
            toolchain: ToolchainConfig::default(),
            num_correct_trials: default_correct_trials(),
            num_perf_trials: default_perf_trials(),
            baseline_trials: None,
            timeout_secs: default_timeout_secs(),
            tolerance: Tolerance::default(),
            measure_performance: true,
            use_cache: true,
            clear_cache: false,
            verbose: false,
            max_workers: default_workers(),
        }
    }
}

impl HarnessConfig {
    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn baseline_trials(&self) -> u32 {
        self.baseline_trials.unwrap_or(self.num_perf_trials)
    }

    /// A request for one reference/candidate pair under these settings.
    pub fn request(
        &self,
        reference_source: impl Into<String>,
        candidate_source: impl Into<String>,
    ) -> EvaluationRequest {
        EvaluationRequest {
            reference_source: reference_source.into(),
            candidate_source: candidate_source.into(),
            num_correct_trials: self.num_correct_trials,
            num_perf_trials: self.num_perf_trials,
            device: self.device.clone(),
            build_root: self.build_root.clone(),
            measure_performance: self.measure_performance,
            verbose: self.verbose,
            clear_cache: self.clear_cache,
            use_cache: self.use_cache,
            tolerance: self.tolerance,
            timeout_secs: self.timeout_secs,
            toolchain: self.toolchain.clone(),
            gpu_arch: self.gpu_arch.clone(),
        }
    }
}
