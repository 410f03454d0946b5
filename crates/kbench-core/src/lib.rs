//! kbench Core Library
//!
//! Builds candidate kernels, checks them against a reference program over
//! seeded trials, and times both against eager and optimized baselines.

pub mod aggregate;
pub mod baseline;
pub mod build;
pub mod config;
pub mod digest;
pub mod domain;
pub mod eval;
pub mod inputs;
pub mod metrics;
pub mod obs;
pub mod pool;
pub mod protocol;
pub mod telemetry;
pub mod timing;
pub mod toolchain;
pub mod verify;

pub use aggregate::{aggregate, render_summary, CheckReport, Speedup, SpeedupReport, TimingOutcome};
pub use baseline::{measure_reference, BaselineContext, BaselineError, BaselineMode};
pub use build::{build_uncached, BuildCache, BuildFailure, BuildOutcome, LoadedArtifact};
pub use config::HarnessConfig;
pub use digest::Digest;
pub use domain::{
    arch_list_string, parse_arch_list, DeviceId, EvalError, EvaluationRequest, EvaluationResult,
    FailureKind, GpuArch, Metadata, Result, Tensor, Tolerance,
};
pub use eval::{evaluate, guarded, run_and_check, GuardError};
pub use inputs::{generate_inputs, InputBatch};
pub use pool::{run_bounded, serve_eval_request, PoolResult, ProcessPool};
pub use timing::{measure, TimingError, TimingSample, WARMUP_TRIALS};
pub use toolchain::{
    BuildOptions, CommandToolchain, CommandToolchainConfig, ExecError, InputSpec, KernelModel,
    ModelSignature, OptimizeMode, OptimizeProfile, RunnableUnit, ScriptToolchain, Toolchain,
    ToolchainConfig, ToolchainError,
};
pub use verify::{compare_outputs, verify, Comparison, CorrectnessReport, BASE_SEED};

pub use metrics::METRICS;
pub use obs::EvalSpan;
pub use telemetry::init_tracing;

/// kbench version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
