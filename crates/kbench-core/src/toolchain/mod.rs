//! Toolchains turn program source into runnable units.
//!
//! A [`Toolchain`] builds source into an artifact directory and loads it
//! back as a [`RunnableUnit`]. A unit exposes its [`ModelSignature`] and
//! instantiates [`KernelModel`]s on a device. Two toolchains ship:
//! the in-process script interpreter and an external command toolchain
//! whose artifacts run as module worker processes.

pub mod command;
pub mod error;
pub mod script;
pub mod worker;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{DeviceId, GpuArch, Tensor};

pub use command::{CommandToolchain, CommandToolchainConfig};
pub use error::{ExecError, ToolchainError};
pub use script::ScriptToolchain;

/// Shape used for every input when a program declares none.
pub const FALLBACK_SHAPE: [usize; 2] = [1, 128];

/// How a program's inputs are produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSpec {
    /// Explicit per-input shapes, in forward-parameter order.
    Shapes(Vec<Vec<usize>>),
    /// Only the forward arity is known; each input gets [`FALLBACK_SHAPE`].
    Arity(usize),
}

impl InputSpec {
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        match self {
            InputSpec::Shapes(shapes) => shapes.clone(),
            InputSpec::Arity(n) => vec![FALLBACK_SHAPE.to_vec(); *n],
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            InputSpec::Shapes(shapes) => shapes.len(),
            InputSpec::Arity(n) => *n,
        }
    }
}

/// A constructor argument declared by a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitArg {
    pub name: String,
    pub default: Option<f32>,
}

/// What the harness needs to know to drive a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub inputs: InputSpec,
    #[serde(default)]
    pub init_args: Vec<InitArg>,
}

impl ModelSignature {
    /// Initialization values from the declared defaults.
    pub fn default_init(&self) -> Result<Vec<f32>, ExecError> {
        self.init_args
            .iter()
            .map(|arg| {
                arg.default
                    .ok_or_else(|| ExecError::MissingInit(arg.name.clone()))
            })
            .collect()
    }
}

/// Opaque timing marker recorded on a model's device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(pub u64);

/// Ahead-of-time optimization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizeMode {
    #[default]
    Default,
    MaxAutotune,
    ReduceOverhead,
}

impl OptimizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizeMode::Default => "default",
            OptimizeMode::MaxAutotune => "max-autotune",
            OptimizeMode::ReduceOverhead => "reduce-overhead",
        }
    }

    /// Parse a mode name, falling back to [`OptimizeMode::Default`] for
    /// anything unrecognized.
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim() {
            "default" => OptimizeMode::Default,
            "max-autotune" => OptimizeMode::MaxAutotune,
            "reduce-overhead" => OptimizeMode::ReduceOverhead,
            other => {
                warn!(mode = other, "unknown optimization mode, using backend defaults");
                OptimizeMode::Default
            }
        }
    }

    /// Whether the mode enables transformations beyond the defaults.
    pub fn is_aggressive(&self) -> bool {
        !matches!(self, OptimizeMode::Default)
    }
}

impl fmt::Display for OptimizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimization backend plus mode used for the optimized baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeProfile {
    pub backend: String,
    pub mode: OptimizeMode,
}

impl Default for OptimizeProfile {
    fn default() -> Self {
        Self {
            backend: "inductor".to_string(),
            mode: OptimizeMode::Default,
        }
    }
}

impl OptimizeProfile {
    pub fn new(backend: impl Into<String>, mode: &str) -> Self {
        Self {
            backend: backend.into(),
            mode: OptimizeMode::parse_lenient(mode),
        }
    }
}

/// Parameters of a single build.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildOptions {
    pub arch: Vec<GpuArch>,
    pub device: DeviceId,
    /// `None` builds the program as written.
    pub optimize: Option<OptimizeProfile>,
}

/// Compiles program source and loads built artifacts.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Stable name recorded in artifact manifests.
    fn name(&self) -> &'static str;

    /// Build `source` into `artifact_dir`, which exists and is empty.
    async fn build(
        &self,
        source: &str,
        artifact_dir: &Path,
        options: &BuildOptions,
    ) -> Result<(), ToolchainError>;

    /// Load a previously built artifact.
    async fn load(
        &self,
        artifact_dir: &Path,
        options: &BuildOptions,
    ) -> Result<Arc<dyn RunnableUnit>, ToolchainError>;

    /// Human-readable name of the hardware behind `device`.
    fn hardware_name(&self, device: &DeviceId) -> String;
}

/// A loaded program that can be instantiated into models.
#[async_trait]
pub trait RunnableUnit: Send + Sync {
    fn signature(&self) -> &ModelSignature;

    /// Construct a model. Seeded weights are drawn from `seed`, so two
    /// instantiations with the same seed hold identical weights.
    async fn instantiate(
        &self,
        init: &[f32],
        seed: u64,
        device: &DeviceId,
    ) -> Result<Box<dyn KernelModel>, ExecError>;
}

/// An instantiated model bound to a device.
#[async_trait]
pub trait KernelModel: Send {
    async fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ExecError>;

    /// Record a timing marker on the device stream.
    async fn mark(&mut self) -> Result<Marker, ExecError>;

    /// Block until all queued device work has finished.
    async fn synchronize(&mut self) -> Result<(), ExecError>;

    /// Milliseconds between two recorded markers.
    async fn elapsed_ms(&mut self, start: Marker, end: Marker) -> Result<f64, ExecError>;
}

/// Serializable toolchain selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolchainConfig {
    /// The in-process script interpreter.
    #[default]
    Script,
    /// An external compiler producing module workers.
    Command(CommandToolchainConfig),
}

impl ToolchainConfig {
    pub fn instantiate(&self) -> Arc<dyn Toolchain> {
        match self {
            ToolchainConfig::Script => Arc::new(ScriptToolchain::new()),
            ToolchainConfig::Command(config) => Arc::new(CommandToolchain::new(config.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_spec_uses_fallback_shape() {
        let spec = InputSpec::Arity(2);
        assert_eq!(spec.shapes(), vec![vec![1, 128], vec![1, 128]]);
        assert_eq!(spec.arity(), 2);
    }

    #[test]
    fn test_default_init_requires_defaults() {
        let sig = ModelSignature {
            inputs: InputSpec::Arity(1),
            init_args: vec![
                InitArg {
                    name: "alpha".to_string(),
                    default: Some(0.5),
                },
                InitArg {
                    name: "beta".to_string(),
                    default: None,
                },
            ],
        };
        assert_eq!(sig.default_init(), Err(ExecError::MissingInit("beta".to_string())));
    }

    #[test]
    fn test_unknown_mode_falls_back() {
        assert_eq!(OptimizeMode::parse_lenient("max-autotune"), OptimizeMode::MaxAutotune);
        assert_eq!(OptimizeMode::parse_lenient("turbo"), OptimizeMode::Default);
        assert_eq!(OptimizeProfile::new("inductor", "bogus").mode, OptimizeMode::Default);
    }

    #[test]
    fn test_toolchain_config_tagged() {
        let json = serde_json::to_value(ToolchainConfig::Script).unwrap();
        assert_eq!(json["kind"], "script");
        assert_eq!(ToolchainConfig::Script.instantiate().name(), "script");
    }
}
