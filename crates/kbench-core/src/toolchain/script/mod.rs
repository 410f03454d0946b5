//! The `kbs` script toolchain.
//!
//! Source is parsed and checked at build time; the checked program is
//! persisted as `program.json` next to a copy of the source and
//! interpreted on the host when loaded.

pub mod interp;
pub mod optimize;
pub mod parser;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use self::interp::Bindings;
use self::parser::Program;
pub use self::parser::ParseError;
use super::{
    BuildOptions, ExecError, InitArg, InputSpec, KernelModel, Marker, ModelSignature,
    OptimizeMode, RunnableUnit, Toolchain, ToolchainError,
};
use crate::domain::{DeviceId, Tensor};

pub const PROGRAM_FILE: &str = "program.json";
pub const SOURCE_FILE: &str = "source.kbs";

/// Parse, check, and optionally optimize `source`.
pub fn compile_source(source: &str, optimize: Option<OptimizeMode>) -> Result<Program, ParseError> {
    let program = parser::parse_program(source)?;
    Ok(match optimize {
        Some(mode) => optimize::optimize(program, mode),
        None => program,
    })
}

/// Builds `kbs` source into checked programs.
#[derive(Debug, Clone, Default)]
pub struct ScriptToolchain;

impl ScriptToolchain {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Toolchain for ScriptToolchain {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn build(
        &self,
        source: &str,
        artifact_dir: &Path,
        options: &BuildOptions,
    ) -> Result<(), ToolchainError> {
        let mode = options.optimize.as_ref().map(|profile| profile.mode);
        let program = compile_source(source, mode)
            .map_err(|e| ToolchainError::Compiler(e.to_string()))?;
        debug!(
            dir = %artifact_dir.display(),
            lets = program.forward.body.len(),
            optimized = mode.is_some(),
            "script compiled"
        );
        tokio::fs::write(artifact_dir.join(SOURCE_FILE), source).await?;
        tokio::fs::write(
            artifact_dir.join(PROGRAM_FILE),
            serde_json::to_vec_pretty(&program)?,
        )
        .await?;
        Ok(())
    }

    async fn load(
        &self,
        artifact_dir: &Path,
        _options: &BuildOptions,
    ) -> Result<Arc<dyn RunnableUnit>, ToolchainError> {
        let bytes = tokio::fs::read(artifact_dir.join(PROGRAM_FILE)).await?;
        let program: Program = serde_json::from_slice(&bytes)?;
        Ok(Arc::new(ScriptUnit::from_program(program)))
    }

    fn hardware_name(&self, device: &DeviceId) -> String {
        format!("host {} ({device})", std::env::consts::ARCH)
    }
}

/// A loaded script program.
#[derive(Debug, Clone)]
pub struct ScriptUnit {
    program: Arc<Program>,
    signature: ModelSignature,
}

impl ScriptUnit {
    pub fn from_program(program: Program) -> Self {
        let inputs = if program.inputs.is_empty() {
            InputSpec::Arity(program.forward.params.len())
        } else {
            InputSpec::Shapes(program.inputs.iter().map(|d| d.shape.clone()).collect())
        };
        let init_args = program
            .inits
            .iter()
            .map(|decl| InitArg {
                name: decl.name.clone(),
                default: decl.default,
            })
            .collect();
        Self {
            program: Arc::new(program),
            signature: ModelSignature { inputs, init_args },
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Instantiate without going through the async trait.
    pub fn instantiate_sync(
        &self,
        init: &[f32],
        seed: u64,
        device: &DeviceId,
    ) -> Result<ScriptModel, ExecError> {
        if !device.is_cpu() {
            return Err(ExecError::Device(format!(
                "script programs run on cpu, not {device}"
            )));
        }
        let program = &self.program;
        if init.len() != program.inits.len() {
            return Err(ExecError::InitArity {
                expected: program.inits.len(),
                actual: init.len(),
            });
        }

        let mut state = Bindings::new();
        for (decl, value) in program.inits.iter().zip(init) {
            state.insert(decl.name.clone(), Tensor::scalar(*value));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        for decl in &program.params {
            state.insert(decl.name.clone(), Tensor::randn(&decl.shape, &mut rng)?);
        }

        Ok(ScriptModel {
            program: Arc::clone(&self.program),
            state,
            markers: Vec::new(),
        })
    }
}

#[async_trait]
impl RunnableUnit for ScriptUnit {
    fn signature(&self) -> &ModelSignature {
        &self.signature
    }

    async fn instantiate(
        &self,
        init: &[f32],
        seed: u64,
        device: &DeviceId,
    ) -> Result<Box<dyn KernelModel>, ExecError> {
        Ok(Box::new(self.instantiate_sync(init, seed, device)?))
    }
}

/// An instantiated script program. Execution is synchronous, so markers
/// are host timestamps and `synchronize` has nothing to wait for.
#[derive(Debug)]
pub struct ScriptModel {
    program: Arc<Program>,
    state: Bindings,
    markers: Vec<Instant>,
}

impl ScriptModel {
    pub fn forward_sync(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ExecError> {
        interp::run_forward(&self.program, &self.state, inputs)
    }

    pub fn mark_sync(&mut self) -> Marker {
        self.markers.push(Instant::now());
        Marker(self.markers.len() as u64 - 1)
    }

    pub fn elapsed_sync(&self, start: Marker, end: Marker) -> Result<f64, ExecError> {
        let at = |m: Marker| {
            self.markers
                .get(m.0 as usize)
                .copied()
                .ok_or(ExecError::Marker(m.0))
        };
        let (start, end) = (at(start)?, at(end)?);
        Ok(end.saturating_duration_since(start).as_secs_f64() * 1000.0)
    }
}

#[async_trait]
impl KernelModel for ScriptModel {
    async fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ExecError> {
        self.forward_sync(inputs)
    }

    async fn mark(&mut self) -> Result<Marker, ExecError> {
        Ok(self.mark_sync())
    }

    async fn synchronize(&mut self) -> Result<(), ExecError> {
        Ok(())
    }

    async fn elapsed_ms(&mut self, start: Marker, end: Marker) -> Result<f64, ExecError> {
        self.elapsed_sync(start, end)
    }
}
