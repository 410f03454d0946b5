//! External compiler toolchain.
//!
//! The compile template runs once per artifact inside the artifact
//! directory; the launch template starts a module worker for each model.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use super::worker::{LaunchCommand, WorkerUnit};
use super::{BuildOptions, RunnableUnit, Toolchain, ToolchainError};
use crate::domain::{arch_list_string, DeviceId};

/// Environment variable holding the target architecture list, set only on
/// the compiler child process.
pub const ARCH_LIST_ENV: &str = "TORCH_CUDA_ARCH_LIST";

fn default_launch() -> Vec<String> {
    vec!["{out}".to_string()]
}

fn default_source_file() -> String {
    "kernel.src".to_string()
}

fn default_artifact_file() -> String {
    "kernel.bin".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

/// Configuration for [`CommandToolchain`].
///
/// Templates accept `{src}`, `{out}`, `{dir}` and `{arch_list}`;
/// `optimize_flags` additionally accept `{backend}` and `{mode}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandToolchainConfig {
    /// Compiler command (first element is the executable).
    pub compile: Vec<String>,

    /// Worker command for a built artifact.
    #[serde(default = "default_launch")]
    pub launch: Vec<String>,

    #[serde(default = "default_source_file")]
    pub source_file: String,

    #[serde(default = "default_artifact_file")]
    pub artifact_file: String,

    /// Compiler timeout in seconds (0 = none).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra compiler arguments for optimized builds.
    #[serde(default)]
    pub optimize_flags: Vec<String>,

    /// Hardware name reported in results. Defaults to the device id.
    #[serde(default)]
    pub hardware: Option<String>,
}

impl CommandToolchainConfig {
    pub fn new(compile: Vec<String>) -> Self {
        Self {
            compile,
            launch: default_launch(),
            source_file: default_source_file(),
            artifact_file: default_artifact_file(),
            timeout_secs: default_timeout_secs(),
            optimize_flags: Vec::new(),
            hardware: None,
        }
    }

    pub fn with_launch(mut self, launch: Vec<String>) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_optimize_flags(mut self, flags: Vec<String>) -> Self {
        self.optimize_flags = flags;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_hardware(mut self, hardware: impl Into<String>) -> Self {
        self.hardware = Some(hardware.into());
        self
    }
}

/// Placeholder values for one artifact directory.
struct Substitutions {
    vars: Vec<(&'static str, String)>,
}

impl Substitutions {
    fn new(config: &CommandToolchainConfig, dir: &Path, options: &BuildOptions) -> Self {
        let mut vars = vec![
            ("{src}", dir.join(&config.source_file).display().to_string()),
            ("{out}", dir.join(&config.artifact_file).display().to_string()),
            ("{dir}", dir.display().to_string()),
            ("{arch_list}", arch_list_string(&options.arch)),
        ];
        if let Some(profile) = &options.optimize {
            vars.push(("{backend}", profile.backend.clone()));
            vars.push(("{mode}", profile.mode.as_str().to_string()));
        }
        Self { vars }
    }

    fn expand(&self, template: &[String]) -> Vec<String> {
        template
            .iter()
            .map(|arg| {
                self.vars
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

/// Toolchain driving an external compiler.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    config: CommandToolchainConfig,
}

impl CommandToolchain {
    pub fn new(config: CommandToolchainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandToolchainConfig {
        &self.config
    }

    /// The full compiler argv for an artifact directory.
    pub fn compile_argv(&self, dir: &Path, options: &BuildOptions) -> Vec<String> {
        let subs = Substitutions::new(&self.config, dir, options);
        let mut argv = subs.expand(&self.config.compile);
        if options.optimize.is_some() {
            argv.extend(subs.expand(&self.config.optimize_flags));
        }
        argv
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn build(
        &self,
        source: &str,
        artifact_dir: &Path,
        options: &BuildOptions,
    ) -> Result<(), ToolchainError> {
        let start = Instant::now();
        tokio::fs::write(artifact_dir.join(&self.config.source_file), source).await?;

        let argv = self.compile_argv(artifact_dir, options);
        let (exe, args) = argv
            .split_first()
            .ok_or_else(|| ToolchainError::Other("empty compile command".to_string()))?;

        let child = Command::new(exe)
            .args(args)
            .current_dir(artifact_dir)
            .env(ARCH_LIST_ENV, arch_list_string(&options.arch))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = if self.config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ToolchainError::Timeout(self.config.timeout_secs))??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exe = %exe, exit_code, duration_ms, "compiler finished");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let diagnostics = match (stderr.trim(), stdout.trim()) {
                ("", "") => format!("compiler exited with code {exit_code}"),
                ("", out) => out.to_string(),
                (err, _) => err.to_string(),
            };
            return Err(ToolchainError::from_compiler_output(diagnostics));
        }
        info!(dir = %artifact_dir.display(), duration_ms, "artifact compiled");
        Ok(())
    }

    async fn load(
        &self,
        artifact_dir: &Path,
        options: &BuildOptions,
    ) -> Result<Arc<dyn RunnableUnit>, ToolchainError> {
        let subs = Substitutions::new(&self.config, artifact_dir, options);
        let launch = LaunchCommand {
            argv: subs.expand(&self.config.launch),
            current_dir: artifact_dir.to_path_buf(),
        };
        let unit = WorkerUnit::connect(launch, &options.device).await?;
        Ok(Arc::new(unit))
    }

    fn hardware_name(&self, device: &DeviceId) -> String {
        self.config
            .hardware
            .clone()
            .unwrap_or_else(|| device.to_string())
    }
}
