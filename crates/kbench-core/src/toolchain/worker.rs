//! Client side of the module protocol: models backed by worker processes.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::{ExecError, KernelModel, Marker, ModelSignature, RunnableUnit, ToolchainError};
use crate::domain::{DeviceId, Tensor};
use crate::protocol::{
    read_message, write_message, ModuleRequest, ModuleResponse, ProtocolError, DEVICE_ENV,
};

/// A command line that starts a module worker.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchCommand {
    pub argv: Vec<String>,
    pub current_dir: PathBuf,
}

/// One live worker process.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn spawn(launch: &LaunchCommand, device: &DeviceId) -> std::io::Result<Self> {
        let (exe, args) = launch
            .argv
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty launch command"))?;
        let mut child = Command::new(exe)
            .args(args)
            .current_dir(&launch.current_dir)
            .env(DEVICE_ENV, device.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdin unavailable")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdout unavailable")
        })?;
        debug!(exe = %exe, pid = ?child.id(), "module worker started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn call(&mut self, request: &ModuleRequest) -> Result<ModuleResponse, ProtocolError> {
        write_message(&mut self.stdin, request).await?;
        read_message(&mut self.stdout).await
    }

    async fn shutdown(mut self) {
        let _ = self.call(&ModuleRequest::Shutdown).await;
        let _ = self.child.wait().await;
    }
}

fn exec_error(op: &str, err: ProtocolError) -> ExecError {
    ExecError::Worker(format!("{op}: {err}"))
}

/// A built artifact whose models live in worker processes.
#[derive(Debug, Clone)]
pub struct WorkerUnit {
    launch: LaunchCommand,
    signature: ModelSignature,
}

impl WorkerUnit {
    /// Start a worker once to read its signature.
    pub async fn connect(launch: LaunchCommand, device: &DeviceId) -> Result<Self, ToolchainError> {
        let mut process = WorkerProcess::spawn(&launch, device)?;
        let response = process
            .call(&ModuleRequest::Describe)
            .await
            .map_err(|e| ToolchainError::Protocol(format!("describe: {e}")))?;
        let signature = match response {
            ModuleResponse::Signature { signature } => signature,
            ModuleResponse::Error { message } => return Err(ToolchainError::from_compiler_output(message)),
            other => {
                return Err(ToolchainError::Protocol(format!(
                    "describe: unexpected response {other:?}"
                )))
            }
        };
        process.shutdown().await;
        Ok(Self { launch, signature })
    }
}

#[async_trait]
impl RunnableUnit for WorkerUnit {
    fn signature(&self) -> &ModelSignature {
        &self.signature
    }

    async fn instantiate(
        &self,
        init: &[f32],
        seed: u64,
        device: &DeviceId,
    ) -> Result<Box<dyn KernelModel>, ExecError> {
        let mut process = WorkerProcess::spawn(&self.launch, device)
            .map_err(|e| ExecError::Worker(format!("spawn: {e}")))?;
        let request = ModuleRequest::Init {
            args: init.to_vec(),
            seed,
        };
        match process.call(&request).await.map_err(|e| exec_error("init", e))? {
            ModuleResponse::Ok => Ok(Box::new(WorkerModel { process })),
            ModuleResponse::Error { message } => Err(ExecError::Worker(message)),
            other => Err(ExecError::Worker(format!("init: unexpected response {other:?}"))),
        }
    }
}

/// A model instance owned by one worker process. The process is killed
/// when the model is dropped.
pub struct WorkerModel {
    process: WorkerProcess,
}

impl WorkerModel {
    async fn request(&mut self, request: ModuleRequest) -> Result<ModuleResponse, ExecError> {
        let op = request.op();
        match self.process.call(&request).await.map_err(|e| exec_error(op, e))? {
            ModuleResponse::Error { message } => Err(ExecError::Worker(message)),
            response => Ok(response),
        }
    }
}

fn unexpected(op: &str, response: ModuleResponse) -> ExecError {
    ExecError::Worker(format!("{op}: unexpected response {response:?}"))
}

#[async_trait]
impl KernelModel for WorkerModel {
    async fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ExecError> {
        let request = ModuleRequest::Forward {
            inputs: inputs.to_vec(),
        };
        match self.request(request).await? {
            ModuleResponse::Outputs { outputs } => Ok(outputs),
            other => Err(unexpected("forward", other)),
        }
    }

    async fn mark(&mut self) -> Result<Marker, ExecError> {
        match self.request(ModuleRequest::Mark).await? {
            ModuleResponse::Marker { id } => Ok(id),
            other => Err(unexpected("mark", other)),
        }
    }

    async fn synchronize(&mut self) -> Result<(), ExecError> {
        match self.request(ModuleRequest::Sync).await? {
            ModuleResponse::Ok => Ok(()),
            other => Err(unexpected("sync", other)),
        }
    }

    async fn elapsed_ms(&mut self, start: Marker, end: Marker) -> Result<f64, ExecError> {
        match self.request(ModuleRequest::Elapsed { start, end }).await? {
            ModuleResponse::Elapsed { ms } if ms.is_finite() && ms >= 0.0 => Ok(ms),
            other => Err(unexpected("elapsed", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_worker_binary_is_io_error() {
        let launch = LaunchCommand {
            argv: vec!["/nonexistent/kbench-worker".to_string()],
            current_dir: std::env::temp_dir(),
        };
        let err = WorkerUnit::connect(launch, &DeviceId::cpu()).await.unwrap_err();
        assert!(matches!(err, ToolchainError::Io(_)));
        assert!(!err.is_program_error());
    }

    #[tokio::test]
    async fn test_worker_that_exits_is_protocol_error() {
        let launch = LaunchCommand {
            argv: vec!["true".to_string()],
            current_dir: std::env::temp_dir(),
        };
        let err = WorkerUnit::connect(launch, &DeviceId::cpu()).await.unwrap_err();
        assert!(matches!(err, ToolchainError::Protocol(_)));
    }
}
