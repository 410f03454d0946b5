//! The module protocol spoken by out-of-process model workers.
//!
//! One JSON object per line. The harness writes [`ModuleRequest`]s to the
//! worker's stdin and reads exactly one [`ModuleResponse`] per request
//! from its stdout. Workers must log to stderr only.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::domain::{DeviceId, Tensor};
use crate::toolchain::{KernelModel, Marker, ModelSignature, RunnableUnit};

/// Environment variable carrying the device a worker should bind to.
pub const DEVICE_ENV: &str = "KBENCH_DEVICE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ModuleRequest {
    Describe,
    Init { args: Vec<f32>, seed: u64 },
    Forward { inputs: Vec<Tensor> },
    Mark,
    Sync,
    Elapsed { start: Marker, end: Marker },
    Shutdown,
}

impl ModuleRequest {
    pub fn op(&self) -> &'static str {
        match self {
            ModuleRequest::Describe => "describe",
            ModuleRequest::Init { .. } => "init",
            ModuleRequest::Forward { .. } => "forward",
            ModuleRequest::Mark => "mark",
            ModuleRequest::Sync => "sync",
            ModuleRequest::Elapsed { .. } => "elapsed",
            ModuleRequest::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ModuleResponse {
    Signature { signature: ModelSignature },
    Ok,
    Outputs { outputs: Vec<Tensor> },
    Marker { id: Marker },
    Elapsed { ms: f64 },
    Error { message: String },
}

/// Errors on the wire itself, as opposed to errors reported by the peer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("peer closed the stream")]
    Closed,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one newline-delimited JSON message. Blank lines are skipped.
pub async fn read_message<T, R>(reader: &mut R) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ProtocolError::Closed);
        }
        if !line.trim().is_empty() {
            return Ok(serde_json::from_str(line.trim())?);
        }
    }
}

/// Write one message followed by a newline and flush.
pub async fn write_message<T, W>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Serve `unit` over the module protocol until `shutdown` or end of input.
pub async fn serve<R, W>(
    unit: &dyn RunnableUnit,
    device: &DeviceId,
    mut reader: R,
    mut writer: W,
) -> Result<(), ProtocolError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut model: Option<Box<dyn KernelModel>> = None;
    loop {
        let request: ModuleRequest = match read_message(&mut reader).await {
            Ok(request) => request,
            Err(ProtocolError::Closed) => return Ok(()),
            Err(ProtocolError::Malformed(e)) => {
                let response = ModuleResponse::Error {
                    message: format!("malformed request: {e}"),
                };
                write_message(&mut writer, &response).await?;
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!(op = request.op(), "module request");

        if request == ModuleRequest::Shutdown {
            write_message(&mut writer, &ModuleResponse::Ok).await?;
            return Ok(());
        }
        let response = handle(unit, device, &mut model, request).await;
        write_message(&mut writer, &response).await?;
    }
}

async fn handle(
    unit: &dyn RunnableUnit,
    device: &DeviceId,
    model: &mut Option<Box<dyn KernelModel>>,
    request: ModuleRequest,
) -> ModuleResponse {
    let err = |e: &dyn std::fmt::Display| ModuleResponse::Error {
        message: e.to_string(),
    };
    match request {
        ModuleRequest::Describe => ModuleResponse::Signature {
            signature: unit.signature().clone(),
        },
        ModuleRequest::Init { args, seed } => match unit.instantiate(&args, seed, device).await {
            Ok(instance) => {
                *model = Some(instance);
                ModuleResponse::Ok
            }
            Err(e) => err(&e),
        },
        ModuleRequest::Shutdown => ModuleResponse::Ok,
        request => {
            let Some(model) = model.as_mut() else {
                return ModuleResponse::Error {
                    message: format!("`{}` before `init`", request.op()),
                };
            };
            let result = match request {
                ModuleRequest::Forward { inputs } => model
                    .forward(&inputs)
                    .await
                    .map(|outputs| ModuleResponse::Outputs { outputs }),
                ModuleRequest::Mark => model.mark().await.map(|id| ModuleResponse::Marker { id }),
                ModuleRequest::Sync => model.synchronize().await.map(|()| ModuleResponse::Ok),
                ModuleRequest::Elapsed { start, end } => model
                    .elapsed_ms(start, end)
                    .await
                    .map(|ms| ModuleResponse::Elapsed { ms }),
                _ => Ok(ModuleResponse::Ok),
            };
            result.unwrap_or_else(|e| err(&e))
        }
    }
}
