//! Error types for toolchains and running models.

use crate::domain::TensorError;

/// Errors produced while building or loading a program.
///
/// `Compiler` and `Device` are attributed to the program under test;
/// every other variant is a harness or host problem.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("compilation failed: {0}")]
    Compiler(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toolchain timed out after {0} seconds")]
    Timeout(u64),

    #[error("module protocol error: {0}")]
    Protocol(String),

    #[error("corrupt artifact: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Other(String),
}

impl ToolchainError {
    /// Whether the error belongs to the program rather than the host.
    pub fn is_program_error(&self) -> bool {
        matches!(self, ToolchainError::Compiler(_) | ToolchainError::Device(_))
    }

    /// Classify compiler output: device errors surfaced at build time are
    /// still the program's fault.
    pub fn from_compiler_output(output: impl Into<String>) -> Self {
        let output = output.into();
        if output.contains("CUDA error") {
            ToolchainError::Device(output)
        } else {
            ToolchainError::Compiler(output)
        }
    }
}

impl From<serde_json::Error> for ToolchainError {
    fn from(err: serde_json::Error) -> Self {
        ToolchainError::Corrupt(err.to_string())
    }
}

/// Errors raised by an instantiated model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("kernel shape error: {0}")]
    Shape(String),

    #[error("expected {expected} inputs, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("expected {expected} init arguments, got {actual}")]
    InitArity { expected: usize, actual: usize },

    #[error("missing init argument: {0}")]
    MissingInit(String),

    #[error("unsupported device: {0}")]
    Device(String),

    #[error("invalid marker: {0}")]
    Marker(u64),

    #[error("worker error: {0}")]
    Worker(String),
}

impl From<TensorError> for ExecError {
    fn from(err: TensorError) -> Self {
        ExecError::Shape(err.to_string())
    }
}
