//! Domain models for kbench.
//!
//! Canonical definitions for the core entities:
//! - `EvaluationRequest`: one candidate/reference pair plus run settings
//! - `EvaluationResult`: the terminal verdict for a candidate
//! - `Tensor`: values exchanged with models
//! - `GpuArch` / `DeviceId`: build targets and execution devices

pub mod arch;
pub mod error;
pub mod request;
pub mod result;
pub mod tensor;

pub use arch::{arch_list_string, parse_arch_list, DeviceId, GpuArch};
pub use error::{EvalError, Result, TensorError};
pub use request::{EvaluationRequest, Tolerance};
pub use result::{EvaluationResult, FailureKind, Metadata};
pub use tensor::Tensor;
