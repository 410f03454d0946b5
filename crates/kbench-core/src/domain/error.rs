//! Domain-level error taxonomy for kbench.

/// Errors produced when constructing tensors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TensorError {
    #[error("shape {shape:?} holds {expected} elements but data has {actual}")]
    ShapeDataMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("shape {shape:?} exceeds {limit} elements")]
    TooLarge { shape: Vec<usize>, limit: usize },
}

/// Harness configuration and plumbing errors.
///
/// These never describe a candidate verdict; candidate failures are data
/// (see [`crate::domain::result::FailureKind`]).
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("invalid architecture: {name}. Must be one of {valid}")]
    InvalidArch { name: String, valid: String },

    #[error("invalid evaluation request: {0}")]
    InvalidRequest(String),

    #[error("invalid device identifier: {0}")]
    InvalidDevice(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for kbench domain operations.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_arch_display_lists_valid_names() {
        let err = EvalError::InvalidArch {
            name: "Blackwellish".to_string(),
            valid: "Maxwell, Ada".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Blackwellish"));
        assert!(msg.contains("Maxwell, Ada"));
    }

    #[test]
    fn test_tensor_error_display() {
        let err = TensorError::ShapeDataMismatch {
            shape: vec![2, 3],
            expected: 6,
            actual: 4,
        };
        assert!(err.to_string().contains("[2, 3]"));
    }
}
