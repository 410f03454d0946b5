use std::path::PathBuf;

/// Errors locating or reading problem sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("level {level} has no problem {problem_id} (found {available})")]
    ProblemNotFound {
        level: u32,
        problem_id: u32,
        available: usize,
    },

    #[error("problem id mismatch: requested {requested} but file {} is problem {found}", path.display())]
    IdMismatch {
        requested: u32,
        found: u32,
        path: PathBuf,
    },
}

impl SourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            SourceError::NotFound(path)
        } else {
            SourceError::Io { path, source }
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
