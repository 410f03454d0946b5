//! Where kbench gets its programs: problem datasets, local files, and code
//! blocks extracted from model responses.

pub mod dataset;
pub mod error;
pub mod extract;
pub mod hash;

pub use dataset::{
    dataset_root, level_dir, list_problems, read_source, subset, Problem, ProblemEntry,
    ProblemSource, DATASET_ENV, PROBLEM_EXT,
};
pub use error::{Result, SourceError};
pub use extract::{extract_code_blocks, extract_first_code, extract_last_code};
pub use hash::code_hash;
