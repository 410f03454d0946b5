//! Problem datasets laid out as `<root>/level<N>/<id>_<Name>.kbs`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::SeedableRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SourceError};

/// Overrides the dataset root.
pub const DATASET_ENV: &str = "KBENCH_DATASET_PATH";

/// Extension of problem files.
pub const PROBLEM_EXT: &str = "kbs";

/// Dataset root: `$KBENCH_DATASET_PATH`, else `./dataset`.
pub fn dataset_root() -> PathBuf {
    std::env::var_os(DATASET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("dataset"))
}

pub fn level_dir(root: &Path, level: u32) -> PathBuf {
    root.join(format!("level{level}"))
}

fn file_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(&format!(r"^(\d+)_(.+)\.{PROBLEM_EXT}$")).ok())
        .as_ref()
}

/// A problem file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemEntry {
    pub id: u32,
    pub name: String,
    pub path: PathBuf,
}

impl ProblemEntry {
    /// Parse `<id>_<Name>.kbs`; anything else is not a problem file.
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let caps = file_name_pattern()?.captures(file_name)?;
        Some(Self {
            id: caps[1].parse().ok()?,
            name: caps[2].to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// Every problem in `dir`, sorted by numeric prefix.
pub fn list_problems(dir: &Path) -> Result<Vec<ProblemEntry>> {
    let entries = std::fs::read_dir(dir).map_err(|e| SourceError::io(dir, e))?;
    let mut problems = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SourceError::io(dir, e))?;
        if let Some(problem) = ProblemEntry::from_path(&entry.path()) {
            problems.push(problem);
        }
    }
    problems.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
    debug!(dir = %dir.display(), count = problems.len(), "listed problems");
    Ok(problems)
}

/// A deterministic random subset of `n` problems, sorted by id.
pub fn subset(level_dir: &Path, n: usize, seed: u64) -> Result<Vec<ProblemEntry>> {
    let all = list_problems(level_dir)?;
    let n = n.min(all.len());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked: Vec<ProblemEntry> = rand::seq::index::sample(&mut rng, all.len(), n)
        .into_iter()
        .map(|i| all[i].clone())
        .collect();
    picked.sort_by_key(|p| p.id);
    Ok(picked)
}

/// Read a source file; a missing file is [`SourceError::NotFound`].
pub fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| SourceError::io(path, e))
}

/// A fetched problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Numeric id, when the file name carries one.
    pub id: Option<u32>,
    pub name: String,
    pub path: PathBuf,
    pub source: String,
}

/// Where a reference program comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProblemSource {
    Local { path: PathBuf },
    /// Problem ids are 1-based positions in the sorted level directory.
    Dataset {
        root: PathBuf,
        level: u32,
        problem_id: u32,
    },
}

impl ProblemSource {
    pub fn fetch(&self) -> Result<Problem> {
        match self {
            ProblemSource::Local { path } => {
                let source = read_source(path)?;
                let entry = ProblemEntry::from_path(path);
                let name = match &entry {
                    Some(entry) => entry.name.clone(),
                    None => path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                };
                Ok(Problem {
                    id: entry.map(|e| e.id),
                    name,
                    path: path.clone(),
                    source,
                })
            }
            ProblemSource::Dataset {
                root,
                level,
                problem_id,
            } => {
                let problems = list_problems(&level_dir(root, *level))?;
                let entry = (*problem_id as usize)
                    .checked_sub(1)
                    .and_then(|i| problems.get(i))
                    .ok_or(SourceError::ProblemNotFound {
                        level: *level,
                        problem_id: *problem_id,
                        available: problems.len(),
                    })?;
                if entry.id != *problem_id {
                    return Err(SourceError::IdMismatch {
                        requested: *problem_id,
                        found: entry.id,
                        path: entry.path.clone(),
                    });
                }
                Ok(Problem {
                    id: Some(entry.id),
                    name: entry.name.clone(),
                    path: entry.path.clone(),
                    source: read_source(&entry.path)?,
                })
            }
        }
    }
}
