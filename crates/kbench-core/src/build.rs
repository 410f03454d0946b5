//! Content-addressed build cache.
//!
//! Layout: `<root>/<sha256 of source>/` holding the toolchain's output plus
//! an `artifact.json` manifest. A directory without a manifest is an
//! interrupted build and is rebuilt. Builds run in a `.staging-*`
//! directory under the root and are renamed into place once complete.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::digest::Digest;
use crate::domain::{FailureKind, GpuArch};
use crate::metrics::METRICS;
use crate::obs;
use crate::toolchain::{BuildOptions, RunnableUnit, Toolchain, ToolchainError};

pub const MANIFEST_FILE: &str = "artifact.json";

/// Written last; its presence marks a complete artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub digest: Digest,
    pub toolchain: String,
    pub arch: Vec<GpuArch>,
    pub created_at: DateTime<Utc>,
}

/// A built and loaded program.
pub struct LoadedArtifact {
    pub digest: Digest,
    pub path: PathBuf,
    pub unit: Arc<dyn RunnableUnit>,
    pub cache_hit: bool,
    /// Keeps an uncached build directory alive until the artifact drops.
    _scratch: Option<TempDir>,
}

impl fmt::Debug for LoadedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedArtifact")
            .field("digest", &self.digest)
            .field("path", &self.path)
            .field("cache_hit", &self.cache_hit)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildFailure {
    pub digest: Digest,
    pub message: String,
}

/// Result of a build. Errors never cross this boundary as `Err`.
#[derive(Debug)]
pub enum BuildOutcome {
    Built(LoadedArtifact),
    /// The toolchain rejected the program.
    CompileFailure(BuildFailure),
    /// Anything else went wrong.
    InfraFailure(BuildFailure),
}

impl BuildOutcome {
    fn from_result(digest: Digest, result: Result<LoadedArtifact, ToolchainError>) -> Self {
        match result {
            Ok(artifact) => BuildOutcome::Built(artifact),
            Err(err) => {
                let failure = BuildFailure {
                    digest,
                    message: err.to_string(),
                };
                if err.is_program_error() {
                    METRICS.inc_compile_failures();
                    obs::emit_build_failed(&digest.short(), FailureKind::CompileFailure, &failure.message);
                    BuildOutcome::CompileFailure(failure)
                } else {
                    obs::emit_build_failed(&digest.short(), FailureKind::InfraFailure, &failure.message);
                    BuildOutcome::InfraFailure(failure)
                }
            }
        }
    }

    pub fn artifact(&self) -> Option<&LoadedArtifact> {
        match self {
            BuildOutcome::Built(artifact) => Some(artifact),
            _ => None,
        }
    }
}

/// Build cache rooted at one directory, bound to one toolchain.
#[derive(Clone)]
pub struct BuildCache {
    root: PathBuf,
    toolchain: Arc<dyn Toolchain>,
}

impl BuildCache {
    pub fn new(root: impl Into<PathBuf>, toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            root: root.into(),
            toolchain,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.to_hex())
    }

    /// Whether a complete artifact exists for `digest`.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.artifact_dir(digest).join(MANIFEST_FILE).is_file()
    }

    /// Delete the artifact for `digest`. Returns whether anything was removed.
    pub async fn evict(&self, digest: &Digest) -> io::Result<bool> {
        remove_dir_if_exists(&self.artifact_dir(digest)).await
    }

    /// Build `source` (or reuse its cached artifact) and load it.
    pub async fn build_and_load(
        &self,
        source: &str,
        force_rebuild: bool,
        options: &BuildOptions,
    ) -> BuildOutcome {
        let digest = Digest::of_source(source);
        let result = self.try_build_and_load(digest, source, force_rebuild, options).await;
        BuildOutcome::from_result(digest, result)
    }

    async fn try_build_and_load(
        &self,
        digest: Digest,
        source: &str,
        force_rebuild: bool,
        options: &BuildOptions,
    ) -> Result<LoadedArtifact, ToolchainError> {
        let start = Instant::now();
        let dir = self.artifact_dir(&digest);

        if force_rebuild && self.evict(&digest).await? {
            debug!(digest = %digest.short(), "cached artifact evicted");
        }

        let stale = match self.read_manifest(&dir).await? {
            Some(manifest)
                if manifest.toolchain == self.toolchain.name() && manifest.arch == options.arch =>
            {
                let unit = self.toolchain.load(&dir, options).await?;
                METRICS.inc_cache_hits();
                obs::emit_build_finished(&digest.short(), true, start.elapsed().as_millis() as u64);
                return Ok(LoadedArtifact {
                    digest,
                    path: dir,
                    unit,
                    cache_hit: true,
                    _scratch: None,
                });
            }
            Some(manifest) => {
                warn!(
                    digest = %digest.short(),
                    cached_toolchain = %manifest.toolchain,
                    "cached artifact built with different settings, rebuilding"
                );
                true
            }
            // A directory without a manifest is an interrupted build.
            None => tokio::fs::metadata(&dir).await.is_ok(),
        };
        if stale {
            remove_dir_if_exists(&dir).await?;
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;
        self.build_into(digest, source, staging.path(), options).await?;

        if let Err(err) = tokio::fs::rename(staging.path(), &dir).await {
            // Lost a race with a concurrent build of the same source.
            if !matches!(self.read_manifest(&dir).await, Ok(Some(_))) {
                return Err(err.into());
            }
            debug!(digest = %digest.short(), "artifact already published, using existing");
        }
        drop(staging);

        let unit = self.toolchain.load(&dir, options).await?;
        obs::emit_build_finished(&digest.short(), false, start.elapsed().as_millis() as u64);
        Ok(LoadedArtifact {
            digest,
            path: dir,
            unit,
            cache_hit: false,
            _scratch: None,
        })
    }

    async fn build_into(
        &self,
        digest: Digest,
        source: &str,
        dir: &Path,
        options: &BuildOptions,
    ) -> Result<(), ToolchainError> {
        build_with(self.toolchain.as_ref(), digest, source, dir, options).await
    }

    /// `Ok(None)` when no manifest exists; a manifest that does not parse is
    /// an error rather than a reason to rebuild.
    async fn read_manifest(&self, dir: &Path) -> Result<Option<ArtifactManifest>, ToolchainError> {
        let bytes = match tokio::fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            ToolchainError::Corrupt(format!("{}: {err}", dir.join(MANIFEST_FILE).display()))
        })
    }
}

async fn build_with(
    toolchain: &dyn Toolchain,
    digest: Digest,
    source: &str,
    dir: &Path,
    options: &BuildOptions,
) -> Result<(), ToolchainError> {
    METRICS.inc_builds();
    toolchain.build(source, dir, options).await?;
    let manifest = ArtifactManifest {
        digest,
        toolchain: toolchain.name().to_string(),
        arch: options.arch.clone(),
        created_at: Utc::now(),
    };
    tokio::fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?).await?;
    Ok(())
}

/// Build into a throwaway directory that lives as long as the artifact.
pub async fn build_uncached(
    toolchain: &dyn Toolchain,
    source: &str,
    options: &BuildOptions,
) -> BuildOutcome {
    let digest = Digest::of_source(source);
    let result = async {
        let start = Instant::now();
        let scratch = tempfile::Builder::new().prefix("kbench-").tempdir()?;
        build_with(toolchain, digest, source, scratch.path(), options).await?;
        let unit = toolchain.load(scratch.path(), options).await?;
        obs::emit_build_finished(&digest.short(), false, start.elapsed().as_millis() as u64);
        Ok::<_, ToolchainError>(LoadedArtifact {
            digest,
            path: scratch.path().to_path_buf(),
            unit,
            cache_hit: false,
            _scratch: Some(scratch),
        })
    }
    .await;
    BuildOutcome::from_result(digest, result)
}

async fn remove_dir_if_exists(dir: &Path) -> io::Result<bool> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
