//! Checkpoint resolution
//!
//! Maps a restore mode (`latest`, `fresh`, or an explicit path) to the GGUF
//! file the model is loaded from.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use super::pretrained::pretrained_weights;
use crate::error::EvalError;
type Result<T> = crate::error::Result<T>;

/// Where to restore model weights from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreFrom {
    /// Newest checkpoint of the current run, falling back to [`RestoreFrom::Fresh`]
    Latest,
    /// Pretrained weights of the configured registry model
    Fresh,
    /// A GGUF file, or a directory whose newest GGUF is used
    Path(PathBuf),
}

impl FromStr for RestoreFrom {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "latest" => RestoreFrom::Latest,
            "fresh" => RestoreFrom::Fresh,
            other => RestoreFrom::Path(PathBuf::from(other)),
        })
    }
}

impl fmt::Display for RestoreFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreFrom::Latest => f.write_str("latest"),
            RestoreFrom::Fresh => f.write_str("fresh"),
            RestoreFrom::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Resolve a checkpoint, downloading `model_name` from the registry for fresh weights.
pub fn resolve_checkpoint(
    restore: &RestoreFrom,
    checkpoint_dir: &Path,
    run_name: &str,
    model_name: &str,
) -> Result<PathBuf> {
    resolve_checkpoint_with(restore, checkpoint_dir, run_name, || {
        pretrained_weights(model_name)
    })
}

/// Resolve a checkpoint with a caller-supplied source of fresh weights.
pub fn resolve_checkpoint_with<F>(
    restore: &RestoreFrom,
    checkpoint_dir: &Path,
    run_name: &str,
    fresh: F,
) -> Result<PathBuf>
where
    F: FnOnce() -> Result<PathBuf>,
{
    let path = match restore {
        RestoreFrom::Latest => {
            let run_dir = checkpoint_dir.join(run_name);
            match latest_gguf(&run_dir)? {
                Some(path) => path,
                None => {
                    tracing::info!(
                        "No checkpoint in {:?}, using fresh pretrained weights",
                        run_dir
                    );
                    fresh()?
                }
            }
        }
        RestoreFrom::Fresh => fresh()?,
        RestoreFrom::Path(path) if path.is_file() => path.clone(),
        RestoreFrom::Path(path) if path.is_dir() => latest_gguf(path)?
            .ok_or_else(|| EvalError::CheckpointNotFound(path.display().to_string()))?,
        RestoreFrom::Path(path) => {
            return Err(EvalError::CheckpointNotFound(path.display().to_string()));
        }
    };
    tracing::info!("Loading checkpoint {:?}", path);
    Ok(path)
}

/// Newest `*.gguf` file in `dir` by modification time (ties broken by name).
///
/// Returns `None` when the directory does not exist or holds no GGUF files.
pub fn latest_gguf(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let entries = std::fs::read_dir(dir).map_err(|e| EvalError::io(dir, e))?;

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| EvalError::io(dir, e))?;
        let path = entry.path();
        let is_gguf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"));
        if !is_gguf || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| EvalError::io(&path, e))?;
        let candidate = (modified, path);
        if best.as_ref().is_none_or(|b| candidate > *b) {
            best = Some(candidate);
        }
    }
    Ok(best.map(|(_, path)| path))
}
