//! Lexical path resolution and the sandbox containment check.
//!
//! Nothing in here touches the disk. Symlinks are not resolved, so a link
//! inside a sandbox that points elsewhere will pass the check; this guards
//! against mistakes in test code, not against hostile input.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{SandboxError, SandboxResult};

/// Folds `.` and `..` components without consulting the filesystem.
///
/// A `..` that would climb above the root (or above the start of a relative
/// path) is kept, so the result still reports that it escapes.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().map(|c| c.as_os_str()).collect()
}

/// Checks that `candidate` lies within `root` (or is `root` itself).
pub fn ensure_inside(root: &Path, candidate: &Path) -> SandboxResult<PathBuf> {
    let normalized = normalize(candidate);
    if normalized.starts_with(root) {
        Ok(normalized)
    } else {
        debug!(
            path = %candidate.display(),
            root = %root.display(),
            "Rejected path outside sandbox"
        );
        Err(SandboxError::OutsideSandbox {
            path: candidate.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

/// Resolves `path` against `root`, appends `extra` segments and validates the
/// result.
///
/// Absolute input is accepted only when it already lies under `root`, which
/// lets callers feed a path obtained from a previous resolution back in.
pub fn resolve<P: AsRef<Path>>(root: &Path, path: &Path, extra: &[P]) -> SandboxResult<PathBuf> {
    let base = if path.is_absolute() {
        ensure_inside(root, path)?
    } else {
        root.join(path)
    };
    let joined = extra
        .iter()
        .fold(base, |acc, part| acc.join(part.as_ref()));
    ensure_inside(root, &joined)
}
