use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::process::ProcessFailure;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("{} is not inside sandbox at {}", path.display(), root.display())]
    OutsideSandbox { path: PathBuf, root: PathBuf },

    #[error("Unable to write file at {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to append to file at {}: {source}", path.display())]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    ProcessFailed(Box<ProcessFailure>),

    #[error("Failed to destroy {} sandbox(es): {}", failures.len(), summarize(failures))]
    Teardown { failures: Vec<(PathBuf, SandboxError)> },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl SandboxError {
    /// True when the underlying cause is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        match self {
            SandboxError::IoError(e)
            | SandboxError::Write { source: e, .. }
            | SandboxError::Append { source: e, .. }
            | SandboxError::Spawn { source: e, .. } => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// The captured process output, when a command ran but exited unsuccessfully.
    pub fn process_failure(&self) -> Option<&ProcessFailure> {
        match self {
            SandboxError::ProcessFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

fn summarize(failures: &[(PathBuf, SandboxError)]) -> String {
    failures
        .iter()
        .map(|(path, e)| format!("{} ({})", path.display(), e))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type SandboxResult<T> = Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_sandbox_names_both_paths() {
        let err = SandboxError::OutsideSandbox {
            path: PathBuf::from("/etc/passwd"),
            root: PathBuf::from("/tmp/__sandboxes__/abc"),
        };
        let message = err.to_string();
        assert!(message.contains("/etc/passwd"));
        assert!(message.contains("/tmp/__sandboxes__/abc"));
        assert!(message.contains("not inside sandbox"));
    }

    #[test]
    fn write_error_wraps_cause_and_path() {
        let err = SandboxError::Write {
            path: PathBuf::from("some/file.txt"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Unable to write file at some/file.txt: denied");
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected_through_io_variant() {
        let err = SandboxError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
        assert!(err.process_failure().is_none());
    }

    #[test]
    fn teardown_lists_every_failure() {
        let err = SandboxError::Teardown {
            failures: vec![
                (
                    PathBuf::from("/a"),
                    io::Error::new(io::ErrorKind::PermissionDenied, "locked").into(),
                ),
                (
                    PathBuf::from("/b"),
                    io::Error::new(io::ErrorKind::Other, "busy").into(),
                ),
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("Failed to destroy 2 sandbox(es)"));
        assert!(message.contains("/a (IO error: locked)"));
        assert!(message.contains("/b (IO error: busy)"));
    }
}
