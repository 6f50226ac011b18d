//! fs-sandbox - Disposable Filesystem Work Areas
//!
//! Gives tests and scripts real directories to write into without touching
//! the working tree, and removes them again afterwards.
//!
//! # Features
//!
//! - **Isolated Directories**: every sandbox is `<root>/__sandboxes__/<uuid>`
//! - **Path Containment**: relative and absolute paths are checked to stay inside the sandbox
//! - **File Helpers**: write, append, read, touch and stat with parents created on demand
//! - **Scoped Execution**: run closures or commands with the sandbox as working directory
//! - **Cascading Cleanup**: empty containers and custom roots disappear with their last sandbox
//!
//! # Quick Start
//!
//! ```no_run
//! use fs_sandbox::SandboxEnvironment;
//!
//! # fn main() -> fs_sandbox::SandboxResult<()> {
//! let environment = SandboxEnvironment::new();
//! let sandbox = environment.create(None)?;
//!
//! sandbox.write_file("config/app.toml", "debug = true")?;
//! assert!(sandbox.file_exists("config/app.toml"));
//!
//! environment.destroy_all()?;
//! # Ok(())
//! # }
//! ```
//!
//! The process working directory is shared by every thread, so `run`,
//! `run_async` and `exec` calls must not overlap.

pub mod contents;
pub mod environment;
pub mod error;
pub mod paths;
pub mod process;
pub mod sandbox;
pub mod scoped;

// Re-export main types
pub use contents::Contents;
pub use environment::SandboxEnvironment;
pub use error::{SandboxError, SandboxResult};
pub use process::{ExecOptions, ProcessFailure, ProcessOutput};
pub use sandbox::{Sandbox, SandboxState, CONTAINER_NAME};
pub use scoped::WorkingDirGuard;
