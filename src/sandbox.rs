use crate::contents::Contents;
use crate::environment::Registry;
use crate::error::{SandboxError, SandboxResult};
use crate::paths;
use crate::process::{self, ExecOptions, ProcessOutput};
use crate::scoped::WorkingDirGuard;
use chrono::{DateTime, Utc};
use std::fs::{self, Metadata, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::SystemTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use walkdir::WalkDir;

/// Fixed name of the folder that holds every sandbox under a root.
///
/// Anything found under `<root>/__sandboxes__` was made by this crate, so
/// external tooling may delete it when no test run is active.
pub const CONTAINER_NAME: &str = "__sandboxes__";

/// Lifecycle of a sandbox directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// The directory exists and may be used
    Live,
    /// The directory has been removed
    Destroyed,
}

#[derive(Debug)]
struct SandboxInner {
    id: String,
    path: PathBuf,
    container_path: PathBuf,
    root_hint: Option<PathBuf>,
    created_at: DateTime<Utc>,
    state: Mutex<SandboxState>,
    registry: Weak<Registry>,
}

/// An isolated scratch directory.
///
/// Handles are cheap to clone and all refer to the same directory. Create
/// them through [`SandboxEnvironment::create`](crate::SandboxEnvironment::create).
#[derive(Debug, Clone)]
pub struct Sandbox {
    inner: Arc<SandboxInner>,
}

impl Sandbox {
    /// Allocates `<root>/__sandboxes__/<uuid>` on disk.
    pub(crate) fn create_in(
        root: &Path,
        root_hint: Option<PathBuf>,
        registry: Weak<Registry>,
    ) -> SandboxResult<Self> {
        let id = Uuid::new_v4().to_string();
        let container_path = root.join(CONTAINER_NAME);
        let path = container_path.join(&id);
        create_sandbox_dir(&path)?;
        info!(path = %path.display(), "Created sandbox");

        Ok(Self {
            inner: Arc::new(SandboxInner {
                id,
                path,
                container_path,
                root_hint,
                created_at: Utc::now(),
                state: Mutex::new(SandboxState::Live),
                registry,
            }),
        })
    }

    /// Unique id, also the sandbox directory name.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The sandbox directory itself.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The shared `__sandboxes__` folder this sandbox lives in.
    pub fn container_path(&self) -> &Path {
        &self.inner.container_path
    }

    /// The root passed to `create`, if any.
    pub fn root_hint(&self) -> Option<&Path> {
        self.inner.root_hint.as_deref()
    }

    /// When the sandbox directory was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SandboxState {
        *self.lock_state()
    }

    /// Shorthand for `state() == SandboxState::Destroyed`.
    pub fn is_destroyed(&self) -> bool {
        self.state() == SandboxState::Destroyed
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SandboxState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the sandbox directory, then its container and custom root if
    /// they are left empty.
    ///
    /// Calling this again after success leaves the sandbox directory alone
    /// and only retries removing the parents if they are still empty.
    #[instrument(skip(self), fields(path = %self.inner.path.display()))]
    pub fn destroy(&self) -> SandboxResult<()> {
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.unregister(&self.inner.id);
        }

        let mut state = self.lock_state();
        if *state == SandboxState::Destroyed {
            debug!("Sandbox already destroyed");
        } else {
            remove_dir_all_if_present(&self.inner.path)?;
            *state = SandboxState::Destroyed;
            info!("Destroyed sandbox");
        }
        drop(state);

        remove_dir_if_empty(&self.inner.container_path)?;
        if let Some(root) = &self.inner.root_hint {
            remove_dir_if_empty(root)?;
        }
        Ok(())
    }

    /// Resolves `path` to an absolute location inside the sandbox.
    ///
    /// Relative paths are taken from the sandbox root. Absolute paths must
    /// already point inside it.
    pub fn full_path_for(&self, path: impl AsRef<Path>) -> SandboxResult<PathBuf> {
        paths::resolve::<&Path>(&self.inner.path, path.as_ref(), &[])
    }

    /// Like [`full_path_for`](Self::full_path_for), appending `parts` after
    /// resolving `path`.
    ///
    /// The result is lexically normalised, so it equals the stepwise
    /// `full_path_for(path)?.join(..)` form only when `parts` contain no `.`
    /// or `..` segments. Both name the same location either way.
    pub fn full_path_for_parts<P: AsRef<Path>>(
        &self,
        path: impl AsRef<Path>,
        parts: &[P],
    ) -> SandboxResult<PathBuf> {
        paths::resolve(&self.inner.path, path.as_ref(), parts)
    }

    /// Creates `name` and any missing parents; existing folders are fine.
    pub fn mkdir(&self, name: impl AsRef<Path>) -> SandboxResult<PathBuf> {
        let full_path = self.full_path_for(name)?;
        fs::create_dir_all(&full_path)?;
        debug!(path = %full_path.display(), "Created directory");
        Ok(full_path)
    }

    /// Writes `contents`, replacing any existing file and creating missing
    /// parent directories.
    pub fn write_file(
        &self,
        at: impl AsRef<Path>,
        contents: impl Into<Contents>,
    ) -> SandboxResult<PathBuf> {
        let full_path = self.full_path_for(at)?;
        let bytes = contents.into().into_bytes();
        write_contents(&full_path, &bytes, false).map_err(|source| SandboxError::Write {
            path: full_path.clone(),
            source,
        })?;
        debug!(path = %full_path.display(), bytes = bytes.len(), "Wrote file");
        Ok(full_path)
    }

    /// Appends `contents`, creating the file and its parents when absent.
    pub fn append_file(
        &self,
        at: impl AsRef<Path>,
        contents: impl Into<Contents>,
    ) -> SandboxResult<PathBuf> {
        let full_path = self.full_path_for(at)?;
        let bytes = contents.into().into_bytes();
        write_contents(&full_path, &bytes, true).map_err(|source| SandboxError::Append {
            path: full_path.clone(),
            source,
        })?;
        debug!(path = %full_path.display(), bytes = bytes.len(), "Appended to file");
        Ok(full_path)
    }

    /// Reads a UTF-8 file.
    pub fn read_text_file(&self, at: impl AsRef<Path>) -> SandboxResult<String> {
        Ok(fs::read_to_string(self.full_path_for(at)?)?)
    }

    /// Reads raw bytes.
    pub fn read_file(&self, at: impl AsRef<Path>) -> SandboxResult<Vec<u8>> {
        Ok(fs::read(self.full_path_for(at)?)?)
    }

    /// Creates an empty file if needed and bumps its modification time.
    /// Existing content is left untouched.
    pub fn touch(&self, at: impl AsRef<Path>) -> SandboxResult<PathBuf> {
        let full_path = self.full_path_for(at)?;
        touch_file(&full_path).map_err(|source| SandboxError::Write {
            path: full_path.clone(),
            source,
        })?;
        Ok(full_path)
    }

    /// Metadata for `at`, or `None` if it is missing or cannot be read.
    pub fn stat(&self, at: impl AsRef<Path>) -> Option<Metadata> {
        let full_path = self.full_path_for(at).ok()?;
        fs::metadata(full_path).ok()
    }

    /// True when `at` is a regular file.
    pub fn file_exists(&self, at: impl AsRef<Path>) -> bool {
        self.stat(at).is_some_and(|st| st.is_file())
    }

    /// True when `at` is a directory.
    pub fn folder_exists(&self, at: impl AsRef<Path>) -> bool {
        self.stat(at).is_some_and(|st| st.is_dir())
    }

    /// Files below `relative`, as sandbox-relative paths in name order.
    pub fn list_files(&self, relative: impl AsRef<Path>) -> SandboxResult<Vec<PathBuf>> {
        let start = self.full_path_for(relative)?;
        let mut files = Vec::new();
        for entry in WalkDir::new(&start).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.inner.path) {
                files.push(relative.to_path_buf());
            }
        }
        Ok(files)
    }

    fn run_target(&self, relative: Option<&Path>) -> SandboxResult<PathBuf> {
        match relative {
            Some(relative) => self.full_path_for(relative),
            None => Ok(self.inner.path.clone()),
        }
    }

    /// Calls `action` with the process working directory set to the sandbox
    /// (or `relative` inside it), restoring the previous directory afterwards,
    /// even if `action` panics.
    ///
    /// The working directory is process-wide: do not overlap `run` calls.
    pub fn run<T, F>(&self, action: F, relative: Option<&Path>) -> SandboxResult<T>
    where
        F: FnOnce() -> T,
    {
        let target = self.run_target(relative)?;
        let _guard = WorkingDirGuard::enter(&target)?;
        Ok(action())
    }

    /// Async counterpart of [`run`](Self::run); the directory stays switched
    /// until the future completes or is dropped.
    pub async fn run_async<T, F, Fut>(&self, action: F, relative: Option<&Path>) -> SandboxResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let target = self.run_target(relative)?;
        let _guard = WorkingDirGuard::enter(&target)?;
        Ok(action().await)
    }

    /// Runs `command` inside the sandbox and collects its output.
    ///
    /// A non-zero exit yields [`SandboxError::ProcessFailed`]; a command that
    /// cannot be started yields [`SandboxError::Spawn`].
    #[instrument(skip(self, args, options), fields(sandbox = %self.inner.id))]
    pub async fn exec<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
        options: ExecOptions,
    ) -> SandboxResult<ProcessOutput> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let relative = options.relative_dir.clone();
        self.run_async(
            || process::spawn_and_collect(command, &args, &options),
            relative.as_deref(),
        )
        .await?
    }
}

/// A sibling's destroy can remove the (momentarily empty) container between
/// creating it and creating the sandbox inside it, so `NotFound` is retried.
fn create_sandbox_dir(path: &Path) -> io::Result<()> {
    const ATTEMPTS: usize = 3;
    let mut attempt = 1;
    loop {
        match fs::create_dir_all(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempt < ATTEMPTS => {
                debug!(path = %path.display(), attempt, "Container vanished during create");
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn write_contents(full_path: &Path, bytes: &[u8], append: bool) -> io::Result<()> {
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if append {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(full_path)?
            .write_all(bytes)
    } else {
        fs::write(full_path, bytes)
    }
}

fn touch_file(full_path: &Path) -> io::Result<()> {
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(full_path)?;
    file.set_modified(SystemTime::now())
}

/// `rm -rf` that treats a missing path as success.
pub(crate) fn remove_dir_all_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Removes `path` only if it is an empty directory.
///
/// A directory that gains an entry between the check and the removal is
/// left in place.
pub(crate) fn remove_dir_if_empty(path: &Path) -> io::Result<()> {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if entries.next().is_some() {
        return Ok(());
    }
    match fs::remove_dir(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed empty directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if has_entries(path) => {
            debug!(path = %path.display(), error = %e, "Directory refilled before removal");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn has_entries(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some())
}
