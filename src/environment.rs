//! Shared state for a family of sandboxes: the default root they are created
//! under and the list of those still alive.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::error::{SandboxError, SandboxResult};
use crate::paths;
use crate::sandbox::{remove_dir_all_if_present, Sandbox, CONTAINER_NAME};

/// Insertion-ordered list of live sandboxes.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    live: Mutex<Vec<Sandbox>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Vec<Sandbox>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, sandbox: Sandbox) {
        self.lock().push(sandbox);
    }

    /// Returns false when `id` was not registered.
    pub(crate) fn unregister(&self, id: &str) -> bool {
        let mut live = self.lock();
        match live.iter().position(|s| s.id() == id) {
            Some(index) => {
                live.remove(index);
                true
            }
            None => false,
        }
    }

    fn drain(&self) -> Vec<Sandbox> {
        std::mem::take(&mut *self.lock())
    }

    fn snapshot(&self) -> Vec<Sandbox> {
        self.lock().clone()
    }
}

/// Creates sandboxes and tears them down in bulk.
///
/// Clones share the same default root and registry, so one environment can
/// be built per test run and handed to whichever code needs it.
#[derive(Debug, Clone)]
pub struct SandboxEnvironment {
    base_target: Arc<RwLock<PathBuf>>,
    registry: Arc<Registry>,
}

impl SandboxEnvironment {
    /// An environment rooted at the system temp directory.
    pub fn new() -> Self {
        Self {
            base_target: Arc::new(RwLock::new(env::temp_dir())),
            registry: Arc::new(Registry::default()),
        }
    }

    /// An environment rooted at `base`, which is created if missing.
    pub fn with_base_target(base: impl AsRef<Path>) -> SandboxResult<Self> {
        let environment = Self::new();
        environment.set_base_target(base)?;
        Ok(environment)
    }

    /// The default root for sandboxes created without a hint.
    pub fn base_target(&self) -> PathBuf {
        self.base_target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Where sandboxes without an explicit root end up.
    pub fn container_path(&self) -> PathBuf {
        self.base_target().join(CONTAINER_NAME)
    }

    /// Changes the default root for sandboxes created from now on.
    #[instrument(skip(self, to), fields(to = %to.as_ref().display()))]
    pub fn set_base_target(&self, to: impl AsRef<Path>) -> SandboxResult<()> {
        let to = absolute(to.as_ref())?;
        if !to.is_dir() {
            fs::create_dir_all(&to)?;
        }
        *self
            .base_target
            .write()
            .unwrap_or_else(PoisonError::into_inner) = to;
        info!("Base target updated");
        Ok(())
    }

    /// Uses the process working directory as the default root.
    pub fn set_base_target_to_current_dir(&self) -> SandboxResult<()> {
        self.set_base_target(env::current_dir()?)
    }

    /// Goes back to the system temp directory as the default root.
    pub fn set_base_target_to_temp_dir(&self) -> SandboxResult<()> {
        self.set_base_target(env::temp_dir())
    }

    /// Creates a sandbox under `root_hint`, or under the default root.
    ///
    /// A custom root is removed again by the last sandbox destroyed under
    /// it, provided nothing else was put there.
    #[instrument(skip(self))]
    pub fn create(&self, root_hint: Option<&Path>) -> SandboxResult<Sandbox> {
        let root_hint = root_hint.map(absolute).transpose()?;
        let root = match &root_hint {
            Some(hint) => hint.clone(),
            None => self.base_target(),
        };
        let sandbox = Sandbox::create_in(&root, root_hint, Arc::downgrade(&self.registry))?;
        self.registry.register(sandbox.clone());
        Ok(sandbox)
    }

    /// Number of sandboxes created here and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Sandboxes created here and not yet destroyed, oldest first.
    pub fn live(&self) -> Vec<Sandbox> {
        self.registry.snapshot()
    }

    /// Destroys every live sandbox.
    ///
    /// The registry is emptied up front. Every sandbox is attempted even if
    /// some fail; the failures are reported together.
    #[instrument(skip(self))]
    pub fn destroy_all(&self) -> SandboxResult<()> {
        let drained = self.registry.drain();
        debug!(count = drained.len(), "Destroying all sandboxes");

        let mut failures = Vec::new();
        for sandbox in drained {
            if let Err(e) = sandbox.destroy() {
                warn!(path = %sandbox.path().display(), error = %e, "Failed to destroy sandbox");
                failures.push((sandbox.path().to_path_buf(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::Teardown { failures })
        }
    }

    /// Deletes the default container outright, including sandboxes left
    /// behind by earlier runs. Sandboxes under custom roots are not reached.
    #[instrument(skip(self))]
    pub fn destroy_any(&self) -> SandboxResult<()> {
        let container = self.container_path();
        remove_dir_all_if_present(&container)?;
        info!(container = %container.display(), "Removed sandbox container");
        Ok(())
    }

    /// Sandbox directories currently present under the default container.
    pub fn orphans(&self) -> SandboxResult<Vec<PathBuf>> {
        self.orphans_at(self.base_target())
    }

    /// Sandbox directories currently present under `<root>/__sandboxes__`.
    pub fn orphans_at(&self, root: impl AsRef<Path>) -> SandboxResult<Vec<PathBuf>> {
        let container = absolute(root.as_ref())?.join(CONTAINER_NAME);
        let entries = match fs::read_dir(container) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

impl Default for SandboxEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(paths::normalize(path))
    } else {
        Ok(paths::normalize(&env::current_dir()?.join(path)))
    }
}
