//! The directory tree holding every volume.

use std::{
    fs::{self, DirBuilder, Permissions},
    io,
    os::unix::fs::{DirBuilderExt, PermissionsExt},
    path::{Path, PathBuf},
};

use nix::unistd::chown;

use crate::{types::VolumeId, Owner};

/// A base directory with one subdirectory per volume.
///
/// Holds no state of its own; the filesystem is the source of truth for
/// which volumes exist.
#[derive(Clone, Debug)]
pub struct LocalPathStore {
    base: PathBuf,
    mode: u32,
    owner: Option<Owner>,
}

impl LocalPathStore {
    pub fn new(base: impl Into<PathBuf>, mode: u32, owner: Option<Owner>) -> Self {
        Self {
            base: base.into(),
            mode,
            owner,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory that backs the specified volume
    pub fn path_for(&self, id: &VolumeId) -> PathBuf {
        self.base.join(id.as_str())
    }

    pub fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    /// Create `path` and any missing parents.
    ///
    /// Fails with [io::ErrorKind::AlreadyExists] if `path` itself is already
    /// present, even if it appeared after a previous existence check. On any
    /// other failure `path` is left absent, so the call can be retried.
    pub fn create(&self, path: &Path) -> io::Result<()> {
        self.create_then(path, |path| self.prepare(path))
    }

    fn create_then<F>(&self, path: &Path, prepare: F) -> io::Result<()>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        if let Some(parent) = path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(self.mode)
                .create(parent)?;
        }

        DirBuilder::new().mode(self.mode).create(path)?;

        if let Err(err) = prepare(path) {
            // A leftover directory would turn every retry into a conflict
            if let Err(cleanup) = fs::remove_dir(path) {
                log::warn!(
                    "could not remove half-created volume directory `{}`: {}",
                    path.to_string_lossy(),
                    cleanup
                );
            }
            return Err(err);
        }

        Ok(())
    }

    /// Apply mode and ownership to a freshly created volume directory
    fn prepare(&self, path: &Path) -> io::Result<()> {
        // The mode passed to mkdir is filtered through the umask
        fs::set_permissions(path, Permissions::from_mode(self.mode))?;

        if let Some(owner) = &self.owner {
            let (uid, gid) = owner.get_owner_pair();
            chown(path, Some(uid), Some(gid)).map_err(io::Error::from)?;
        }

        Ok(())
    }

    /// Remove whatever lives at `path`, including everything below it
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}
