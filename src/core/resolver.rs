//! Store directory resolution.
//!
//! `ensure_directory` uses `symlink_metadata` (lstat) so each step looks at
//! exactly one link hop. Missing directories are created `0700`. A regular
//! file or device sitting where a directory should be is refused.

use crate::core::error::CommandError;
use crate::core::restriction::Identity;
use crate::core::store::StoreName;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

/// Hops followed before giving up with `ELOOP`, matching Linux `MAXSYMLINKS`.
const MAX_LINK_HOPS: usize = 40;

/// Make sure `path` is a directory, creating it or following symlinks as
/// needed. Returns the directory actually in use.
pub fn ensure_directory(path: &Path) -> Result<PathBuf, CommandError> {
    ensure_directory_hops(path, 0)
}

fn ensure_directory_hops(path: &Path, hops: usize) -> Result<PathBuf, CommandError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            DirBuilder::new()
                .mode(0o700)
                .create(path)
                .map_err(|e| CommandError::io(format!("create {}", path.display()), e))?;
            tracing::debug!("Created directory: {}", path.display());
            return Ok(path.to_path_buf());
        }
        Err(e) => return Err(CommandError::io(format!("stat {}", path.display()), e)),
    };

    let file_type = meta.file_type();
    if file_type.is_symlink() {
        if hops >= MAX_LINK_HOPS {
            return Err(CommandError::io(
                format!("follow {}", path.display()),
                io::Error::from_raw_os_error(libc::ELOOP),
            ));
        }
        let target = link_target(path)?;
        if let Err(e) = fs::symlink_metadata(&target) {
            if e.kind() == io::ErrorKind::NotFound {
                return Err(CommandError::DanglingLink(path.to_path_buf()));
            }
        }
        tracing::debug!("Following symlink: {} -> {}", path.display(), target.display());
        return ensure_directory_hops(&target, hops + 1);
    }

    if file_type.is_dir() {
        return Ok(path.to_path_buf());
    }

    Err(CommandError::NotADirectory(path.to_path_buf()))
}

/// One hop of link resolution. Relative targets are relative to the link's parent.
fn link_target(link: &Path) -> Result<PathBuf, CommandError> {
    let target = fs::read_link(link)
        .map_err(|e| CommandError::io(format!("readlink {}", link.display()), e))?;
    if target.is_absolute() {
        return Ok(target);
    }
    let parent = link.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent.join(target))
}

/// Resolve the directory holding `identity`'s stores, creating it under
/// `root` when needed. Without an identity the root itself is used.
pub fn resolve_store_directory(
    root: &Path,
    identity: Option<&Identity>,
) -> Result<PathBuf, CommandError> {
    if identity.is_some_and(Identity::is_empty) {
        return Err(CommandError::EmptyIdentity);
    }
    let root = ensure_directory(root)?;
    match identity {
        Some(identity) => ensure_directory(&root.join(identity.as_str())),
        None => Ok(root),
    }
}

/// `<dir>/<store>`. No I/O.
pub fn store_file_path(dir: &Path, store: StoreName) -> PathBuf {
    dir.join(store.as_str())
}

/// Reject store paths longer than `max_len` bytes.
pub fn check_path_len(path: &Path, max_len: usize) -> Result<(), CommandError> {
    let len = path.as_os_str().len();
    if len > max_len {
        return Err(CommandError::PathTooLong { len, max: max_len });
    }
    Ok(())
}
