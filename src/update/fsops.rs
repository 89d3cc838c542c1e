//! Filesystem helpers shared by the installer and the patcher.

use crate::config::RetryConfig;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Remove everything inside `dir`, creating it if it does not exist.
pub fn clear_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Run `op` up to `policy.attempts` times, sleeping `policy.delay` between
/// failures. Returns the last error together with the number of attempts made.
pub fn retry_io<T>(
    policy: &RetryConfig,
    what: &str,
    mut op: impl FnMut() -> io::Result<T>,
) -> Result<T, (u32, io::Error)> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err((attempt, e)),
            Err(e) => {
                tracing::debug!(what, attempt, error = %e, "retrying file operation");
                std::thread::sleep(policy.delay());
                attempt += 1;
            }
        }
    }
}

/// Move `src` to `dst`, creating `dst`'s parent directories.
///
/// Falls back to copy + delete when a rename is not possible (for example
/// across filesystems).
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) if src.is_file() => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                error = %rename_err,
                "rename failed; copying instead"
            );
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}

/// All regular files below `root`, as sorted paths relative to `root`.
///
/// Directories listed in `skip` (absolute paths) are not descended into.
pub fn walk_files(root: &Path, skip: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if !skip.iter().any(|s| s == &path) {
                    pending.push(path);
                }
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }
    out.sort();
    Ok(out)
}

/// `true` if `path` is relative and never climbs above its base.
pub fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Case-insensitive file-name membership test.
pub fn name_in(path: &Path, names: &[String]) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| names.iter().any(|x| x.eq_ignore_ascii_case(&n)))
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
