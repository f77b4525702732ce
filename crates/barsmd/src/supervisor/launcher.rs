//! Discovering launchable items and starting or stopping OS processes.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::fs;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Lists launchable items in `dir`: regular files, one level deep,
/// no dotfiles, sorted by name.
pub async fn discover(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut items = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            debug!(item = %name, "Skipping hidden entry");
            continue;
        }
        match fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_file() => items.push(name),
            Ok(_) => debug!(item = %name, "Skipping non-file entry"),
            Err(e) => warn!(item = %name, error = %e, "Cannot stat entry, skipping"),
        }
    }

    items.sort();
    Ok(items)
}

/// Starts `path` with its own directory as working directory.
pub fn spawn(path: &Path) -> io::Result<Child> {
    let workdir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"));
    Command::new(path)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .spawn()
}

/// Sends SIGTERM to `pid`.
pub fn terminate(pid: u32) -> io::Result<()> {
    let raw = i32::try_from(pid).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Returns true if a process with `pid` exists.
pub fn is_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(raw, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    #[tokio::test]
    async fn test_discover_skips_hidden_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        stdfs::write(dir.path().join("zeta"), "").unwrap();
        stdfs::write(dir.path().join("alpha"), "").unwrap();
        stdfs::write(dir.path().join(".hidden"), "").unwrap();
        stdfs::create_dir(dir.path().join("subdir")).unwrap();

        assert_eq!(discover(dir.path()).await.unwrap(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_discover_missing_dir_fails() {
        assert!(discover(Path::new("/nonexistent/barsm")).await.is_err());
    }

    #[tokio::test]
    async fn test_spawn_non_executable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        stdfs::write(&path, "not a program").unwrap();
        assert!(spawn(&path).is_err());
    }

    #[test]
    fn test_current_process_is_running() {
        assert!(is_running(std::process::id()));
    }
}
