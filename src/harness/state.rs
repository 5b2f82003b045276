//! Persisted state reset

use std::io;
use std::path::Path;

use crate::common::{Error, Result};

/// Delete the state artifact at `path` so the next start sees a clean slate
///
/// A missing artifact is not an error. Directories are removed recursively,
/// since some services keep their state in one.
pub fn reset(path: &Path) -> Result<()> {
    let outcome = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Removed stale state");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No state to remove");
            Ok(())
        }
        Err(source) => Err(Error::ResetIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("libeufin-sandbox.sqlite3");
        std::fs::write(&db, b"stale").unwrap();

        reset(&db).unwrap();
        assert!(!db.exists());
    }

    #[test]
    fn test_reset_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("never-created.sqlite3");

        reset(&db).unwrap();
        reset(&db).unwrap();
        assert!(!db.exists());
    }

    #[test]
    fn test_reset_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        std::fs::create_dir_all(state.join("nested")).unwrap();
        std::fs::write(state.join("nested/data"), b"x").unwrap();

        reset(&state).unwrap();
        assert!(!state.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_reset_io_error_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        // Root ignores directory permissions, nothing to observe then
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        let db = locked.join("db.sqlite3");
        std::fs::write(&db, b"x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        let err = reset(&db).unwrap_err();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700)).unwrap();

        assert!(matches!(err, Error::ResetIo { .. }));
        assert_eq!(err.exit_code(), 77);
    }
}
