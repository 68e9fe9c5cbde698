//! Small filesystem helpers used around server runs.

use crate::error::{BenchError, Result};
use std::io::Write;
use std::path::Path;

/// Replace every line starting with `prefix` by `new_line`.
///
/// If no line matches, `new_line` is appended. A missing file is created. The
/// rewrite goes through a temporary file in the same directory.
pub fn update_config_line(path: &Path, prefix: &str, new_line: &str) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(BenchError::io(path, e)),
    };

    let mut replaced = false;
    let mut out = String::with_capacity(existing.len() + new_line.len() + 1);
    for line in existing.lines() {
        if line.starts_with(prefix) {
            out.push_str(new_line);
            replaced = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    if !replaced {
        out.push_str(new_line);
        out.push('\n');
    }

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("config")
    ));
    let write = || -> std::io::Result<()> {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(out.as_bytes())?;
        f.sync_all()?;
        std::fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        BenchError::io(path, e)
    })
}

/// Whether the file has a line exactly equal to `line` (ignoring surrounding whitespace).
pub fn has_line(path: &Path, line: &str) -> bool {
    std::fs::read_to_string(path)
        .map(|text| text.lines().any(|l| l.trim() == line))
        .unwrap_or(false)
}

/// Delete a directory tree. A missing directory is not an error.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BenchError::io(path, e)),
    }
}

/// Create a directory and its parents if needed.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| BenchError::io(path, e))
}

/// Size of a file in bytes, or 0 if it does not exist.
pub fn file_size_or_zero(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_replace_matching_lines_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.properties");
        std::fs::write(&path, "motd=hi\nlevel-seed=1\nwhite-list=false\n").unwrap();

        update_config_line(&path, "level-seed", "level-seed=42").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "motd=hi\nlevel-seed=42\nwhite-list=false\n");
    }

    #[test]
    fn should_append_when_no_line_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eula.txt");
        std::fs::write(&path, "#By changing the setting below to TRUE...\n").unwrap();

        update_config_line(&path, "eula", "eula=true").unwrap();

        assert!(has_line(&path, "eula=true"));
        assert!(!dir.path().join(".eula.txt.tmp").exists());
    }

    #[test]
    fn should_create_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.properties");
        update_config_line(&path, "level-seed", "level-seed=7").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "level-seed=7\n");
    }

    #[test]
    fn should_remove_tree_and_ignore_missing() {
        let dir = tempfile::tempdir().unwrap();
        let world = dir.path().join("world");
        std::fs::create_dir_all(world.join("data")).unwrap();
        std::fs::write(world.join("data").join("db.sqlite"), b"x").unwrap();

        remove_dir_if_exists(&world).unwrap();
        assert!(!world.exists());
        remove_dir_if_exists(&world).unwrap();
    }

    #[test]
    fn should_report_zero_size_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        assert_eq!(file_size_or_zero(&path), 0);
        std::fs::write(&path, vec![0u8; 1234]).unwrap();
        assert_eq!(file_size_or_zero(&path), 1234);
    }
}
