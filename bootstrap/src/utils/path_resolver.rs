use anyhow::Result;
use std::path::{Path, PathBuf};

/// Resolve the base folder relative paths are anchored to.
///
/// The bootstrap runs next to the server it provisions, so the working directory wins; the
/// executable's folder is only a fallback when the working directory is unavailable.
pub fn resolve_base_folder() -> PathBuf {
    if let Ok(cwd) = std::env::current_dir() {
        return cwd;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Anchor `path` at `base` unless it is already absolute.
pub fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Resolve (and create) the log folder.
pub fn resolve_log_folder(log_dir: Option<&Path>, data_dir: &Path) -> Result<PathBuf> {
    let dir = match log_dir {
        Some(d) => d.to_path_buf(),
        None => data_dir.join("logs"),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", dir, e))?;
    Ok(dir)
}

/// Path of a sibling file used for atomic writes (`<name>.tmp-<id>`).
pub fn temp_sibling(path: &Path, id: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.tmp-{}", name, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_keeps_absolute_paths() {
        let base = Path::new("/srv/app");
        assert_eq!(anchor(base, Path::new("data")), PathBuf::from("/srv/app/data"));
        assert_eq!(anchor(base, Path::new("/var/data")), PathBuf::from("/var/data"));
    }

    #[test]
    fn temp_sibling_stays_in_same_directory() {
        let p = temp_sibling(Path::new("/srv/app/data/initialization.json"), "abc");
        assert_eq!(p.parent(), Some(Path::new("/srv/app/data")));
        assert_eq!(
            p.file_name().unwrap().to_string_lossy(),
            ".initialization.json.tmp-abc"
        );
    }

    #[test]
    fn log_folder_defaults_under_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = resolve_log_folder(None, tmp.path()).unwrap();
        assert_eq!(dir, tmp.path().join("logs"));
        assert!(dir.is_dir());
    }
}
