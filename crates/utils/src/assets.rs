use std::{
    env, io,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");
const OUTPUT_DIR_ENV: &str = "OUTPUT_DIR";
const TEMP_DIR_ENV: &str = "TEMP_DIR";

/// Root directory for rendered reels and scratch space.
///
/// Debug builds keep everything next to the workspace so artifacts are easy
/// to inspect; release builds use the platform data directory.
pub fn asset_dir() -> io::Result<PathBuf> {
    let path = if cfg!(debug_assertions) {
        PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        ProjectDirs::from("ai", "reelforge", "reelforge")
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "OS didn't give us a home directory")
            })?
            .data_dir()
            .to_path_buf()
    };

    ensure_dir(&path)?;
    Ok(path)
    // macOS → ~/Library/Application Support/reelforge
    // Linux → ~/.local/share/reelforge (respects XDG_DATA_HOME)
    // Windows → %APPDATA%\reelforge\reelforge
}

/// Directory rendered reels are written to and served from.
pub fn output_dir() -> io::Result<PathBuf> {
    dir_from_env(OUTPUT_DIR_ENV, "output")
}

/// Parent of the per-job scratch directories.
pub fn temp_dir() -> io::Result<PathBuf> {
    dir_from_env(TEMP_DIR_ENV, "temp")
}

fn dir_from_env(var: &str, fallback: &str) -> io::Result<PathBuf> {
    let path = match env::var(var) {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
        _ => asset_dir()?.join(fallback),
    };
    ensure_dir(&path)?;
    Ok(path)
}

/// Create `path` (and parents) when missing.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        tracing::info!("Created directory: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");

        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());

        // second call is a no-op
        ensure_dir(&nested).unwrap();
    }
}
