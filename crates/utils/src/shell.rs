//! Locating the external media binaries (`ffmpeg`, `ffprobe`).

use std::path::PathBuf;

/// Resolve an executable by explicit override, `PATH`, then the usual
/// install prefixes. Returns `None` when nothing is found so callers can
/// decide whether to fall back to the bare name.
pub fn resolve_binary(name: &str, override_path: Option<&str>) -> Option<PathBuf> {
    if let Some(custom) = override_path.map(str::trim).filter(|p| !p.is_empty()) {
        let candidate = PathBuf::from(custom);
        if candidate.is_file() {
            return Some(candidate);
        }
        if let Ok(found) = which::which(custom) {
            return Some(found);
        }
        tracing::warn!("Configured path for {} not found: {}", name, custom);
    }

    if let Ok(found) = which::which(name) {
        return Some(found);
    }

    let home = std::env::var("HOME").unwrap_or_default();
    let candidates = [
        format!("{}/bin/{}", home, name),
        format!("{}/.local/bin/{}", home, name),
        format!("/usr/local/bin/{}", name),
        format!("/opt/homebrew/bin/{}", name),
    ];

    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Like [`resolve_binary`] but always yields something runnable; a missing
/// binary surfaces later as a spawn error on the first invocation.
pub fn binary_or_default(name: &str, override_path: Option<&str>) -> PathBuf {
    resolve_binary(name, override_path).unwrap_or_else(|| {
        tracing::warn!("{} not found in PATH; invocations will fail until it is installed", name);
        PathBuf::from(name)
    })
}
