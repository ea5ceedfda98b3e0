//! Write-temp-then-rename file replacement.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` so readers only ever observe the previous
/// complete file or the new complete file.
///
/// The temp file lives next to the target (same filesystem) and is synced
/// before the rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;
    let tmp_path = temp_path(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Pretty JSON with a trailing newline, the on-disk format of every artifact.
pub fn to_pretty_json<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    Ok(buf)
}
