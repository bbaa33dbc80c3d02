//! Saving reassembled files to disk.

use crate::error::FilesError;
use std::path::{Path, PathBuf};

/// Name used when a sanitised file name ends up empty
const FALLBACK_NAME: &str = "download";

/// Reduce a peer-supplied file name to a single safe path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let trimmed = base.trim().trim_start_matches('.');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Pick a path in `dir` for `name` that does not exist yet ("a.txt", "a (1).txt", ...)
async fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut n = 1u32;
    loop {
        let file_name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(file_name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

/// Write `data` into `dir` under a sanitised, non-clobbering name.
///
/// # Errors
///
/// Returns [`FilesError::Io`] if the directory cannot be created or the file
/// cannot be written.
pub async fn save_to_dir(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf, FilesError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = unique_path(dir, &sanitize_file_name(name)).await;
    tokio::fs::write(&path, data).await?;

    tracing::info!(path = %path.display(), bytes = data.len(), "saved file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name(".."), FALLBACK_NAME);
        assert_eq!(sanitize_file_name(""), FALLBACK_NAME);
        assert_eq!(sanitize_file_name("a\u{0}b.txt"), "ab.txt");
    }

    #[tokio::test]
    async fn test_save_does_not_clobber() {
        let dir = tempfile::tempdir().unwrap();

        let first = save_to_dir(dir.path(), "a.txt", b"one").await.unwrap();
        let second = save_to_dir(dir.path(), "a.txt", b"two").await.unwrap();

        assert_eq!(first.file_name().unwrap(), "a.txt");
        assert_eq!(second.file_name().unwrap(), "a (1).txt");
        assert_eq!(tokio::fs::read(&first).await.unwrap(), b"one");
        assert_eq!(tokio::fs::read(&second).await.unwrap(), b"two");
    }
}
