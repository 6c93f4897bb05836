//! Filesystem checks for stage artifacts.

use std::path::Path;

/// True when `path` is a regular file with at least one byte.
///
/// Missing files and metadata errors both count as "no artifact".
pub async fn file_has_content(path: impl AsRef<Path>) -> bool {
    match tokio::fs::metadata(path.as_ref()).await {
        Ok(metadata) => metadata.is_file() && metadata.len() > 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_has_content() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let empty = dir.path().join("empty.mp4");
        let full = dir.path().join("full.mp4");

        tokio::fs::write(&empty, b"").await.unwrap();
        tokio::fs::write(&full, b"data").await.unwrap();

        assert!(!file_has_content(&missing).await);
        assert!(!file_has_content(&empty).await);
        assert!(file_has_content(&full).await);
        // A directory is not an artifact
        assert!(!file_has_content(dir.path()).await);
    }
}
