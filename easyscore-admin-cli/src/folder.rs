//! Read a folder of score images

use anyhow::{Context, Result};
use bytes::Bytes;
use easyscore_core::ImageFile;
use std::path::Path;

/// Read every regular file directly under `dir` that has a supported image
/// extension. Subdirectories are not descended into.
pub async fn read_images(dir: &Path) -> Result<Vec<ImageFile>> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory {:?}", dir))?;

    let mut files = Vec::new();
    while let Some(item) = reader.next_entry().await? {
        if !item.file_type().await?.is_file() {
            continue;
        }
        let name = item.file_name().to_string_lossy().into_owned();
        let candidate = ImageFile::new(name, Bytes::new());
        if !candidate.is_supported() {
            tracing::debug!("Ignoring {}", candidate.name);
            continue;
        }
        let bytes = tokio::fs::read(item.path())
            .await
            .with_context(|| format!("Failed to read {:?}", item.path()))?;
        files.push(ImageFile {
            bytes: bytes.into(),
            ..candidate
        });
    }
    Ok(files)
}

/// Display label for a folder: its last path component
pub fn folder_label(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_images_filters_extensions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"png").unwrap();
        std::fs::write(dir.path().join("b.JPEG"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let mut files = read_images(dir.path()).await.unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.JPEG"]);
        assert_eq!(files[0].bytes.as_ref(), b"png");
    }

    #[tokio::test]
    async fn test_read_images_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(read_images(&dir.path().join("absent")).await.is_err());
    }

    #[test]
    fn test_folder_label() {
        assert_eq!(folder_label(Path::new("/scores/Spring Recital")), "Spring Recital");
    }
}
