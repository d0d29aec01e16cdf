// src/storage/files/mod.rs
// C2: File Store — content-addressed blob storage under the data directory.
// Layout: <dataDir>/files/<date>/<sanitized-app>/<kind>/<filename>

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::crypto::sha256_hex;
use crate::error::{AppError, AppResult};
use crate::storage::types::FileRef;

pub(crate) const MAX_SCREENSHOT_BYTES: usize = 10 * 1024 * 1024;

/// Replaces characters that would be meaningful to a filesystem path (or to
/// Windows specifically, since captured app names may contain them) with `_`.
pub fn sanitize_app_name(app_name: &str) -> String {
    app_name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub(crate) fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else {
        None
    }
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `relative_path` under the store root, rejecting any path
    /// that would escape it via `..` components or an absolute prefix.
    pub fn resolve(&self, relative_path: &str) -> AppResult<PathBuf> {
        let candidate = Path::new(relative_path);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(AppError::validation(format!(
                "path traversal rejected: {relative_path}"
            )));
        }
        Ok(self.root.join(candidate))
    }

    fn relative_path(date: &str, app_name: &str, kind: &str, filename: &str) -> String {
        format!("{date}/{}/{kind}/{filename}", sanitize_app_name(app_name))
    }

    /// Writes a screenshot blob, validating it sniffs as PNG or JPEG and
    /// fits under the 10MB cap, then atomically publishes it via
    /// write-to-temp-then-rename so readers never see a partial file.
    ///
    /// The filename is the capture time (`<HH-MM-SS>.<ext>`), not a content
    /// hash, per the on-disk layout contract; a numeric suffix is appended
    /// on the rare second-collision.
    pub async fn save_screenshot(
        &self,
        date: &str,
        app_name: &str,
        captured_at: DateTime<Utc>,
        data: &[u8],
    ) -> AppResult<FileRef> {
        if data.len() > MAX_SCREENSHOT_BYTES {
            return Err(AppError::validation("screenshot exceeds 10MB cap"));
        }
        let mime_type = sniff_image_mime(data)
            .ok_or_else(|| AppError::validation("screenshot is not a recognized PNG or JPEG"))?;

        let sha256 = sha256_hex(data);
        let ext = if mime_type == "image/png" { "png" } else { "jpg" };
        let stamp = captured_at.format("%H-%M-%S");

        let mut suffix = 0u32;
        let (relative, final_path) = loop {
            let filename = if suffix == 0 {
                format!("{stamp}.{ext}")
            } else {
                format!("{stamp}_{suffix}.{ext}")
            };
            let relative = Self::relative_path(date, app_name, "screenshots", &filename);
            let final_path = self.resolve(&relative)?;
            if !fs::try_exists(&final_path).await.unwrap_or(false) {
                break (relative, final_path);
            }
            suffix += 1;
        };

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.write_atomic(&final_path, data).await?;

        Ok(FileRef {
            path: relative,
            sha256,
            size_bytes: data.len() as u64,
            mime_type: mime_type.to_string(),
            encrypted: false,
        })
    }

    /// Generic blob write for non-screenshot kinds (e.g. profile images),
    /// with a caller-supplied filename rather than a content-derived one.
    pub async fn save_blob(
        &self,
        relative_dir: &str,
        filename: &str,
        data: &[u8],
        mime_type: &str,
    ) -> AppResult<FileRef> {
        let relative = format!("{relative_dir}/{filename}");
        let final_path = self.resolve(&relative)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.write_atomic(&final_path, data).await?;

        Ok(FileRef {
            path: relative,
            sha256: sha256_hex(data),
            size_bytes: data.len() as u64,
            mime_type: mime_type.to_string(),
            encrypted: false,
        })
    }

    async fn write_atomic(&self, final_path: &Path, data: &[u8]) -> AppResult<()> {
        let parent = final_path.parent().ok_or_else(|| {
            AppError::validation("file path has no parent directory")
        })?;
        let tmp_name = format!(".tmp-{}", Uuid::new_v4());
        let tmp_path = parent.join(tmp_name);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, final_path).await?;
        debug!("wrote blob {}", final_path.display());
        Ok(())
    }

    pub async fn read(&self, relative_path: &str) -> AppResult<Vec<u8>> {
        let path = self.resolve(relative_path)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("blob {relative_path} not found"))
            } else {
                AppError::from(e)
            }
        })
    }

    /// Best-effort delete; missing files are not an error (saga compensation
    /// may race with a prior partial cleanup).
    pub async fn delete(&self, relative_path: &str) -> AppResult<()> {
        let path = self.resolve(relative_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks the store root collecting every blob's path relative to it, for
    /// the engine's orphan sweep against `file_refs`.
    pub async fn list_all_relative_paths(&self) -> AppResult<Vec<String>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_app_name("Visual Studio: Code"), "Visual Studio_ Code");
        assert_eq!(sanitize_app_name("a/b\\c*d?e"), "a_b_c_d_e");
    }

    #[tokio::test]
    async fn save_and_read_screenshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        let data = png_bytes();
        let captured_at = "2024-03-14T10:00:00Z".parse().unwrap();

        let file_ref = store.save_screenshot("2024-03-14", "Chrome", captured_at, &data).await.unwrap();
        assert_eq!(file_ref.mime_type, "image/png");
        assert_eq!(file_ref.size_bytes, data.len() as u64);
        assert_eq!(file_ref.path, "2024-03-14/Chrome/screenshots/10-00-00.png");

        let read_back = store.read(&file_ref.path).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn second_collision_gets_a_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        let captured_at = "2024-03-14T10:00:00Z".parse().unwrap();

        let first = store.save_screenshot("2024-03-14", "Chrome", captured_at, &png_bytes()).await.unwrap();
        let second = store.save_screenshot("2024-03-14", "Chrome", captured_at, &png_bytes()).await.unwrap();
        assert_eq!(first.path, "2024-03-14/Chrome/screenshots/10-00-00.png");
        assert_eq!(second.path, "2024-03-14/Chrome/screenshots/10-00-00_1.png");
    }

    #[tokio::test]
    async fn rejects_non_image_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        let captured_at = "2024-03-14T10:00:00Z".parse().unwrap();
        let err = store
            .save_screenshot("2024-03-14", "Chrome", captured_at, b"not an image")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        let err = store.resolve("../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.delete("2024-03-14/Chrome/screenshots/nope.png").await.unwrap();
    }
}
