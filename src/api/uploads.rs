//! Persistence of uploaded images.
//!
//! Files are stored under the configured uploads directory with random names
//! and referenced everywhere else by their public `/uploads/...` path, which
//! is what `ServeDir` serves them under.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::error::ApiError;

/// Extensions accepted for issue and avatar images
const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Largest accepted upload, in bytes
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Derive a safe lowercase extension from the client-supplied file name
fn sanitized_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .find(|allowed| **allowed == ext)
        .copied()
}

/// Write image bytes to the uploads directory under a random name.
/// Returns the public path to store on the record.
pub async fn save_image(
    uploads_dir: &Path,
    file_name: &str,
    data: &[u8],
) -> Result<String, ApiError> {
    let ext = sanitized_extension(file_name).ok_or_else(|| {
        ApiError::bad_request("Only jpg, jpeg, png and webp images are allowed")
    })?;

    if data.is_empty() {
        return Err(ApiError::bad_request("Uploaded image is empty"));
    }
    if data.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::bad_request("Uploaded image exceeds 5 MB"));
    }

    let stored_name = format!("{}.{}", Uuid::new_v4(), ext);
    let path = uploads_dir.join(&stored_name);
    tokio::fs::write(&path, data).await.map_err(|e| {
        tracing::error!(error = %e, path = %path.display(), "Failed to store upload");
        ApiError::internal("Failed to store uploaded image")
    })?;

    Ok(format!("/uploads/{}", stored_name))
}

/// Map a stored public path back to its location on disk.
/// Returns `None` for paths outside the uploads namespace.
pub fn fs_path(uploads_dir: &Path, stored: &str) -> Option<PathBuf> {
    let name = stored.strip_prefix("/uploads/")?;
    // Stored names are generated server-side; reject anything traversal-shaped
    if name.contains('/') || name.contains("..") {
        return None;
    }
    Some(uploads_dir.join(name))
}

/// Best-effort removal of stored image files
pub async fn remove_images(uploads_dir: &Path, stored: &[String]) {
    for path in stored {
        let Some(fs) = fs_path(uploads_dir, path) else {
            continue;
        };
        if let Err(e) = tokio::fs::remove_file(&fs).await {
            tracing::warn!(error = %e, path = %fs.display(), "Failed to remove image file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_extension() {
        assert_eq!(sanitized_extension("photo.JPG"), Some("jpg"));
        assert_eq!(sanitized_extension("a.b.png"), Some("png"));
        assert_eq!(sanitized_extension("script.sh"), None);
        assert_eq!(sanitized_extension("noext"), None);
    }

    #[test]
    fn test_fs_path_rejects_traversal() {
        let dir = Path::new("/var/lib/civicwatch/uploads");
        assert_eq!(
            fs_path(dir, "/uploads/abc.jpg"),
            Some(dir.join("abc.jpg"))
        );
        assert!(fs_path(dir, "/uploads/../etc/passwd").is_none());
        assert!(fs_path(dir, "/elsewhere/abc.jpg").is_none());
    }

    #[tokio::test]
    async fn test_save_image_roundtrip() {
        let dir = std::env::temp_dir().join(format!("cw-uploads-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let stored = save_image(&dir, "pothole.jpg", b"not-really-a-jpg")
            .await
            .unwrap();
        assert!(stored.starts_with("/uploads/"));
        assert!(stored.ends_with(".jpg"));

        let on_disk = fs_path(&dir, &stored).unwrap();
        assert_eq!(tokio::fs::read(&on_disk).await.unwrap(), b"not-really-a-jpg");

        remove_images(&dir, &[stored]).await;
        assert!(!on_disk.exists());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_image_rejects_bad_input() {
        let dir = std::env::temp_dir();
        assert!(save_image(&dir, "evil.exe", b"data").await.is_err());
        assert!(save_image(&dir, "empty.png", b"").await.is_err());
    }
}
