use crate::models::PhotoInfo;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

pub fn max_photos_allowed() -> usize {
    std::env::var("MAX_PHOTOS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(6)
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("photo {0} not found")]
    NotFound(String),
    #[error("invalid photo filename: {0}")]
    InvalidFilename(String),
    #[error("media io: {0}")]
    Io(String),
}

impl From<io::Error> for MediaError {
    fn from(err: io::Error) -> Self {
        MediaError::Io(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// Stores photos next to the product record, under `{root}/items/{id}`.
#[derive(Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn product_dir(&self, product_id: Uuid) -> PathBuf {
        self.root.join("items").join(product_id.to_string())
    }

    /// Writes uploads as `photo_1.jpg`, `photo_2.png`, ... keeping the
    /// submitted order. Original filenames only contribute the extension.
    pub async fn save_photos(
        &self,
        product_id: Uuid,
        uploads: &[PhotoUpload],
    ) -> Result<Vec<PhotoInfo>, MediaError> {
        let dir = self.product_dir(product_id);
        fs::create_dir_all(&dir).await?;
        let mut saved = Vec::with_capacity(uploads.len());
        for (index, upload) in uploads.iter().enumerate() {
            let filename = format!("photo_{}{}", index + 1, photo_extension(upload.filename.as_deref()));
            let path = dir.join(&filename);
            fs::write(&path, &upload.bytes).await?;
            saved.push(PhotoInfo {
                filename,
                path: path.to_string_lossy().to_string(),
                size_bytes: upload.bytes.len() as u64,
            });
        }
        Ok(saved)
    }

    pub async fn read_photo(&self, product_id: Uuid, filename: &str) -> Result<Vec<u8>, MediaError> {
        let safe = sanitize_filename(filename)?;
        match fs::read(self.product_dir(product_id).join(safe)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(filename.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Filenames come from URL paths; anything that could walk out of the
/// product directory is rejected.
fn sanitize_filename(filename: &str) -> Result<&str, MediaError> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(MediaError::InvalidFilename(filename.to_string()));
    }
    Ok(filename)
}

fn photo_extension(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_else(|| ".jpg".to_string())
}

pub fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_media() -> (MediaStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("rastro-media-{}", Uuid::new_v4().simple()));
        (MediaStore::new(root.clone()), root)
    }

    #[tokio::test]
    async fn save_then_read_roundtrip() {
        let (media, root) = temp_media();
        let product_id = Uuid::new_v4();
        let uploads = vec![
            PhotoUpload {
                filename: Some("IMG_2041.JPG".to_string()),
                bytes: vec![1, 2, 3],
            },
            PhotoUpload {
                filename: Some("front.png".to_string()),
                bytes: vec![4, 5],
            },
            PhotoUpload {
                filename: None,
                bytes: vec![6],
            },
        ];
        let saved = media.save_photos(product_id, &uploads).await.expect("save");
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[0].filename, "photo_1.jpg");
        assert_eq!(saved[1].filename, "photo_2.png");
        assert_eq!(saved[2].filename, "photo_3.jpg");
        assert_eq!(saved[0].size_bytes, 3);

        let bytes = media
            .read_photo(product_id, "photo_2.png")
            .await
            .expect("read");
        assert_eq!(bytes, vec![4, 5]);

        fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn traversal_filenames_are_rejected() {
        let (media, root) = temp_media();
        let product_id = Uuid::new_v4();
        for bad in ["../metadata.json", "a/b.jpg", "a\\b.jpg", "", "..", "x..y"] {
            let err = media
                .read_photo(product_id, bad)
                .await
                .expect_err("must reject");
            assert!(matches!(err, MediaError::InvalidFilename(_)), "{bad}");
        }
        fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn missing_photo_is_not_found() {
        let (media, root) = temp_media();
        let err = media
            .read_photo(Uuid::new_v4(), "photo_1.jpg")
            .await
            .expect_err("missing");
        assert!(matches!(err, MediaError::NotFound(_)));
        fs::remove_dir_all(root).await.ok();
    }

    #[test]
    fn extension_fallback_and_normalization() {
        assert_eq!(photo_extension(Some("a.JPEG")), ".jpeg");
        assert_eq!(photo_extension(Some("weird.name.WebP")), ".webp");
        assert_eq!(photo_extension(Some("noext")), ".jpg");
        assert_eq!(photo_extension(Some("trailing.")), ".jpg");
        assert_eq!(photo_extension(None), ".jpg");
    }

    #[test]
    fn content_types_cover_the_usual_formats() {
        assert_eq!(content_type_for("photo_1.jpg"), "image/jpeg");
        assert_eq!(content_type_for("photo_1.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("photo_2.png"), "image/png");
        assert_eq!(content_type_for("photo_3.webp"), "image/webp");
        assert_eq!(content_type_for("photo_4.gif"), "image/gif");
        assert_eq!(content_type_for("photo_5.bin"), "application/octet-stream");
    }
}
