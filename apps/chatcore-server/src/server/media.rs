use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatcore_core::AttachmentType;

use super::video_probe::VideoProbe;

pub(crate) const THUMBNAIL_BOX: u32 = 350;

/// Filesystem layout rooted at a configured base (SPEC_FULL.md §4.3).
pub(crate) struct MediaStore {
    root: PathBuf,
    video_probe: Arc<dyn VideoProbe>,
}

pub(crate) struct ThumbnailOutcome {
    pub(crate) thumbnail_path: Option<String>,
    pub(crate) duration: Option<f64>,
}

impl MediaStore {
    pub(crate) fn new(root: PathBuf, video_probe: Arc<dyn VideoProbe>) -> std::io::Result<Self> {
        for dir in ["files", "images", "videos", "avatars"] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root, video_probe })
    }

    /// `<timestamp-with-microseconds>_<original_name>`, SPEC_FULL.md §4.3.
    pub(crate) fn unique_file_name(original_name: &str) -> String {
        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        format!("{micros}_{original_name}")
    }

    pub(crate) fn original_path(&self, kind: AttachmentType, unique_file_name: &str) -> PathBuf {
        self.root.join(kind.directory()).join(unique_file_name)
    }

    fn image_thumbnail_path(&self, unique_file_name: &str) -> PathBuf {
        self.root.join(AttachmentType::Image.directory()).join(format!("thumb_{unique_file_name}"))
    }

    fn video_thumbnail_path(&self, unique_file_name: &str) -> PathBuf {
        self.root.join(AttachmentType::Video.directory()).join(format!("thumb_{unique_file_name}.jpg"))
    }

    pub(crate) fn avatar_path(&self, username: &str, now_unix: i64) -> PathBuf {
        self.root.join("avatars").join(format!("{username}_avatar_{now_unix}.jpg"))
    }

    /// Best-effort: failures are logged by the caller and leave
    /// `thumbnail_path` empty, never failing the message (SPEC_FULL.md §4.3).
    pub(crate) async fn derive_thumbnail(&self, kind: AttachmentType, unique_file_name: &str) -> ThumbnailOutcome {
        match kind {
            AttachmentType::Image => self.derive_image_thumbnail(unique_file_name).await,
            AttachmentType::Video => self.derive_video_thumbnail(unique_file_name).await,
            AttachmentType::File => ThumbnailOutcome { thumbnail_path: None, duration: None },
        }
    }

    async fn derive_image_thumbnail(&self, unique_file_name: &str) -> ThumbnailOutcome {
        let original = self.original_path(AttachmentType::Image, unique_file_name);
        let thumbnail = self.image_thumbnail_path(unique_file_name);
        let result = tokio::task::spawn_blocking(move || -> Result<(), image::ImageError> {
            let source = image::open(&original)?;
            let scaled = source.resize(THUMBNAIL_BOX, THUMBNAIL_BOX, image::imageops::FilterType::Lanczos3);
            scaled.save(&thumbnail)
        })
        .await;
        match result {
            Ok(Ok(())) => {
                ThumbnailOutcome { thumbnail_path: Some(thumbnail_relative(self, unique_file_name, true)), duration: None }
            }
            Ok(Err(error)) => {
                tracing::warn!(event = "media.thumbnail_failed", kind = "image", %error);
                ThumbnailOutcome { thumbnail_path: None, duration: None }
            }
            Err(error) => {
                tracing::warn!(event = "media.thumbnail_task_failed", %error);
                ThumbnailOutcome { thumbnail_path: None, duration: None }
            }
        }
    }

    async fn derive_video_thumbnail(&self, unique_file_name: &str) -> ThumbnailOutcome {
        let original = self.original_path(AttachmentType::Video, unique_file_name);
        let thumbnail = self.video_thumbnail_path(unique_file_name);
        let video_probe = Arc::clone(&self.video_probe);
        let original_for_probe = original.clone();

        let duration = tokio::task::spawn_blocking({
            let video_probe = Arc::clone(&video_probe);
            let path = original_for_probe.clone();
            move || video_probe.duration_secs(&path)
        })
        .await
        .ok()
        .and_then(Result::ok);

        let frame_result = tokio::task::spawn_blocking(move || -> Result<(), String> {
            let (bitmap, width, height) = video_probe.first_frame(&original).map_err(|e| e.to_string())?;
            let buffer = image::RgbImage::from_raw(width, height, bitmap).ok_or("malformed frame buffer")?;
            let scaled = image::DynamicImage::ImageRgb8(buffer).resize(
                THUMBNAIL_BOX,
                THUMBNAIL_BOX,
                image::imageops::FilterType::Lanczos3,
            );
            scaled.save(&thumbnail).map_err(|e| e.to_string())
        })
        .await;

        match frame_result {
            Ok(Ok(())) => {
                ThumbnailOutcome { thumbnail_path: Some(thumbnail_relative(self, unique_file_name, false)), duration }
            }
            Ok(Err(error)) => {
                tracing::warn!(event = "media.thumbnail_failed", kind = "video", %error);
                ThumbnailOutcome { thumbnail_path: None, duration }
            }
            Err(error) => {
                tracing::warn!(event = "media.thumbnail_task_failed", %error);
                ThumbnailOutcome { thumbnail_path: None, duration }
            }
        }
    }

    pub(crate) async fn read_window(&self, path: &Path, offset: i64, window: usize) -> std::io::Result<(Vec<u8>, i64, bool)> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = tokio::fs::File::open(path).await?;
        let total_size = file.metadata().await?.len() as i64;
        if offset >= total_size {
            return Ok((Vec::new(), total_size, true));
        }
        file.seek(std::io::SeekFrom::Start(offset as u64)).await?;
        let remaining = (total_size - offset) as usize;
        let mut buffer = vec![0_u8; remaining.min(window)];
        let read = file.read(&mut buffer).await?;
        buffer.truncate(read);
        let is_complete = offset + read as i64 >= total_size;
        Ok((buffer, total_size, is_complete))
    }
}

fn thumbnail_relative(store: &MediaStore, unique_file_name: &str, is_image: bool) -> String {
    let path = if is_image { store.image_thumbnail_path(unique_file_name) } else { store.video_thumbnail_path(unique_file_name) };
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::MediaStore;
    use crate::server::video_probe::FfmpegVideoProbe;
    use std::sync::Arc;

    #[test]
    fn unique_file_name_embeds_the_original_name() {
        let name = MediaStore::unique_file_name("a.png");
        assert!(name.ends_with("_a.png"));
    }

    #[tokio::test]
    async fn read_window_reports_completion_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        tokio::fs::write(&path, vec![b'A'; 10]).await.unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), Arc::new(FfmpegVideoProbe)).unwrap();
        let (chunk, total, complete) = store.read_window(&path, 0, 4).await.unwrap();
        assert_eq!(chunk.len(), 4);
        assert_eq!(total, 10);
        assert!(!complete);
        let (chunk, _, complete) = store.read_window(&path, 10, 4).await.unwrap();
        assert!(chunk.is_empty());
        assert!(complete);
    }
}
