//! Article text and image files on disk.

use crate::utils::sanitize_filename;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument};

/// Directory used when a title sanitizes to nothing usable.
pub const UNTITLED_DIR: &str = "untitled";

/// Longest post directory name in bytes. Most filesystems cap a name at 255.
const MAX_SEGMENT_BYTES: usize = 200;

/// Download directory of one forum.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    forum_dir: PathBuf,
}

impl DownloadStore {
    /// Store rooted at `root/<sanitized forum_id>`.
    pub fn for_forum(root: impl AsRef<Path>, forum_id: &str) -> Self {
        Self {
            forum_dir: root.as_ref().join(sanitize_filename(forum_id)),
        }
    }

    pub fn forum_dir(&self) -> &Path {
        &self.forum_dir
    }

    /// Create the forum directory.
    #[instrument(level = "info", skip_all, fields(dir = %self.forum_dir.display()))]
    pub async fn prepare(&self) -> io::Result<()> {
        if let Err(e) = fs::create_dir_all(&self.forum_dir).await {
            error!(error = %e, "Failed to create forum download dir");
            return Err(e);
        }
        Ok(())
    }

    /// Directory of one post, always a direct child of the forum directory.
    ///
    /// Long titles are cut to `MAX_SEGMENT_BYTES`. Empty and dot-only titles
    /// (`.`, `..`) go to [`UNTITLED_DIR`].
    pub fn post_dir(&self, sanitized_title: &str) -> PathBuf {
        let segment = clamp_segment(sanitized_title);
        if segment.is_empty() || segment.chars().all(|c| c == '.') {
            self.forum_dir.join(UNTITLED_DIR)
        } else {
            self.forum_dir.join(segment)
        }
    }

    /// Write `content.txt` for a post and return the post directory.
    #[instrument(level = "debug", skip(self, content))]
    pub async fn write_content(&self, sanitized_title: &str, content: &str) -> io::Result<PathBuf> {
        let post_dir = self.post_dir(sanitized_title);
        fs::create_dir_all(&post_dir).await?;
        let path = post_dir.join("content.txt");
        fs::write(&path, content.as_bytes()).await?;
        info!(path = %path.display(), bytes = content.len(), "Wrote article text");
        Ok(post_dir)
    }

    /// Write `image_<n>.jpg` into a post directory. `n` is 1-based.
    pub async fn write_image(&self, post_dir: &Path, n: usize, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = post_dir.join(format!("image_{n}.jpg"));
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote image");
        Ok(path)
    }
}

fn clamp_segment(name: &str) -> &str {
    if name.len() <= MAX_SEGMENT_BYTES {
        return name;
    }
    let mut cut = MAX_SEGMENT_BYTES;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name[..cut].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("cafe_scrape_{}", Uuid::new_v4()))
    }

    #[test]
    fn test_forum_dir_is_sanitized() {
        let store = DownloadStore::for_forum("downloads", " 123/45? ");
        assert_eq!(store.forum_dir(), Path::new("downloads/12345"));
    }

    #[test]
    fn test_empty_title_falls_back() {
        let store = DownloadStore::for_forum("downloads", "1");
        assert_eq!(store.post_dir(""), Path::new("downloads/1/untitled"));
    }

    #[test]
    fn test_dot_titles_stay_inside_forum_dir() {
        let store = DownloadStore::for_forum("downloads", "1");
        assert_eq!(store.post_dir("."), Path::new("downloads/1/untitled"));
        assert_eq!(store.post_dir(".."), Path::new("downloads/1/untitled"));
        assert_eq!(store.post_dir("..."), Path::new("downloads/1/untitled"));
        assert_eq!(store.post_dir("...후기"), Path::new("downloads/1/...후기"));
    }

    #[test]
    fn test_long_title_is_cut_on_char_boundary() {
        let store = DownloadStore::for_forum("downloads", "1");
        let title = "가".repeat(120);
        let dir = store.post_dir(&title);
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= MAX_SEGMENT_BYTES);
        assert_eq!(name, "가".repeat(66));
        assert_eq!(dir.parent().unwrap(), Path::new("downloads/1"));
    }

    #[tokio::test]
    async fn test_dot_title_writes_under_forum() {
        let root = temp_root();
        let store = DownloadStore::for_forum(&root, "123");
        store.prepare().await.unwrap();

        let post_dir = store.write_content("..", "escaped?").await.unwrap();
        store.write_image(&post_dir, 1, &[9]).await.unwrap();

        assert!(root.join("123/untitled/content.txt").exists());
        assert!(root.join("123/untitled/image_1.jpg").exists());
        assert!(!root.join("content.txt").exists());
        assert!(!root.join("image_1.jpg").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_write_content_and_images() {
        let root = temp_root();
        let store = DownloadStore::for_forum(&root, "10050146");
        store.prepare().await.unwrap();

        let post_dir = store.write_content("첫 글", "본문입니다").await.unwrap();
        store.write_image(&post_dir, 2, &[1, 2, 3]).await.unwrap();

        let text = std::fs::read_to_string(root.join("10050146/첫 글/content.txt")).unwrap();
        assert_eq!(text, "본문입니다");
        let image = std::fs::read(root.join("10050146/첫 글/image_2.jpg")).unwrap();
        assert_eq!(image, vec![1, 2, 3]);

        let _ = std::fs::remove_dir_all(&root);
    }
}
