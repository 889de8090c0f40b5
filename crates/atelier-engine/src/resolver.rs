use std::io::Write;
use std::path::{Path, PathBuf};

use atelier_contracts::media::parse_inline_image;
use atelier_contracts::{DispatchError, Result};
use tempfile::{Builder as TempBuilder, TempPath};

const TEMP_SUBDIR: &str = "atelier_refs";

/// Fallback directory tried with the fragment's basename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    VideoSource,
}

impl MediaKind {
    fn fallback_dir(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::VideoSource => "Video",
        }
    }
}

/// Concrete bytes plus where they came from. A temp file written for an
/// inline reference is removed when this value is dropped.
#[derive(Debug)]
pub struct ResolvedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub path: PathBuf,
    temp: Option<TempPath>,
}

impl ResolvedImage {
    #[cfg(test)]
    pub(crate) fn in_memory(bytes: &[u8], mime_type: &str, path: &str) -> Self {
        Self {
            bytes: bytes.to_vec(),
            mime_type: mime_type.to_string(),
            path: PathBuf::from(path),
            temp: None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image.png")
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    media_root: PathBuf,
    temp_dir: PathBuf,
}

impl ReferenceResolver {
    pub fn new(media_root: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub async fn resolve(&self, reference: &str) -> Result<ResolvedImage> {
        self.resolve_as(reference, MediaKind::Image).await
    }

    pub async fn resolve_as(&self, reference: &str, kind: MediaKind) -> Result<ResolvedImage> {
        let cleaned = clean_reference(reference);
        if let Some(inline) = parse_inline_image(&cleaned)? {
            return self.write_inline(inline).await;
        }

        let candidates = candidate_paths(&self.media_root, &cleaned, kind);
        for candidate in &candidates {
            if is_regular_file(candidate).await {
                let bytes = tokio::fs::read(candidate).await.map_err(|err| {
                    DispatchError::io(format!("failed reading {}", candidate.display()), err)
                })?;
                let mime_type = mime_for_bytes(candidate, &bytes);
                tracing::debug!(reference = %cleaned, path = %candidate.display(), "reference resolved");
                return Ok(ResolvedImage {
                    bytes,
                    mime_type,
                    path: candidate.clone(),
                    temp: None,
                });
            }
        }

        let last_attempted = candidates.last().cloned().unwrap_or_default();
        Err(DispatchError::NotFound {
            reference: cleaned,
            last_attempted,
        })
    }

    async fn write_inline(
        &self,
        inline: atelier_contracts::media::InlineImage,
    ) -> Result<ResolvedImage> {
        let dir = self.temp_dir.join(TEMP_SUBDIR);
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f");
        let prefix = format!("ref_{stamp}_");
        let suffix = format!(".{}", inline.extension());
        let (inline, temp) = tokio::task::spawn_blocking(move || {
            let temp = persist_scoped(&dir, &prefix, &suffix, &inline.bytes)?;
            Ok::<_, DispatchError>((inline, temp))
        })
        .await
        .map_err(|err| {
            DispatchError::io("temp file task failed", std::io::Error::other(err.to_string()))
        })??;
        Ok(ResolvedImage {
            bytes: inline.bytes,
            mime_type: inline.mime_type,
            path: temp.to_path_buf(),
            temp: Some(temp),
        })
    }
}

/// Writes `bytes` to a fresh file under `dir`, removed when the returned
/// path drops.
fn persist_scoped(dir: &Path, prefix: &str, suffix: &str, bytes: &[u8]) -> Result<TempPath> {
    std::fs::create_dir_all(dir)
        .map_err(|err| DispatchError::io(format!("failed creating {}", dir.display()), err))?;
    let mut file = TempBuilder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|err| DispatchError::io(format!("failed creating temp file in {}", dir.display()), err))?;
    file.write_all(bytes)
        .map_err(|err| DispatchError::io(format!("failed writing {}", file.path().display()), err))?;
    Ok(file.into_temp_path())
}

/// Strips whitespace and the double quotes front ends leave around pasted paths.
pub fn clean_reference(reference: &str) -> String {
    reference.trim().replace('"', "")
}

/// Candidate order:
/// 1. the fragment as given
/// 2. `root/<fragment>`
/// 3. `root/public/<fragment without a leading public segment>`
/// 4. `root/public/<Image|Video>/<basename>`
pub fn candidate_paths(root: &Path, fragment: &str, kind: MediaKind) -> Vec<PathBuf> {
    let relative = fragment.trim_start_matches(['/', '\\']);
    let without_public = strip_public_segment(relative);
    let basename = relative
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(relative);
    vec![
        PathBuf::from(fragment),
        root.join(relative),
        root.join("public").join(without_public),
        root.join("public").join(kind.fallback_dir()).join(basename),
    ]
}

fn strip_public_segment(relative: &str) -> &str {
    for prefix in ["public/", "public\\"] {
        if let Some(rest) = relative.strip_prefix(prefix) {
            return rest.trim_start_matches(['/', '\\']);
        }
    }
    relative
}

async fn is_regular_file(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Extension first, then byte sniffing, then `image/jpeg`.
pub fn mime_for_bytes(path: &Path, bytes: &[u8]) -> String {
    if let Some(mime) = mime_for_path(path) {
        return mime.to_string();
    }
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| "image/jpeg".to_string())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use atelier_contracts::media::png_data_url;
    use atelier_contracts::DispatchError;

    use super::{candidate_paths, MediaKind, ReferenceResolver};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

    fn fixture(root: &Path, relative: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    #[tokio::test]
    async fn inline_reference_round_trips_and_cleans_up() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let resolver = ReferenceResolver::new(media.path(), scratch.path());
        let bytes: Vec<u8> = (0..200u8).rev().collect();

        let resolved = resolver.resolve(&png_data_url(&bytes)).await?;
        assert_eq!(resolved.bytes, bytes);
        assert_eq!(resolved.mime_type, "image/png");
        assert!(resolved.is_temporary());
        assert!(resolved.path.starts_with(scratch.path().join("atelier_refs")));
        assert!(resolved.file_name().starts_with("ref_"));
        assert!(resolved.file_name().ends_with(".png"));
        assert_eq!(fs::read(&resolved.path)?, bytes);

        let path = resolved.path.clone();
        drop(resolved);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unwritable_scratch_dir_is_io_error() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        let blocker = media.path().join("scratch");
        fs::write(&blocker, b"not a directory")?;
        let resolver = ReferenceResolver::new(media.path(), &blocker);

        let err = resolver.resolve(&png_data_url(b"px")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Io { .. }));
        assert!(err.to_string().contains("scratch"));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_inline_reference_is_invalid_encoding() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        let resolver = ReferenceResolver::new(media.path(), media.path());
        let err = resolver
            .resolve("data:image/png;base64,***")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidEncoding(_)));
        Ok(())
    }

    #[tokio::test]
    async fn literal_path_wins_first() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        let elsewhere = tempfile::tempdir()?;
        fixture(elsewhere.path(), "shot.webp", b"literal")?;
        let literal = elsewhere.path().join("shot.webp");
        let resolver = ReferenceResolver::new(media.path(), media.path());

        let resolved = resolver
            .resolve(&format!("  \"{}\" ", literal.display()))
            .await?;
        assert_eq!(resolved.path, literal);
        assert_eq!(resolved.mime_type, "image/webp");
        assert!(!resolved.is_temporary());
        Ok(())
    }

    #[tokio::test]
    async fn root_relative_fragment_resolves() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        fixture(media.path(), "public/Image/1.jpg", b"root-relative")?;
        let resolver = ReferenceResolver::new(media.path(), media.path());

        let resolved = resolver.resolve("/public/Image/1.jpg").await?;
        assert_eq!(resolved.path, media.path().join("public/Image/1.jpg"));
        assert_eq!(resolved.mime_type, "image/jpeg");
        Ok(())
    }

    #[tokio::test]
    async fn fragment_without_public_prefix_is_found_under_public() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        fixture(media.path(), "public/Campaigns/week1/hero.png", b"public")?;
        let resolver = ReferenceResolver::new(media.path(), media.path());

        let resolved = resolver.resolve("Campaigns/week1/hero.png").await?;
        assert_eq!(resolved.path, media.path().join("public/Campaigns/week1/hero.png"));
        Ok(())
    }

    #[tokio::test]
    async fn basename_falls_back_to_image_directory() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        fixture(media.path(), "public/Image/flyer.png", PNG_MAGIC)?;
        let resolver = ReferenceResolver::new(media.path(), media.path());

        let resolved = resolver
            .resolve("C:\\Users\\someone\\Downloads\\flyer.png")
            .await?;
        assert_eq!(resolved.path, media.path().join("public/Image/flyer.png"));
        Ok(())
    }

    #[tokio::test]
    async fn video_sources_fall_back_to_video_directory() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        fixture(media.path(), "public/Video/still.jpg", b"still")?;
        let resolver = ReferenceResolver::new(media.path(), media.path());

        let resolved = resolver
            .resolve_as("uploads/still.jpg", MediaKind::VideoSource)
            .await?;
        assert_eq!(resolved.path, media.path().join("public/Video/still.jpg"));
        assert!(resolver.resolve("uploads/still.jpg").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_extension_is_sniffed() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        fixture(media.path(), "public/Image/blob", PNG_MAGIC)?;
        let resolver = ReferenceResolver::new(media.path(), media.path());
        let resolved = resolver.resolve("blob").await?;
        assert_eq!(resolved.mime_type, "image/png");
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_candidates_report_last_attempt() -> anyhow::Result<()> {
        let media = tempfile::tempdir()?;
        fs::create_dir_all(media.path().join("public/Image/missing.png"))?;
        let resolver = ReferenceResolver::new(media.path(), media.path());

        let err = resolver.resolve("assets/missing.png").await.unwrap_err();
        match err {
            DispatchError::NotFound {
                reference,
                last_attempted,
            } => {
                assert_eq!(reference, "assets/missing.png");
                assert_eq!(last_attempted, media.path().join("public/Image/missing.png"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn candidates_follow_documented_order() {
        let root = Path::new("/srv/media");
        let candidates = candidate_paths(root, "public/Image/a.png", MediaKind::Image);
        assert_eq!(
            candidates,
            vec![
                Path::new("public/Image/a.png").to_path_buf(),
                root.join("public/Image/a.png"),
                root.join("public").join("Image/a.png"),
                root.join("public").join("Image").join("a.png"),
            ]
        );
    }
}
