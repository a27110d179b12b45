use anyhow::{anyhow, Result};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Writes the assembled PDF to `outfile`, or, when an EPUB is supplied, a zip
/// holding `<slug>/<slug>.pdf` and `<slug>/<slug>.epub`.
pub async fn package(pdf: &[u8], epub: Option<&Path>, slug: &str, outfile: &Path) -> Result<()> {
    match epub {
        None => {
            info!("Writing PDF ({} bytes) to {}", pdf.len(), outfile.display());
            write_atomically(outfile, pdf).await
        }
        Some(epub_path) => {
            let epub_data = fs::read(epub_path)
                .await
                .map_err(|e| anyhow!("Failed to read EPUB file {}: {}", epub_path.display(), e))?;

            let archive = build_archive(pdf, &epub_data, slug)?;
            info!(
                "Writing archive {}/ ({} bytes) to {}",
                slug,
                archive.len(),
                outfile.display()
            );
            write_atomically(outfile, &archive).await
        }
    }
}

/// Builds the zip archive in memory.
pub fn build_archive(pdf: &[u8], epub: &[u8], slug: &str) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (extension, data) in [("pdf", pdf), ("epub", epub)] {
        let name = format!("{slug}/{slug}.{extension}");
        debug!("Adding {} ({} bytes) to archive", name, data.len());
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| anyhow!("Failed to add {} to archive: {}", name, e))?;
        writer
            .write_all(data)
            .map_err(|e| anyhow!("Failed to write {} to archive: {}", name, e))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| anyhow!("Failed to finalize archive: {}", e))?;
    Ok(cursor.into_inner())
}

/// Writes `data` next to `path` first and renames it into place, so a failed
/// write never leaves a truncated file at `path`.
pub async fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let partial = partial_path(path)?;

    if let Err(e) = fs::write(&partial, data).await {
        discard(&partial).await;
        return Err(anyhow!("Failed to write {}: {}", path.display(), e));
    }

    if let Err(e) = fs::rename(&partial, path).await {
        discard(&partial).await;
        return Err(anyhow!("Failed to move output into place at {}: {}", path.display(), e));
    }

    Ok(())
}

fn partial_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Output path {} has no file name", path.display()))?;
    Ok(path.with_file_name(format!(".{}.partial", file_name.to_string_lossy())))
}

async fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", partial.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipArchive::new(Cursor::new(archive)).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut file = zip.by_index(i).unwrap();
                let mut data = Vec::new();
                file.read_to_end(&mut data).unwrap();
                (file.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn archive_has_slug_directory_with_two_entries() {
        let archive = build_archive(b"%PDF-fake", b"epub-bytes", "cafe_a_novel").unwrap();
        let entries = entries(&archive);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "cafe_a_novel/cafe_a_novel.pdf");
        assert_eq!(entries[0].1, b"%PDF-fake");
        assert_eq!(entries[1].0, "cafe_a_novel/cafe_a_novel.epub");
        assert_eq!(entries[1].1, b"epub-bytes");
    }

    #[tokio::test]
    async fn pdf_only_is_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("book.pdf");

        package(b"%PDF-1.5 body", None, "ignored", &out).await.unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), b"%PDF-1.5 body");
        assert!(!dir.path().join(".book.pdf.partial").exists());
    }

    #[tokio::test]
    async fn epub_is_copied_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let epub_path = dir.path().join("source.epub");
        let epub: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        std::fs::write(&epub_path, &epub).unwrap();
        let out = dir.path().join("bundle.zip");

        package(b"%PDF", Some(&epub_path), "my_book", &out).await.unwrap();

        let entries = entries(&std::fs::read(&out).unwrap());
        let (name, data) = &entries[1];
        assert_eq!(name, "my_book/my_book.epub");
        assert_eq!(data, &epub);
    }

    #[tokio::test]
    async fn missing_epub_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("bundle.zip");

        let err = package(b"%PDF", Some(&dir.path().join("gone.epub")), "x", &out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("gone.epub"));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn unwritable_destination_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("no-such-dir").join("book.pdf");

        assert!(write_atomically(&out, b"data").await.is_err());
        assert!(!out.exists());
    }
}
