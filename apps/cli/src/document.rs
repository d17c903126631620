//! Document selection checks that run before anything reaches the controller.

use std::path::Path;

use anyhow::{bail, Context};
use client_core::DocumentUpload;

pub const PDF_MIME_TYPE: &str = "application/pdf";
const PDF_MAGIC: &[u8] = b"%PDF-";

pub async fn load_document(path: &Path, max_bytes: u64) -> anyhow::Result<DocumentUpload> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        bail!("{} is not a PDF file", path.display());
    }

    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to inspect '{}'", path.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a regular file", path.display());
    }
    if metadata.len() > max_bytes {
        bail!(
            "{} is {} bytes; documents must be at most {} bytes",
            path.display(),
            metadata.len(),
            max_bytes
        );
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    if !bytes.starts_with(PDF_MAGIC) {
        bail!("{} does not contain PDF data", path.display());
    }

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    Ok(DocumentUpload::new(filename, bytes).with_mime_type(PDF_MIME_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).expect("write fixture");
        path
    }

    #[tokio::test]
    async fn loads_pdf_with_name_and_mime_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(&dir, "Paper.PDF", b"%PDF-1.7\nbody");

        let document = load_document(&path, 1024).await.expect("load");
        assert_eq!(document.filename, "Paper.PDF");
        assert_eq!(document.mime_type.as_deref(), Some(PDF_MIME_TYPE));
        assert_eq!(document.bytes, b"%PDF-1.7\nbody".to_vec());
    }

    #[tokio::test]
    async fn rejects_other_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(&dir, "paper.docx", b"%PDF-1.7");
        let err = load_document(&path, 1024).await.expect_err("docx");
        assert!(err.to_string().contains("not a PDF"));
    }

    #[tokio::test]
    async fn rejects_oversized_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(&dir, "paper.pdf", &[b'%'; 64]);
        let err = load_document(&path, 32).await.expect_err("too large");
        assert!(err.to_string().contains("at most 32 bytes"));
    }

    #[tokio::test]
    async fn rejects_empty_and_non_pdf_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = write(&dir, "empty.pdf", b"");
        assert!(load_document(&empty, 1024)
            .await
            .expect_err("empty")
            .to_string()
            .contains("is empty"));

        let renamed = write(&dir, "notes.pdf", b"plain text notes");
        assert!(load_document(&renamed, 1024)
            .await
            .expect_err("not pdf")
            .to_string()
            .contains("does not contain PDF data"));
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_document(&dir.path().join("gone.pdf"), 1024)
            .await
            .expect_err("missing");
        assert!(format!("{err:#}").contains("gone.pdf"));
    }
}
