//! Payment proof uploads on local disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use tourdesk_core::documents::{BlobStore, DocumentError};

const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "webp"];

#[derive(Clone, Debug)]
pub struct DiskBlobStore {
    root: PathBuf,
    max_bytes: u64,
}

impl DiskBlobStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { root: root.into(), max_bytes }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Keeps the extension and a readable stem, drops anything that could escape the upload dir.
fn sanitize_file_name(file_name: &str) -> Result<(String, String), DocumentError> {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let (stem, extension) = base
        .rsplit_once('.')
        .ok_or_else(|| DocumentError::Rejected("file name has no extension".to_owned()))?;
    let extension = extension.to_ascii_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(DocumentError::Rejected(format!("`.{extension}` files are not accepted")));
    }

    let stem: String = stem
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .take(64)
        .collect();
    let stem = if stem.trim_matches('_').is_empty() { "proof".to_owned() } else { stem };
    Ok((stem, extension))
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<String, DocumentError> {
        if bytes.is_empty() {
            return Err(DocumentError::Rejected("upload is empty".to_owned()));
        }
        if bytes.len() as u64 > self.max_bytes {
            return Err(DocumentError::Rejected(format!(
                "upload is {} bytes; the limit is {}",
                bytes.len(),
                self.max_bytes
            )));
        }

        let (stem, extension) = sanitize_file_name(file_name)?;
        let stored_name = format!("{}-{stem}.{extension}", Uuid::new_v4().simple());

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|error| DocumentError::Storage(error.to_string()))?;
        tokio::fs::write(self.root.join(&stored_name), bytes)
            .await
            .map_err(|error| DocumentError::Storage(error.to_string()))?;

        info!(
            event_name = "storage.proof.stored",
            file_name = %stored_name,
            size = bytes.len(),
            "payment proof stored"
        );
        Ok(stored_name)
    }
}

#[cfg(test)]
mod tests {
    use tourdesk_core::documents::{BlobStore, DocumentError};

    use super::{sanitize_file_name, DiskBlobStore};

    #[tokio::test]
    async fn stores_proof_under_upload_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DiskBlobStore::new(dir.path().join("proofs"), 1024);

        let reference = store.put("bank transfer.PDF", b"%PDF-1.4").await.expect("put");

        assert!(reference.ends_with("-bank_transfer.pdf"));
        let stored = std::fs::read(store.root().join(&reference)).expect("stored file");
        assert_eq!(stored, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn rejects_oversized_and_empty_uploads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DiskBlobStore::new(dir.path(), 4);

        let oversized = store.put("receipt.png", b"12345").await;
        assert!(matches!(oversized, Err(DocumentError::Rejected(_))));

        let empty = store.put("receipt.png", b"").await;
        assert!(matches!(empty, Err(DocumentError::Rejected(_))));
    }

    #[test]
    fn strips_directories_and_unsupported_extensions() {
        let (stem, extension) = sanitize_file_name("../../etc/receipt.jpg").expect("sanitized");
        assert_eq!(stem, "receipt");
        assert_eq!(extension, "jpg");

        assert!(matches!(sanitize_file_name("payload.exe"), Err(DocumentError::Rejected(_))));
        assert!(matches!(sanitize_file_name("noextension"), Err(DocumentError::Rejected(_))));
        assert_eq!(sanitize_file_name("...png").expect("sanitized").0, "proof");
    }
}
