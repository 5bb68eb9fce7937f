use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

/// Prefix under the uploads root where document files live.
pub const DOCUMENT_KEY_PREFIX: &str = "documentos";

/// Path prefix under which stored files are served over HTTP.
pub const PUBLIC_LINK_PREFIX: &str = "/uploads/";

#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Stores files under a directory on the local disk. The same directory is
/// served read-only at `/uploads`.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|part| matches!(part, Component::Normal(_)));
        if key.is_empty() || !clean {
            bail!("invalid storage key: {key}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete {}", path.display()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

/// Server-generated storage key for an uploaded document. Only the extension
/// of the client filename survives.
pub fn unique_document_key(original_name: &str) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_else(|| ".pdf".to_string());
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!(
        "{DOCUMENT_KEY_PREFIX}/{}-{suffix:09}{extension}",
        Utc::now().timestamp_millis()
    )
}

pub fn public_link(key: &str) -> String {
    format!("{PUBLIC_LINK_PREFIX}{key}")
}

/// Inverse of [`public_link`]. External URLs (documents that live outside the
/// uploads directory) yield `None`.
pub fn key_from_link(link: &str) -> Option<&str> {
    link.strip_prefix(PUBLIC_LINK_PREFIX)
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_keep_only_the_extension() {
        let key = unique_document_key("Manual de Calidad.PDF");
        assert!(key.starts_with("documentos/"));
        assert!(key.ends_with(".pdf"));
        assert!(!key.contains("Manual"));
    }

    #[test]
    fn generated_keys_default_to_pdf() {
        let key = unique_document_key("archivo");
        assert!(key.ends_with(".pdf"));
    }

    #[test]
    fn links_round_trip_through_the_public_prefix() {
        let key = "documentos/1700000000000-000000001.pdf";
        let link = public_link(key);
        assert_eq!(link, "/uploads/documentos/1700000000000-000000001.pdf");
        assert_eq!(key_from_link(&link), Some(key));
    }

    #[test]
    fn external_links_have_no_storage_key() {
        assert_eq!(key_from_link("https://example.com/doc.pdf"), None);
        assert_eq!(key_from_link("/uploads/"), None);
    }

    #[test]
    fn rejects_traversal_keys() {
        let storage = LocalFileStorage::new("/tmp/sgc-test");
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("/etc/passwd").is_err());
        assert!(storage.resolve("").is_err());
        assert!(storage.resolve("documentos/ok.pdf").is_ok());
    }

    #[tokio::test]
    async fn save_read_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let key = "documentos/test.pdf";

        storage.save(key, b"%PDF-1.4".to_vec()).await.unwrap();
        assert!(storage.exists(key).await.unwrap());
        assert_eq!(storage.read(key).await.unwrap(), b"%PDF-1.4");

        storage.delete(key).await.unwrap();
        assert!(!storage.exists(key).await.unwrap());
    }
}
