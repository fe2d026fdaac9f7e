//! Photo evidence storage port and bundled adapters

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::error::{LifecycleError, Result};
use crate::models::EvidenceRef;

/// Public URL prefix under which locally stored evidence is served
pub const UPLOADS_PREFIX: &str = "/uploads";

/// Accepts image bytes and returns a reference that can be resolved later
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<EvidenceRef>;

    /// Remove an upload that no committed report refers to. Unknown refs are a no-op.
    async fn discard(&self, evidence: &EvidenceRef) -> Result<()>;
}

/// File extension for an image content type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    }
}

/// Writes each upload to `upload_dir` under a fresh UUID file name
pub struct LocalEvidenceStore {
    upload_dir: PathBuf,
}

impl LocalEvidenceStore {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &PathBuf {
        &self.upload_dir
    }
}

#[async_trait]
impl EvidenceStore for LocalEvidenceStore {
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<EvidenceRef> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| {
                LifecycleError::StorageUnavailable(format!(
                    "cannot create {}: {}",
                    self.upload_dir.display(),
                    e
                ))
            })?;

        let file_name = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
        let path = self.upload_dir.join(&file_name);

        tokio::fs::write(&path, bytes).await.map_err(|e| {
            LifecycleError::StorageUnavailable(format!("cannot write {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "Stored evidence file");
        Ok(EvidenceRef(format!("{}/{}", UPLOADS_PREFIX, file_name)))
    }

    async fn discard(&self, evidence: &EvidenceRef) -> Result<()> {
        let Some(file_name) = evidence
            .as_str()
            .strip_prefix(UPLOADS_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains('/') && !name.contains(".."))
        else {
            return Ok(());
        };

        let path = self.upload_dir.join(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Discarded evidence file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LifecycleError::StorageUnavailable(format!(
                "cannot remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Keeps uploads in memory. Used by tests and database-less runs.
#[derive(Default)]
pub struct MemoryEvidenceStore {
    objects: DashMap<String, (Vec<u8>, String)>,
    unavailable: AtomicBool,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `store` call fail with `StorageUnavailable`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn get(&self, evidence: &EvidenceRef) -> Option<Vec<u8>> {
        self.objects.get(evidence.as_str()).map(|o| o.0.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<EvidenceRef> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LifecycleError::StorageUnavailable(
                "evidence store is offline".to_string(),
            ));
        }
        let key = format!(
            "memory://{}.{}",
            Uuid::new_v4(),
            extension_for(content_type)
        );
        self.objects
            .insert(key.clone(), (bytes.to_vec(), content_type.to_string()));
        Ok(EvidenceRef(key))
    }

    async fn discard(&self, evidence: &EvidenceRef) -> Result<()> {
        self.objects.remove(evidence.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_writes_under_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalEvidenceStore::new(dir.path().join("uploads"));

        let evidence = store.store(b"jpeg-bytes", "image/jpeg").await.unwrap();
        assert!(evidence.as_str().starts_with("/uploads/"));
        assert!(evidence.as_str().ends_with(".jpg"));

        let file_name = evidence.as_str().trim_start_matches("/uploads/");
        let written = std::fs::read(dir.path().join("uploads").join(file_name)).unwrap();
        assert_eq!(written, b"jpeg-bytes");

        store.discard(&evidence).await.unwrap();
        assert!(!dir.path().join("uploads").join(file_name).exists());
        // Second discard and foreign refs are no-ops
        store.discard(&evidence).await.unwrap();
        store
            .discard(&EvidenceRef("/uploads/../secrets".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_local_store_reports_unwritable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let store = LocalEvidenceStore::new(&blocker);
        let err = store.store(b"bytes", "image/png").await.unwrap_err();
        assert!(matches!(err, LifecycleError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_memory_store_toggle() {
        let store = MemoryEvidenceStore::new();
        let evidence = store.store(b"abc", "image/png").await.unwrap();
        assert_eq!(store.get(&evidence).unwrap(), b"abc");

        store.set_available(false);
        assert!(store.store(b"abc", "image/png").await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for("IMAGE/PNG"), "png");
        assert_eq!(extension_for("application/pdf"), "bin");
    }
}
