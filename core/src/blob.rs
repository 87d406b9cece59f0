/// Blob storage for image messages: upload bytes, get back a stable URL.
/// The upload mechanics are a collaborator seam, not part of the sync core.
use crate::error::{ChatError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct BlobStore {
    db: Arc<sled::Db>,
}

impl BlobStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("blobs.db"))
            .map_err(|e| ChatError::Storage(format!("blobs DB: {}", e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Store the bytes and return a retrievable URL
    pub fn upload(&self, bytes: Vec<u8>) -> Result<String> {
        let url = format!("blob://{}", Uuid::new_v4());
        debug!("Uploading {} bytes as {}", bytes.len(), url);

        self.db
            .insert(url.as_bytes(), bytes)
            .map_err(|e| ChatError::Storage(format!("upload: {}", e)))?;
        Ok(url)
    }

    pub fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>> {
        match self
            .db
            .get(url.as_bytes())
            .map_err(|e| ChatError::Storage(format!("fetch: {}", e)))?
        {
            Some(val) => Ok(Some(val.to_vec())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upload_and_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(temp_dir.path()).unwrap();

        let url = blobs.upload(b"png bytes".to_vec()).unwrap();
        assert!(url.starts_with("blob://"));
        assert_eq!(blobs.fetch(&url).unwrap(), Some(b"png bytes".to_vec()));

        assert!(blobs.fetch("blob://missing").unwrap().is_none());
    }
}
