//! Media files laid out on disk by owner
//!
//! `<root>/<owner hex>/<media hex>` holds the bytes of one media item.

use crate::id::ObjectId;
use crate::storage::{async_trait, MediaReader, MediaStore, StorageError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct DirectoryMediaStore {
    root: PathBuf,
}

impl DirectoryMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the media item would live
    pub fn path_for(&self, media_id: &ObjectId, owner: &ObjectId) -> PathBuf {
        self.root.join(owner.to_hex()).join(media_id.to_hex())
    }
}

#[async_trait]
impl MediaStore for DirectoryMediaStore {
    async fn open(&self, media_id: &ObjectId, owner: &ObjectId) -> Result<MediaReader, StorageError> {
        let path = self.path_for(media_id, owner);

        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                debug!(path = %path.display(), "Opened media file");
                Ok(Box::new(file))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("media {}", media_id)))
            }
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }
}
