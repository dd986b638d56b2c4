//! Photo album persisted as an ordered list of image data URIs

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{AtelierError, Result};
use crate::storage::{KeyValueStore, ALBUM_STORAGE_KEY};

/// Ordered collection of `data:image/...` URIs kept under [`ALBUM_STORAGE_KEY`].
///
/// Every mutation rewrites the whole list. Mutations are serialized so
/// concurrent uploads never lose entries.
pub struct Album {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl Album {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Current photos, oldest first; a missing key is an empty album
    pub async fn photos(&self) -> Result<Vec<String>> {
        match self.store.get(ALBUM_STORAGE_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Append one image and return its index
    pub async fn add(&self, data_uri: impl Into<String>) -> Result<usize> {
        let data_uri = data_uri.into();
        if !data_uri.starts_with("data:image/") {
            return Err(AtelierError::invalid_input(
                "album entries must be image data URIs",
            ));
        }

        let _guard = self.write_lock.lock().await;
        let mut photos = self.photos().await?;
        photos.push(data_uri);
        self.save(&photos).await?;

        tracing::debug!("Added photo {} to album", photos.len() - 1);
        Ok(photos.len() - 1)
    }

    /// Remove the photo at `index`, returning it when it existed
    pub async fn remove(&self, index: usize) -> Result<Option<String>> {
        let _guard = self.write_lock.lock().await;
        let mut photos = self.photos().await?;
        if index >= photos.len() {
            return Ok(None);
        }

        let removed = photos.remove(index);
        self.save(&photos).await?;
        Ok(Some(removed))
    }

    async fn save(&self, photos: &[String]) -> Result<()> {
        let json = serde_json::to_string(photos)?;
        self.store.set(ALBUM_STORAGE_KEY, json).await
    }
}
