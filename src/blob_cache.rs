//! Local cache of uploaded media bytes, keyed by the id the server
//! assigned. Avoids fetching pixels again after the first upload.

use std::path::PathBuf;

use crate::model::MediaId;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("I/O error on blob {id}: {source}")]
    Io {
        id: MediaId,
        #[source]
        source: std::io::Error,
    },

    #[error("cache directory unavailable: {0}")]
    Root(std::io::Error),
}

/// Key-value store for media blobs. Writers to the same key are not
/// coordinated; the last `put` wins.
pub trait BlobStore {
    fn put(&mut self, id: &MediaId, bytes: &[u8]) -> Result<(), BlobError>;

    /// `Ok(None)` when nothing is cached under `id`.
    fn get(&self, id: &MediaId) -> Result<Option<Vec<u8>>, BlobError>;

    /// Deleting a missing key is not an error.
    fn delete(&mut self, id: &MediaId) -> Result<(), BlobError>;
}

/// One file per blob under a cache directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(BlobError::Root)?;
        tracing::debug!("Blob cache at {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, id: &MediaId) -> PathBuf {
        self.root.join(file_name_for(id))
    }
}

/// Ids come from the server; keep them from escaping the cache directory.
fn file_name_for(id: &MediaId) -> String {
    let name: String = id
        .0
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{name}.blob")
}

impl BlobStore for FsBlobStore {
    fn put(&mut self, id: &MediaId, bytes: &[u8]) -> Result<(), BlobError> {
        std::fs::write(self.path_for(id), bytes).map_err(|source| BlobError::Io {
            id: id.clone(),
            source,
        })
    }

    fn get(&self, id: &MediaId) -> Result<Option<Vec<u8>>, BlobError> {
        match std::fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BlobError::Io {
                id: id.clone(),
                source,
            }),
        }
    }

    fn delete(&mut self, id: &MediaId) -> Result<(), BlobError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BlobError::Io {
                id: id.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: std::collections::HashMap<MediaId, Vec<u8>>,
}

#[cfg(test)]
impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[cfg(test)]
impl BlobStore for MemoryBlobStore {
    fn put(&mut self, id: &MediaId, bytes: &[u8]) -> Result<(), BlobError> {
        self.blobs.insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, id: &MediaId) -> Result<Option<Vec<u8>>, BlobError> {
        Ok(self.blobs.get(id).cloned())
    }

    fn delete(&mut self, id: &MediaId) -> Result<(), BlobError> {
        self.blobs.remove(id);
        Ok(())
    }
}
