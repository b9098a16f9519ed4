//! Map distribution.
//!
//! The map binary format is opaque here: a map is a filename, a title and
//! bytes. Peers verify their cached copies by SHA-256 checksum and download
//! the ones that differ.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::StoreError;

/// File extension of map files in a maps directory.
pub const MAP_EXTENSION: &str = "vtmap";

/// Largest map accepted for upload, in bytes.
pub const MAX_MAP_SIZE: usize = 20 * 1024 * 1024;

/// A bare file name with the map extension. Paths, `..` and other files
/// are never maps.
pub fn is_map_filename(filename: &str) -> bool {
    let path = Path::new(filename);
    path.file_name().and_then(|n| n.to_str()) == Some(filename)
        && path.file_stem().is_some_and(|stem| !stem.is_empty())
        && path.extension().and_then(|e| e.to_str()) == Some(MAP_EXTENSION)
}

/// One downloadable map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapHandle {
    pub filename: String,
    pub title: String,
    pub data: Arc<[u8]>,
}

impl MapHandle {
    pub fn new(filename: impl Into<String>, title: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            filename: filename.into(),
            title: title.into(),
            data: data.into(),
        }
    }

    /// Lowercase hex SHA-256 of the map data.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        format!("{:x}", hasher.finalize())
    }
}

/// The available maps.
#[async_trait]
pub trait MapStore: Send + Sync + 'static {
    /// Filenames of every available map, sorted.
    async fn map_list(&self) -> Result<Vec<String>, StoreError>;

    async fn map_by_filename(&self, filename: &str) -> Result<Option<MapHandle>, StoreError>;

    /// `true` if `filename` exists and its checksum equals `hash`
    /// (compared case-insensitively).
    async fn check_hash(&self, filename: &str, hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .map_by_filename(filename)
            .await?
            .is_some_and(|map| map.checksum().eq_ignore_ascii_case(hash)))
    }

    /// Stores a new map. Returns `false` if a map with that filename
    /// already exists; it is left untouched.
    async fn save(&self, map: MapHandle) -> Result<bool, StoreError>;

    /// Returns `false` if there was no such map.
    async fn remove(&self, filename: &str) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryMapStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryMapStore {
    maps: RwLock<BTreeMap<String, MapHandle>>,
}

impl MemoryMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, map: MapHandle) {
        self.maps.write().await.insert(map.filename.clone(), map);
    }
}

#[async_trait]
impl MapStore for MemoryMapStore {
    async fn map_list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.maps.read().await.keys().cloned().collect())
    }

    async fn map_by_filename(&self, filename: &str) -> Result<Option<MapHandle>, StoreError> {
        Ok(self.maps.read().await.get(filename).cloned())
    }

    async fn save(&self, map: MapHandle) -> Result<bool, StoreError> {
        let mut maps = self.maps.write().await;
        if maps.contains_key(&map.filename) {
            return Ok(false);
        }
        maps.insert(map.filename.clone(), map);
        Ok(true)
    }

    async fn remove(&self, filename: &str) -> Result<bool, StoreError> {
        Ok(self.maps.write().await.remove(filename).is_some())
    }
}

// ---------------------------------------------------------------------------
// DirectoryMapStore
// ---------------------------------------------------------------------------

/// Serves the `*.vtmap` files of one directory, read on every request.
///
/// The title of a map is its file stem; titles given on upload are not
/// kept.
#[derive(Debug, Clone)]
pub struct DirectoryMapStore {
    dir: PathBuf,
}

impl DirectoryMapStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl MapStore for DirectoryMapStore {
    async fn map_list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) if is_map_filename(name) => names.push(name.to_string()),
                _ => {}
            }
        }
        names.sort();
        Ok(names)
    }

    async fn map_by_filename(&self, filename: &str) -> Result<Option<MapHandle>, StoreError> {
        if !is_map_filename(filename) {
            return Ok(None);
        }
        let path = self.dir.join(filename);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename)
            .to_string();
        Ok(Some(MapHandle::new(filename, title, data)))
    }

    async fn save(&self, map: MapHandle) -> Result<bool, StoreError> {
        if !is_map_filename(&map.filename) {
            return Ok(false);
        }
        let path = self.dir.join(&map.filename);
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&map.data).await?;
        file.flush().await?;
        Ok(true)
    }

    async fn remove(&self, filename: &str) -> Result<bool, StoreError> {
        if !is_map_filename(filename) {
            return Ok(false);
        }
        match tokio::fs::remove_file(self.dir.join(filename)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_sha256_hex() {
        let map = MapHandle::new("a.vtmap", "a", b"abc".to_vec());
        assert_eq!(
            map.checksum(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_check_hash_accepts_uppercase_and_rejects_unknown() {
        let store = MemoryMapStore::new();
        let map = MapHandle::new("arena.vtmap", "Arena", b"tiles".to_vec());
        let hash = map.checksum().to_uppercase();
        store.insert(map).await;

        assert!(store.check_hash("arena.vtmap", &hash).await.unwrap());
        assert!(!store.check_hash("arena.vtmap", "00").await.unwrap());
        assert!(!store.check_hash("missing.vtmap", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_store_lists_only_map_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.vtmap"), b"b").unwrap();
        std::fs::write(dir.path().join("a.vtmap"), b"a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.vtmap")).unwrap();
        let store = DirectoryMapStore::new(dir.path());

        assert_eq!(store.map_list().await.unwrap(), vec!["a.vtmap", "b.vtmap"]);
    }

    #[tokio::test]
    async fn test_directory_store_reads_map_and_title() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("arena.vtmap"), b"tiles").unwrap();
        let store = DirectoryMapStore::new(dir.path());

        let map = store.map_by_filename("arena.vtmap").await.unwrap().unwrap();

        assert_eq!(map.title, "arena");
        assert_eq!(&*map.data, b"tiles");
    }

    #[test]
    fn test_is_map_filename_needs_bare_name_and_extension() {
        assert!(is_map_filename("arena.vtmap"));
        assert!(!is_map_filename(".vtmap"));
        assert!(!is_map_filename("arena.txt"));
        assert!(!is_map_filename("maps/arena.vtmap"));
    }

    #[tokio::test]
    async fn test_memory_store_save_refuses_duplicate() {
        let store = MemoryMapStore::new();

        assert!(store.save(MapHandle::new("a.vtmap", "A", b"1".to_vec())).await.unwrap());
        assert!(!store.save(MapHandle::new("a.vtmap", "B", b"2".to_vec())).await.unwrap());

        let kept = store.map_by_filename("a.vtmap").await.unwrap().unwrap();
        assert_eq!(kept.title, "A");
        assert!(store.remove("a.vtmap").await.unwrap());
        assert!(!store.remove("a.vtmap").await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_store_save_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryMapStore::new(dir.path());

        assert!(store.save(MapHandle::new("new.vtmap", "New", b"tiles".to_vec())).await.unwrap());
        assert!(!store.save(MapHandle::new("new.vtmap", "New", b"other".to_vec())).await.unwrap());
        assert_eq!(std::fs::read(dir.path().join("new.vtmap")).unwrap(), b"tiles");

        assert!(store.remove("new.vtmap").await.unwrap());
        assert!(!store.remove("new.vtmap").await.unwrap());
        assert!(store.map_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_store_refuses_paths_outside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryMapStore::new(dir.path().join("maps"));

        assert!(store.map_by_filename("../secret.vtmap").await.unwrap().is_none());
        assert!(store.map_by_filename("missing.vtmap").await.unwrap().is_none());
    }
}
