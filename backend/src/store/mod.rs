//! Output store: generated workbooks, one directory per provider.
//!
//! ```text
//! <root>/
//!   azure/    Contoso_2026-10-19.xlsx ...
//!   tencent/  tencent_100012345678_2026-10-19.xlsx ...
//! ```
//!
//! The store only appends and enumerates. Archives read whatever is on disk
//! at call time; files written concurrently may or may not be included.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{StoreError, StoreResult};
use crate::models::Provider;

/// Metadata about one stored document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Which providers an archive should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSelector {
    Only(Provider),
    All,
}

impl ArchiveSelector {
    pub fn providers(&self) -> Vec<Provider> {
        match self {
            ArchiveSelector::Only(p) => vec![*p],
            ArchiveSelector::All => Provider::ALL.to_vec(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveSelector::Only(p) => p.as_str(),
            ArchiveSelector::All => "all",
        }
    }
}

impl FromStr for ArchiveSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(ArchiveSelector::All),
            other => other.parse::<Provider>().map(ArchiveSelector::Only),
        }
    }
}

/// Persistence boundary for generated documents.
pub trait OutputStore: Send + Sync {
    /// Store `bytes` under `file_name`, replacing any existing file.
    fn put(&self, provider: Provider, file_name: &str, bytes: &[u8]) -> StoreResult<StoredFile>;

    /// Stored documents, newest first.
    fn list(&self, provider: Provider) -> StoreResult<Vec<StoredFile>>;

    /// Contents of one document.
    fn get(&self, provider: Provider, file_name: &str) -> StoreResult<Vec<u8>>;

    /// Zip every matching document under a `<Provider>/` folder.
    fn archive(&self, selector: ArchiveSelector) -> StoreResult<Vec<u8>> {
        let mut entries = Vec::new();
        for provider in selector.providers() {
            for file in self.list(provider)? {
                entries.push((provider, file.name));
            }
        }
        if entries.is_empty() {
            return Err(StoreError::Empty);
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for (provider, name) in entries {
            // Removed between listing and reading: skip it
            let bytes = match self.get(provider, &name) {
                Ok(bytes) => bytes,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            zip.start_file(format!("{}/{}", provider.display_name(), name), options)?;
            zip.write_all(&bytes)?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

/// Reject names that could escape the provider directory.
pub fn validate_file_name(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.chars().any(char::is_control);
    if invalid {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// Filesystem-backed [`OutputStore`].
#[derive(Debug, Clone)]
pub struct FsOutputStore {
    root: PathBuf,
}

impl FsOutputStore {
    /// Open a store rooted at `root`, creating provider directories.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
        };
        store.ensure_dirs()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn provider_dir(&self, provider: Provider) -> PathBuf {
        self.root.join(provider.as_str())
    }

    fn ensure_dirs(&self) -> StoreResult<()> {
        for provider in Provider::ALL {
            fs::create_dir_all(self.provider_dir(provider))?;
        }
        Ok(())
    }

    fn file_path(&self, provider: Provider, file_name: &str) -> StoreResult<PathBuf> {
        validate_file_name(file_name)?;
        Ok(self.provider_dir(provider).join(file_name))
    }
}

fn stored_file(name: String, metadata: &fs::Metadata) -> StoredFile {
    let created_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    StoredFile {
        name,
        size: metadata.len(),
        created_at,
    }
}

impl OutputStore for FsOutputStore {
    fn put(&self, provider: Provider, file_name: &str, bytes: &[u8]) -> StoreResult<StoredFile> {
        let path = self.file_path(provider, file_name)?;
        let tmp = self
            .provider_dir(provider)
            .join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        let metadata = fs::metadata(&path)?;
        Ok(stored_file(file_name.to_string(), &metadata))
    }

    fn list(&self, provider: Provider) -> StoreResult<Vec<StoredFile>> {
        let dir = self.provider_dir(provider);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                files.push(stored_file(name, &metadata));
            }
        }

        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }

    fn get(&self, provider: Provider, file_name: &str) -> StoreResult<Vec<u8>> {
        let path = self.file_path(provider, file_name)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(file_name.to_string()),
            _ => StoreError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;
    use zip::ZipArchive;

    #[test]
    fn test_open_creates_provider_dirs() {
        let dir = tempdir().unwrap();
        let store = FsOutputStore::open(dir.path().join("output")).unwrap();

        assert!(store.provider_dir(Provider::Azure).is_dir());
        assert!(store.provider_dir(Provider::Tencent).is_dir());
    }

    #[test]
    fn test_put_get_list() {
        let dir = tempdir().unwrap();
        let store = FsOutputStore::open(dir.path()).unwrap();

        let stored = store.put(Provider::Azure, "A_2026-10-19.xlsx", b"abc").unwrap();
        assert_eq!(stored.size, 3);

        assert_eq!(store.get(Provider::Azure, "A_2026-10-19.xlsx").unwrap(), b"abc");
        let listed = store.list(Provider::Azure).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "A_2026-10-19.xlsx");
        assert!(store.list(Provider::Tencent).unwrap().is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let dir = tempdir().unwrap();
        let store = FsOutputStore::open(dir.path()).unwrap();

        store.put(Provider::Tencent, "t.xlsx", b"first").unwrap();
        store.put(Provider::Tencent, "t.xlsx", b"second!").unwrap();

        assert_eq!(store.get(Provider::Tencent, "t.xlsx").unwrap(), b"second!");
        assert_eq!(store.list(Provider::Tencent).unwrap().len(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsOutputStore::open(dir.path()).unwrap();

        let err = store.get(Provider::Azure, "nope.xlsx").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FsOutputStore::open(dir.path()).unwrap();

        for name in ["../secret", "a/b.xlsx", "..\\x", ".hidden", ""] {
            let err = store.get(Provider::Azure, name).unwrap_err();
            assert!(matches!(err, StoreError::InvalidName(_)), "{name}");
        }
    }

    #[test]
    fn test_archive_prefixes_by_provider() {
        let dir = tempdir().unwrap();
        let store = FsOutputStore::open(dir.path()).unwrap();
        store.put(Provider::Azure, "a.xlsx", b"azure").unwrap();
        store.put(Provider::Tencent, "t.xlsx", b"tencent").unwrap();

        let bytes = store.archive(ArchiveSelector::All).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["Azure/a.xlsx", "Tencent/t.xlsx"]);

        let mut content = String::new();
        archive.by_name("Tencent/t.xlsx").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "tencent");

        let only_azure = store.archive(ArchiveSelector::Only(Provider::Azure)).unwrap();
        let archive = ZipArchive::new(Cursor::new(only_azure)).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_archive_empty_selection() {
        let dir = tempdir().unwrap();
        let store = FsOutputStore::open(dir.path()).unwrap();
        store.put(Provider::Azure, "a.xlsx", b"azure").unwrap();

        let err = store.archive(ArchiveSelector::Only(Provider::Tencent)).unwrap_err();
        assert!(matches!(err, StoreError::Empty));
    }

    #[test]
    fn test_archive_selector_parse() {
        assert_eq!("all".parse::<ArchiveSelector>().unwrap(), ArchiveSelector::All);
        assert_eq!(
            "Tencent".parse::<ArchiveSelector>().unwrap(),
            ArchiveSelector::Only(Provider::Tencent)
        );
        assert!("aws".parse::<ArchiveSelector>().is_err());
    }
}
