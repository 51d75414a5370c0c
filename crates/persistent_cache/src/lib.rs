//! Process-scoped persistent cache for compiled shader programs.
//!
//! Entries live under a versioned directory,
//! `<base>/<engine>/<engine version>/<graphics>/<graphics version>/sksl/`, so a
//! new engine or graphics library never reads stale programs. Each entry is a
//! cache object (see [`build_cache_object`]) stored in a file named by the
//! base32 encoding of its key and written atomically.

mod base32;
mod cache_object;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

pub use base32::encode as base32_encode;
pub use cache_object::{
    CACHE_OBJECT_SIGNATURE, CACHE_OBJECT_VERSION, build_cache_object, parse_cache_object,
};

pub const SKSL_SUBDIR: &str = "sksl";

#[derive(thiserror::Error, Debug)]
pub enum PersistentCacheError {
    #[error("persistent cache has no directory")]
    NoCacheDirectory,
    #[error("persistent cache is read-only")]
    ReadOnly,
    #[error("cache key of {0} bytes is too large")]
    KeyTooLarge(usize),
    #[error("invalid cache object: {0}")]
    InvalidCacheObject(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Version components of the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVersions {
    pub engine: String,
    pub engine_version: String,
    pub graphics: String,
    pub graphics_version: String,
}

impl Default for CacheVersions {
    fn default() -> Self {
        Self {
            engine: "raster_engine".to_owned(),
            engine_version: env!("CARGO_PKG_VERSION").to_owned(),
            graphics: "software_canvas".to_owned(),
            graphics_version: "1".to_owned(),
        }
    }
}

impl CacheVersions {
    pub fn sksl_directory(&self, base: &Path) -> PathBuf {
        base.join(&self.engine)
            .join(&self.engine_version)
            .join(&self.graphics)
            .join(&self.graphics_version)
            .join(SKSL_SUBDIR)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkSLEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug)]
pub struct PersistentCache {
    sksl_directory: Option<PathBuf>,
    read_only: bool,
}

impl PersistentCache {
    /// A cache rooted at `base`. `None` yields a cache that stores nothing.
    pub fn new(base: Option<&Path>, read_only: bool) -> Self {
        Self::with_versions(base, read_only, &CacheVersions::default())
    }

    pub fn with_versions(base: Option<&Path>, read_only: bool, versions: &CacheVersions) -> Self {
        let sksl_directory = base.map(|base| versions.sksl_directory(base));
        if let (Some(directory), false) = (&sksl_directory, read_only) {
            if let Err(error) = fs::create_dir_all(directory) {
                tracing::warn!(path = %directory.display(), %error, "could not create shader cache directory");
                return Self {
                    sksl_directory: None,
                    read_only,
                };
            }
        }
        Self {
            sksl_directory,
            read_only,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.sksl_directory.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn sksl_directory(&self) -> Option<&Path> {
        self.sksl_directory.as_deref()
    }

    fn entry_path(&self, key: &[u8]) -> Result<PathBuf, PersistentCacheError> {
        let directory = self
            .sksl_directory
            .as_ref()
            .ok_or(PersistentCacheError::NoCacheDirectory)?;
        Ok(directory.join(base32_encode(key)))
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    pub fn store(&self, key: &[u8], value: &[u8]) -> Result<(), PersistentCacheError> {
        if self.read_only {
            return Err(PersistentCacheError::ReadOnly);
        }
        let path = self.entry_path(key)?;
        let object = build_cache_object(key, value)?;
        let directory = path.parent().ok_or(PersistentCacheError::NoCacheDirectory)?;
        let mut temp = NamedTempFile::new_in(directory)?;
        temp.write_all(&object)?;
        temp.flush()?;
        temp.into_temp_path()
            .persist(&path)
            .map_err(|error| PersistentCacheError::Io(error.error))?;
        tracing::debug!(path = %path.display(), "stored cache entry");
        Ok(())
    }

    /// The value stored for `key`, if a well-formed entry exists.
    pub fn load(&self, key: &[u8]) -> Option<Vec<u8>> {
        let path = self.entry_path(key).ok()?;
        let data = fs::read(&path).ok()?;
        match parse_cache_object(&data) {
            Ok((stored_key, value)) if stored_key == key => Some(value.to_vec()),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "cache entry key does not match its file name");
                None
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Every entry in the shader directory, sorted by key. The key comes from
    /// the cache object itself, whatever the file is named. Files that are not
    /// cache objects are skipped.
    pub fn load_sksls(&self) -> Vec<SkSLEntry> {
        let Some(directory) = self.sksl_directory.as_ref() else {
            return Vec::new();
        };
        let Ok(read_dir) = fs::read_dir(directory) else {
            return Vec::new();
        };
        let mut entries: Vec<SkSLEntry> = read_dir
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|file_type| file_type.is_file()))
            .filter_map(|entry| {
                let data = fs::read(entry.path()).ok()?;
                let (key, value) = parse_cache_object(&data).ok()?;
                Some(SkSLEntry {
                    key: key.to_vec(),
                    value: value.to_vec(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Removes every stored entry and returns how many were removed.
    pub fn purge(&self) -> Result<usize, PersistentCacheError> {
        if self.read_only {
            return Err(PersistentCacheError::ReadOnly);
        }
        let directory = self
            .sksl_directory
            .as_ref()
            .ok_or(PersistentCacheError::NoCacheDirectory)?;
        let mut removed = 0;
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        tracing::debug!(removed, "purged shader cache");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_uses_base32_file_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PersistentCache::new(Some(dir.path()), false);

        cache.store(b"A", b"shader a").expect("store");
        cache.store(b"B", b"shader b").expect("store");

        let sksl_dir = cache.sksl_directory().expect("sksl dir");
        assert!(sksl_dir.ends_with(Path::new("software_canvas").join("1").join("sksl")));
        assert!(sksl_dir.join("IE").is_file());
        assert!(sksl_dir.join("II").is_file());
        assert_eq!(cache.load(b"A"), Some(b"shader a".to_vec()));
        assert_eq!(cache.load(b"C"), None);
    }

    #[test]
    fn load_sksls_skips_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PersistentCache::new(Some(dir.path()), false);
        cache.store(b"B", b"2").expect("store");
        cache.store(b"A", b"1").expect("store");
        let sksl_dir = cache.sksl_directory().expect("sksl dir");
        fs::write(sksl_dir.join("not-base32!"), b"junk").expect("write");
        fs::write(sksl_dir.join("MZXW6"), b"no header").expect("write");

        let entries = cache.load_sksls();

        assert_eq!(
            entries,
            vec![
                SkSLEntry {
                    key: b"A".to_vec(),
                    value: b"1".to_vec()
                },
                SkSLEntry {
                    key: b"B".to_vec(),
                    value: b"2".to_vec()
                },
            ]
        );
        assert_eq!(cache.purge().expect("purge"), 4);
        assert!(cache.load_sksls().is_empty());
    }

    #[test]
    fn load_sksls_reads_keys_from_the_cache_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = PersistentCache::new(Some(dir.path()), false);
        let sksl_dir = cache.sksl_directory().expect("sksl dir");
        fs::write(sksl_dir.join("x_cache"), build_cache_object(b"A", b"x").expect("build")).expect("write");
        fs::write(sksl_dir.join("y_cache"), build_cache_object(b"B", b"y").expect("build")).expect("write");

        let entries = cache.load_sksls();

        assert_eq!(
            entries,
            vec![
                SkSLEntry {
                    key: b"A".to_vec(),
                    value: b"x".to_vec()
                },
                SkSLEntry {
                    key: b"B".to_vec(),
                    value: b"y".to_vec()
                },
            ]
        );
    }

    #[test]
    fn read_only_cache_refuses_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = PersistentCache::new(Some(dir.path()), false);
        writer.store(b"A", b"1").expect("store");

        let reader = PersistentCache::new(Some(dir.path()), true);
        assert!(matches!(reader.store(b"B", b"2"), Err(PersistentCacheError::ReadOnly)));
        assert!(matches!(reader.purge(), Err(PersistentCacheError::ReadOnly)));
        assert_eq!(reader.load(b"A"), Some(b"1".to_vec()));
    }

    #[test]
    fn cache_without_directory_is_inert() {
        let cache = PersistentCache::new(None, false);
        assert!(!cache.is_valid());
        assert!(matches!(
            cache.store(b"A", b"1"),
            Err(PersistentCacheError::NoCacheDirectory)
        ));
        assert!(cache.load_sksls().is_empty());
    }
}
