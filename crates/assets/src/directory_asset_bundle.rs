use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::asset_resolver::{AssetResolver, AssetResolverType};

/// Serves assets from a directory on disk.
#[derive(Debug)]
pub struct DirectoryAssetBundle {
    root: PathBuf,
    valid: bool,
    is_valid_after_asset_manager_change: bool,
}

impl DirectoryAssetBundle {
    pub fn new(root: impl Into<PathBuf>, is_valid_after_asset_manager_change: bool) -> Self {
        let root = root.into();
        let valid = root.is_dir();
        if !valid {
            tracing::warn!(path = %root.display(), "asset directory does not exist");
        }
        Self {
            root,
            valid,
            is_valid_after_asset_manager_change,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn read_file(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(error) => {
            tracing::debug!(path = %path.display(), %error, "could not read asset");
            None
        }
    }
}

impl AssetResolver for DirectoryAssetBundle {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn is_valid_after_asset_manager_change(&self) -> bool {
        self.is_valid_after_asset_manager_change
    }

    fn resolver_type(&self) -> AssetResolverType {
        AssetResolverType::DirectoryAssetBundle
    }

    fn get_as_mapping(&self, asset_name: &str) -> Option<Vec<u8>> {
        if !self.valid {
            return None;
        }
        let path = self.root.join(asset_name);
        if !path.is_file() {
            return None;
        }
        read_file(&path)
    }

    fn get_as_mappings(&self, pattern: &str, subdir: Option<&str>) -> Vec<Vec<u8>> {
        if !self.valid {
            return Vec::new();
        }
        let regex = match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(regex) => regex,
            Err(error) => {
                tracing::warn!(pattern, %error, "invalid asset pattern");
                return Vec::new();
            }
        };
        let (base, max_depth) = match subdir {
            Some(subdir) => (self.root.join(subdir), 1),
            None => (self.root.clone(), usize::MAX),
        };
        if !base.is_dir() {
            return Vec::new();
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&base)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| regex.is_match(name))
            })
            .map(walkdir::DirEntry::into_path)
            .collect();
        paths.sort();
        paths.iter().filter_map(|path| read_file(path)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create asset dir");
        }
        fs::write(path, contents).expect("write asset");
    }

    #[test]
    fn mapping_reads_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "fonts/a.ttf", "font");
        let bundle = DirectoryAssetBundle::new(dir.path(), false);

        assert!(bundle.is_valid());
        assert_eq!(bundle.get_as_mapping("fonts/a.ttf"), Some(b"font".to_vec()));
        assert_eq!(bundle.get_as_mapping("fonts"), None);
        assert_eq!(bundle.get_as_mapping("missing"), None);
    }

    #[test]
    fn mappings_search_subdir_or_whole_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "top.txt", "0");
        write(dir.path(), "shaders/a.sksl", "1");
        write(dir.path(), "shaders/b.sksl", "2");
        write(dir.path(), "shaders/nested/c.sksl", "3");
        write(dir.path(), "other/d.sksl", "4");
        let bundle = DirectoryAssetBundle::new(dir.path(), true);

        assert_eq!(bundle.get_as_mappings("(.*)", None).len(), 5);
        assert_eq!(
            bundle.get_as_mappings(".*\\.sksl", Some("shaders")),
            vec![b"1".to_vec(), b"2".to_vec()]
        );
        // The pattern must match the whole file name.
        assert!(bundle.get_as_mappings("sksl", None).is_empty());
        assert!(bundle.get_as_mappings("(", None).is_empty());
        assert!(bundle.get_as_mappings(".*", Some("absent")).is_empty());
    }

    #[test]
    fn missing_directory_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bundle = DirectoryAssetBundle::new(dir.path().join("nope"), true);
        assert!(!bundle.is_valid());
        assert!(bundle.is_valid_after_asset_manager_change());
        assert_eq!(bundle.resolver_type(), AssetResolverType::DirectoryAssetBundle);
    }
}
