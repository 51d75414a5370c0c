#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetResolverType {
    AssetManager,
    ApkAssetProvider,
    DirectoryAssetBundle,
}

/// A source of named asset bytes.
pub trait AssetResolver: Send + Sync {
    fn is_valid(&self) -> bool;

    /// Whether this resolver should be carried over when the asset bundle
    /// path of a running shell changes.
    fn is_valid_after_asset_manager_change(&self) -> bool;

    fn resolver_type(&self) -> AssetResolverType;

    fn get_as_mapping(&self, asset_name: &str) -> Option<Vec<u8>>;

    /// Contents of every asset whose file name fully matches `pattern`.
    /// With `subdir`, only that directory is searched; otherwise the search
    /// is recursive.
    fn get_as_mappings(&self, _pattern: &str, _subdir: Option<&str>) -> Vec<Vec<u8>> {
        Vec::new()
    }
}
