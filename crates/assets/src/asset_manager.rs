use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::asset_resolver::{AssetResolver, AssetResolverType};

/// Ordered resolver list. Updates take effect for lookups issued after the
/// update returns.
#[derive(Default)]
pub struct AssetManager {
    resolvers: Mutex<Vec<Box<dyn AssetResolver>>>,
}

impl AssetManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolvers(&self) -> MutexGuard<'_, Vec<Box<dyn AssetResolver>>> {
        self.resolvers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when the resolver is invalid and was dropped.
    pub fn push_front(&self, resolver: Box<dyn AssetResolver>) -> bool {
        if !resolver.is_valid() {
            tracing::debug!(resolver_type = ?resolver.resolver_type(), "dropping invalid asset resolver");
            return false;
        }
        self.resolvers().insert(0, resolver);
        true
    }

    pub fn push_back(&self, resolver: Box<dyn AssetResolver>) -> bool {
        if !resolver.is_valid() {
            tracing::debug!(resolver_type = ?resolver.resolver_type(), "dropping invalid asset resolver");
            return false;
        }
        self.resolvers().push(resolver);
        true
    }

    /// Replaces the last resolver of `resolver_type` with `updated`, or appends
    /// `updated` when no resolver of that type exists. `None` leaves the list
    /// untouched. An invalid `updated` is never inserted; it only removes the
    /// resolver it would have replaced.
    pub fn update_resolver_by_type(
        &self,
        updated: Option<Box<dyn AssetResolver>>,
        resolver_type: AssetResolverType,
    ) {
        let Some(updated) = updated else {
            return;
        };
        let mut resolvers = self.resolvers();
        let slot = resolvers
            .iter()
            .rposition(|resolver| resolver.resolver_type() == resolver_type);
        if !updated.is_valid() {
            tracing::debug!(?resolver_type, "dropping invalid replacement asset resolver");
            if let Some(index) = slot {
                resolvers.remove(index);
            }
            return;
        }
        match slot {
            Some(index) => resolvers[index] = updated,
            None => resolvers.push(updated),
        }
    }

    /// Moves every resolver out, leaving the manager empty.
    pub fn take_resolvers(&self) -> Vec<Box<dyn AssetResolver>> {
        std::mem::take(&mut *self.resolvers())
    }

    pub fn resolver_count(&self) -> usize {
        self.resolvers().len()
    }

    pub fn resolver_types(&self) -> Vec<AssetResolverType> {
        self.resolvers()
            .iter()
            .map(|resolver| resolver.resolver_type())
            .collect()
    }
}

impl AssetResolver for AssetManager {
    fn is_valid(&self) -> bool {
        !self.resolvers().is_empty()
    }

    fn is_valid_after_asset_manager_change(&self) -> bool {
        false
    }

    fn resolver_type(&self) -> AssetResolverType {
        AssetResolverType::AssetManager
    }

    fn get_as_mapping(&self, asset_name: &str) -> Option<Vec<u8>> {
        if asset_name.is_empty() {
            return None;
        }
        let mapping = self
            .resolvers()
            .iter()
            .find_map(|resolver| resolver.get_as_mapping(asset_name));
        if mapping.is_none() {
            tracing::debug!(asset_name, "asset not found in any resolver");
        }
        mapping
    }

    fn get_as_mappings(&self, pattern: &str, subdir: Option<&str>) -> Vec<Vec<u8>> {
        self.resolvers()
            .iter()
            .flat_map(|resolver| resolver.get_as_mappings(pattern, subdir))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestResolver {
        valid: bool,
        resolver_type: AssetResolverType,
        tag: &'static str,
    }

    impl TestResolver {
        fn boxed(valid: bool, resolver_type: AssetResolverType, tag: &'static str) -> Box<dyn AssetResolver> {
            Box::new(Self {
                valid,
                resolver_type,
                tag,
            })
        }
    }

    impl AssetResolver for TestResolver {
        fn is_valid(&self) -> bool {
            self.valid
        }

        fn is_valid_after_asset_manager_change(&self) -> bool {
            true
        }

        fn resolver_type(&self) -> AssetResolverType {
            self.resolver_type
        }

        fn get_as_mapping(&self, asset_name: &str) -> Option<Vec<u8>> {
            (asset_name == "tag").then(|| self.tag.as_bytes().to_vec())
        }
    }

    #[test]
    fn update_replaces_resolver_of_same_type() {
        let manager = AssetManager::new();
        manager.push_back(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "old"));
        manager.push_back(TestResolver::boxed(true, AssetResolverType::DirectoryAssetBundle, "dir"));

        manager.update_resolver_by_type(
            Some(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "new")),
            AssetResolverType::ApkAssetProvider,
        );

        assert_eq!(manager.resolver_count(), 2);
        assert_eq!(manager.get_as_mapping("tag"), Some(b"new".to_vec()));
    }

    #[test]
    fn update_appends_when_type_is_missing() {
        let manager = AssetManager::new();
        manager.push_back(TestResolver::boxed(true, AssetResolverType::DirectoryAssetBundle, "dir"));

        manager.update_resolver_by_type(
            Some(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "apk")),
            AssetResolverType::ApkAssetProvider,
        );

        assert_eq!(
            manager.resolver_types(),
            vec![
                AssetResolverType::DirectoryAssetBundle,
                AssetResolverType::ApkAssetProvider
            ]
        );
        assert_eq!(manager.get_as_mapping("tag"), Some(b"dir".to_vec()));
    }

    #[test]
    fn update_with_none_is_a_no_op() {
        let manager = AssetManager::new();
        manager.push_back(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "old"));

        manager.update_resolver_by_type(None, AssetResolverType::ApkAssetProvider);

        assert_eq!(manager.resolver_count(), 1);
        assert_eq!(manager.get_as_mapping("tag"), Some(b"old".to_vec()));
    }

    #[test]
    fn update_replaces_only_the_last_matching_resolver() {
        let manager = AssetManager::new();
        manager.push_back(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "first"));
        manager.push_back(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "second"));

        manager.update_resolver_by_type(
            Some(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "third")),
            AssetResolverType::ApkAssetProvider,
        );

        assert_eq!(manager.resolver_count(), 2);
        assert_eq!(manager.get_as_mapping("tag"), Some(b"first".to_vec()));
        let taken = manager.take_resolvers();
        assert_eq!(taken[1].get_as_mapping("tag"), Some(b"third".to_vec()));
        assert!(!manager.is_valid());
    }

    #[test]
    fn invalid_replacement_is_never_inserted() {
        let manager = AssetManager::new();
        manager.push_back(TestResolver::boxed(true, AssetResolverType::DirectoryAssetBundle, "dir"));
        manager.push_back(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "old"));

        manager.update_resolver_by_type(
            Some(TestResolver::boxed(false, AssetResolverType::ApkAssetProvider, "bad")),
            AssetResolverType::ApkAssetProvider,
        );
        assert_eq!(manager.resolver_types(), vec![AssetResolverType::DirectoryAssetBundle]);

        manager.update_resolver_by_type(
            Some(TestResolver::boxed(false, AssetResolverType::ApkAssetProvider, "bad")),
            AssetResolverType::ApkAssetProvider,
        );
        assert_eq!(manager.resolver_types(), vec![AssetResolverType::DirectoryAssetBundle]);
        assert_eq!(manager.get_as_mapping("tag"), Some(b"dir".to_vec()));
    }

    #[test]
    fn invalid_resolvers_are_rejected_and_front_wins() {
        let manager = AssetManager::new();
        assert!(!manager.push_back(TestResolver::boxed(false, AssetResolverType::ApkAssetProvider, "bad")));
        assert_eq!(manager.resolver_count(), 0);
        assert!(!manager.is_valid());

        manager.push_back(TestResolver::boxed(true, AssetResolverType::ApkAssetProvider, "back"));
        manager.push_front(TestResolver::boxed(true, AssetResolverType::DirectoryAssetBundle, "front"));

        assert_eq!(manager.get_as_mapping("tag"), Some(b"front".to_vec()));
        assert_eq!(manager.get_as_mapping("missing"), None);
        assert_eq!(manager.get_as_mapping(""), None);
        assert!(!manager.is_valid_after_asset_manager_change());
    }
}
