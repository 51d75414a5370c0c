//! Asset lookup for the shell.
//!
//! An [`AssetManager`] is an ordered list of [`AssetResolver`]s. Lookups walk
//! the list front to back and the first resolver that knows the asset wins.

mod asset_manager;
mod asset_resolver;
mod directory_asset_bundle;

pub use asset_manager::AssetManager;
pub use asset_resolver::{AssetResolver, AssetResolverType};
pub use directory_asset_bundle::DirectoryAssetBundle;
