// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backends for Chef FS
//!
//! A local chef-repo on disk (optionally spread over several search paths and
//! unioned with [`MultiplexedDir`]) and a Chef server reached through the
//! [`ChefApi`] trait, including the manifest-driven cookbook tree and the ACL
//! tree. [`ChefFsConfig`] builds both roots.

pub mod acl;
pub mod api;
pub mod blob_cache;
pub mod chefignore;
pub mod config;
pub mod cookbook;
pub mod disk;
pub mod manifest;
pub mod multiplexed;
pub mod rest;
pub mod root;
mod upload;

#[cfg(test)]
pub(crate) mod fake;

pub use acl::{AclDir, AclEntry, AclsDir};
pub use api::{ChefApi, HttpApi};
pub use blob_cache::{BlobCache, BlobCacheStats, DEFAULT_BLOB_CACHE_BYTES, DEFAULT_BLOB_CACHE_ENTRIES};
pub use chefignore::ChefIgnore;
pub use config::{ChefFsConfig, ConfigError};
pub use cookbook::{CookbookDir, CookbookFile, CookbookSubdir, CookbooksDir};
pub use disk::{DiskEntry, DiskKind, UPLOADED_COOKBOOK_VERSION_FILE};
pub use manifest::{CookbookManifest, ManifestFile, SegmentPolicy, SEGMENTS};
pub use multiplexed::MultiplexedDir;
pub use rest::{DataBagsDir, RestItem, RestListDir};
pub use root::{RepoMode, RepositoryRoot, ServerContext, ServerRoot};
