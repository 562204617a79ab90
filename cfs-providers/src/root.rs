// SPDX-License-Identifier: AGPL-3.0-or-later
//! The two roots a sync runs between
//!
//! [`ServerRoot`] lays out a Chef server by object type; every server entry
//! below it shares one [`ServerContext`]. [`RepositoryRoot`] maps the same
//! object names onto directories of a local chef-repo, unioning them when an
//! object type is spread over several paths.

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::{
    entry::{ChildCache, Entry, EntryBase, EntryRef},
    error::{CfsError, CfsResult, Operation},
    NonexistentEntry,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::acl::AclsDir;
use crate::api::ChefApi;
use crate::blob_cache::BlobCache;
use crate::cookbook::CookbooksDir;
use crate::disk::{DiskEntry, DiskKind};
use crate::multiplexed::MultiplexedDir;
use crate::rest::{DataBagsDir, RestListDir};

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 10;

/// Which object types are synchronized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoMode {
    /// What a classic chef-repo holds
    Static,
    /// Plus clients, nodes and users
    #[default]
    Everything,
    /// Plus ACLs, containers and groups of an organization
    HostedEverything,
}

impl RepoMode {
    pub fn object_names(&self) -> &'static [&'static str] {
        match self {
            RepoMode::Static => &["cookbooks", "data_bags", "environments", "roles"],
            RepoMode::Everything => {
                &["clients", "cookbooks", "data_bags", "environments", "nodes", "roles", "users"]
            }
            RepoMode::HostedEverything => &[
                "acls",
                "clients",
                "containers",
                "cookbooks",
                "data_bags",
                "environments",
                "groups",
                "nodes",
                "roles",
                "users",
            ],
        }
    }
}

/// State shared by every entry of one server tree
#[derive(Debug)]
pub struct ServerContext {
    pub api: Arc<dyn ChefApi>,
    pub blobs: BlobCache,
    pub repo_mode: RepoMode,
    pub versioned_cookbooks: bool,
    /// Parallel blob uploads per cookbook
    pub upload_concurrency: usize,
}

impl ServerContext {
    pub fn new(api: Arc<dyn ChefApi>) -> Self {
        Self {
            api,
            blobs: BlobCache::new(),
            repo_mode: RepoMode::default(),
            versioned_cookbooks: false,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }
}

/// Root of a Chef server tree
#[derive(Debug)]
pub struct ServerRoot {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    children: Vec<EntryRef>,
}

impl ServerRoot {
    pub fn new(ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let base = EntryBase::root("/", this.clone());
            let mut children: Vec<EntryRef> = ctx
                .repo_mode
                .object_names()
                .iter()
                .map(|name| match *name {
                    "cookbooks" => CookbooksDir::new(&base, name, ctx.clone()) as EntryRef,
                    "data_bags" => DataBagsDir::new(&base, name, ctx.clone()) as EntryRef,
                    "acls" => AclsDir::new(&base, name, ctx.clone()) as EntryRef,
                    _ => RestListDir::collection(&base, name, ctx.clone()) as EntryRef,
                })
                .collect();
            children.sort_by(|a, b| a.name().cmp(b.name()));
            Self { base, ctx, children }
        })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }
}

#[async_trait]
impl Entry for ServerRoot {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        true
    }

    async fn exists(&self) -> CfsResult<bool> {
        Ok(true)
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        Ok(self.children.clone())
    }

    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        Some(self.children.clone())
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        Ok(self
            .children
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .unwrap_or_else(|| NonexistentEntry::new(&self.base, name)))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        is_dir && self.children.iter().any(|c| c.name() == name)
    }
}

/// Root of a local chef-repo
#[derive(Debug)]
pub struct RepositoryRoot {
    base: EntryBase,
    /// Object name to the directories holding it, primary first
    child_paths: BTreeMap<String, Vec<PathBuf>>,
    versioned_cookbooks: bool,
    children: ChildCache,
}

impl RepositoryRoot {
    pub fn new(child_paths: BTreeMap<String, Vec<PathBuf>>, versioned_cookbooks: bool) -> Arc<Self> {
        let printable = child_paths
            .values()
            .flatten()
            .next()
            .and_then(|p| p.parent())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::root(printable, this.clone()),
            child_paths,
            versioned_cookbooks,
            children: ChildCache::new(),
        })
    }

    pub fn child_paths(&self) -> &BTreeMap<String, Vec<PathBuf>> {
        &self.child_paths
    }

    async fn make_child(&self, name: &str, paths: &[PathBuf]) -> EntryRef {
        let kind = DiskKind::for_object(name, self.versioned_cookbooks);
        let mut dirs: Vec<EntryRef> = Vec::new();
        for path in paths {
            if matches!(tokio::fs::try_exists(path).await, Ok(true)) {
                dirs.push(DiskEntry::child_of(&self.base, name, path, kind).await as EntryRef);
            }
        }
        match dirs.len() {
            0 => match paths.first() {
                Some(path) => DiskEntry::child_of(&self.base, name, path, kind).await as EntryRef,
                None => NonexistentEntry::new(&self.base, name),
            },
            1 => dirs.remove(0),
            _ => {
                let primary = dirs.remove(0);
                MultiplexedDir::new(primary, dirs) as EntryRef
            }
        }
    }

    async fn object_dir(&self, name: &str, paths: &[PathBuf]) -> EntryRef {
        if let Some(child) = self.children.lookup(name) {
            return child;
        }
        let made = self.make_child(name, paths).await;
        self.children.get_or_make(name, || made)
    }
}

#[async_trait]
impl Entry for RepositoryRoot {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        true
    }

    async fn exists(&self) -> CfsResult<bool> {
        Ok(true)
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        if let Some(listing) = self.children.listing() {
            return Ok(listing);
        }
        let mut listing = Vec::new();
        for (name, paths) in &self.child_paths {
            let child = self.object_dir(name, paths).await;
            if child.exists().await? {
                listing.push(child);
            }
        }
        self.children.set_listing(listing.clone());
        Ok(listing)
    }

    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        self.children.listing()
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        let Some(paths) = self.child_paths.get(name) else {
            return Ok(NonexistentEntry::new(&self.base, name));
        };
        Ok(self.object_dir(name, paths).await)
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        is_dir && self.child_paths.contains_key(name)
    }

    async fn create_child(&self, name: &str, content: Option<Bytes>) -> CfsResult<EntryRef> {
        let path = self.path().join(name);
        let paths = match (self.child_paths.get(name), content) {
            (Some(paths), None) => paths,
            _ => {
                return Err(CfsError::not_allowed(
                    &path,
                    Operation::CreateChild,
                    "only object directories live at the repository root",
                ))
            }
        };
        for dir in paths {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| CfsError::failed(&path, Operation::CreateChild, e))?;
        }
        self.children.forget(name);
        let child = self.make_child(name, paths).await;
        self.children.insert(child.clone());
        Ok(child)
    }

    fn forget_child(&self, name: &str) {
        self.children.forget(name);
    }
}
