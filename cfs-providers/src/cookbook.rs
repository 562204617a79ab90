// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server cookbooks
//!
//! The server has no directory tree for a cookbook, only a manifest. A
//! [`CookbookDir`] fetches that manifest once and rebuilds the tree from the
//! file paths in it: [`CookbookSubdir`] nodes for every directory on the way
//! and a [`CookbookFile`] per record. Blobs are read through the server's
//! [`BlobCache`](crate::BlobCache) and compared by checksum.

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::{
    entry::{ChildCache, Comparison, Content, Entry, EntryBase, EntryRef},
    error::{BackendError, CfsError, CfsResult, Operation},
    operations::trees_differ,
    NonexistentEntry,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;

use crate::manifest::{split_versioned_name, CookbookManifest, ManifestFile, SegmentPolicy};
use crate::rest::{exists_on_server, KnownExists};
use crate::root::ServerContext;
use crate::upload;

/// The `cookbooks` directory of a server
#[derive(Debug)]
pub struct CookbooksDir {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    children: ChildCache,
}

impl CookbooksDir {
    pub fn new(parent: &EntryBase, name: &str, ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, name, this.clone()),
            ctx,
            children: ChildCache::new(),
        })
    }

    fn make_cookbook(&self, name: &str, version: Option<String>, exists: Option<bool>) -> Arc<CookbookDir> {
        let (cookbook_name, version) = match split_versioned_name(name) {
            Some((cookbook_name, version)) if self.ctx.versioned_cookbooks => {
                (cookbook_name.to_string(), Some(version.to_string()))
            }
            _ => (name.to_string(), version),
        };
        Arc::new_cyclic(|this: &Weak<CookbookDir>| CookbookDir {
            base: EntryBase::child(&self.base, name, this.clone()),
            ctx: self.ctx.clone(),
            cookbook_name,
            version,
            exists: KnownExists::new(exists),
            manifest: OnceCell::new(),
            children: ChildCache::new(),
        })
    }

    /// Name and version a local cookbook directory uploads as
    fn identify(&self, src: &EntryRef, files: &[upload::LocalFile]) -> CfsResult<(String, String, Value)> {
        let (name, version, metadata) = upload::cookbook_metadata(src.name(), files);
        if !self.ctx.versioned_cookbooks {
            return Ok((name, version, metadata));
        }
        match split_versioned_name(src.name()) {
            Some((name, version)) => {
                let mut metadata = metadata;
                if let Some(fields) = metadata.as_object_mut() {
                    fields.insert("name".into(), name.into());
                    fields.insert("version".into(), version.into());
                }
                Ok((name.to_string(), version.to_string(), metadata))
            }
            None => Err(CfsError::not_allowed(
                src.path(),
                Operation::Upload,
                "cookbook directories must be named <name>-<version>",
            )),
        }
    }
}

#[async_trait]
impl Entry for CookbooksDir {
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
        let index = self
            .ctx
            .api
            .get("cookbooks?num_versions=all")
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Children, e))?;
        let Value::Object(index) = index else {
            return Err(CfsError::failed(
                self.path(),
                Operation::Children,
                BackendError::Other("cookbooks did not return a JSON object".into()),
            ));
        };

        // name -> version hint
        let mut found: Vec<(String, Option<String>)> = Vec::new();
        for (cookbook, info) in &index {
            let versions: Vec<String> = info
                .get("versions")
                .and_then(Value::as_array)
                .map(|versions| {
                    versions
                        .iter()
                        .filter_map(|v| v.get("version").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if self.ctx.versioned_cookbooks {
                for version in versions {
                    found.push((format!("{}-{}", cookbook, version), Some(version)));
                }
            } else {
                found.push((cookbook.clone(), versions.into_iter().next()));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let listing: Vec<EntryRef> = found
            .into_iter()
            .map(|(name, version)| {
                self.children
                    .get_or_make(&name, || self.make_cookbook(&name, version, Some(true)) as EntryRef)
            })
            .collect();
        self.children.set_listing(listing.clone());
        Ok(listing)
    }

    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        self.children.listing()
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        if !self.can_have_child(name, true) {
            return Ok(NonexistentEntry::new(&self.base, name));
        }
        Ok(self
            .children
            .get_or_make(name, || self.make_cookbook(name, None, None) as EntryRef))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        is_dir
            && !name.starts_with('.')
            && (!self.ctx.versioned_cookbooks || split_versioned_name(name).is_some())
    }

    async fn create_child(&self, name: &str, _content: Option<Bytes>) -> CfsResult<EntryRef> {
        Err(CfsError::not_allowed(
            &self.path().join(name),
            Operation::CreateChild,
            "cookbooks are uploaded as a whole",
        ))
    }

    fn copies_whole_children(&self) -> bool {
        true
    }

    /// Upload the local cookbook `src` as one new cookbook version
    async fn copy_child_from(&self, src: &EntryRef) -> CfsResult<EntryRef> {
        let path = self.path().join(src.name());
        let files = upload::collect_files(src).await?;
        let (name, version, metadata) = self.identify(src, &files)?;
        let mut manifest = CookbookManifest::new(&name, &version, metadata);
        for file in &files {
            manifest.add_file(ManifestFile::for_upload(&file.path, file.checksum.clone()));
        }
        upload::upload_cookbook(&self.ctx, &path, &manifest, files).await?;
        tracing::debug!("Uploaded cookbook {} {}", name, version);

        let cookbook: EntryRef = self.make_cookbook(src.name(), Some(version), Some(true));
        self.children.insert(cookbook.clone());
        Ok(cookbook)
    }

    fn forget_child(&self, name: &str) {
        self.children.forget(name);
    }
}

/// One cookbook version, its tree rebuilt from the manifest
#[derive(Debug)]
pub struct CookbookDir {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    cookbook_name: String,
    /// From the name in versioned mode, otherwise the listing's latest version
    version: Option<String>,
    exists: KnownExists,
    manifest: OnceCell<CookbookManifest>,
    children: ChildCache,
}

impl CookbookDir {
    pub fn cookbook_name(&self) -> &str {
        &self.cookbook_name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn manifest_api_path(&self) -> String {
        match (&self.version, self.ctx.versioned_cookbooks) {
            (Some(version), true) => format!("cookbooks/{}/{}", self.cookbook_name, version),
            _ => format!("cookbooks/{}/_latest", self.cookbook_name),
        }
    }

    /// The manifest, fetched on first use
    pub async fn manifest(&self) -> CfsResult<&CookbookManifest> {
        self.manifest
            .get_or_try_init(|| async {
                let api_path = self.manifest_api_path();
                tracing::debug!("Fetching manifest {}", api_path);
                let value = self
                    .ctx
                    .api
                    .get(&api_path)
                    .await
                    .map_err(|e| CfsError::from_backend(self.path(), Operation::Children, e))?;
                CookbookManifest::from_value(&value)
                    .map_err(|e| CfsError::failed(self.path(), Operation::Children, e))
            })
            .await
    }

    fn build_tree(&self, manifest: &CookbookManifest) -> Vec<EntryRef> {
        let mut top = TreeNode::default();
        for (policy, file) in manifest.files() {
            if !top.insert(policy, file) {
                tracing::warn!(
                    "Skipping {} in {}: a {} file cannot live there",
                    file.path,
                    self.path_for_printing(),
                    policy.name
                );
            }
        }
        top.materialize(&self.base, &self.ctx)
    }
}

#[async_trait]
impl Entry for CookbookDir {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        true
    }

    async fn exists(&self) -> CfsResult<bool> {
        if let Some(known) = self.exists.get() {
            return Ok(known);
        }
        // The parent fetches the cookbook index once for all its cookbooks.
        let found = match self.parent() {
            Some(parent) => parent.children().await?.iter().any(|c| c.name() == self.name()),
            None => {
                let api_path = match (&self.version, self.ctx.versioned_cookbooks) {
                    (Some(version), true) => format!("cookbooks/{}/{}", self.cookbook_name, version),
                    _ => format!("cookbooks/{}", self.cookbook_name),
                };
                exists_on_server(&self.ctx, &api_path, self.path()).await?
            }
        };
        self.exists.set(found);
        Ok(found)
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        if let Some(listing) = self.children.listing() {
            return Ok(listing);
        }
        if !self.exists().await? {
            return Err(CfsError::not_found(self.path()));
        }
        let manifest = self.manifest().await?;
        let listing = self.build_tree(manifest);
        self.children.set_listing(listing.clone());
        Ok(listing)
    }

    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        self.children.listing()
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        if !self.exists().await? {
            return Ok(NonexistentEntry::new(&self.base, name));
        }
        self.children().await?;
        Ok(self
            .children
            .lookup(name)
            .unwrap_or_else(|| NonexistentEntry::new(&self.base, name)))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        !is_dir || SegmentPolicy::directory(name).is_some()
    }

    async fn delete(&self, recursive: bool) -> CfsResult<()> {
        if !recursive {
            return Err(CfsError::MustDeleteRecursively { path: self.path().clone() });
        }
        let version = match &self.version {
            Some(version) => version.clone(),
            None => self
                .manifest()
                .await?
                .version
                .clone()
                .ok_or_else(|| {
                    CfsError::failed(self.path(), Operation::Delete, BackendError::Other("manifest has no version".into()))
                })?,
        };
        let api_path = format!("cookbooks/{}/{}", self.cookbook_name, version);
        self.ctx
            .api
            .delete(&api_path)
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Delete, e))?;
        self.exists.set(false);
        if let Some(parent) = self.parent() {
            parent.forget_child(self.name());
        }
        Ok(())
    }

    /// The cookbook version document
    async fn chef_object(&self) -> CfsResult<Value> {
        if !self.exists().await? {
            return Err(CfsError::not_found(self.path()));
        }
        Ok(self.manifest().await?.to_value())
    }

    /// Same or different as a whole, without values
    async fn compare_to(&self, other: &EntryRef) -> CfsResult<Comparison> {
        let Some(me) = self.base.handle().upgrade() else {
            return Ok(Comparison::unknown());
        };
        if !other.is_dir() {
            return Ok(Comparison::decided(false, Content::Unknown, Content::Unknown));
        }
        let differ = trees_differ(&me, other).await?;
        Ok(Comparison::decided(!differ, Content::Unknown, Content::Unknown))
    }
}

/// Directory layout collected from manifest paths
#[derive(Default)]
struct TreeNode {
    policy: Option<&'static SegmentPolicy>,
    dirs: BTreeMap<String, TreeNode>,
    files: Vec<ManifestFile>,
}

impl TreeNode {
    /// Place `file` by its path. False when the path needs a directory the
    /// cookbook tree cannot hold, like `test/helper.rb` among root files.
    fn insert(&mut self, policy: &'static SegmentPolicy, file: &ManifestFile) -> bool {
        let mut parts: Vec<&str> = file.path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.pop().is_none() {
            return false;
        }
        let top_is_segment = parts.first().map_or(true, |top| SegmentPolicy::directory(top).is_some());
        if !top_is_segment || (parts.len() > 1 && !policy.recursive) {
            return false;
        }
        let mut node = self;
        for part in parts {
            node = node.dirs.entry(part.to_string()).or_insert_with(|| TreeNode {
                policy: Some(policy),
                ..TreeNode::default()
            });
        }
        node.files.push(file.clone());
        true
    }

    fn materialize(self, parent: &EntryBase, ctx: &Arc<ServerContext>) -> Vec<EntryRef> {
        let mut entries: Vec<EntryRef> = Vec::new();
        for (name, node) in self.dirs {
            let policy = node.policy.unwrap_or(SegmentPolicy::root_files());
            let subdir = CookbookSubdir::new(parent, &name, policy);
            let children = node.materialize(&subdir.base, ctx);
            subdir.children.set_listing(children);
            entries.push(subdir);
        }
        for file in self.files {
            entries.push(CookbookFile::new(parent, file, ctx.clone()));
        }
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }
}

/// A directory inside a cookbook
#[derive(Debug)]
pub struct CookbookSubdir {
    base: EntryBase,
    policy: &'static SegmentPolicy,
    children: ChildCache,
}

impl CookbookSubdir {
    fn new(parent: &EntryBase, name: &str, policy: &'static SegmentPolicy) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, name, this.clone()),
            policy,
            children: ChildCache::new(),
        })
    }

    pub fn policy(&self) -> &'static SegmentPolicy {
        self.policy
    }
}

#[async_trait]
impl Entry for CookbookSubdir {
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
        Ok(self.children.listing().unwrap_or_default())
    }

    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        self.children.listing()
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        Ok(self
            .children
            .lookup(name)
            .unwrap_or_else(|| NonexistentEntry::new(&self.base, name)))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        self.policy.allows(name, is_dir)
    }
}

/// One file of a cookbook manifest
#[derive(Debug)]
pub struct CookbookFile {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    file: ManifestFile,
}

impl CookbookFile {
    fn new(parent: &EntryBase, file: ManifestFile, ctx: Arc<ServerContext>) -> Arc<Self> {
        let name = file.path.rsplit('/').next().unwrap_or(&file.name).to_string();
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, &name, this.clone()),
            ctx,
            file,
        })
    }

    pub fn record(&self) -> &ManifestFile {
        &self.file
    }
}

#[async_trait]
impl Entry for CookbookFile {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        false
    }

    async fn exists(&self) -> CfsResult<bool> {
        Ok(true)
    }

    async fn read(&self) -> CfsResult<Bytes> {
        let Some(url) = &self.file.url else {
            return Err(CfsError::failed(
                self.path(),
                Operation::Read,
                BackendError::Other(format!("no download URL for {}", self.file.path)),
            ));
        };
        self.ctx
            .blobs
            .get_or_fetch(&self.file.checksum, self.ctx.api.get_raw(url))
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Read, e))
    }

    async fn checksum(&self) -> CfsResult<Option<String>> {
        Ok(Some(self.file.checksum.clone()))
    }

    async fn compare_to(&self, other: &EntryRef) -> CfsResult<Comparison> {
        if !other.exists().await? {
            return Ok(Comparison::decided(false, Content::Unknown, Content::Missing));
        }
        if other.is_dir() {
            return Ok(Comparison::unknown());
        }
        match other.checksum().await? {
            Some(checksum) => Ok(Comparison::decided(
                checksum == self.file.checksum,
                Content::Unknown,
                Content::Unknown,
            )),
            None => Ok(Comparison::unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskEntry, DiskKind, UPLOADED_COOKBOOK_VERSION_FILE};
    use crate::fake::FakeApi;
    use cfs_core::{checksum::md5_hex, operations, MemoryEntry};
    use serde_json::json;

    struct Server {
        api: Arc<FakeApi>,
        ctx: Arc<ServerContext>,
        _root: Arc<MemoryEntry>,
        cookbooks: Arc<CookbooksDir>,
    }

    fn server(versioned: bool) -> Server {
        let api = FakeApi::new();
        let mut ctx = ServerContext::new(api.clone());
        ctx.versioned_cookbooks = versioned;
        let ctx = Arc::new(ctx);
        let root = MemoryEntry::root("/");
        let cookbooks = CookbooksDir::new(root.base(), "cookbooks", ctx.clone());
        Server { api, ctx, _root: root, cookbooks }
    }

    fn index() -> Value {
        json!({
            "apache2": { "versions": [{ "version": "2.0.0" }, { "version": "1.0.0" }] },
            "mysql": { "versions": [{ "version": "0.1.0" }] }
        })
    }

    async fn names(entry: &EntryRef) -> Vec<String> {
        entry.children().await.unwrap().iter().map(|c| c.name().to_string()).collect()
    }

    #[tokio::test]
    async fn test_listing() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", index());
        let cookbooks: EntryRef = s.cookbooks.clone();
        assert_eq!(names(&cookbooks).await, vec!["apache2", "mysql"]);
        s.api.clear_calls();
        let apache = s.cookbooks.child("apache2").await.unwrap();
        assert!(apache.exists().await.unwrap());
        assert!(!s.cookbooks.child("nginx").await.unwrap().exists().await.unwrap());
        assert!(s.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_versioned_listing() {
        let s = server(true);
        s.api.set("cookbooks?num_versions=all", index());
        let cookbooks: EntryRef = s.cookbooks.clone();
        assert_eq!(names(&cookbooks).await, vec!["apache2-1.0.0", "apache2-2.0.0", "mysql-0.1.0"]);
        assert!(!s.cookbooks.can_have_child("apache2", true));
        assert!(!s.cookbooks.child("apache2").await.unwrap().exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_manifest_tree() {
        let s = server(false);
        s.api.set(
            "cookbooks/foo/_latest",
            json!({
                "cookbook_name": "foo",
                "version": "1.0.0",
                "recipes": [{ "name": "default.rb", "path": "recipes/default.rb", "checksum": "abc", "url": "https://blobs/abc" }],
                "templates": [{ "name": "motd.erb", "path": "templates/default/motd.erb", "checksum": "def", "url": "https://blobs/def" }],
                "root_files": [{ "name": "metadata.rb", "path": "metadata.rb", "checksum": "123", "url": "https://blobs/123" }]
            }),
        );
        s.api.set("cookbooks?num_versions=all", json!({ "foo": { "versions": [{ "version": "1.0.0" }] } }));
        s.api.set_blob("https://blobs/abc", "package 'foo'");

        let foo = s.cookbooks.child("foo").await.unwrap();
        assert_eq!(names(&foo).await, vec!["metadata.rb", "recipes", "templates"]);
        let recipes = foo.child("recipes").await.unwrap();
        assert_eq!(names(&recipes).await, vec!["default.rb"]);
        let default = recipes.child("default.rb").await.unwrap();
        assert_eq!(default.path().to_string(), "/cookbooks/foo/recipes/default.rb");
        assert!(!recipes.can_have_child("README.md", false));
        assert!(!recipes.can_have_child("nested", true));

        let templates = foo.child("templates").await.unwrap();
        let motd = templates.child("default").await.unwrap().child("motd.erb").await.unwrap();
        assert!(motd.exists().await.unwrap());

        assert_eq!(default.read().await.unwrap(), Bytes::from("package 'foo'"));
        assert_eq!(default.read().await.unwrap(), Bytes::from("package 'foo'"));
        assert_eq!(s.api.calls_to("GET").iter().filter(|p| p.as_str() == "https://blobs/abc").count(), 1);
        assert_eq!(s.api.calls_to("GET").iter().filter(|p| p.as_str() == "cookbooks/foo/_latest").count(), 1);
        assert_eq!(s.ctx.blobs.stats().hits, 1);

        assert!(!foo.child("bogus").await.unwrap().exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_fetches_the_index_once() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", index());
        let apache = s.cookbooks.child("apache2").await.unwrap();
        let mysql = s.cookbooks.child("mysql").await.unwrap();
        let nginx = s.cookbooks.child("nginx").await.unwrap();

        assert!(apache.exists().await.unwrap());
        assert!(mysql.exists().await.unwrap());
        assert!(!nginx.exists().await.unwrap());
        assert!(apache.exists().await.unwrap());
        assert_eq!(s.api.calls_to("GET"), vec!["cookbooks?num_versions=all"]);
    }

    #[tokio::test]
    async fn test_exists_fails_with_the_index() {
        let s = server(false);
        s.api.fail("GET", "cookbooks?num_versions=all", 500);
        let apache = s.cookbooks.child("apache2").await.unwrap();
        assert!(matches!(apache.exists().await.unwrap_err(), CfsError::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn test_children_keep_identity() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", index());
        s.api.set(
            "cookbooks/apache2/_latest",
            json!({ "recipes": [{ "name": "default.rb", "path": "recipes/default.rb", "checksum": "abc" }] }),
        );
        let cookbooks: EntryRef = s.cookbooks.clone();
        let first = cookbooks.children().await.unwrap();
        let second = cookbooks.children().await.unwrap();
        for (a, b) in first.iter().zip(&second) {
            assert!(Arc::ptr_eq(a, b));
        }

        let apache = &first[0];
        let recipes = apache.children().await.unwrap();
        assert!(Arc::ptr_eq(&recipes[0], &apache.children().await.unwrap()[0]));
        assert!(Arc::ptr_eq(&recipes[0], &apache.child("recipes").await.unwrap()));
        let files = recipes[0].children().await.unwrap();
        assert!(Arc::ptr_eq(&files[0], &recipes[0].children().await.unwrap()[0]));
    }

    #[tokio::test]
    async fn test_unplaceable_manifest_paths_are_skipped() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", json!({ "foo": { "versions": [{ "version": "1.0.0" }] } }));
        s.api.set(
            "cookbooks/foo/_latest",
            json!({
                "recipes": [{ "name": "x.rb", "path": "recipes/nested/x.rb", "checksum": "1" }],
                "root_files": [
                    { "name": "metadata.rb", "path": "metadata.rb", "checksum": "2" },
                    { "name": "helper.rb", "path": "test/helper.rb", "checksum": "3" }
                ]
            }),
        );
        let foo = s.cookbooks.child("foo").await.unwrap();
        let children = foo.children().await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name(), "metadata.rb");
        for child in &children {
            assert!(foo.can_have_child(child.name(), child.is_dir()));
        }
    }

    #[tokio::test]
    async fn test_download_records_the_version_document() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", json!({ "foo": { "versions": [{ "version": "1.0.0" }] } }));
        s.api.set(
            "cookbooks/foo/_latest",
            json!({
                "cookbook_name": "foo",
                "version": "1.0.0",
                "recipes": [{ "name": "default.rb", "path": "recipes/default.rb", "checksum": md5_hex(b"package 'foo'"), "url": "https://blobs/abc" }]
            }),
        );
        s.api.set_blob("https://blobs/abc", "package 'foo'");
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("cookbooks")).unwrap();
        let local: EntryRef = DiskEntry::root(tmp.path().join("cookbooks"), DiskKind::Cookbooks { versioned: false }).await;
        let remote: EntryRef = s.cookbooks.clone();

        let report = operations::copy_to(&remote, &local, &operations::CopyOptions::default()).await;
        assert!(report.is_success(), "{:?}", report.errors);
        let base = tmp.path().join("cookbooks/foo");
        assert_eq!(std::fs::read_to_string(base.join("recipes/default.rb")).unwrap(), "package 'foo'");
        let marker: Value =
            serde_json::from_slice(&std::fs::read(base.join(UPLOADED_COOKBOOK_VERSION_FILE)).unwrap()).unwrap();
        assert_eq!(marker["cookbook_name"], "foo");
        assert_eq!(marker["version"], "1.0.0");
        assert_eq!(marker["recipes"][0]["path"], "recipes/default.rb");

        let again = operations::copy_to(&remote, &local, &operations::CopyOptions::default()).await;
        assert!(again.is_success(), "{:?}", again.errors);
        assert!(again.events.is_empty());
    }

    #[tokio::test]
    async fn test_unversioned_name_needs_no_request() {
        let s = server(true);
        let foo = s.cookbooks.child("foo").await.unwrap();
        assert!(!foo.exists().await.unwrap());
        assert!(s.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_file_compare_by_checksum() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", json!({ "foo": { "versions": [{ "version": "1.0.0" }] } }));
        let sum = md5_hex(b"package 'foo'");
        s.api.set(
            "cookbooks/foo/_latest",
            json!({ "recipes": [{ "name": "default.rb", "path": "recipes/default.rb", "checksum": sum, "url": "https://blobs/x" }] }),
        );
        s.cookbooks.children().await.unwrap();
        let remote = s.cookbooks.child("foo").await.unwrap();
        let remote_file = remote.child("recipes").await.unwrap().child("default.rb").await.unwrap();

        let local = MemoryEntry::from_json("local", &json!({ "recipes": { "default.rb": "package 'foo'" } }));
        let local: EntryRef = local;
        let local_file = operations::resolve_path(&local, "recipes/default.rb").await.unwrap();
        let c = operations::compare(&local_file, &remote_file).await.unwrap();
        assert_eq!(c.same, Some(true));
        assert!(s.api.calls_to("GET").iter().all(|p| !p.starts_with("https://")));

        local_file.write(Bytes::from("changed")).await.unwrap();
        assert_eq!(remote_file.compare_to(&local_file).await.unwrap().same, Some(false));
        assert!(!operations::trees_differ(&remote, &remote).await.unwrap());
        assert!(operations::trees_differ(&local, &remote).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", index());
        s.api.set("cookbooks/apache2/2.0.0", json!({}));
        let cookbooks: EntryRef = s.cookbooks.clone();
        cookbooks.children().await.unwrap();
        let apache = s.cookbooks.child("apache2").await.unwrap();

        let err = apache.delete(false).await.unwrap_err();
        assert!(matches!(err, CfsError::MustDeleteRecursively { .. }));
        apache.delete(true).await.unwrap();
        assert_eq!(s.api.calls_to("DELETE"), vec!["cookbooks/apache2/2.0.0"]);
        assert_eq!(names(&cookbooks).await, vec!["mysql"]);
    }

    fn local_cookbook() -> EntryRef {
        MemoryEntry::from_json(
            "local",
            &json!({
                "cookbooks": {
                    "foo": {
                        "metadata.rb": "name 'foo'\nversion '1.2.3'\n",
                        "recipes": { "default.rb": "package 'foo'" }
                    }
                }
            }),
        )
    }

    fn sandbox(api: &FakeApi, needs_upload: bool) {
        let mut checksums = serde_json::Map::new();
        for content in ["name 'foo'\nversion '1.2.3'\n", "package 'foo'"] {
            let sum = md5_hex(content.as_bytes());
            checksums.insert(
                sum.clone(),
                json!({ "url": format!("https://blobs/{}", sum), "needs_upload": needs_upload }),
            );
        }
        api.respond_to_post("sandboxes", json!({ "sandbox_id": "sb1", "checksums": checksums }));
    }

    #[tokio::test]
    async fn test_upload_through_copy_to() {
        let s = server(false);
        s.api.set("cookbooks?num_versions=all", json!({}));
        sandbox(&s.api, true);
        let local = local_cookbook();
        let src = operations::resolve_path(&local, "/cookbooks").await.unwrap();
        let dest: EntryRef = s.cookbooks.clone();

        let report = operations::copy_to(&src, &dest, &operations::CopyOptions::default()).await;
        assert!(report.is_success(), "{:?}", report.errors);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].action, operations::CopyAction::Create);

        let puts = s.api.calls_to("PUT");
        assert_eq!(puts.len(), 4);
        assert_eq!(puts[2], "sandboxes/sb1");
        assert_eq!(puts[3], "cookbooks/foo/1.2.3");
        assert_eq!(s.api.calls_to("POST"), vec!["sandboxes"]);

        let manifest = s.api.doc("cookbooks/foo/1.2.3").unwrap();
        assert_eq!(manifest["recipes"][0]["path"], "recipes/default.rb");
        assert_eq!(manifest["root_files"][0]["name"], "metadata.rb");
        assert_eq!(s.api.doc("sandboxes/sb1").unwrap(), json!({ "is_completed": true }));
        let sum = md5_hex(b"package 'foo'");
        assert_eq!(s.api.blob(&format!("https://blobs/{}", sum)).unwrap(), Bytes::from("package 'foo'"));
        assert!(s.ctx.blobs.get(&sum).is_some());
    }

    #[tokio::test]
    async fn test_upload_skips_blobs_the_server_has() {
        let s = server(false);
        sandbox(&s.api, false);
        let local = local_cookbook();
        let foo = operations::resolve_path(&local, "/cookbooks/foo").await.unwrap();
        s.cookbooks.copy_child_from(&foo).await.unwrap();
        assert_eq!(s.api.calls_to("PUT"), vec!["sandboxes/sb1", "cookbooks/foo/1.2.3"]);
    }

    #[tokio::test]
    async fn test_upload_fails_together() {
        let s = server(false);
        sandbox(&s.api, true);
        let bad = format!("https://blobs/{}", md5_hex(b"package 'foo'"));
        s.api.fail("PUT", &bad, 500);
        let local = local_cookbook();
        let foo = operations::resolve_path(&local, "/cookbooks/foo").await.unwrap();

        let err = s.cookbooks.copy_child_from(&foo).await.unwrap_err();
        match err {
            CfsError::OperationFailed { operation: Operation::Upload, cause: BackendError::Aggregate(ref errors), .. } => {
                assert_eq!(errors.len(), 1)
            }
            other => panic!("unexpected error: {other}"),
        }
        let puts = s.api.calls_to("PUT");
        assert_eq!(puts.len(), 2);
        assert!(puts.iter().all(|p| p.starts_with("https://blobs/")));
    }

    #[tokio::test]
    async fn test_upload_frozen_version() {
        let s = server(false);
        sandbox(&s.api, false);
        s.api.fail("PUT", "cookbooks/foo/1.2.3", 409);
        let local = local_cookbook();
        let foo = operations::resolve_path(&local, "/cookbooks/foo").await.unwrap();
        let err = s.cookbooks.copy_child_from(&foo).await.unwrap_err();
        assert!(matches!(err, CfsError::CookbookFrozen { .. }));
    }

    #[tokio::test]
    async fn test_versioned_upload_uses_directory_name() {
        let s = server(true);
        sandbox(&s.api, false);
        let local = MemoryEntry::from_json(
            "local",
            &json!({ "foo-2.0.0": { "metadata.rb": "name 'foo'\nversion '1.2.3'\n", "recipes": { "default.rb": "package 'foo'" } } }),
        );
        let local: EntryRef = local;
        let foo = local.child("foo-2.0.0").await.unwrap();
        let uploaded = s.cookbooks.copy_child_from(&foo).await.unwrap();
        assert_eq!(uploaded.name(), "foo-2.0.0");
        assert!(s.api.doc("cookbooks/foo/2.0.0").is_some());
    }
}
