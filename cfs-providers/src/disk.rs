// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local chef-repo backend
//!
//! One [`DiskEntry`] per file or directory. What a directory may hold depends
//! on where it sits in the repository, which [`DiskKind`] records: object
//! directories only hold JSON files, `cookbooks` only holds cookbook
//! directories, and inside a cookbook the segment table and chefignore
//! decide.
//!
//! Whether an entry is a directory is settled when the entry is made, from
//! the directory listing or an async stat, so [`Entry::is_dir`] never touches
//! the filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::{
    checksum::md5_hex,
    entry::{ChildCache, Entry, EntryBase, EntryRef},
    error::{BackendError, CfsError, CfsResult, Operation},
    operations::{self, CopyOptions},
    path::join_printable,
    NonexistentEntry,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::fs;

use crate::chefignore::ChefIgnore;
use crate::manifest::{split_versioned_name, SegmentPolicy};

/// Written into a cookbook directory after a whole-cookbook download
pub const UPLOADED_COOKBOOK_VERSION_FILE: &str = ".uploaded-cookbook-version.json";

/// Role of a directory in a chef-repo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskKind {
    /// Anything goes
    Plain,
    /// `roles`, `nodes`, ...: `*.json` files only
    JsonDir,
    /// Data bag directories
    DataBags,
    /// Collection directories plus `*.json` files
    Acls,
    /// Cookbook directories; in versioned mode named `<name>-<version>`
    Cookbooks { versioned: bool },
    /// One cookbook: segment directories and root files
    Cookbook,
    /// A segment directory or anything below one
    Segment(&'static SegmentPolicy),
}

impl DiskKind {
    /// Role of the repository directory holding objects of `name`
    pub fn for_object(name: &str, versioned_cookbooks: bool) -> Self {
        match name {
            "cookbooks" => DiskKind::Cookbooks { versioned: versioned_cookbooks },
            "data_bags" => DiskKind::DataBags,
            "acls" => DiskKind::Acls,
            _ => DiskKind::JsonDir,
        }
    }

    fn of_child(&self, name: &str) -> Self {
        match self {
            DiskKind::Plain | DiskKind::JsonDir => DiskKind::Plain,
            DiskKind::DataBags | DiskKind::Acls => DiskKind::JsonDir,
            DiskKind::Cookbooks { .. } => DiskKind::Cookbook,
            DiskKind::Cookbook => DiskKind::Segment(
                SegmentPolicy::directory(name).unwrap_or(SegmentPolicy::root_files()),
            ),
            DiskKind::Segment(policy) => DiskKind::Segment(policy),
        }
    }

    /// Directories left empty by filtering disappear from the listing
    fn prunes_empty_dirs(&self) -> bool {
        matches!(self, DiskKind::Cookbook | DiskKind::Segment(_))
    }
}

/// A file or directory of a local chef-repo
#[derive(Debug)]
pub struct DiskEntry {
    base: EntryBase,
    file_path: PathBuf,
    kind: DiskKind,
    dir: bool,
    ignore: Option<Arc<ChefIgnore>>,
    /// Path below the cookbook directory; `Some("")` for the cookbook itself
    cookbook_path: Option<String>,
    children: ChildCache,
}

impl DiskEntry {
    /// Root directory entry over `file_path`
    pub async fn root(file_path: impl Into<PathBuf>, kind: DiskKind) -> Arc<Self> {
        let file_path = file_path.into();
        let printable = file_path.display().to_string();
        let ignore = Self::load_ignore(kind, &file_path).await;
        Self::build(|this| EntryBase::root(printable, this), file_path, kind, true, ignore, None)
    }

    /// Directory entry `name` of `parent`, stored at `file_path`
    pub async fn child_of(parent: &EntryBase, name: &str, file_path: impl Into<PathBuf>, kind: DiskKind) -> Arc<Self> {
        let file_path = file_path.into();
        let printable = file_path.display().to_string();
        let ignore = Self::load_ignore(kind, &file_path).await;
        Self::build(
            |this| EntryBase::child(parent, name, this).with_printable(printable),
            file_path,
            kind,
            true,
            ignore,
            None,
        )
    }

    /// The `cookbooks` directory reads its chefignore once for every cookbook below it
    async fn load_ignore(kind: DiskKind, file_path: &Path) -> Option<Arc<ChefIgnore>> {
        match kind {
            DiskKind::Cookbooks { .. } => Some(Arc::new(ChefIgnore::load(file_path).await)),
            _ => None,
        }
    }

    fn build(
        base: impl FnOnce(Weak<dyn Entry>) -> EntryBase,
        file_path: PathBuf,
        kind: DiskKind,
        dir: bool,
        ignore: Option<Arc<ChefIgnore>>,
        cookbook_path: Option<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: base(this.clone()),
            file_path,
            kind,
            dir,
            ignore,
            cookbook_path,
            children: ChildCache::new(),
        })
    }

    fn make_child(&self, name: &str, dir: bool) -> Arc<Self> {
        let file_path = self.file_path.join(name);
        let printable = file_path.display().to_string();
        let cookbook_path = match (self.kind, &self.cookbook_path) {
            (DiskKind::Cookbooks { .. }, _) => Some(String::new()),
            (_, Some(path)) => Some(join_printable(path, name)),
            (_, None) => None,
        };
        Self::build(
            |this| EntryBase::child(&self.base, name, this).with_printable(printable),
            file_path,
            self.kind.of_child(name),
            dir,
            self.ignore.clone(),
            cookbook_path,
        )
    }

    /// Cached child `name`, remade when it changed between file and directory
    fn child_entry(&self, name: &str, dir: bool) -> EntryRef {
        match self.children.lookup(name) {
            Some(child) if child.is_dir() == dir => child,
            _ => {
                let child: EntryRef = self.make_child(name, dir);
                self.children.insert(child.clone());
                child
            }
        }
    }

    /// Whether `name` is a directory on disk. A missing entry is a directory
    /// when it names a segment or nothing else could live there.
    async fn stat_is_dir(&self, name: &str) -> CfsResult<bool> {
        match fs::metadata(self.file_path.join(name)).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(match self.kind {
                DiskKind::Cookbook => SegmentPolicy::directory(name).is_some(),
                _ => self.can_have_child(name, true) && !self.can_have_child(name, false),
            }),
            Err(e) => Err(CfsError::failed(&self.path().join(name), Operation::Exists, e)),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn kind(&self) -> DiskKind {
        self.kind
    }

    fn is_ignored(&self, name: &str) -> bool {
        match (&self.ignore, &self.cookbook_path) {
            (Some(ignore), Some(path)) => ignore.is_ignored(&join_printable(path, name)),
            _ => false,
        }
    }

    fn io_error(&self, operation: Operation, e: std::io::Error) -> CfsError {
        if e.kind() == ErrorKind::NotFound {
            CfsError::NotFound {
                path: self.path().clone(),
                cause: Some(e.into()),
            }
        } else {
            CfsError::failed(self.path(), operation, e)
        }
    }

    /// Names in the directory, each with whether it is a directory
    async fn entry_names(&self) -> CfsResult<Vec<(String, bool)>> {
        let mut read_dir = fs::read_dir(&self.file_path)
            .await
            .map_err(|e| self.io_error(Operation::Children, e))?;
        let mut names = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| self.io_error(Operation::Children, e))?
        {
            let mut file_type = item
                .file_type()
                .await
                .map_err(|e| self.io_error(Operation::Children, e))?;
            // Follow symlinks, dangling ones count as files.
            if file_type.is_symlink() {
                if let Ok(metadata) = fs::metadata(item.path()).await {
                    file_type = metadata.file_type();
                }
            }
            names.push((item.file_name().to_string_lossy().into_owned(), file_type.is_dir()));
        }
        names.sort();
        Ok(names)
    }

    /// Sync the cookbook tree of `src` into `cookbook`, keeping chefignored files
    async fn sync_cookbook(&self, src: &EntryRef, cookbook: &EntryRef) -> CfsResult<()> {
        let options = CopyOptions { purge: true, ..CopyOptions::default() };
        for (src_child, dest_child) in operations::child_pairs(src, cookbook).await? {
            let report = operations::copy_to(&src_child, &dest_child, &options).await;
            for warning in &report.warnings {
                tracing::warn!("{}", warning);
            }
            if let Some(e) = report.errors.into_iter().next() {
                return Err(e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Entry for DiskEntry {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        self.dir
    }

    async fn exists(&self) -> CfsResult<bool> {
        let metadata = match fs::metadata(&self.file_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CfsError::failed(self.path(), Operation::Exists, e)),
        };
        Ok(self
            .parent()
            .map_or(true, |parent| parent.can_have_child(self.name(), metadata.is_dir())))
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        let mut result = Vec::new();
        for (name, is_dir) in self.entry_names().await? {
            let child = self.child_entry(&name, is_dir);
            if let DiskKind::Cookbooks { versioned: true } = self.kind {
                if is_dir && !name.starts_with('.') && split_versioned_name(&name).is_none() {
                    return Err(CfsError::failed(
                        self.path(),
                        Operation::Children,
                        BackendError::Other(format!(
                            "cookbook directory {} is not named <name>-<version>",
                            child.path_for_printing()
                        )),
                    ));
                }
            }
            if !self.can_have_child(&name, is_dir) {
                continue;
            }
            if is_dir && self.kind.prunes_empty_dirs() && child.children().await?.is_empty() {
                continue;
            }
            if let DiskKind::Cookbooks { .. } = self.kind {
                if child.children().await?.is_empty() {
                    tracing::warn!(
                        "Cookbook '{}' is empty or entirely chefignored at {}",
                        name,
                        child.path_for_printing()
                    );
                    continue;
                }
            }
            result.push(child);
        }
        Ok(result)
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        if !self.can_have_child(name, true) && !self.can_have_child(name, false) {
            return Ok(NonexistentEntry::new(&self.base, name));
        }
        if let Some(child) = self.children.lookup(name) {
            return Ok(child);
        }
        let dir = self.stat_is_dir(name).await?;
        Ok(self.children.get_or_make(name, || self.make_child(name, dir) as EntryRef))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        match self.kind {
            DiskKind::Plain => true,
            DiskKind::JsonDir => !is_dir && name.ends_with(".json"),
            DiskKind::DataBags => is_dir && !name.starts_with('.'),
            DiskKind::Acls => {
                if is_dir {
                    !name.starts_with('.')
                } else {
                    name.ends_with(".json")
                }
            }
            DiskKind::Cookbooks { versioned } => {
                is_dir && !name.starts_with('.') && (!versioned || split_versioned_name(name).is_some())
            }
            DiskKind::Cookbook => {
                (!is_dir || SegmentPolicy::directory(name).is_some())
                    && name != UPLOADED_COOKBOOK_VERSION_FILE
                    && !self.is_ignored(name)
            }
            DiskKind::Segment(policy) => policy.allows(name, is_dir) && !self.is_ignored(name),
        }
    }

    async fn read(&self) -> CfsResult<Bytes> {
        if self.is_dir() {
            return Err(CfsError::not_allowed(self.path(), Operation::Read, "is a directory"));
        }
        fs::read(&self.file_path)
            .await
            .map(Bytes::from)
            .map_err(|e| self.io_error(Operation::Read, e))
    }

    async fn write(&self, content: Bytes) -> CfsResult<()> {
        if self.is_dir() {
            return Err(CfsError::not_allowed(self.path(), Operation::Write, "is a directory"));
        }
        fs::write(&self.file_path, &content)
            .await
            .map_err(|e| self.io_error(Operation::Write, e))
    }

    async fn create_child(&self, name: &str, content: Option<Bytes>) -> CfsResult<EntryRef> {
        if !self.can_have_child(name, content.is_none()) {
            let what = if content.is_some() { "file" } else { "directory" };
            return Err(CfsError::not_allowed(
                &self.path().join(name),
                Operation::CreateChild,
                format!("{} cannot hold a {} named {}", self.path_for_printing(), what, name),
            ));
        }
        let child = self.make_child(name, content.is_none());
        let taken = fs::try_exists(&child.file_path)
            .await
            .map_err(|e| CfsError::failed(child.path(), Operation::CreateChild, e))?;
        if taken {
            return Err(CfsError::already_exists(child.path()));
        }
        let created = match content {
            Some(content) => fs::write(&child.file_path, &content).await,
            None => fs::create_dir(&child.file_path).await,
        };
        created.map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => CfsError::already_exists(child.path()),
            _ => child.io_error(Operation::CreateChild, e),
        })?;
        tracing::debug!("Created {}", child.path_for_printing());
        let child: EntryRef = child;
        self.children.insert(child.clone());
        Ok(child)
    }

    async fn delete(&self, recursive: bool) -> CfsResult<()> {
        let metadata = fs::metadata(&self.file_path)
            .await
            .map_err(|e| self.io_error(Operation::Delete, e))?;
        let removed = if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(&self.file_path).await
            } else {
                let mut read_dir = fs::read_dir(&self.file_path)
                    .await
                    .map_err(|e| self.io_error(Operation::Delete, e))?;
                let empty = read_dir
                    .next_entry()
                    .await
                    .map_err(|e| self.io_error(Operation::Delete, e))?
                    .is_none();
                if !empty {
                    return Err(CfsError::MustDeleteRecursively { path: self.path().clone() });
                }
                fs::remove_dir(&self.file_path).await
            }
        } else {
            fs::remove_file(&self.file_path).await
        };
        removed.map_err(|e| self.io_error(Operation::Delete, e))?;
        if let Some(parent) = self.parent() {
            parent.forget_child(self.name());
        }
        Ok(())
    }

    async fn checksum(&self) -> CfsResult<Option<String>> {
        if self.is_dir() {
            return Ok(None);
        }
        match fs::read(&self.file_path).await {
            Ok(content) => Ok(Some(md5_hex(&content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CfsError::failed(self.path(), Operation::Read, e)),
        }
    }

    fn forget_child(&self, name: &str) {
        self.children.forget(name);
    }

    fn copies_whole_children(&self) -> bool {
        matches!(self.kind, DiskKind::Cookbooks { .. })
    }

    /// Download the cookbook `src` into its directory, then record the
    /// version document it came from
    async fn copy_child_from(&self, src: &EntryRef) -> CfsResult<EntryRef> {
        let path = self.path().join(src.name());
        if !self.copies_whole_children() {
            return Err(CfsError::not_allowed(&path, Operation::CreateChild, "cannot copy whole children"));
        }
        if !self.can_have_child(src.name(), true) {
            return Err(CfsError::not_allowed(
                &path,
                Operation::CreateChild,
                format!("{} is not a valid cookbook directory name", src.name()),
            ));
        }
        let cookbook = self.make_child(src.name(), true);
        fs::create_dir_all(&cookbook.file_path)
            .await
            .map_err(|e| cookbook.io_error(Operation::CreateChild, e))?;
        let marker = cookbook.file_path.join(UPLOADED_COOKBOOK_VERSION_FILE);
        let cookbook_ref: EntryRef = cookbook;
        self.children.insert(cookbook_ref.clone());

        self.sync_cookbook(src, &cookbook_ref).await?;

        match src.chef_object().await {
            Ok(version) => {
                let json = serde_json::to_vec_pretty(&version)
                    .map_err(|e| CfsError::failed(&path, Operation::Write, e))?;
                fs::write(&marker, json)
                    .await
                    .map_err(|e| CfsError::failed(&path, Operation::Write, e))?;
            }
            Err(e) => tracing::debug!("No version document for {}: {}", src.path_for_printing(), e),
        }
        tracing::debug!("Copied cookbook {}", cookbook_ref.path_for_printing());
        Ok(cookbook_ref)
    }
}
