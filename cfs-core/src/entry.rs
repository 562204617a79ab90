// SPDX-License-Identifier: AGPL-3.0-or-later
//! The entry contract
//!
//! An entry is a node in a Chef FS tree: a directory or a file-like leaf,
//! backed by disk, a Chef server, memory, or a union of other entries.
//!
//! Ownership flows strictly downwards. A directory owns the children it hands
//! out (through its [`ChildCache`]) and a child only keeps a [`Weak`] handle to
//! its parent, so holding the root keeps the whole traversed tree alive and no
//! reference cycle is ever formed. Entries are rebuilt per traversal.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::{
    error::{CfsError, CfsResult, Operation},
    path::join_printable,
    ChefPath, NonexistentEntry,
};

/// Shared handle to an entry
pub type EntryRef = Arc<dyn Entry>;

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Not computed; the caller has to `read()` it
    Unknown,
    /// The entry does not exist
    Missing,
    Bytes(Bytes),
}

impl Content {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Content::Unknown)
    }
}

/// Result of [`Entry::compare_to`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    /// `None` when the backend has no cheap answer
    pub same: Option<bool>,
    pub own: Content,
    pub other: Content,
}

impl Comparison {
    pub fn unknown() -> Self {
        Self { same: None, own: Content::Unknown, other: Content::Unknown }
    }

    pub fn decided(same: bool, own: Content, other: Content) -> Self {
        Self { same: Some(same), own, other }
    }
}

/// Identity shared by every entry: name, parent link and derived paths
#[derive(Debug, Clone)]
pub struct EntryBase {
    name: String,
    path: ChefPath,
    printable: String,
    parent: Option<Weak<dyn Entry>>,
    this: Weak<dyn Entry>,
}

impl EntryBase {
    /// Base of a root entry. Roots have an empty name and the path `/`.
    pub fn root(printable: impl Into<String>, this: Weak<dyn Entry>) -> Self {
        Self {
            name: String::new(),
            path: ChefPath::root(),
            printable: printable.into(),
            parent: None,
            this,
        }
    }

    /// Base of the child `name` of `parent`
    pub fn child(parent: &EntryBase, name: impl Into<String>, this: Weak<dyn Entry>) -> Self {
        let name = name.into();
        Self {
            path: parent.path.join(&name),
            printable: join_printable(&parent.printable, &name),
            name,
            parent: Some(parent.this.clone()),
            this,
        }
    }

    /// Same identity as `other`, for entries standing in for another one
    pub fn mirror(other: &EntryBase, this: Weak<dyn Entry>) -> Self {
        Self { this, ..other.clone() }
    }

    /// Override the printable path (disk entries print their file path)
    pub fn with_printable(mut self, printable: impl Into<String>) -> Self {
        self.printable = printable.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &ChefPath {
        &self.path
    }

    pub fn printable(&self) -> &str {
        &self.printable
    }

    /// The parent, if it is still alive
    pub fn parent(&self) -> Option<EntryRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Non-owning handle to the entry this base belongs to
    pub fn handle(&self) -> Weak<dyn Entry> {
        self.this.clone()
    }
}

/// The contract every backend satisfies
#[async_trait]
pub trait Entry: Send + Sync + fmt::Debug {
    fn base(&self) -> &EntryBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn path(&self) -> &ChefPath {
        self.base().path()
    }

    /// Root-relative, human readable location
    fn path_for_printing(&self) -> &str {
        self.base().printable()
    }

    fn parent(&self) -> Option<EntryRef> {
        self.base().parent()
    }

    fn is_dir(&self) -> bool;

    /// Whether the entry exists. Errors only on backend failure.
    async fn exists(&self) -> CfsResult<bool>;

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        Err(CfsError::not_allowed(self.path(), Operation::Children, "not a directory"))
    }

    /// Children already fetched by an earlier `children()` call, if any
    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        None
    }

    /// Always yields an entry, possibly a nonexistent one
    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        Ok(NonexistentEntry::new(self.base(), name))
    }

    fn can_have_child(&self, _name: &str, _is_dir: bool) -> bool {
        false
    }

    async fn read(&self) -> CfsResult<Bytes> {
        let reason = if self.is_dir() { "is a directory" } else { "not readable" };
        Err(CfsError::not_allowed(self.path(), Operation::Read, reason))
    }

    async fn write(&self, _content: Bytes) -> CfsResult<()> {
        Err(CfsError::not_allowed(self.path(), Operation::Write, "not writable"))
    }

    /// Create a child: a file when `content` is given, a directory otherwise
    async fn create_child(&self, _name: &str, _content: Option<Bytes>) -> CfsResult<EntryRef> {
        Err(CfsError::not_allowed(self.path(), Operation::CreateChild, "cannot hold new children"))
    }

    async fn delete(&self, _recursive: bool) -> CfsResult<()> {
        Err(CfsError::not_allowed(self.path(), Operation::Delete, "cannot be deleted"))
    }

    /// Best-effort comparison; `same == None` asks the caller to read both sides
    async fn compare_to(&self, _other: &EntryRef) -> CfsResult<Comparison> {
        Ok(Comparison::unknown())
    }

    /// Hex MD5 of the content, when the backend knows it cheaply
    async fn checksum(&self) -> CfsResult<Option<String>> {
        Ok(None)
    }

    /// Content parsed as a JSON document
    async fn chef_object(&self) -> CfsResult<serde_json::Value> {
        let content = self.read().await?;
        serde_json::from_slice(&content)
            .map_err(|e| CfsError::failed(self.path(), Operation::Read, e))
    }

    /// Drop a child from the caches after it was deleted
    fn forget_child(&self, _name: &str) {}

    /// Whether children are copied in as a unit via [`Entry::copy_child_from`]
    fn copies_whole_children(&self) -> bool {
        false
    }

    /// Create or replace the child named like `src` from the whole `src` tree
    async fn copy_child_from(&self, _src: &EntryRef) -> CfsResult<EntryRef> {
        Err(CfsError::not_allowed(self.path(), Operation::CreateChild, "cannot copy whole children"))
    }
}

#[derive(Default)]
struct CacheState {
    listing: Option<Vec<EntryRef>>,
    made: HashMap<String, EntryRef>,
}

/// Memoized children of one directory entry
///
/// `listing` is the result of the first successful `children()` call;
/// `made` holds every child handed out, so `child(name)` and `children()`
/// return the very same objects.
#[derive(Default)]
pub struct ChildCache {
    state: Mutex<CacheState>,
}

impl ChildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing(&self) -> Option<Vec<EntryRef>> {
        self.state.lock().listing.clone()
    }

    pub fn set_listing(&self, entries: Vec<EntryRef>) {
        let mut state = self.state.lock();
        for entry in &entries {
            state
                .made
                .entry(entry.name().to_string())
                .or_insert_with(|| entry.clone());
        }
        state.listing = Some(entries);
    }

    pub fn lookup(&self, name: &str) -> Option<EntryRef> {
        self.state.lock().made.get(name).cloned()
    }

    pub fn get_or_make(&self, name: &str, make: impl FnOnce() -> EntryRef) -> EntryRef {
        self.state
            .lock()
            .made
            .entry(name.to_string())
            .or_insert_with(make)
            .clone()
    }

    /// Record a freshly created child, replacing any stale entry
    pub fn insert(&self, entry: EntryRef) {
        let mut state = self.state.lock();
        if let Some(listing) = state.listing.as_mut() {
            listing.retain(|e| e.name() != entry.name());
            listing.push(entry.clone());
            listing.sort_by(|a, b| a.name().cmp(b.name()));
        }
        state.made.insert(entry.name().to_string(), entry);
    }

    pub fn forget(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some(listing) = state.listing.as_mut() {
            listing.retain(|e| e.name() != name);
        }
        state.made.remove(name);
    }
}

impl fmt::Debug for ChildCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChildCache")
            .field("listed", &state.listing.as_ref().map(|l| l.len()))
            .field("made", &state.made.len())
            .finish()
    }
}
