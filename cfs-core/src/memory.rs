// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory entries
//!
//! Used for fixtures and synthetic trees. All data is lost when dropped.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::{
    checksum::md5_hex,
    entry::{Entry, EntryBase, EntryRef},
    error::{CfsError, CfsResult, Operation},
    NonexistentEntry,
};

#[derive(Debug)]
enum Node {
    Dir(Mutex<Vec<Arc<MemoryEntry>>>),
    File(Mutex<Bytes>),
}

/// A directory or file held in memory
#[derive(Debug)]
pub struct MemoryEntry {
    base: EntryBase,
    me: Weak<MemoryEntry>,
    owner: Option<Weak<MemoryEntry>>,
    node: Node,
    removed: AtomicBool,
}

impl MemoryEntry {
    pub fn root(printable: impl Into<String>) -> Arc<Self> {
        let printable = printable.into();
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::root(printable, this.clone()),
            me: this.clone(),
            owner: None,
            node: Node::Dir(Mutex::new(Vec::new())),
            removed: AtomicBool::new(false),
        })
    }

    /// Build a tree from JSON: objects become directories, strings become
    /// files, any other value becomes a file holding its JSON text.
    pub fn from_json(printable: impl Into<String>, value: &Value) -> Arc<Self> {
        let root = Self::root(printable);
        if let Value::Object(map) = value {
            root.fill_from_json(map);
        }
        root
    }

    fn fill_from_json(self: &Arc<Self>, map: &serde_json::Map<String, Value>) {
        for (name, value) in map {
            match value {
                Value::Object(inner) => self.add_dir(name).fill_from_json(inner),
                Value::String(text) => {
                    self.add_file(name, text.clone());
                }
                other => {
                    self.add_file(name, other.to_string());
                }
            }
        }
    }

    pub fn add_dir(self: &Arc<Self>, name: &str) -> Arc<Self> {
        self.attach(name, Node::Dir(Mutex::new(Vec::new())))
    }

    pub fn add_file(self: &Arc<Self>, name: &str, content: impl Into<Bytes>) -> Arc<Self> {
        self.attach(name, Node::File(Mutex::new(content.into())))
    }

    fn attach(self: &Arc<Self>, name: &str, node: Node) -> Arc<Self> {
        let child = Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(&self.base, name, this.clone()),
            me: this.clone(),
            owner: Some(Arc::downgrade(self)),
            node,
            removed: AtomicBool::new(false),
        });
        if let Node::Dir(children) = &self.node {
            let mut children = children.lock();
            children.retain(|c| c.name() != name);
            children.push(child.clone());
        }
        child
    }

    fn find(&self, name: &str) -> Option<Arc<Self>> {
        match &self.node {
            Node::Dir(children) => children.lock().iter().find(|c| c.name() == name).cloned(),
            Node::File(_) => None,
        }
    }

    fn ensure_present(&self) -> CfsResult<()> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(CfsError::not_found(self.path()));
        }
        Ok(())
    }
}

#[async_trait]
impl Entry for MemoryEntry {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        matches!(self.node, Node::Dir(_))
    }

    async fn exists(&self) -> CfsResult<bool> {
        Ok(!self.removed.load(Ordering::SeqCst))
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        self.ensure_present()?;
        match &self.node {
            Node::Dir(children) => Ok(children.lock().iter().map(|c| c.clone() as EntryRef).collect()),
            Node::File(_) => Err(CfsError::not_allowed(self.path(), Operation::Children, "not a directory")),
        }
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        match self.find(name) {
            Some(child) => Ok(child as EntryRef),
            None => Ok(NonexistentEntry::new(&self.base, name)),
        }
    }

    fn can_have_child(&self, _name: &str, _is_dir: bool) -> bool {
        self.is_dir()
    }

    async fn read(&self) -> CfsResult<Bytes> {
        self.ensure_present()?;
        match &self.node {
            Node::File(content) => Ok(content.lock().clone()),
            Node::Dir(_) => Err(CfsError::not_allowed(self.path(), Operation::Read, "is a directory")),
        }
    }

    async fn write(&self, content: Bytes) -> CfsResult<()> {
        self.ensure_present()?;
        match &self.node {
            Node::File(current) => {
                *current.lock() = content;
                Ok(())
            }
            Node::Dir(_) => Err(CfsError::not_allowed(self.path(), Operation::Write, "is a directory")),
        }
    }

    async fn create_child(&self, name: &str, content: Option<Bytes>) -> CfsResult<EntryRef> {
        self.ensure_present()?;
        if !self.is_dir() {
            return Err(CfsError::not_allowed(self.path(), Operation::CreateChild, "not a directory"));
        }
        if let Some(existing) = self.find(name) {
            return Err(CfsError::already_exists(existing.path()));
        }
        let this = self.me.upgrade().ok_or_else(|| CfsError::not_found(self.path()))?;
        let child = match content {
            Some(content) => this.add_file(name, content),
            None => this.add_dir(name),
        };
        Ok(child as EntryRef)
    }

    async fn delete(&self, recursive: bool) -> CfsResult<()> {
        self.ensure_present()?;
        if let Node::Dir(children) = &self.node {
            if !recursive && !children.lock().is_empty() {
                return Err(CfsError::MustDeleteRecursively { path: self.path().clone() });
            }
        }
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            if let Node::Dir(siblings) = &owner.node {
                siblings.lock().retain(|c| c.name() != self.name());
            }
        }
        self.removed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn checksum(&self) -> CfsResult<Option<String>> {
        match &self.node {
            Node::File(content) if !self.removed.load(Ordering::SeqCst) => {
                Ok(Some(md5_hex(&content.lock())))
            }
            _ => Ok(None),
        }
    }
}
