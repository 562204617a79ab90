// SPDX-License-Identifier: AGPL-3.0-or-later
//! Placeholder for names a directory does not hold

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Weak};

use crate::{
    entry::{Entry, EntryBase, EntryRef},
    error::{CfsError, CfsResult},
};

/// An entry that does not exist. Name, parent and path still work; every
/// content operation fails with `NotFound`.
///
/// Nothing memoizes these, so each one holds its parent strongly. That keeps
/// a chain of missing entries (`/data_bags/users` on an empty tree) walkable
/// back to the root for as long as the leaf lives.
#[derive(Debug)]
pub struct NonexistentEntry {
    base: EntryBase,
    _parent: Option<EntryRef>,
}

impl NonexistentEntry {
    pub fn new(parent: &EntryBase, name: &str) -> EntryRef {
        let owner = parent.handle().upgrade();
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, name, this.clone()),
            _parent: owner,
        })
    }
}

#[async_trait]
impl Entry for NonexistentEntry {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        false
    }

    async fn exists(&self) -> CfsResult<bool> {
        Ok(false)
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        Err(CfsError::not_found(self.path()))
    }

    async fn read(&self) -> CfsResult<Bytes> {
        Err(CfsError::not_found(self.path()))
    }

    async fn write(&self, _content: Bytes) -> CfsResult<()> {
        Err(CfsError::not_found(self.path()))
    }

    async fn create_child(&self, _name: &str, _content: Option<Bytes>) -> CfsResult<EntryRef> {
        Err(CfsError::not_found(self.path()))
    }

    async fn delete(&self, _recursive: bool) -> CfsResult<()> {
        Err(CfsError::not_found(self.path()))
    }
}
