// SPDX-License-Identifier: AGPL-3.0-or-later
//! Union of directories
//!
//! Several physical directories standing for the same logical path, e.g. a
//! repository with more than one cookbook path. Reads fan out in registration
//! order with first-wins names; writes only ever go to the primary.

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::{
    entry::{Entry, EntryBase, EntryRef},
    error::CfsResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Debug)]
pub struct MultiplexedDir {
    base: EntryBase,
    dirs: Vec<EntryRef>,
}

impl MultiplexedDir {
    /// `primary` takes the name, path and parent of the union and receives
    /// every write.
    pub fn new(primary: EntryRef, others: impl IntoIterator<Item = EntryRef>) -> Arc<Self> {
        let mut dirs = vec![primary];
        dirs.extend(others);
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::mirror(dirs[0].base(), this.clone()),
            dirs,
        })
    }

    pub fn dirs(&self) -> &[EntryRef] {
        &self.dirs
    }

    fn primary(&self) -> &EntryRef {
        &self.dirs[0]
    }
}

#[async_trait]
impl Entry for MultiplexedDir {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        true
    }

    async fn exists(&self) -> CfsResult<bool> {
        for dir in &self.dirs {
            if dir.exists().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        let mut result: Vec<EntryRef> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for dir in &self.dirs {
            if !dir.exists().await? {
                continue;
            }
            for child in dir.children().await? {
                if let Some(&index) = seen.get(child.name()) {
                    tracing::warn!(
                        "Child with name '{}' found in multiple directories: {} and {}",
                        child.name(),
                        result[index].path_for_printing(),
                        child.path_for_printing()
                    );
                    continue;
                }
                seen.insert(child.name().to_string(), result.len());
                result.push(child);
            }
        }
        Ok(result)
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        for dir in &self.dirs {
            let child = dir.child(name).await?;
            if child.exists().await? {
                return Ok(child);
            }
        }
        self.primary().child(name).await
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        self.primary().can_have_child(name, is_dir)
    }

    async fn create_child(&self, name: &str, content: Option<Bytes>) -> CfsResult<EntryRef> {
        self.primary().create_child(name, content).await
    }

    fn forget_child(&self, name: &str) {
        for dir in &self.dirs {
            dir.forget_child(name);
        }
    }

    fn copies_whole_children(&self) -> bool {
        self.primary().copies_whole_children()
    }

    async fn copy_child_from(&self, src: &EntryRef) -> CfsResult<EntryRef> {
        self.primary().copy_child_from(src).await
    }
}
