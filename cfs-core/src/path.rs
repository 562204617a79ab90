// SPDX-License-Identifier: AGPL-3.0-or-later
//! Logical entry paths
//!
//! Every entry has a path derived from its parent chain: the root is `/`,
//! and a child's path is its parent's path plus `/<name>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path of an entry inside a Chef FS tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChefPath {
    segments: Vec<String>,
}

impl ChefPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-separated path, ignoring empty segments
    pub fn parse(path: impl AsRef<str>) -> Self {
        Self {
            segments: split(path.as_ref()).map(String::from).collect(),
        }
    }

    /// Path of the child called `name`
    pub fn join(&self, name: impl AsRef<str>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.as_ref().to_string());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The part of `self` below `base`, if `self` is `base` or a descendant
    pub fn relative_to(&self, base: &ChefPath) -> Option<String> {
        if self.segments.len() < base.segments.len() {
            return None;
        }
        let (head, tail) = self.segments.split_at(base.segments.len());
        if head != base.segments.as_slice() {
            return None;
        }
        Some(tail.join("/"))
    }
}

impl fmt::Display for ChefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.segments.join("/"))
        }
    }
}

/// Split a slash-separated path into its non-empty parts
pub fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Join two printable path fragments with a single slash
pub fn join_printable(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}
