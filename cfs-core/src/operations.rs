// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tree algorithms
//!
//! Everything here is written against the [`Entry`] contract only, so it
//! works for any pair of roots: server against repository, repository against
//! a memory fixture, and so on.

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;

use crate::{
    entry::{Comparison, Content, EntryRef},
    error::{CfsError, CfsResult},
    path::split,
    ChefPath, FilePattern,
};

/// Resolve `path` against `entry`. A leading `/` starts from the root.
pub async fn resolve_path(entry: &EntryRef, path: &str) -> CfsResult<EntryRef> {
    let mut result = entry.clone();
    if path.starts_with('/') {
        while let Some(parent) = result.parent() {
            result = parent;
        }
    }
    for part in split(path) {
        result = result.child(part).await?;
    }
    Ok(result)
}

/// The entry itself plus all existing descendants, depth-first
pub async fn list(entry: &EntryRef) -> CfsResult<Vec<EntryRef>> {
    let mut out = Vec::new();
    list_into(entry, &mut out).await?;
    Ok(out)
}

fn list_into<'a>(entry: &'a EntryRef, out: &'a mut Vec<EntryRef>) -> BoxFuture<'a, CfsResult<()>> {
    async move {
        if !entry.exists().await? {
            return Ok(());
        }
        out.push(entry.clone());
        if entry.is_dir() {
            for child in entry.children().await? {
                list_into(&child, out).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

/// Existing entries under `entry` whose paths match `pattern`, depth-first.
/// Only directories the pattern can reach are listed; where the pattern is
/// literal the single named child is visited instead.
pub async fn list_matching(entry: &EntryRef, pattern: &FilePattern) -> CfsResult<Vec<EntryRef>> {
    let mut out = Vec::new();
    list_matching_into(entry, pattern, &mut out).await?;
    Ok(out)
}

fn list_matching_into<'a>(
    entry: &'a EntryRef,
    pattern: &'a FilePattern,
    out: &'a mut Vec<EntryRef>,
) -> BoxFuture<'a, CfsResult<()>> {
    async move {
        if !entry.exists().await? {
            return Ok(());
        }
        let path = entry.path().to_string();
        if pattern.matches(&path) {
            out.push(entry.clone());
        }
        if !entry.is_dir() || !pattern.could_match_children(&path) {
            return Ok(());
        }
        match pattern.exact_child_name_under(&path) {
            Some(name) => {
                let child = entry.child(name).await?;
                list_matching_into(&child, pattern, out).await?;
            }
            None => {
                for child in entry.children().await? {
                    list_matching_into(&child, pattern, out).await?;
                }
            }
        }
        Ok(())
    }
    .boxed()
}

/// Entries matching `pattern` in either tree, paired with the entry at the
/// same path in the other tree
pub async fn list_pairs(
    pattern: &FilePattern,
    a_root: &EntryRef,
    b_root: &EntryRef,
) -> CfsResult<Vec<(EntryRef, EntryRef)>> {
    let mut pairs = Vec::new();
    let mut seen = HashSet::new();
    for a in list_matching(a_root, pattern).await? {
        let path = a.path().to_string();
        let b = resolve_path(b_root, &path).await?;
        seen.insert(path);
        pairs.push((a, b));
    }
    for b in list_matching(b_root, pattern).await? {
        let path = b.path().to_string();
        if !seen.contains(&path) {
            let a = resolve_path(a_root, &path).await?;
            pairs.push((a, b));
        }
    }
    Ok(pairs)
}

async fn children_if_exists(entry: &EntryRef) -> CfsResult<Vec<EntryRef>> {
    if entry.is_dir() && entry.exists().await? {
        entry.children().await
    } else {
        Ok(Vec::new())
    }
}

/// Children of `a` paired with the same name in `b`, then the names only
/// `b` has, paired with whatever `a` answers for them.
pub async fn child_pairs(a: &EntryRef, b: &EntryRef) -> CfsResult<Vec<(EntryRef, EntryRef)>> {
    let mut pairs = Vec::new();
    let mut seen = HashSet::new();
    for a_child in children_if_exists(a).await? {
        seen.insert(a_child.name().to_string());
        let b_child = b.child(a_child.name()).await?;
        pairs.push((a_child, b_child));
    }
    for b_child in children_if_exists(b).await? {
        if !seen.contains(b_child.name()) {
            let a_child = a.child(b_child.name()).await?;
            pairs.push((a_child, b_child));
        }
    }
    Ok(pairs)
}

async fn read_or_missing(entry: &EntryRef) -> CfsResult<Content> {
    match entry.read().await {
        Ok(bytes) => Ok(Content::Bytes(bytes)),
        Err(e) if e.is_not_found() => Ok(Content::Missing),
        Err(e) => Err(e),
    }
}

/// Compare two leaves: ask each side for a cheap answer, then fall back to
/// reading both and comparing bytes. `own` is `a`'s value, `other` is `b`'s.
pub async fn compare(a: &EntryRef, b: &EntryRef) -> CfsResult<Comparison> {
    let mut result = a.compare_to(b).await?;
    if result.same.is_none() {
        let reverse = b.compare_to(a).await?;
        result = Comparison { same: reverse.same, own: reverse.other, other: reverse.own };
    }
    if result.same.is_none() {
        if result.own.is_unknown() {
            result.own = read_or_missing(a).await?;
        }
        if result.other.is_unknown() {
            result.other = read_or_missing(b).await?;
        }
        result.same = Some(result.own == result.other);
    }
    Ok(result)
}

/// Whether two subtrees differ in shape or content
pub fn trees_differ<'a>(a: &'a EntryRef, b: &'a EntryRef) -> BoxFuture<'a, CfsResult<bool>> {
    async move {
        let (a_exists, b_exists) = (a.exists().await?, b.exists().await?);
        if a_exists != b_exists {
            return Ok(true);
        }
        if !a_exists {
            return Ok(false);
        }
        if a.is_dir() != b.is_dir() {
            return Ok(true);
        }
        if a.is_dir() {
            for (a_child, b_child) in child_pairs(a, b).await? {
                if trees_differ(&a_child, &b_child).await? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        Ok(compare(a, b).await?.same != Some(true))
    }
    .boxed()
}

/// Kind of a single difference between an old and a new tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceKind {
    Added,
    Deleted,
    Modified,
    DirectoryToFile,
    FileToDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub path: ChefPath,
    pub kind: DifferenceKind,
}

/// Differences turning `old` into `new`
pub async fn diff(old: &EntryRef, new: &EntryRef) -> CfsResult<Vec<Difference>> {
    let mut out = Vec::new();
    diff_into(old, new, &mut out).await?;
    Ok(out)
}

fn diff_into<'a>(
    old: &'a EntryRef,
    new: &'a EntryRef,
    out: &'a mut Vec<Difference>,
) -> BoxFuture<'a, CfsResult<()>> {
    async move {
        let (old_exists, new_exists) = (old.exists().await?, new.exists().await?);
        let kind = if old_exists && old.is_dir() {
            if new_exists && new.is_dir() {
                for (old_child, new_child) in child_pairs(old, new).await? {
                    diff_into(&old_child, &new_child, out).await?;
                }
                None
            } else if new_exists {
                Some(DifferenceKind::DirectoryToFile)
            } else {
                Some(DifferenceKind::Deleted)
            }
        } else if new_exists && new.is_dir() {
            if old_exists {
                Some(DifferenceKind::FileToDirectory)
            } else {
                Some(DifferenceKind::Added)
            }
        } else {
            match (old_exists, new_exists) {
                (false, false) => None,
                (false, true) => Some(DifferenceKind::Added),
                (true, false) => Some(DifferenceKind::Deleted),
                (true, true) => (compare(old, new).await?.same != Some(true)).then_some(DifferenceKind::Modified),
            }
        };
        if let Some(kind) = kind {
            out.push(Difference { path: old.path().clone(), kind });
        }
        Ok(())
    }
    .boxed()
}

/// Differences turning `old_root` into `new_root`, restricted to `pattern`
pub async fn diff_matching(
    pattern: &FilePattern,
    old_root: &EntryRef,
    new_root: &EntryRef,
) -> CfsResult<Vec<Difference>> {
    let mut out = Vec::new();
    for (old, new) in list_pairs(pattern, old_root, new_root).await? {
        diff_into(&old, &new, &mut out).await?;
    }
    // Nested matches (`/**`) visit the same subtree more than once.
    let mut seen = HashSet::new();
    out.retain(|d| seen.insert(d.path.clone()));
    Ok(out)
}

/// Options for [`copy_to`]
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Delete entries in the destination that the source does not have
    pub purge: bool,
    /// Copy files even when they compare equal
    pub force: bool,
    /// Report what would happen without touching the destination
    pub dry_run: bool,
    /// Maximum depth below the starting pair; `None` is unlimited
    pub recurse_depth: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyEvent {
    pub action: CopyAction,
    pub path: String,
    pub dry_run: bool,
}

/// Outcome of [`copy_to`]. Per-entry failures are collected, not fatal.
#[derive(Debug, Default)]
pub struct CopyReport {
    pub events: Vec<CopyEvent>,
    pub warnings: Vec<String>,
    pub errors: Vec<CfsError>,
}

impl CopyReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, action: CopyAction, entry: &EntryRef, options: &CopyOptions) {
        tracing::debug!("{:?} {}", action, entry.path_for_printing());
        self.events.push(CopyEvent {
            action,
            path: entry.path_for_printing().to_string(),
            dry_run: options.dry_run,
        });
    }
}

/// Make `dest` look like `src`. `src` and `dest` name the same logical path
/// in two different trees.
pub async fn copy_to(src: &EntryRef, dest: &EntryRef, options: &CopyOptions) -> CopyReport {
    let mut report = CopyReport::default();
    let found = async {
        Ok::<_, CfsError>(src.exists().await? || dest.exists().await?)
    }
    .await;
    match found {
        Ok(true) => copy_pair(src, dest, options, &mut report).await,
        Ok(false) => report.errors.push(CfsError::not_found(src.path())),
        Err(e) => report.errors.push(e),
    }
    report
}

/// Make everything matching `pattern` under `dest_root` look like
/// `src_root`. A literal pattern that matches nothing on either side is an
/// error; a wildcard one simply copies nothing.
pub async fn copy_matching(
    pattern: &FilePattern,
    src_root: &EntryRef,
    dest_root: &EntryRef,
    options: &CopyOptions,
) -> CopyReport {
    let mut report = CopyReport::default();
    let pairs = match list_pairs(pattern, src_root, dest_root).await {
        Ok(pairs) => pairs,
        Err(e) => {
            report.errors.push(e);
            return report;
        }
    };
    if pairs.is_empty() {
        if let Some(path) = pattern.exact_path() {
            report.errors.push(CfsError::not_found(&ChefPath::parse(path)));
        }
        return report;
    }
    // A fully recursive copy of a matched directory already covers every
    // match below it.
    let mut covered: Vec<ChefPath> = Vec::new();
    for (src, dest) in pairs {
        let below_covered = covered
            .iter()
            .any(|dir| src.path().relative_to(dir).map_or(false, |rest| !rest.is_empty()));
        if below_covered && options.recurse_depth.is_none() {
            continue;
        }
        copy_pair(&src, &dest, options, &mut report).await;
        covered.push(src.path().clone());
    }
    report
}

async fn copy_pair(src: &EntryRef, dest: &EntryRef, options: &CopyOptions, report: &mut CopyReport) {
    match get_or_create_parent(dest, options, report).await {
        Ok(parent) => copy_entries(src, dest, parent, options.recurse_depth, options, report).await,
        Err(e) => report.errors.push(e),
    }
}

fn get_or_create_parent<'a>(
    entry: &'a EntryRef,
    options: &'a CopyOptions,
    report: &'a mut CopyReport,
) -> BoxFuture<'a, CfsResult<Option<EntryRef>>> {
    async move {
        let Some(parent) = entry.parent() else {
            return Ok(None);
        };
        if parent.exists().await? {
            return Ok(Some(parent));
        }
        let Some(grandparent) = get_or_create_parent(&parent, options, report).await? else {
            return Ok(Some(parent));
        };
        if options.dry_run {
            report.record(CopyAction::Create, &parent, options);
            return Ok(Some(parent));
        }
        let created = grandparent.create_child(parent.name(), None).await?;
        report.record(CopyAction::Create, &created, options);
        Ok(Some(created))
    }
    .boxed()
}

fn copy_entries<'a>(
    src: &'a EntryRef,
    dest: &'a EntryRef,
    dest_parent: Option<EntryRef>,
    depth: Option<usize>,
    options: &'a CopyOptions,
    report: &'a mut CopyReport,
) -> BoxFuture<'a, ()> {
    async move {
        if let Err(e) = try_copy_entries(src, dest, dest_parent, depth, options, report).await {
            tracing::warn!("{}: {}", dest.path_for_printing(), e);
            report.errors.push(e);
        }
    }
    .boxed()
}

async fn try_copy_entries(
    src: &EntryRef,
    dest: &EntryRef,
    dest_parent: Option<EntryRef>,
    depth: Option<usize>,
    options: &CopyOptions,
    report: &mut CopyReport,
) -> CfsResult<()> {
    let child_depth = depth.map(|d| d.saturating_sub(1));

    if !src.exists().await? {
        if !options.purge {
            return Ok(());
        }
        // Only purge what an upload in the other direction could have created.
        let uploadable = src
            .parent()
            .map(|p| p.can_have_child(dest.name(), dest.is_dir()))
            .unwrap_or(true);
        if !uploadable {
            return Ok(());
        }
        if options.dry_run {
            report.record(CopyAction::Delete, dest, options);
            return Ok(());
        }
        return match dest.delete(true).await {
            Ok(()) => {
                report.record(CopyAction::Delete, dest, options);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                report
                    .warnings
                    .push(format!("{} does not exist, nothing to delete", dest.path_for_printing()));
                Ok(())
            }
            Err(e) => Err(e),
        };
    }

    if !dest.exists().await? {
        let Some(parent) = dest_parent else {
            return Err(CfsError::not_found(dest.path()));
        };
        if !parent.can_have_child(src.name(), src.is_dir()) {
            return Ok(());
        }
        if parent.copies_whole_children() {
            if !options.dry_run {
                parent.copy_child_from(src).await?;
            }
            report.record(CopyAction::Create, dest, options);
            return Ok(());
        }
        if src.is_dir() {
            let new_dir = if options.dry_run {
                report.record(CopyAction::Create, dest, options);
                parent.child(src.name()).await?
            } else {
                let created = parent.create_child(src.name(), None).await?;
                report.record(CopyAction::Create, &created, options);
                created
            };
            if depth != Some(0) {
                for src_child in src.children().await? {
                    let dest_child = new_dir.child(src_child.name()).await?;
                    copy_entries(&src_child, &dest_child, Some(new_dir.clone()), child_depth, options, report)
                        .await;
                }
            }
        } else if options.dry_run {
            report.record(CopyAction::Create, dest, options);
        } else {
            let content = src.read().await?;
            let created = parent.create_child(src.name(), Some(content)).await?;
            report.record(CopyAction::Create, &created, options);
        }
        return Ok(());
    }

    if let Some(parent) = dest_parent.as_ref().filter(|p| p.copies_whole_children()) {
        if options.force || trees_differ(src, dest).await? {
            if !options.dry_run {
                parent.copy_child_from(src).await?;
            }
            report.record(CopyAction::Update, dest, options);
        }
        return Ok(());
    }

    match (src.is_dir(), dest.is_dir()) {
        (true, true) => {
            if depth != Some(0) {
                for (src_child, dest_child) in child_pairs(src, dest).await? {
                    copy_entries(&src_child, &dest_child, Some(dest.clone()), child_depth, options, report)
                        .await;
                }
            }
        }
        (true, false) => report.warnings.push(format!(
            "{} is a directory while {} is a regular file",
            src.path_for_printing(),
            dest.path_for_printing()
        )),
        (false, true) => report.warnings.push(format!(
            "{} is a regular file while {} is a directory",
            src.path_for_printing(),
            dest.path_for_printing()
        )),
        (false, false) => {
            let (should_copy, value) = if options.force {
                (true, Content::Unknown)
            } else {
                let comparison = compare(src, dest).await?;
                (comparison.same != Some(true), comparison.own)
            };
            if should_copy {
                if !options.dry_run {
                    let content: Bytes = match value {
                        Content::Bytes(bytes) => bytes,
                        _ => src.read().await?,
                    };
                    dest.write(content).await?;
                }
                report.record(CopyAction::Update, dest, options);
            }
        }
    }
    Ok(())
}
