// SPDX-License-Identifier: AGPL-3.0-or-later
//! ACL tree
//!
//! `acls/<collection>/<name>.json` holds the ACL of one server object and
//! `acls/organization.json` the ACL of the organization. An ACL document has
//! up to five permission buckets, and the server takes each one with its own
//! `PUT <object>/_acl/<permission>`.

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::{
    entry::{ChildCache, Comparison, Entry, EntryBase, EntryRef},
    error::{BackendError, CfsError, CfsResult, Operation},
    NonexistentEntry,
};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

use crate::rest::{compare_json, exists_on_server, listed_in_parent, pretty, KnownExists};
use crate::root::ServerContext;

/// Permission buckets, in the order they are written
pub const PERMISSIONS: [&str; 5] = ["create", "read", "update", "delete", "grant"];

/// Collections whose objects carry ACLs
pub const ACL_COLLECTIONS: [&str; 8] = [
    "clients",
    "containers",
    "cookbooks",
    "data_bags",
    "environments",
    "groups",
    "nodes",
    "roles",
];

const ORGANIZATION: &str = "organization.json";

fn collection_api_path(collection: &str) -> &str {
    match collection {
        "data_bags" => "data",
        other => other,
    }
}

/// The `acls` directory
#[derive(Debug)]
pub struct AclsDir {
    base: EntryBase,
    children: Vec<EntryRef>,
}

impl AclsDir {
    pub fn new(parent: &EntryBase, name: &str, ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let base = EntryBase::child(parent, name, this.clone());
            let mut children: Vec<EntryRef> = ACL_COLLECTIONS
                .iter()
                .map(|collection| AclDir::new(&base, collection, ctx.clone()) as EntryRef)
                .collect();
            children.push(AclEntry::new(&base, ORGANIZATION, "organizations/_acl".into(), ctx.clone(), Some(true)));
            children.sort_by(|a, b| a.name().cmp(b.name()));
            Self { base, children }
        })
    }
}

#[async_trait]
impl Entry for AclsDir {
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
        if is_dir {
            ACL_COLLECTIONS.contains(&name)
        } else {
            name == ORGANIZATION
        }
    }

    async fn create_child(&self, name: &str, _content: Option<Bytes>) -> CfsResult<EntryRef> {
        Err(CfsError::not_allowed(&self.path().join(name), Operation::CreateChild, "ACLs cannot be created"))
    }
}

/// ACLs of every object of one collection
#[derive(Debug)]
pub struct AclDir {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    collection_api: String,
    children: ChildCache,
}

impl AclDir {
    pub fn new(parent: &EntryBase, collection: &str, ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, collection, this.clone()),
            ctx,
            collection_api: collection_api_path(collection).to_string(),
            children: ChildCache::new(),
        })
    }

    fn make_acl(&self, name: &str, exists: Option<bool>) -> EntryRef {
        let key = name.strip_suffix(".json").unwrap_or(name);
        let api_path = format!("{}/{}/_acl", self.collection_api, key);
        AclEntry::new(&self.base, name, api_path, self.ctx.clone(), exists)
    }
}

#[async_trait]
impl Entry for AclDir {
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
            .get(&self.collection_api)
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Children, e))?;
        let Value::Object(index) = index else {
            return Err(CfsError::failed(
                self.path(),
                Operation::Children,
                BackendError::Other(format!("{} did not return a JSON object", self.collection_api)),
            ));
        };
        let listing: Vec<EntryRef> = index
            .keys()
            .map(|key| {
                let name = format!("{}.json", key);
                self.children.get_or_make(&name, || self.make_acl(&name, Some(true)))
            })
            .collect();
        self.children.set_listing(listing.clone());
        Ok(listing)
    }

    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        self.children.listing()
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        if !self.can_have_child(name, false) {
            return Ok(NonexistentEntry::new(&self.base, name));
        }
        Ok(self.children.get_or_make(name, || self.make_acl(name, None)))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        !is_dir && name.ends_with(".json")
    }

    async fn create_child(&self, name: &str, _content: Option<Bytes>) -> CfsResult<EntryRef> {
        Err(CfsError::not_allowed(
            &self.path().join(name),
            Operation::CreateChild,
            "ACLs are created with the object they belong to",
        ))
    }

    fn forget_child(&self, name: &str) {
        self.children.forget(name);
    }
}

/// The ACL document of one object
#[derive(Debug)]
pub struct AclEntry {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    api_path: String,
    exists: KnownExists,
}

impl AclEntry {
    fn new(
        parent: &EntryBase,
        name: &str,
        api_path: String,
        ctx: Arc<ServerContext>,
        exists: Option<bool>,
    ) -> EntryRef {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, name, this.clone()),
            ctx,
            api_path,
            exists: KnownExists::new(exists),
        })
    }
}

#[async_trait]
impl Entry for AclEntry {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn is_dir(&self) -> bool {
        false
    }

    async fn exists(&self) -> CfsResult<bool> {
        if let Some(known) = self.exists.get() {
            return Ok(known);
        }
        let found = match listed_in_parent(&self.base) {
            Some(found) => found,
            None => exists_on_server(&self.ctx, &self.api_path, self.path()).await?,
        };
        self.exists.set(found);
        Ok(found)
    }

    async fn read(&self) -> CfsResult<Bytes> {
        let value = self
            .ctx
            .api
            .get(&self.api_path)
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Read, e))?;
        pretty(self.path(), &value)
    }

    /// One `PUT` per permission present, stopping at the first failure
    async fn write(&self, content: Bytes) -> CfsResult<()> {
        let acl: Value =
            serde_json::from_slice(&content).map_err(|e| CfsError::failed(self.path(), Operation::Write, e))?;
        let Value::Object(acl) = acl else {
            return Err(CfsError::failed(
                self.path(),
                Operation::Write,
                BackendError::Other("an ACL must be a JSON object".into()),
            ));
        };
        for permission in PERMISSIONS {
            let Some(value) = acl.get(permission) else {
                continue;
            };
            let path = format!("{}/{}", self.api_path, permission);
            self.ctx
                .api
                .put(&path, &json!({ permission: value }))
                .await
                .map_err(|e| {
                    let cause = BackendError::Permission {
                        permission: permission.to_string(),
                        source: Box::new(e),
                    };
                    CfsError::from_backend(self.path(), Operation::Write, cause)
                })?;
        }
        Ok(())
    }

    async fn delete(&self, _recursive: bool) -> CfsResult<()> {
        Err(CfsError::not_allowed(
            self.path(),
            Operation::Delete,
            "ACLs cannot be deleted; delete the object they belong to",
        ))
    }

    async fn compare_to(&self, other: &EntryRef) -> CfsResult<Comparison> {
        compare_json(self.read().await, other).await
    }
}
