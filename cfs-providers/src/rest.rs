// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server collections and their JSON documents
//!
//! A [`RestListDir`] is one REST collection (`roles`, `data/users`); its
//! children are [`RestItem`] leaves named `<key>.json`. Data bags add one
//! level: [`DataBagsDir`] lists `data` and every bag is a collection whose
//! documents are keyed by `id` instead of `name`.

use async_trait::async_trait;
use bytes::Bytes;
use cfs_core::{
    entry::{ChildCache, Comparison, Content, Entry, EntryBase, EntryRef},
    error::{BackendError, CfsError, CfsResult, Operation},
    ChefPath, NonexistentEntry,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

use crate::root::ServerContext;

/// Documents that exist on every server and cannot be changed
fn protected_items(collection: &str) -> &'static [&'static str] {
    match collection {
        "environments" => &["_default.json"],
        _ => &[],
    }
}

pub(crate) fn pretty(path: &ChefPath, value: &Value) -> CfsResult<Bytes> {
    serde_json::to_vec_pretty(value)
        .map(Bytes::from)
        .map_err(|e| CfsError::failed(path, Operation::Read, e))
}

/// Parse a document about to be stored as `expected` and check its identity
/// field. A missing identity field is filled in.
pub(crate) fn check_identity(
    path: &ChefPath,
    content: &[u8],
    field: &str,
    expected: &str,
) -> CfsResult<Value> {
    let mut value: Value =
        serde_json::from_slice(content).map_err(|e| CfsError::failed(path, Operation::Write, e))?;
    let Some(object) = value.as_object_mut() else {
        return Err(CfsError::failed(
            path,
            Operation::Write,
            BackendError::Other("expected a JSON object".into()),
        ));
    };
    match object.get(field) {
        Some(Value::String(actual)) if actual == expected => {}
        Some(actual) => {
            return Err(CfsError::NameMismatch {
                path: path.clone(),
                expected: expected.to_string(),
                actual: actual.as_str().map(str::to_string).unwrap_or_else(|| actual.to_string()),
            })
        }
        None => {
            object.insert(field.to_string(), Value::String(expected.to_string()));
        }
    }
    Ok(value)
}

/// Compare a JSON document against another entry by parsed value, so
/// formatting differences do not count.
pub(crate) async fn compare_json(own: CfsResult<Bytes>, other: &EntryRef) -> CfsResult<Comparison> {
    let own = match own {
        Ok(own) => own,
        Err(e) if e.is_not_found() => {
            return Ok(Comparison { same: None, own: Content::Missing, other: Content::Unknown })
        }
        Err(e) => return Err(e),
    };
    let theirs = match other.read().await {
        Ok(theirs) => theirs,
        Err(e) if e.is_not_found() => {
            return Ok(Comparison::decided(false, Content::Bytes(own), Content::Missing))
        }
        Err(e) => return Err(e),
    };
    let same = match (serde_json::from_slice::<Value>(&own), serde_json::from_slice::<Value>(&theirs)) {
        (Ok(a), Ok(b)) => a == b,
        _ => own == theirs,
    };
    Ok(Comparison::decided(same, Content::Bytes(own), Content::Bytes(theirs)))
}

/// Existence answered by the parent's already fetched listing
pub(crate) fn listed_in_parent(base: &EntryBase) -> Option<bool> {
    let siblings = base.parent()?.cached_children()?;
    Some(siblings.iter().any(|s| s.name() == base.name()))
}

/// `GET` of the resource itself, to tell whether it exists
pub(crate) async fn exists_on_server(ctx: &ServerContext, api_path: &str, path: &ChefPath) -> CfsResult<bool> {
    match ctx.api.get(api_path).await {
        Ok(_) => Ok(true),
        Err(e) => match CfsError::from_backend(path, Operation::Exists, e) {
            CfsError::NotFound { .. } => Ok(false),
            other => Err(other),
        },
    }
}

/// Remembered outcome of an existence check
#[derive(Debug, Default)]
pub(crate) struct KnownExists(Mutex<Option<bool>>);

impl KnownExists {
    pub(crate) fn new(value: Option<bool>) -> Self {
        Self(Mutex::new(value))
    }

    pub(crate) fn get(&self) -> Option<bool> {
        *self.0.lock()
    }

    pub(crate) fn set(&self, value: bool) {
        *self.0.lock() = Some(value);
    }
}

/// One REST collection
#[derive(Debug)]
pub struct RestListDir {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    api_path: String,
    identity_field: &'static str,
    protected: &'static [&'static str],
    data_bag: bool,
    exists: KnownExists,
    children: ChildCache,
}

impl RestListDir {
    /// Top-level collection `name`, served at the same API path
    pub fn collection(parent: &EntryBase, name: &str, ctx: Arc<ServerContext>) -> Arc<Self> {
        Self::build(parent, name, ctx, name.to_string(), "name", protected_items(name), false, Some(true))
    }

    /// Data bag `name`, served at `data/<name>`
    pub fn data_bag(parent: &EntryBase, name: &str, ctx: Arc<ServerContext>, exists: Option<bool>) -> Arc<Self> {
        Self::build(parent, name, ctx, format!("data/{}", name), "id", &[], true, exists)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        parent: &EntryBase,
        name: &str,
        ctx: Arc<ServerContext>,
        api_path: String,
        identity_field: &'static str,
        protected: &'static [&'static str],
        data_bag: bool,
        exists: Option<bool>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, name, this.clone()),
            ctx,
            api_path,
            identity_field,
            protected,
            data_bag,
            exists: KnownExists::new(exists),
            children: ChildCache::new(),
        })
    }

    pub fn api_path(&self) -> &str {
        &self.api_path
    }

    fn make_item(&self, name: &str, exists: Option<bool>) -> Arc<RestItem> {
        let key = name.strip_suffix(".json").unwrap_or(name);
        let read_only = self
            .protected
            .contains(&name)
            .then_some("this object is built into the server and cannot be changed");
        Arc::new_cyclic(|this: &Weak<RestItem>| RestItem {
            base: EntryBase::child(&self.base, name, this.clone()),
            ctx: self.ctx.clone(),
            api_path: format!("{}/{}", self.api_path, key),
            identity_field: self.identity_field,
            read_only,
            exists: KnownExists::new(exists),
        })
    }
}

#[async_trait]
impl Entry for RestListDir {
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
        let found = match listed_in_parent(&self.base) {
            Some(found) => found,
            None => exists_on_server(&self.ctx, &self.api_path, self.path()).await?,
        };
        self.exists.set(found);
        Ok(found)
    }

    async fn children(&self) -> CfsResult<Vec<EntryRef>> {
        if let Some(listing) = self.children.listing() {
            return Ok(listing);
        }
        tracing::debug!("Listing {}", self.api_path);
        let index = self
            .ctx
            .api
            .get(&self.api_path)
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Children, e))?;
        let Value::Object(index) = index else {
            return Err(CfsError::failed(
                self.path(),
                Operation::Children,
                BackendError::Other(format!("{} did not return a JSON object", self.api_path)),
            ));
        };
        let listing: Vec<EntryRef> = index
            .keys()
            .map(|key| {
                let name = format!("{}.json", key);
                self.children
                    .get_or_make(&name, || self.make_item(&name, Some(true)) as EntryRef)
            })
            .collect();
        self.children.set_listing(listing.clone());
        self.exists.set(true);
        Ok(listing)
    }

    fn cached_children(&self) -> Option<Vec<EntryRef>> {
        self.children.listing()
    }

    async fn child(&self, name: &str) -> CfsResult<EntryRef> {
        if !self.can_have_child(name, false) {
            return Ok(NonexistentEntry::new(&self.base, name));
        }
        Ok(self.children.get_or_make(name, || self.make_item(name, None) as EntryRef))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        !is_dir && name.ends_with(".json")
    }

    async fn create_child(&self, name: &str, content: Option<Bytes>) -> CfsResult<EntryRef> {
        let path = self.path().join(name);
        let Some(content) = content.filter(|_| self.can_have_child(name, false)) else {
            return Err(CfsError::not_allowed(&path, Operation::CreateChild, "only JSON documents can be created here"));
        };
        let item = self.make_item(name, None);
        let document = check_identity(&path, &content, self.identity_field, item.key())?;
        self.ctx
            .api
            .post(&self.api_path, &document)
            .await
            .map_err(|e| CfsError::from_backend(&path, Operation::CreateChild, e))?;
        item.exists.set(true);
        let item: EntryRef = item;
        self.children.insert(item.clone());
        Ok(item)
    }

    async fn delete(&self, recursive: bool) -> CfsResult<()> {
        if !self.data_bag {
            return Err(CfsError::not_allowed(self.path(), Operation::Delete, "collections cannot be deleted"));
        }
        if !recursive {
            return Err(CfsError::MustDeleteRecursively { path: self.path().clone() });
        }
        self.ctx
            .api
            .delete(&self.api_path)
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Delete, e))?;
        self.exists.set(false);
        if let Some(parent) = self.parent() {
            parent.forget_child(self.name());
        }
        Ok(())
    }

    fn forget_child(&self, name: &str) {
        self.children.forget(name);
    }
}

/// One JSON document of a collection
#[derive(Debug)]
pub struct RestItem {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    api_path: String,
    identity_field: &'static str,
    read_only: Option<&'static str>,
    exists: KnownExists,
}

impl RestItem {
    /// Document key: the name without `.json`
    pub fn key(&self) -> &str {
        self.name().strip_suffix(".json").unwrap_or(self.name())
    }

    pub fn api_path(&self) -> &str {
        &self.api_path
    }

    fn ensure_writable(&self, operation: Operation) -> CfsResult<()> {
        match self.read_only {
            Some(reason) => Err(CfsError::not_allowed(self.path(), operation, reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Entry for RestItem {
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
        match self.ctx.api.get(&self.api_path).await {
            Ok(value) => {
                self.exists.set(true);
                pretty(self.path(), &value)
            }
            Err(e) => {
                let err = CfsError::from_backend(self.path(), Operation::Read, e);
                if err.is_not_found() {
                    self.exists.set(false);
                }
                Err(err)
            }
        }
    }

    async fn write(&self, content: Bytes) -> CfsResult<()> {
        self.ensure_writable(Operation::Write)?;
        let document = check_identity(self.path(), &content, self.identity_field, self.key())?;
        self.ctx
            .api
            .put(&self.api_path, &document)
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Write, e))?;
        self.exists.set(true);
        Ok(())
    }

    async fn delete(&self, _recursive: bool) -> CfsResult<()> {
        self.ensure_writable(Operation::Delete)?;
        self.ctx
            .api
            .delete(&self.api_path)
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Delete, e))?;
        self.exists.set(false);
        if let Some(parent) = self.parent() {
            parent.forget_child(self.name());
        }
        Ok(())
    }

    async fn compare_to(&self, other: &EntryRef) -> CfsResult<Comparison> {
        compare_json(self.read().await, other).await
    }
}

/// The `data_bags` directory
#[derive(Debug)]
pub struct DataBagsDir {
    base: EntryBase,
    ctx: Arc<ServerContext>,
    children: ChildCache,
}

impl DataBagsDir {
    pub fn new(parent: &EntryBase, name: &str, ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| Self {
            base: EntryBase::child(parent, name, this.clone()),
            ctx,
            children: ChildCache::new(),
        })
    }
}

#[async_trait]
impl Entry for DataBagsDir {
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
            .get("data")
            .await
            .map_err(|e| CfsError::from_backend(self.path(), Operation::Children, e))?;
        let Value::Object(index) = index else {
            return Err(CfsError::failed(
                self.path(),
                Operation::Children,
                BackendError::Other("data did not return a JSON object".into()),
            ));
        };
        let listing: Vec<EntryRef> = index
            .keys()
            .map(|bag| {
                self.children.get_or_make(bag, || {
                    RestListDir::data_bag(&self.base, bag, self.ctx.clone(), Some(true)) as EntryRef
                })
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
        Ok(self.children.get_or_make(name, || {
            RestListDir::data_bag(&self.base, name, self.ctx.clone(), None) as EntryRef
        }))
    }

    fn can_have_child(&self, name: &str, is_dir: bool) -> bool {
        is_dir && !name.starts_with('.')
    }

    async fn create_child(&self, name: &str, content: Option<Bytes>) -> CfsResult<EntryRef> {
        let path = self.path().join(name);
        if content.is_some() || !self.can_have_child(name, true) {
            return Err(CfsError::not_allowed(&path, Operation::CreateChild, "data_bags only holds data bag directories"));
        }
        self.ctx
            .api
            .post("data", &json!({ "name": name }))
            .await
            .map_err(|e| CfsError::from_backend(&path, Operation::CreateChild, e))?;
        let bag: EntryRef = RestListDir::data_bag(&self.base, name, self.ctx.clone(), Some(true));
        self.children.insert(bag.clone());
        Ok(bag)
    }

    fn forget_child(&self, name: &str) {
        self.children.forget(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeApi};
    use cfs_core::MemoryEntry;

    fn context(api: &Arc<FakeApi>) -> Arc<ServerContext> {
        Arc::new(ServerContext::new(api.clone()))
    }

    #[tokio::test]
    async fn test_roles_listing_and_read() {
        let api = FakeApi::new();
        api.set("roles", json!({ "web": "https://chef/roles/web" }));
        api.set("roles/web", json!({ "name": "web", "run_list": [] }));
        let root = MemoryEntry::root("/");
        let roles = RestListDir::collection(root.base(), "roles", context(&api));

        let children = roles.children().await.unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["web.json"]);
        assert_eq!(children[0].path().to_string(), "/roles/web.json");

        let content = children[0].read().await.unwrap();
        let value: Value = serde_json::from_slice(&content).unwrap();
        assert_eq!(value["name"], "web");
        assert!(std::str::from_utf8(&content).unwrap().contains("\n  \"name\": \"web\""));
    }

    #[tokio::test]
    async fn test_children_keep_identity() {
        let api = FakeApi::new();
        api.set("roles", json!({ "web": "https://chef/roles/web", "db": "https://chef/roles/db" }));
        api.set("data", json!({ "users": "https://chef/data/users" }));
        api.set("data/users", json!({ "alice": "https://chef/data/users/alice" }));
        let root = MemoryEntry::root("/");
        let roles = RestListDir::collection(root.base(), "roles", context(&api));

        let first = roles.children().await.unwrap();
        let second = roles.children().await.unwrap();
        assert_eq!(first.len(), 2);
        for (a, b) in first.iter().zip(&second) {
            assert!(Arc::ptr_eq(a, b));
        }
        assert!(Arc::ptr_eq(&roles.child("web.json").await.unwrap(), &first[1]));

        // A child made before the listing is the one the listing returns.
        let bags = DataBagsDir::new(root.base(), "data_bags", context(&api));
        let users = bags.child("users").await.unwrap();
        let listed = bags.children().await.unwrap();
        assert!(Arc::ptr_eq(&users, &listed[0]));
        let alice = users.child("alice.json").await.unwrap();
        assert!(Arc::ptr_eq(&alice, &users.children().await.unwrap()[0]));

        assert_eq!(api.calls_to("GET"), vec!["roles", "data", "data/users"]);
    }

    #[tokio::test]
    async fn test_name_mismatch_fails_before_any_request() {
        let api = FakeApi::new();
        let root = MemoryEntry::root("/");
        let roles = RestListDir::collection(root.base(), "roles", context(&api));
        let web = roles.child("web.json").await.unwrap();

        let err = web.write(Bytes::from(r#"{"name": "web2"}"#)).await.unwrap_err();
        assert!(matches!(err, CfsError::NameMismatch { ref expected, ref actual, .. } if expected == "web" && actual == "web2"));
        assert!(!err.is_retryable());
        assert!(api.calls().is_empty());

        web.write(Bytes::from(r#"{"name": "web", "description": "x"}"#)).await.unwrap();
        assert_eq!(api.calls(), vec![Call::new("PUT", "roles/web")]);
        assert_eq!(web.read().await.unwrap(), pretty(web.path(), &api.doc("roles/web").unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_exists_uses_parent_listing() {
        let api = FakeApi::new();
        api.set("nodes", json!({ "a": "u" }));
        let root = MemoryEntry::root("/");
        let nodes = RestListDir::collection(root.base(), "nodes", context(&api));
        nodes.children().await.unwrap();
        api.clear_calls();

        assert!(nodes.child("a.json").await.unwrap().exists().await.unwrap());
        assert!(!nodes.child("b.json").await.unwrap().exists().await.unwrap());
        assert!(api.calls().is_empty());
        assert!(!nodes.child("b").await.unwrap().exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_without_listing() {
        let api = FakeApi::new();
        api.set("roles/web", json!({ "name": "web" }));
        let root = MemoryEntry::root("/");
        let roles = RestListDir::collection(root.base(), "roles", context(&api));
        let web = roles.child("web.json").await.unwrap();
        let db = roles.child("db.json").await.unwrap();
        assert!(web.exists().await.unwrap());
        assert!(!db.exists().await.unwrap());
        assert!(web.exists().await.unwrap());
        assert_eq!(api.calls_to("GET"), vec!["roles/web", "roles/db"]);
    }

    #[tokio::test]
    async fn test_delete_and_errors() {
        let api = FakeApi::new();
        api.set("roles/web", json!({ "name": "web" }));
        api.fail("DELETE", "roles/db", 500);
        let root = MemoryEntry::root("/");
        let roles = RestListDir::collection(root.base(), "roles", context(&api));

        let web = roles.child("web.json").await.unwrap();
        web.delete(false).await.unwrap();
        assert!(!web.exists().await.unwrap());
        assert!(web.delete(false).await.unwrap_err().is_not_found());

        let db = roles.child("db.json").await.unwrap();
        let err = db.delete(false).await.unwrap_err();
        assert!(matches!(
            err,
            CfsError::OperationFailed { operation: Operation::Delete, cause: BackendError::Http { status: 500, .. }, .. }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_default_environment_is_read_only() {
        let api = FakeApi::new();
        let root = MemoryEntry::root("/");
        let environments = RestListDir::collection(root.base(), "environments", context(&api));
        let default = environments.child("_default.json").await.unwrap();

        let err = default.write(Bytes::from(r#"{"name": "_default"}"#)).await.unwrap_err();
        assert!(matches!(err, CfsError::OperationNotAllowed { operation: Operation::Write, .. }));
        let err = default.delete(false).await.unwrap_err();
        assert!(matches!(err, CfsError::OperationNotAllowed { operation: Operation::Delete, .. }));
        assert!(api.calls().is_empty());

        let staging = environments.child("staging.json").await.unwrap();
        staging.write(Bytes::from(r#"{"name": "staging"}"#)).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_child_posts() {
        let api = FakeApi::new();
        api.set("roles", json!({}));
        let root = MemoryEntry::root("/");
        let roles = RestListDir::collection(root.base(), "roles", context(&api));
        roles.children().await.unwrap();

        let web = roles.create_child("web.json", Some(Bytes::from("{}"))).await.unwrap();
        assert_eq!(api.calls_to("POST"), vec!["roles"]);
        assert_eq!(api.doc("roles/web").unwrap()["name"], "web");
        assert!(web.exists().await.unwrap());
        assert_eq!(roles.children().await.unwrap().len(), 1);

        let err = roles.create_child("web.json", Some(Bytes::from("{}"))).await.unwrap_err();
        assert!(matches!(err, CfsError::AlreadyExists { .. }));
        let err = roles.create_child("dir", None).await.unwrap_err();
        assert!(matches!(err, CfsError::OperationNotAllowed { .. }));
    }

    #[tokio::test]
    async fn test_data_bags() {
        let api = FakeApi::new();
        api.set("data", json!({ "users": "https://chef/data/users" }));
        api.set("data/users", json!({ "alice": "https://chef/data/users/alice" }));
        api.set("data/users/alice", json!({ "id": "alice", "shell": "zsh" }));
        let root = MemoryEntry::root("/");
        let bags = DataBagsDir::new(root.base(), "data_bags", context(&api));

        let users = bags.child("users").await.unwrap();
        let alice = users.child("alice.json").await.unwrap();
        let value: Value = serde_json::from_slice(&alice.read().await.unwrap()).unwrap();
        assert_eq!(value["shell"], "zsh");

        let err = alice.write(Bytes::from(r#"{"id": "bob"}"#)).await.unwrap_err();
        assert!(matches!(err, CfsError::NameMismatch { .. }));

        let names: Vec<String> = bags.children().await.unwrap().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["users"]);
        assert!(!bags.child("admins").await.unwrap().exists().await.unwrap());

        let admins = bags.create_child("admins", None).await.unwrap();
        assert_eq!(api.doc("data/admins").unwrap(), json!({ "name": "admins" }));
        admins.create_child("root.json", Some(Bytes::from(r#"{"id": "root"}"#))).await.unwrap();
        assert!(api.doc("data/admins/root").is_some());

        let err = users.delete(false).await.unwrap_err();
        assert!(matches!(err, CfsError::MustDeleteRecursively { .. }));
        users.delete(true).await.unwrap();
        assert!(api.doc("data/users").is_none());
    }

    #[tokio::test]
    async fn test_compare_to_ignores_formatting() {
        let api = FakeApi::new();
        api.set("roles/web", json!({ "name": "web", "run_list": ["a"] }));
        let root = MemoryEntry::root("/");
        let roles = RestListDir::collection(root.base(), "roles", context(&api));
        let web = roles.child("web.json").await.unwrap();

        let local = MemoryEntry::root("local");
        let same: EntryRef = local.add_file("web.json", r#"{"run_list":["a"],"name":"web"}"#);
        let different: EntryRef = local.add_file("other.json", r#"{"name":"web"}"#);
        assert_eq!(web.compare_to(&same).await.unwrap().same, Some(true));
        let c = web.compare_to(&different).await.unwrap();
        assert_eq!(c.same, Some(false));
        assert!(matches!(c.own, Content::Bytes(_)));

        let missing = roles.child("db.json").await.unwrap();
        let c = missing.compare_to(&same).await.unwrap();
        assert_eq!(c.same, None);
        assert_eq!(c.own, Content::Missing);
    }
}
