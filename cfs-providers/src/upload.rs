// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cookbook upload through a sandbox
//!
//! The server is told every checksum of the new version, answers which blobs
//! it is missing, receives those in parallel and only then gets the
//! manifest. Blob PUTs fail together: every one is attempted and all
//! failures are reported at once.

use bytes::Bytes;
use cfs_core::{
    checksum::md5_hex,
    entry::EntryRef,
    error::{BackendError, CfsError, CfsResult, Operation},
    operations, ChefPath,
};
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};

use crate::manifest::{metadata_rb_version, CookbookManifest};
use crate::root::ServerContext;

/// One file of a local cookbook, ready to upload
#[derive(Debug, Clone)]
pub(crate) struct LocalFile {
    /// Relative to the cookbook root
    pub path: String,
    pub checksum: String,
    pub content: Bytes,
}

/// Every file under `cookbook`, in listing order
pub(crate) async fn collect_files(cookbook: &EntryRef) -> CfsResult<Vec<LocalFile>> {
    let mut files = Vec::new();
    for entry in operations::list(cookbook).await? {
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry.path().relative_to(cookbook.path()) else {
            continue;
        };
        let content = entry.read().await?;
        files.push(LocalFile { path, checksum: md5_hex(&content), content });
    }
    Ok(files)
}

/// Name, version and metadata document of a local cookbook
///
/// The version comes from `metadata.json`, then `metadata.rb`, then
/// defaults to `0.0.0`.
pub(crate) fn cookbook_metadata(dir_name: &str, files: &[LocalFile]) -> (String, String, Value) {
    let find = |name: &str| files.iter().find(|f| f.path == name);
    let json_metadata = find("metadata.json")
        .and_then(|f| serde_json::from_slice::<Value>(&f.content).ok())
        .filter(Value::is_object);

    let text = |value: &Option<Value>, key: &str| {
        value.as_ref().and_then(|v| v.get(key)).and_then(Value::as_str).map(str::to_string)
    };
    let name = text(&json_metadata, "name").unwrap_or_else(|| dir_name.to_string());
    let version = text(&json_metadata, "version")
        .or_else(|| find("metadata.rb").and_then(|f| metadata_rb_version(&String::from_utf8_lossy(&f.content))))
        .unwrap_or_else(|| "0.0.0".to_string());
    let metadata = json_metadata.unwrap_or_else(|| json!({ "name": name, "version": version }));
    (name, version, metadata)
}

/// Blob the sandbox wants uploaded
struct PendingBlob {
    checksum: String,
    url: String,
    content: Bytes,
}

fn pending_blobs(sandbox: &Value, files: &[LocalFile]) -> Vec<PendingBlob> {
    let Some(checksums) = sandbox.get("checksums").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut pending: Vec<PendingBlob> = Vec::new();
    for file in files {
        if pending.iter().any(|p| p.checksum == file.checksum) {
            continue;
        }
        let Some(info) = checksums.get(&file.checksum) else {
            continue;
        };
        if !info.get("needs_upload").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        if let Some(url) = info.get("url").and_then(Value::as_str) {
            pending.push(PendingBlob {
                checksum: file.checksum.clone(),
                url: url.to_string(),
                content: file.content.clone(),
            });
        }
    }
    pending
}

/// Upload `files` and commit `manifest` as a new cookbook version
pub(crate) async fn upload_cookbook(
    ctx: &ServerContext,
    path: &ChefPath,
    manifest: &CookbookManifest,
    files: Vec<LocalFile>,
) -> CfsResult<()> {
    let failed = |e: BackendError| CfsError::from_backend(path, Operation::Upload, e);

    let mut checksums = Map::new();
    for file in &files {
        checksums.insert(file.checksum.clone(), Value::Null);
    }
    let sandbox = ctx
        .api
        .post("sandboxes", &json!({ "checksums": checksums }))
        .await
        .map_err(failed)?;
    let sandbox_id = sandbox
        .get("sandbox_id")
        .and_then(Value::as_str)
        .ok_or_else(|| failed(BackendError::Other("sandbox response has no sandbox_id".into())))?
        .to_string();

    let pending = pending_blobs(&sandbox, &files);
    tracing::debug!("Sandbox {}: {} of {} blobs to upload", sandbox_id, pending.len(), checksums.len());

    let results: Vec<(PendingBlob, Result<(), BackendError>)> = stream::iter(pending)
        .map(|blob| async move {
            let result = ctx.api.put_raw(&blob.url, blob.content.clone()).await;
            (blob, result)
        })
        .buffer_unordered(ctx.upload_concurrency.max(1))
        .collect()
        .await;

    let mut errors = Vec::new();
    for (blob, result) in results {
        match result {
            Ok(()) => ctx.blobs.insert(blob.checksum, blob.content),
            Err(e) => {
                tracing::warn!("Failed to upload {} for {}: {}", blob.checksum, path, e);
                errors.push(e);
            }
        }
    }
    if !errors.is_empty() {
        return Err(CfsError::failed(path, Operation::Upload, BackendError::Aggregate(errors)));
    }

    ctx.api
        .put(&format!("sandboxes/{}", sandbox_id), &json!({ "is_completed": true }))
        .await
        .map_err(failed)?;

    let version = manifest.version.as_deref().unwrap_or("0.0.0");
    let api_path = format!("cookbooks/{}/{}", manifest.cookbook_name, version);
    match ctx.api.put(&api_path, &manifest.to_value()).await {
        Ok(_) => Ok(()),
        Err(e) if e.status() == Some(409) => Err(CfsError::CookbookFrozen { path: path.clone(), cause: Some(e) }),
        Err(e) => Err(failed(e)),
    }
}
