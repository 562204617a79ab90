// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chef FS configuration
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! chef_server_url = "https://chef.example.com/organizations/acme"
//! node_name = "alice"
//! chef_repo_path = ["/srv/chef-repo"]
//! versioned_cookbooks = false
//! blob_cache_bytes = 268435456
//!
//! [object_paths]
//! cookbooks = ["/srv/chef-repo/cookbooks", "/srv/vendor/cookbooks"]
//! ```

use cfs_core::BackendError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

use crate::api::HttpApi;
use crate::blob_cache::{BlobCache, DEFAULT_BLOB_CACHE_BYTES, DEFAULT_BLOB_CACHE_ENTRIES};
use crate::root::{RepoMode, RepositoryRoot, ServerContext, ServerRoot, DEFAULT_UPLOAD_CONCURRENCY};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot reach the server: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChefFsConfig {
    pub chef_server_url: Option<String>,
    /// Sent as `X-Ops-UserId`
    pub node_name: Option<String>,
    /// Derived from the server URL when unset
    pub repo_mode: Option<RepoMode>,
    pub versioned_cookbooks: bool,
    /// Roots of the local repository; the current directory when empty
    pub chef_repo_path: Vec<PathBuf>,
    /// Per object type overrides of `<chef_repo_path>/<object>`
    pub object_paths: BTreeMap<String, Vec<PathBuf>>,
    pub timeout_secs: u64,
    pub upload_concurrency: usize,
    /// Most cookbook blobs kept in memory per server root
    pub blob_cache_entries: usize,
    /// Most cookbook blob bytes kept in memory per server root
    pub blob_cache_bytes: usize,
}

impl Default for ChefFsConfig {
    fn default() -> Self {
        Self {
            chef_server_url: None,
            node_name: None,
            repo_mode: None,
            versioned_cookbooks: false,
            chef_repo_path: Vec::new(),
            object_paths: BTreeMap::new(),
            timeout_secs: 60,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            blob_cache_entries: DEFAULT_BLOB_CACHE_ENTRIES,
            blob_cache_bytes: DEFAULT_BLOB_CACHE_BYTES,
        }
    }
}

fn organization_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/+organizations/.+").expect("valid regex"))
}

impl ChefFsConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_concurrency == 0 {
            return Err(ConfigError::Invalid("upload_concurrency must be at least 1".into()));
        }
        if self.blob_cache_entries == 0 || self.blob_cache_bytes == 0 {
            return Err(ConfigError::Invalid("blob_cache_entries and blob_cache_bytes must be at least 1".into()));
        }
        if let Some(unknown) = self
            .object_paths
            .keys()
            .find(|name| !RepoMode::HostedEverything.object_names().contains(&name.as_str()))
        {
            return Err(ConfigError::Invalid(format!("unknown object type '{}' in object_paths", unknown)));
        }
        Ok(())
    }

    /// The configured mode, or `hosted_everything` for organization URLs
    pub fn effective_repo_mode(&self) -> RepoMode {
        if let Some(mode) = self.repo_mode {
            return mode;
        }
        match &self.chef_server_url {
            Some(url) if organization_url().is_match(url) => RepoMode::HostedEverything,
            _ => RepoMode::Everything,
        }
    }

    /// Directories holding each object type of the mode, primary first
    pub fn child_paths(&self) -> BTreeMap<String, Vec<PathBuf>> {
        let repo_paths = if self.chef_repo_path.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.chef_repo_path.clone()
        };
        self.effective_repo_mode()
            .object_names()
            .iter()
            .map(|name| {
                let paths = match self.object_paths.get(*name) {
                    Some(paths) => paths.clone(),
                    None => repo_paths.iter().map(|repo| repo.join(name)).collect(),
                };
                (name.to_string(), paths)
            })
            .collect()
    }

    pub fn create_remote(&self) -> Result<Arc<ServerRoot>, ConfigError> {
        let Some(url) = &self.chef_server_url else {
            return Err(ConfigError::Invalid("chef_server_url is not set".into()));
        };
        let api = HttpApi::new(url.clone(), self.node_name.clone(), Duration::from_secs(self.timeout_secs))?;
        let mut ctx = ServerContext::new(Arc::new(api));
        ctx.repo_mode = self.effective_repo_mode();
        ctx.versioned_cookbooks = self.versioned_cookbooks;
        ctx.upload_concurrency = self.upload_concurrency;
        ctx.blobs = self.blob_cache();
        Ok(ServerRoot::new(Arc::new(ctx)))
    }

    /// The blob cache a server root built from this config uses
    pub fn blob_cache(&self) -> BlobCache {
        let entries = NonZeroUsize::new(self.blob_cache_entries).unwrap_or(NonZeroUsize::MIN);
        BlobCache::with_limits(entries, self.blob_cache_bytes)
    }

    pub fn create_local(&self) -> Arc<RepositoryRoot> {
        RepositoryRoot::new(self.child_paths(), self.versioned_cookbooks)
    }
}
