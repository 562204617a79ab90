// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cookbook manifests and the segment table
//!
//! A manifest lists one cookbook version's files per segment. The directory
//! tree of a cookbook is derived from the `path` of each record; what a
//! segment directory may contain comes from [`SEGMENTS`], never from the
//! manifest.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// What one segment directory may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPolicy {
    pub name: &'static str,
    /// Only `.rb` files
    pub ruby_only: bool,
    /// Nested directories allowed
    pub recursive: bool,
}

pub const ROOT_FILES: &str = "root_files";

/// Segments in manifest order
pub const SEGMENTS: [SegmentPolicy; 9] = [
    SegmentPolicy { name: "attributes", ruby_only: true, recursive: false },
    SegmentPolicy { name: "definitions", ruby_only: true, recursive: false },
    SegmentPolicy { name: "recipes", ruby_only: true, recursive: false },
    SegmentPolicy { name: "libraries", ruby_only: true, recursive: false },
    SegmentPolicy { name: "templates", ruby_only: false, recursive: true },
    SegmentPolicy { name: "files", ruby_only: false, recursive: true },
    SegmentPolicy { name: "resources", ruby_only: true, recursive: true },
    SegmentPolicy { name: "providers", ruby_only: true, recursive: true },
    SegmentPolicy { name: ROOT_FILES, ruby_only: false, recursive: false },
];

impl SegmentPolicy {
    pub fn lookup(name: &str) -> Option<&'static SegmentPolicy> {
        SEGMENTS.iter().find(|s| s.name == name)
    }

    /// Segment that may appear as a directory directly under a cookbook
    pub fn directory(name: &str) -> Option<&'static SegmentPolicy> {
        Self::lookup(name).filter(|s| s.name != ROOT_FILES)
    }

    pub fn root_files() -> &'static SegmentPolicy {
        &SEGMENTS[SEGMENTS.len() - 1]
    }

    /// Segment a cookbook-relative file path belongs to
    pub fn for_path(relative_path: &str) -> &'static SegmentPolicy {
        match relative_path.split_once('/') {
            Some((first, _)) => Self::directory(first).unwrap_or(Self::root_files()),
            None => Self::root_files(),
        }
    }

    pub fn allows(&self, name: &str, is_dir: bool) -> bool {
        if is_dir {
            self.recursive
        } else {
            !self.ruby_only || name.ends_with(".rb")
        }
    }
}

/// One file record of a manifest segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub checksum: String,
    #[serde(default = "default_specificity")]
    pub specificity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

fn default_specificity() -> String {
    "default".to_string()
}

impl ManifestFile {
    /// Record for a local file about to be uploaded
    pub fn for_upload(relative_path: &str, checksum: impl Into<String>) -> Self {
        let parts: Vec<&str> = relative_path.split('/').collect();
        let segment = SegmentPolicy::for_path(relative_path);
        let specificity = match segment.name {
            "templates" | "files" if parts.len() > 2 => parts[1].to_string(),
            _ => default_specificity(),
        };
        Self {
            name: parts.last().copied().unwrap_or_default().to_string(),
            path: relative_path.to_string(),
            checksum: checksum.into(),
            specificity,
            url: None,
        }
    }
}

/// A parsed cookbook version document
#[derive(Debug, Clone, Default)]
pub struct CookbookManifest {
    pub cookbook_name: String,
    pub version: Option<String>,
    pub metadata: Value,
    segments: Vec<(&'static str, Vec<ManifestFile>)>,
}

impl CookbookManifest {
    pub fn new(cookbook_name: impl Into<String>, version: impl Into<String>, metadata: Value) -> Self {
        Self {
            cookbook_name: cookbook_name.into(),
            version: Some(version.into()),
            metadata,
            segments: SEGMENTS.iter().map(|s| (s.name, Vec::new())).collect(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let mut segments = Vec::with_capacity(SEGMENTS.len());
        for segment in &SEGMENTS {
            let files = match value.get(segment.name) {
                Some(files) if !files.is_null() => Vec::<ManifestFile>::deserialize(files)?,
                _ => Vec::new(),
            };
            segments.push((segment.name, files));
        }
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            cookbook_name: text("cookbook_name").or_else(|| text("name")).unwrap_or_default(),
            version: text("version"),
            metadata: value.get("metadata").cloned().unwrap_or(Value::Null),
            segments,
        })
    }

    /// Every file record, segments in manifest order
    pub fn files(&self) -> impl Iterator<Item = (&'static SegmentPolicy, &ManifestFile)> {
        self.segments.iter().flat_map(|(name, files)| {
            let policy = SegmentPolicy::lookup(name).unwrap_or(SegmentPolicy::root_files());
            files.iter().map(move |f| (policy, f))
        })
    }

    pub fn add_file(&mut self, file: ManifestFile) {
        let segment = SegmentPolicy::for_path(&file.path).name;
        if let Some((_, files)) = self.segments.iter_mut().find(|(name, _)| *name == segment) {
            files.push(file);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|(_, files)| files.is_empty())
    }

    /// Document for `PUT cookbooks/<name>/<version>`
    pub fn to_value(&self) -> Value {
        let version = self.version.clone().unwrap_or_else(|| "0.0.0".to_string());
        let mut doc = Map::new();
        doc.insert("name".into(), format!("{}-{}", self.cookbook_name, version).into());
        doc.insert("cookbook_name".into(), self.cookbook_name.clone().into());
        doc.insert("version".into(), version.into());
        doc.insert("json_class".into(), "Chef::CookbookVersion".into());
        doc.insert("chef_type".into(), "cookbook_version".into());
        doc.insert("frozen?".into(), false.into());
        doc.insert("metadata".into(), self.metadata.clone());
        for (name, files) in &self.segments {
            let files = files.iter().filter_map(|f| serde_json::to_value(f).ok()).collect();
            doc.insert((*name).into(), Value::Array(files));
        }
        Value::Object(doc)
    }
}

fn versioned_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)-(\d+\.\d+\.\d+)$").expect("valid regex"))
}

/// Split `<name>-<major>.<minor>.<patch>`
pub fn split_versioned_name(name: &str) -> Option<(&str, &str)> {
    let captures = versioned_name_regex().captures(name)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// Version declared by a `metadata.rb`
pub fn metadata_rb_version(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*version\s*\(?\s*['"]([^'"]+)['"]"#).expect("valid regex")
    });
    re.captures(text).map(|c| c[1].to_string())
}
