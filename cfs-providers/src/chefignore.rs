// SPDX-License-Identifier: AGPL-3.0-or-later
//! chefignore rules
//!
//! One shell glob per line, matched against cookbook-relative paths
//! (`recipes/ignoreme.rb`). `*` does not cross `/`. Blank lines and lines
//! starting with `#` are skipped.

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Default)]
pub struct ChefIgnore {
    patterns: Vec<Pattern>,
    source: Option<PathBuf>,
}

impl ChefIgnore {
    pub fn parse(text: &str) -> Self {
        let patterns = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| match Pattern::new(line) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("Ignoring invalid chefignore pattern {:?}: {}", line, e);
                    None
                }
            })
            .collect();
        Self { patterns, source: None }
    }

    /// Read `<dir>/chefignore`. A missing or unreadable file ignores nothing.
    pub async fn load(dir: &Path) -> Self {
        let file = dir.join("chefignore");
        match tokio::fs::read_to_string(&file).await {
            Ok(text) => Self { source: Some(file), ..Self::parse(&text) },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("Could not read {}: {}", file.display(), e);
                Self::default()
            }
        }
    }

    pub fn is_ignored(&self, relative_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(relative_path, MATCH_OPTIONS))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_and_match() {
        let ignore = ChefIgnore::parse("# editor files\n\n*~\nrecipes/ignoreme.rb\nfiles/*/secret*\n");
        assert!(ignore.is_ignored("recipes/ignoreme.rb"));
        assert!(!ignore.is_ignored("recipes/default.rb"));
        assert!(ignore.is_ignored("README.md~"));
        assert!(ignore.is_ignored("files/default/secret.key"));
        assert!(!ignore.is_ignored("files/default/nested/secret.key"));
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let ignore = ChefIgnore::parse("*.rb");
        assert!(ignore.is_ignored("metadata.rb"));
        assert!(!ignore.is_ignored("recipes/default.rb"));
    }

    #[tokio::test]
    async fn test_load() {
        let tmp = TempDir::new().unwrap();
        assert!(ChefIgnore::load(tmp.path()).await.is_empty());

        std::fs::write(tmp.path().join("chefignore"), "recipes/ignoreme.rb\n").unwrap();
        let ignore = ChefIgnore::load(tmp.path()).await;
        assert!(!ignore.is_empty());
        assert_eq!(ignore.source(), Some(tmp.path().join("chefignore").as_path()));
    }
}
