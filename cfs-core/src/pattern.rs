// SPDX-License-Identifier: AGPL-3.0-or-later
//! Path patterns
//!
//! A [`FilePattern`] is a shell-style glob over slash-separated Chef FS paths:
//! `*` and `?` stay inside one segment, `**` crosses segments, `[a-z]` is a
//! character class and `\` escapes. Besides matching, a pattern tells a tree
//! walk whether a directory can contain matches at all and, while the
//! pattern is still literal, which single child to descend into.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use crate::path::split;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("invalid pattern '{pattern}': '..' cannot follow '**'")]
    ParentOfDoubleStar { pattern: String },

    #[error("invalid pattern '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

fn special_characters() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\\.|\[[^\]]+\]|\*\*|\*|\?|[*?.|()\[\]{}+\\^$]").expect("valid regex")
    })
}

/// One segment of a pattern, translated
struct Segment {
    regex: String,
    /// The literal name, when the segment has no wildcard
    exact: Option<String>,
    double_star: bool,
}

impl Segment {
    fn parse(part: &str) -> Self {
        let mut segment = Segment { regex: String::new(), exact: Some(String::new()), double_star: false };
        let mut last = 0;
        for special in special_characters().find_iter(part) {
            segment.literal(&part[last..special.start()]);
            last = special.end();
            match special.as_str() {
                "**" => {
                    segment.exact = None;
                    segment.double_star = true;
                    segment.regex.push_str(".*");
                }
                "*" => {
                    segment.exact = None;
                    segment.regex.push_str("[^/]*");
                }
                "?" => {
                    segment.exact = None;
                    segment.regex.push_str("[^/]");
                }
                escaped if escaped.len() > 1 && escaped.starts_with('\\') => segment.literal(&escaped[1..]),
                class if class.len() > 1 && class.starts_with('[') => {
                    segment.exact = None;
                    segment.regex.push_str(class);
                }
                other => segment.literal(other),
            }
        }
        segment.literal(&part[last..]);
        segment
    }

    fn literal(&mut self, text: &str) {
        if let Some(exact) = self.exact.as_mut() {
            exact.push_str(text);
        }
        self.regex.push_str(&regex::escape(text));
    }
}

fn anchored(pattern: &str, regex: &str) -> Result<Regex, PatternError> {
    Regex::new(&format!("^{}$", regex)).map_err(|source| PatternError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

/// A glob over Chef FS paths
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: String,
    absolute: bool,
    regex: Regex,
    /// Per-segment matchers up to the first `**`
    segment_regexes: Vec<Regex>,
    /// Literal names up to the first `**`; `None` where a segment has wildcards
    exact_parts: Vec<Option<String>>,
    double_star: bool,
    normalized: String,
}

impl FilePattern {
    /// Parse `pattern`, folding away `.`, `..` and empty segments
    pub fn new(pattern: impl Into<String>) -> Result<Self, PatternError> {
        let pattern = pattern.into();
        let absolute = pattern.starts_with('/');

        let mut full_regex: Vec<String> = Vec::new();
        let mut normalized: Vec<String> = Vec::new();
        let mut segment_regexes = Vec::new();
        let mut exact_parts = Vec::new();
        let mut double_star = false;

        for part in pattern.split('/') {
            let segment = Segment::parse(part);
            double_star |= segment.double_star;
            match segment.exact.as_deref() {
                Some("") | Some(".") => continue,
                Some("..") if absolute && normalized.is_empty() => continue,
                Some("..") if !normalized.is_empty() => {
                    let previous = normalized.last().map(|p| Segment::parse(p).double_star);
                    if previous == Some(true) {
                        return Err(PatternError::ParentOfDoubleStar { pattern });
                    }
                    full_regex.pop();
                    normalized.pop();
                    if !double_star {
                        segment_regexes.pop();
                        exact_parts.pop();
                    }
                    continue;
                }
                _ => {}
            }
            if !double_star {
                segment_regexes.push(anchored(&pattern, &segment.regex)?);
                exact_parts.push(segment.exact.clone());
            }
            full_regex.push(segment.regex);
            normalized.push(part.to_string());
        }

        let regex = anchored(&pattern, &full_regex.join("/"))?;
        let normalized = if absolute {
            format!("/{}", normalized.join("/"))
        } else {
            normalized.join("/")
        };
        Ok(Self {
            pattern,
            absolute,
            regex,
            segment_regexes,
            exact_parts,
            double_star,
            normalized,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn normalized_pattern(&self) -> &str {
        &self.normalized
    }

    /// Strip the leading `/` of `path` if its absoluteness matches ours
    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        match (self.absolute, path.strip_prefix('/')) {
            (true, Some(rest)) => Some(rest),
            (false, None) => Some(path),
            _ => None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.relative(path).map_or(false, |path| self.regex.is_match(path))
    }

    /// Whether anything below the directory at `path` can match
    pub fn could_match_children(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let Some(path) = self.relative(path) else {
            return false;
        };
        let parts: Vec<&str> = split(path).collect();
        if self.segment_regexes.len() <= parts.len() && !self.double_star {
            return false;
        }
        parts
            .iter()
            .zip(&self.segment_regexes)
            .all(|(part, regex)| regex.is_match(part))
    }

    /// The only child of `path` worth visiting, when the pattern is literal there
    pub fn exact_child_name_under(&self, path: &str) -> Option<&str> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let depth = split(path).count();
        self.exact_parts.get(depth).and_then(|part| part.as_deref())
    }

    /// The single path this pattern matches, if it has no wildcards
    pub fn exact_path(&self) -> Option<String> {
        if self.double_star {
            return None;
        }
        let parts: Option<Vec<&str>> = self.exact_parts.iter().map(|p| p.as_deref()).collect();
        let joined = parts?.join("/");
        Some(if self.absolute { format!("/{}", joined) } else { joined })
    }
}

impl fmt::Display for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(pattern: &str) -> FilePattern {
        FilePattern::new(pattern).unwrap()
    }

    #[test]
    fn test_empty_and_root() {
        let empty = p("");
        assert!(empty.matches(""));
        assert!(!empty.matches("/"));
        assert!(!empty.matches("a"));
        assert_eq!(empty.exact_path().as_deref(), Some(""));
        assert!(!empty.could_match_children(""));
        assert!(!empty.could_match_children("a/b"));

        let root = p("/");
        assert!(root.matches("/"));
        assert!(!root.matches(""));
        assert!(!root.matches("/a"));
        assert_eq!(root.exact_path().as_deref(), Some("/"));
        assert!(!root.could_match_children("/"));
        assert!(!root.could_match_children("/a"));
    }

    #[test]
    fn test_literal_absolute() {
        let pattern = p("/abc/def/ghi");
        assert!(pattern.matches("/abc/def/ghi"));
        assert!(!pattern.matches("abc/def/ghi"));
        assert!(!pattern.matches("/abc/def"));
        assert_eq!(pattern.exact_path().as_deref(), Some("/abc/def/ghi"));

        assert!(pattern.could_match_children("/"));
        assert!(pattern.could_match_children("/abc"));
        assert!(pattern.could_match_children("/abc/def"));
        assert!(!pattern.could_match_children("/xyz"));
        assert!(!pattern.could_match_children("abc"));
        assert!(!pattern.could_match_children("/abc/xyz"));
        assert!(!pattern.could_match_children("/abc/def/ghi"));

        assert_eq!(pattern.exact_child_name_under("/"), Some("abc"));
        assert_eq!(pattern.exact_child_name_under("/abc"), Some("def"));
        assert_eq!(pattern.exact_child_name_under("/abc/def"), Some("ghi"));
    }

    #[test]
    fn test_literal_relative() {
        let pattern = p("abc/def/ghi");
        assert!(pattern.matches("abc/def/ghi"));
        assert!(!pattern.matches("/abc/def/ghi"));
        assert!(pattern.could_match_children("abc"));
        assert!(!pattern.could_match_children("/abc"));
        assert_eq!(pattern.exact_child_name_under("abc"), Some("def"));
    }

    #[test]
    fn test_escapes() {
        let pattern = p(r"a\*\b");
        assert!(pattern.matches("a*b"));
        assert!(!pattern.matches("ab"));
        assert!(!pattern.matches("acb"));
        assert_eq!(pattern.exact_path().as_deref(), Some("a*b"));

        let dotted = p("/roles/web.json");
        assert!(dotted.matches("/roles/web.json"));
        assert!(!dotted.matches("/roles/webxjson"));
    }

    #[test]
    fn test_single_star() {
        let pattern = p("/abc/d*f/ghi");
        assert!(pattern.matches("/abc/def/ghi"));
        assert!(pattern.matches("/abc/df/ghi"));
        assert!(pattern.matches("/abc/dxyzf/ghi"));
        assert!(!pattern.matches("/abc/d/ghi"));
        assert!(!pattern.matches("/abc/d/x/f/ghi"));
        assert_eq!(pattern.exact_path(), None);

        assert!(pattern.could_match_children("/abc"));
        assert!(pattern.could_match_children("/abc/dxyzf"));
        assert!(!pattern.could_match_children("/abc/xyz"));
        assert!(!pattern.could_match_children("/abc/def/ghi"));

        assert_eq!(pattern.exact_child_name_under("/"), Some("abc"));
        assert_eq!(pattern.exact_child_name_under("/abc"), None);
        assert_eq!(pattern.exact_child_name_under("/abc/def"), Some("ghi"));
    }

    #[test]
    fn test_question_mark_and_class() {
        let pattern = p("/abc/d??f/ghi");
        assert!(pattern.matches("/abc/deef/ghi"));
        assert!(!pattern.matches("/abc/deeef/ghi"));
        assert!(!pattern.matches("/abc/def/ghi"));
        assert!(!pattern.could_match_children("/abc/def"));

        let pattern = p("/abc/d[a-z][0-9]f/ghi");
        assert!(pattern.matches("/abc/de1f/ghi"));
        assert!(!pattern.matches("/abc/deef/ghi"));
        assert!(!pattern.matches("/abc/de11f/ghi"));
        assert!(pattern.could_match_children("/abc/de1f"));
        assert!(!pattern.could_match_children("/abc/d11f"));
    }

    #[test]
    fn test_double_star() {
        let pattern = p("/abc/**/ghi");
        assert!(pattern.matches("/abc/def/ghi"));
        assert!(pattern.matches("/abc/d/e/f/ghi"));
        assert!(!pattern.matches("/abc/ghi"));
        assert!(!pattern.matches("/abcdef/d/ghi"));
        assert_eq!(pattern.exact_path(), None);
        assert!(pattern.could_match_children("/abc/d/e/f"));
        assert!(pattern.could_match_children("/abc/def/ghi"));
        assert!(!pattern.could_match_children("/xyz"));
        assert_eq!(pattern.exact_child_name_under("/"), Some("abc"));
        assert_eq!(pattern.exact_child_name_under("/abc"), None);

        let pattern = p("/abc**/ghi");
        assert!(pattern.matches("/abc/ghi"));
        assert!(pattern.matches("/abcdef/ghi"));
        assert!(!pattern.matches("/abc/defghi"));
        assert!(pattern.could_match_children("/abcdef"));
        assert_eq!(pattern.exact_child_name_under("/"), None);

        let pattern = p("/abc/**ghi");
        assert!(pattern.matches("/abc/ghi"));
        assert!(pattern.matches("/abc/defghi"));
        assert!(!pattern.matches("/abc/def/ghi/jkl"));
        assert!(!pattern.could_match_children("/abcdef"));

        let pattern = p("a**b**c");
        assert!(pattern.matches("abc"));
        assert!(pattern.matches("a/x/y/b/z/w/c"));
        assert!(!pattern.matches("axyzwc"));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(p("abc/").normalized_pattern(), "abc");
        assert_eq!(p("//").normalized_pattern(), "/");
        assert_eq!(p("/./").exact_path().as_deref(), Some("/"));
        assert!(p("abc//def").matches("abc/def"));
        assert_eq!(p("./abc/def").exact_path().as_deref(), Some("abc/def"));

        assert_eq!(p("abc/../def").normalized_pattern(), "def");
        assert_eq!(p("abc/def/../..").exact_path().as_deref(), Some(""));
        assert_eq!(p("/*/../def").exact_path().as_deref(), Some("/def"));
        assert_eq!(p("/*/*/../def").normalized_pattern(), "/*/def");
        assert!(p("/*/*/../def").matches("/abc/def"));
        assert_eq!(p("/abc/def/../..").exact_path().as_deref(), Some("/"));
        assert_eq!(p("abc/../../def").exact_path().as_deref(), Some("../def"));
        assert_eq!(p("/../abc/def").exact_path().as_deref(), Some("/abc/def"));
        assert_eq!(p("/..").exact_path().as_deref(), Some("/"));

        let folded = p("abc**/def/../ghi");
        assert_eq!(folded.exact_path(), None);
        assert!(folded.matches("abc/ghi"));
        assert!(folded.matches("abc/x/y/z/ghi"));
        assert!(!folded.matches("ghi"));
    }

    #[test]
    fn test_parent_of_double_star_is_rejected() {
        assert!(matches!(
            FilePattern::new("abc/**/../def"),
            Err(PatternError::ParentOfDoubleStar { .. })
        ));
        assert!(FilePattern::new("abc/**/abc/../../def").is_err());
        assert!(matches!(FilePattern::new("/roles/[z-a]"), Err(PatternError::Regex { .. })));
    }
}
