//! Pattern Matcher (SPEC_FULL.md §4.2).
//!
//! Glob translation follows the same literal-escape-then-substitute
//! approach the teacher (`ncd`'s `SearchEngine`) uses to turn a shell glob
//! into an anchored regex: escape `.`, then rewrite `?` to a single-char
//! class and `*` to a non-separator run, then compile once with
//! `RegexBuilder`.

use regex::{escape, Regex, RegexBuilder};

/// A compiled exclude/include pattern.
///
/// `anchored` patterns (leading `/` in the raw form) match the whole
/// relative path from the tree root. Unanchored patterns match only the
/// trailing `depth + 1` path components.
#[derive(Debug, Clone)]
pub struct Pattern {
    anchored: bool,
    /// Number of `/` in the pattern; determines how many trailing path
    /// components an unanchored match considers.
    depth: usize,
    has_wildcard: bool,
    raw: String,
    regex: Regex,
}

impl Pattern {
    /// Parse one pattern string as described in spec.md §3 ("Pattern"):
    /// optional leading `/` marks it anchored, trailing slashes are
    /// stripped, empty patterns are rejected (caller should filter them
    /// out beforehand via `parse_list`).
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        let (anchored, body) = match trimmed.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if body.is_empty() {
            return None;
        }
        let has_wildcard = body.contains('*') || body.contains('?');
        let depth = body.matches('/').count();
        let regex = compile_glob(body);
        Some(Pattern {
            anchored,
            depth,
            has_wildcard,
            raw: trimmed.to_string(),
            regex,
        })
    }

    /// Parse a `:`-separated pattern list as used by the `exclude`,
    /// `include`, and `clear` config options (spec.md §6). Empty entries
    /// are discarded.
    pub fn parse_list(joined: &str) -> Vec<Pattern> {
        joined
            .split(':')
            .filter_map(Pattern::new)
            .collect()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn anchored(&self) -> bool {
        self.anchored
    }

    pub fn has_wildcard(&self) -> bool {
        self.has_wildcard
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Match `path` (forward-slash relative path, no leading `/`) against
    /// this pattern per spec.md §4.2's two scoping rules.
    pub fn matches(&self, path: &str) -> bool {
        if self.anchored {
            self.regex.is_match(path)
        } else {
            let components: Vec<&str> = path.split('/').collect();
            let take = (self.depth + 1).min(components.len());
            let window = components[components.len() - take..].join("/");
            self.regex.is_match(&window)
        }
    }

    /// Partial match used for include-pattern descent (spec.md §4.2): when
    /// the pattern is deeper than `path`, match only the pattern's leading
    /// `path_depth + 1` components against `path`.
    pub fn matches_partial(&self, path: &str, path_depth: usize) -> (bool, bool) {
        let components: Vec<&str> = self.raw.trim_start_matches('/').split('/').collect();
        let pattern_depth = components.len().saturating_sub(1);
        if pattern_depth > path_depth {
            let partial: Vec<&str> = components[..path_depth + 1].to_vec();
            let partial_pattern = partial.join("/");
            let regex = compile_glob(&partial_pattern);
            (regex.is_match(path), false)
        } else {
            (self.regex.is_match(path), true)
        }
    }
}

fn compile_glob(body: &str) -> Regex {
    let mut translated = String::with_capacity(body.len() * 2);
    for ch in body.chars() {
        match ch {
            '?' => translated.push_str("[^/]"),
            '*' => translated.push_str("[^/]*"),
            _ => translated.push_str(&escape(&ch.to_string())),
        }
    }
    RegexBuilder::new(&format!("^{}$", translated))
        .build()
        .unwrap_or_else(|_| Regex::new("$^").expect("empty-match fallback regex is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchored_matches_only_root_path() {
        let p = Pattern::new("/file").unwrap();
        assert!(p.matches("file"));
        assert!(!p.matches("dir/file"));
    }

    #[test]
    fn unanchored_matches_trailing_component() {
        let p = Pattern::new("file").unwrap();
        assert!(p.matches("file"));
        assert!(p.matches("dir/file"));
        assert!(!p.matches("filex"));
    }

    #[test]
    fn unanchored_with_slash_matches_trailing_window() {
        let p = Pattern::new("src/file").unwrap();
        assert!(p.matches("a/src/file"));
        assert!(!p.matches("src/other"));
    }

    #[test]
    fn wildcard_star_and_question_mark() {
        let p = Pattern::new("*.log").unwrap();
        assert!(p.matches("debug.log"));
        assert!(!p.matches("debug.log.gz"));
        let q = Pattern::new("a?c").unwrap();
        assert!(q.matches("abc"));
        assert!(!q.matches("ac"));
    }

    #[test]
    fn trailing_slash_is_stripped_and_empty_is_rejected() {
        assert!(Pattern::new("dir/").unwrap().raw() == "dir");
        assert!(Pattern::new("").is_none());
        assert!(Pattern::new("/").is_none());
    }

    #[test]
    fn star_does_not_cross_path_separators() {
        let p = Pattern::new("/a/*").unwrap();
        assert!(p.matches("a/b"));
        assert!(!p.matches("a/b/c"));
    }
}
