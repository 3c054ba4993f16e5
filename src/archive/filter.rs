use anyhow::{Context, Result};
use regex::Regex;

/// Path filter combining exclude patterns with include-overrides.
///
/// Patterns are matched against the absolute filesystem path. A file is
/// skipped when any exclude pattern matches, unless an include-override
/// pattern matches as well; the override always wins.
pub struct PathFilter {
    excludes: Vec<Regex>,
    includes: Vec<Regex>,
}

/// Outcome of a filter decision. The matched pattern is carried so the
/// caller can log why a file was kept or dropped.
#[derive(Debug, PartialEq)]
pub enum FilterDecision {
    /// The file is packaged; carries the include-override pattern when one
    /// outvoted an exclusion
    Included(Option<String>),
    /// The file is skipped; carries the exclude pattern that matched
    Excluded(String),
}

impl PathFilter {
    /// Compile exclude and include-override patterns.
    pub fn new(exclude_patterns: &[String], include_patterns: &[String]) -> Result<Self> {
        Ok(PathFilter {
            excludes: compile(exclude_patterns).context("Invalid exclude pattern")?,
            includes: compile(include_patterns).context("Invalid include-override pattern")?,
        })
    }

    /// A filter that includes everything.
    pub fn empty() -> Self {
        PathFilter {
            excludes: Vec::new(),
            includes: Vec::new(),
        }
    }

    /// Decide whether the file at `path` should be packaged.
    pub fn decide(&self, path: &str) -> FilterDecision {
        match first_match(&self.excludes, path) {
            Some(excluded_by) => match first_match(&self.includes, path) {
                Some(included_by) => FilterDecision::Included(Some(included_by)),
                None => FilterDecision::Excluded(excluded_by),
            },
            None => FilterDecision::Included(None),
        }
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("'{}' is not a valid pattern", p)))
        .collect()
}

fn first_match(patterns: &[Regex], path: &str) -> Option<String> {
    patterns
        .iter()
        .find(|p| p.is_match(path))
        .map(|p| p.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(excludes: &[&str], includes: &[&str]) -> PathFilter {
        let excludes: Vec<String> = excludes.iter().map(|s| s.to_string()).collect();
        let includes: Vec<String> = includes.iter().map(|s| s.to_string()).collect();
        PathFilter::new(&excludes, &includes).unwrap()
    }

    #[test]
    fn test_no_patterns_includes_everything() {
        let f = PathFilter::empty();
        assert_eq!(f.decide("/a/note.txt"), FilterDecision::Included(None));
    }

    #[test]
    fn test_exclude_matches() {
        let f = filter(&[r".*\.exe"], &[]);
        assert_eq!(
            f.decide("/a/other.exe"),
            FilterDecision::Excluded(r".*\.exe".to_string())
        );
    }

    #[test]
    fn test_include_override_wins() {
        let f = filter(&[r".*\.exe"], &[r".*important.*"]);
        assert_eq!(
            f.decide("/a/important.exe"),
            FilterDecision::Included(Some(r".*important.*".to_string()))
        );
        assert_eq!(
            f.decide("/a/other.exe"),
            FilterDecision::Excluded(r".*\.exe".to_string())
        );
        assert_eq!(f.decide("/a/note.txt"), FilterDecision::Included(None));
    }

    #[test]
    fn test_include_without_exclusion_is_not_reported() {
        // an include-override only matters when an exclude matched
        let f = filter(&[r".*\.exe"], &[r".*note.*"]);
        assert_eq!(f.decide("/a/note.txt"), FilterDecision::Included(None));
    }

    #[test]
    fn test_first_matching_pattern_reported() {
        let f = filter(&[r".*\.log", r".*\.exe"], &[]);
        assert_eq!(
            f.decide("/var/app.log"),
            FilterDecision::Excluded(r".*\.log".to_string())
        );
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = PathFilter::new(&["[".to_string()], &[]);
        assert!(result.is_err());
    }
}
