//! Domain rule set loaded from list files.
//!
//! Supports three rule kinds per line:
//! - `full:example.com` matches only that exact name
//! - `domain:example.com` or bare `example.com` matches the name and all subdomains
//! - `keyword:example` matches any name containing the text

use rustc_hash::FxHashSet;
use std::path::Path;

use super::{DomainMatcher, rule_lines};
use crate::error::{Error, Result};

/// A set of domain rules for efficient lookup.
#[derive(Debug, Default)]
pub struct DomainSet {
    full: FxHashSet<String>,
    suffixes: FxHashSet<String>,
    keywords: Vec<String>,
}

impl DomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge every rule file in `paths`.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut set = Self::new();
        for path in paths {
            set.load_file(path.as_ref())?;
        }
        Ok(set)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read domain file {}: {}", path.display(), e))
        })?;
        self.load_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse rules from text; errors carry the offending line number.
    pub fn load_str(&mut self, contents: &str) -> std::result::Result<(), String> {
        for (line_no, rule) in rule_lines(contents) {
            self.add_rule(rule)
                .map_err(|e| format!("line {}: {}", line_no, e))?;
        }
        Ok(())
    }

    pub fn add_rule(&mut self, rule: &str) -> std::result::Result<(), String> {
        let (kind, value) = match rule.split_once(':') {
            Some((kind, value)) => (kind, value),
            None => ("domain", rule),
        };
        let value = normalize(value);
        if value.is_empty() {
            return Err(format!("empty {} rule", kind));
        }

        match kind {
            "full" => self.full.insert(value),
            "domain" => self.suffixes.insert(value),
            "keyword" => {
                if !self.keywords.contains(&value) {
                    self.keywords.push(value);
                }
                true
            }
            other => return Err(format!("unknown rule type '{}'", other)),
        };
        Ok(())
    }
}

impl DomainMatcher for DomainSet {
    /// Exact match first, then every parent suffix (e.g. "ads.example.com"
    /// matches a "example.com" rule), then keywords.
    fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        if name.is_empty() {
            return false;
        }

        if self.full.contains(&name) {
            return true;
        }

        let mut current = name.as_str();
        loop {
            if self.suffixes.contains(current) {
                return true;
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => break,
            }
        }

        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }

    fn len(&self) -> usize {
        self.full.len() + self.suffixes.len() + self.keywords.len()
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_lowercase()
}
