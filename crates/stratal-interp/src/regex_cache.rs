//! Process-wide regex memoization.
//!
//! `MATCH` constraints resolve their pattern at runtime when it is not a
//! string literal; compiling on every probe would dominate the constraint
//! cost. The cache keys on the untouched pattern string. Failed compiles
//! are remembered as tombstones so a bad pattern warns once per probe but
//! is never recompiled.

use dashmap::DashMap;
use regex::Regex;

/// Compile a pattern with whole-string match semantics: `MATCH` succeeds
/// only when the pattern covers the entire subject.
pub fn compile_full_match(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).ok()
}

pub struct RegexCache {
    patterns: DashMap<String, Option<Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        RegexCache { patterns: DashMap::new() }
    }

    /// Compiled regex for the pattern, or `None` when the pattern does
    /// not compile. `Regex` clones share the compiled program.
    pub fn get_or_compile(&self, pattern: &str) -> Option<Regex> {
        if let Some(entry) = self.patterns.get(pattern) {
            return entry.clone();
        }
        self.patterns
            .entry(pattern.to_string())
            .or_insert_with(|| compile_full_match(pattern))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_compiled_patterns() {
        let cache = RegexCache::new();
        assert!(cache.get_or_compile("a+b").is_some());
        assert!(cache.get_or_compile("a+b").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_tombstone_without_poisoning_others() {
        let cache = RegexCache::new();
        assert!(cache.get_or_compile("(unclosed").is_none());
        assert!(cache.get_or_compile("(unclosed").is_none());
        assert!(cache.get_or_compile("closed").is_some());
        assert_eq!(cache.len(), 2);
    }
}
