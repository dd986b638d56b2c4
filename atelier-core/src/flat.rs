//! Flat path → content view of a file tree, used for reference resolution

use serde::ser::{Serialize, Serializer};

/// Derived mapping from slash-joined, root-relative path to file content.
///
/// Entries keep depth-first discovery order, which decides the winner when more
/// than one path ends with the same suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatFileMap {
    entries: Vec<(String, String)>,
}

impl FlatFileMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace an entry; replacing keeps the original position
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        let content = content.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == path) {
            Some(entry) => entry.1 = content,
            None => self.entries.push((path, content)),
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == path)
            .map(|(_, content)| content.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(path, content)| (path.as_str(), content.as_str()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(path, _)| path.as_str())
    }

    /// Resolve a local `href`/`src` reference to a `(path, content)` entry.
    ///
    /// A single leading `/` is stripped. An exact key match wins; otherwise the
    /// first key ending with `/` + reference is used, at any depth.
    pub fn resolve(&self, reference: &str) -> Option<(&str, &str)> {
        let normalized = normalize_reference(reference);
        if normalized.is_empty() {
            return None;
        }

        if let Some((path, content)) = self.entries.iter().find(|(path, _)| path == normalized) {
            return Some((path.as_str(), content.as_str()));
        }

        let suffix = format!("/{}", normalized);
        self.entries
            .iter()
            .find(|(path, _)| path.ends_with(&suffix))
            .map(|(path, content)| (path.as_str(), content.as_str()))
    }
}

impl FromIterator<(String, String)> for FlatFileMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = FlatFileMap::new();
        for (path, content) in iter {
            map.insert(path, content);
        }
        map
    }
}

impl Serialize for FlatFileMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Strip one leading `/` from a reference
pub fn normalize_reference(reference: &str) -> &str {
    reference.strip_prefix('/').unwrap_or(reference)
}

/// References that never point into the virtual tree: absolute http(s) URLs,
/// protocol-relative URLs, in-page anchors and mail links
pub fn is_external_reference(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("//")
        || lower.starts_with('#')
        || lower.starts_with("mailto:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatFileMap {
        [
            ("index.html", "<html></html>"),
            ("src/style.css", "body {}"),
            ("lib/vendor/style.css", "/* vendor */"),
        ]
        .into_iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
    }

    #[test]
    fn test_resolve_exact_and_suffix() {
        let map = sample();

        assert_eq!(map.resolve("src/style.css").map(|e| e.0), Some("src/style.css"));
        assert_eq!(map.resolve("/src/style.css").map(|e| e.0), Some("src/style.css"));
        // first suffix match in discovery order
        assert_eq!(map.resolve("style.css").map(|e| e.0), Some("src/style.css"));
        assert_eq!(
            map.resolve("vendor/style.css").map(|e| e.0),
            Some("lib/vendor/style.css")
        );
        assert!(map.resolve("missing.css").is_none());
        assert!(map.resolve("").is_none());
        // suffix must start at a segment boundary
        assert!(map.resolve("yle.css").is_none());
    }

    #[test]
    fn test_external_references() {
        assert!(is_external_reference("https://cdn.example.com/x.css"));
        assert!(is_external_reference("HTTP://example.com"));
        assert!(is_external_reference("//cdn.example.com/x.js"));
        assert!(is_external_reference("#top"));
        assert!(is_external_reference("mailto:class@example.com"));
        assert!(!is_external_reference("src/style.css"));
        assert!(!is_external_reference("/style.css"));
    }

    #[test]
    fn test_serializes_as_object() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["src/style.css"], "body {}");
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut map = sample();
        map.insert("index.html", "new");

        assert_eq!(map.len(), 3);
        assert_eq!(map.paths().next(), Some("index.html"));
        assert_eq!(map.get("index.html"), Some("new"));
    }
}
