//! Virtual file tree edited inside the sandbox
//!
//! The tree is an ordered sequence of top-level [`FileNode`]s. Every mutation
//! returns a new [`FileTree`] value and leaves the receiver untouched, so a caller
//! can swap in the new tree and keep a consistent snapshot of the old one.
//!
//! Nodes are addressed by [`NodeId`]. Ids are assigned when a node is created or
//! loaded and are never persisted; the persisted form only carries names, kinds,
//! content and sibling order.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::flat::FlatFileMap;

/// Default entry page written on first load
const SCAFFOLD_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Document</title>
    <link rel="stylesheet" href="src/style.css">
</head>
<body>
    <h1>Hello World</h1>
    <script src="src/script.js"></script>
</body>
</html>"#;

const SCAFFOLD_STYLE_CSS: &str = "body { color: blue; }";
const SCAFFOLD_SCRIPT_JS: &str = "console.log('Hi');";

/// Errors raised by file tree operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("A node named '{0}' already exists in this folder")]
    DuplicateName(String),

    #[error("Invalid node name: '{0}'")]
    InvalidName(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node {0} is not a file")]
    NotAFile(NodeId),

    #[error("No node at path: {0}")]
    PathNotFound(String),
}

/// Stable opaque identifier of a node for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of node to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// A file with its text content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(skip)]
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub content: String,
}

/// A folder with ordered children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderEntry {
    #[serde(skip)]
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub children: Vec<FileNode>,
}

// Equality is structural; ids are session-local and ignored.
impl PartialEq for FileEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.content == other.content
    }
}

impl Eq for FileEntry {}

impl PartialEq for FolderEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.children == other.children
    }
}

impl Eq for FolderEntry {}

/// One node of the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileNode {
    File(FileEntry),
    Folder(FolderEntry),
}

impl FileNode {
    /// Create an empty file node
    pub fn file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::File(FileEntry {
            id: NodeId::new(),
            name: name.into(),
            content: content.into(),
        })
    }

    /// Create a folder node
    pub fn folder(name: impl Into<String>, children: Vec<FileNode>) -> Self {
        Self::Folder(FolderEntry {
            id: NodeId::new(),
            name: name.into(),
            children,
        })
    }

    fn empty(kind: NodeKind, name: &str) -> Self {
        match kind {
            NodeKind::File => Self::file(name, ""),
            NodeKind::Folder => Self::folder(name, Vec::new()),
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            FileNode::File(file) => file.id,
            FileNode::Folder(folder) => folder.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FileNode::File(file) => &file.name,
            FileNode::Folder(folder) => &folder.name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            FileNode::File(_) => NodeKind::File,
            FileNode::Folder(_) => NodeKind::Folder,
        }
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            FileNode::File(file) => Some(file),
            FileNode::Folder(_) => None,
        }
    }

    pub fn children(&self) -> &[FileNode] {
        match self {
            FileNode::File(_) => &[],
            FileNode::Folder(folder) => &folder.children,
        }
    }

    fn set_name(&mut self, name: &str) {
        match self {
            FileNode::File(file) => file.name = name.to_string(),
            FileNode::Folder(folder) => folder.name = name.to_string(),
        }
    }
}

/// The whole persisted unit: ordered top-level nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree {
    nodes: Vec<FileNode>,
}

impl FileTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Create a tree from top-level nodes
    pub fn from_nodes(nodes: Vec<FileNode>) -> Self {
        Self { nodes }
    }

    /// The tree written on first load: `index.html` and `src/{style.css,script.js}`
    pub fn scaffold() -> Self {
        Self::from_nodes(vec![
            FileNode::file("index.html", SCAFFOLD_INDEX_HTML),
            FileNode::folder(
                "src",
                vec![
                    FileNode::file("style.css", SCAFFOLD_STYLE_CSS),
                    FileNode::file("script.js", SCAFFOLD_SCRIPT_JS),
                ],
            ),
        ])
    }

    pub fn nodes(&self) -> &[FileNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize into the persisted JSON form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the persisted JSON form; every node gets a fresh id
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Insert an empty node as the last child of the folder at `parent_path`.
    ///
    /// An empty path inserts at the root. When a path segment does not resolve to
    /// a folder the tree is returned unchanged and no id is produced.
    pub fn create<S: AsRef<str>>(
        &self,
        kind: NodeKind,
        parent_path: &[S],
        name: &str,
    ) -> Result<(FileTree, Option<NodeId>), TreeError> {
        validate_name(name)?;

        let node = FileNode::empty(kind, name);
        let id = node.id();
        let mut next = self.clone();

        if insert_at(&mut next.nodes, parent_path, node)? {
            Ok((next, Some(id)))
        } else {
            tracing::debug!(
                "Parent path {:?} does not resolve to a folder, skipping create of {}",
                parent_path.iter().map(|s| s.as_ref()).collect::<Vec<_>>(),
                name
            );
            Ok((self.clone(), None))
        }
    }

    /// Rename the node with the given id
    pub fn rename(&self, id: NodeId, new_name: &str) -> Result<FileTree, TreeError> {
        validate_name(new_name)?;

        let mut next = self.clone();
        if rename_in(&mut next.nodes, id, new_name)? {
            Ok(next)
        } else {
            Err(TreeError::NodeNotFound(id))
        }
    }

    /// Remove exactly one node and its subtree
    pub fn delete(&self, id: NodeId) -> Result<FileTree, TreeError> {
        let mut next = self.clone();
        if remove_where(&mut next.nodes, &|node: &FileNode| node.id() == id) == 0 {
            return Err(TreeError::NodeNotFound(id));
        }
        Ok(next)
    }

    /// Remove the node at a slash-joined path
    pub fn delete_path(&self, path: &str) -> Result<FileTree, TreeError> {
        let id = self
            .find_path(path)
            .map(FileNode::id)
            .ok_or_else(|| TreeError::PathNotFound(path.to_string()))?;
        self.delete(id)
    }

    /// Remove every node at any depth whose name equals `name`, with its subtree.
    ///
    /// Legacy name-keyed behavior: two unrelated files sharing a name are both
    /// removed.
    pub fn delete_by_name(&self, name: &str) -> FileTree {
        let mut next = self.clone();
        let removed = remove_where(&mut next.nodes, &|node: &FileNode| node.name() == name);
        tracing::debug!("Removed {} nodes named {}", removed, name);
        next
    }

    /// Replace the content of the file with the given id
    pub fn update_content(&self, id: NodeId, content: &str) -> Result<FileTree, TreeError> {
        let mut next = self.clone();
        match find_mut(&mut next.nodes, id) {
            Some(FileNode::File(file)) => {
                file.content = content.to_string();
                Ok(next)
            }
            Some(FileNode::Folder(_)) => Err(TreeError::NotAFile(id)),
            None => Err(TreeError::NodeNotFound(id)),
        }
    }

    /// Replace the content of the first file named `name`, depth-first.
    ///
    /// Returns the tree unchanged when no file matches.
    pub fn update_content_by_name(&self, name: &str, content: &str) -> FileTree {
        let mut next = self.clone();
        if let Some(file) = first_file_named(&mut next.nodes, name) {
            file.content = content.to_string();
        }
        next
    }

    /// Find a node by id
    pub fn find(&self, id: NodeId) -> Option<&FileNode> {
        find_in(&self.nodes, id)
    }

    /// Find a file by id
    pub fn find_file(&self, id: NodeId) -> Option<&FileEntry> {
        self.find(id).and_then(FileNode::as_file)
    }

    /// Find a node by slash-joined path; empty segments are ignored
    pub fn find_path(&self, path: &str) -> Option<&FileNode> {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        let mut level = self.nodes.as_slice();

        while let Some(segment) = segments.next() {
            let node = level.iter().find(|node| node.name() == segment)?;
            if segments.peek().is_none() {
                return Some(node);
            }
            level = node.children();
        }

        None
    }

    /// Slash-joined path of the node with the given id
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut segments = Vec::new();
        if path_segments(&self.nodes, id, &mut segments) {
            Some(segments.join("/"))
        } else {
            None
        }
    }

    /// All files with their paths, depth-first in sibling order
    pub fn files(&self) -> Vec<(String, &FileEntry)> {
        let mut files = Vec::new();
        collect_files(&self.nodes, "", &mut files);
        files
    }

    /// Flatten into a path → content map
    pub fn flatten(&self) -> FlatFileMap {
        self.files()
            .into_iter()
            .map(|(path, file)| (path, file.content.clone()))
            .collect()
    }
}

fn validate_name(name: &str) -> Result<(), TreeError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name || name.contains('/') || name == "." || name == ".."
    {
        return Err(TreeError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn insert_at<S: AsRef<str>>(
    nodes: &mut Vec<FileNode>,
    path: &[S],
    node: FileNode,
) -> Result<bool, TreeError> {
    match path.split_first() {
        None => {
            if nodes.iter().any(|existing| existing.name() == node.name()) {
                return Err(TreeError::DuplicateName(node.name().to_string()));
            }
            nodes.push(node);
            Ok(true)
        }
        Some((head, rest)) => {
            let folder = nodes.iter_mut().find_map(|candidate| match candidate {
                FileNode::Folder(folder) if folder.name == head.as_ref() => Some(folder),
                _ => None,
            });
            match folder {
                Some(folder) => insert_at(&mut folder.children, rest, node),
                None => Ok(false),
            }
        }
    }
}

fn rename_in(nodes: &mut [FileNode], id: NodeId, new_name: &str) -> Result<bool, TreeError> {
    if let Some(position) = nodes.iter().position(|node| node.id() == id) {
        let collides = nodes
            .iter()
            .enumerate()
            .any(|(index, node)| index != position && node.name() == new_name);
        if collides {
            return Err(TreeError::DuplicateName(new_name.to_string()));
        }
        nodes[position].set_name(new_name);
        return Ok(true);
    }

    for node in nodes.iter_mut() {
        if let FileNode::Folder(folder) = node {
            if rename_in(&mut folder.children, id, new_name)? {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

fn remove_where<F: Fn(&FileNode) -> bool>(nodes: &mut Vec<FileNode>, predicate: &F) -> usize {
    let before = nodes.len();
    nodes.retain(|node| !predicate(node));
    let mut removed = before - nodes.len();

    for node in nodes.iter_mut() {
        if let FileNode::Folder(folder) = node {
            removed += remove_where(&mut folder.children, predicate);
        }
    }

    removed
}

fn find_in(nodes: &[FileNode], id: NodeId) -> Option<&FileNode> {
    for node in nodes {
        if node.id() == id {
            return Some(node);
        }
        if let Some(found) = find_in(node.children(), id) {
            return Some(found);
        }
    }
    None
}

fn find_mut(nodes: &mut [FileNode], id: NodeId) -> Option<&mut FileNode> {
    for node in nodes.iter_mut() {
        if node.id() == id {
            return Some(node);
        }
        if let FileNode::Folder(folder) = node {
            if let Some(found) = find_mut(&mut folder.children, id) {
                return Some(found);
            }
        }
    }
    None
}

fn first_file_named<'a>(nodes: &'a mut [FileNode], name: &str) -> Option<&'a mut FileEntry> {
    for node in nodes.iter_mut() {
        match node {
            FileNode::File(file) if file.name == name => return Some(file),
            FileNode::File(_) => {}
            FileNode::Folder(folder) => {
                if let Some(found) = first_file_named(&mut folder.children, name) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn path_segments(nodes: &[FileNode], id: NodeId, segments: &mut Vec<String>) -> bool {
    for node in nodes {
        segments.push(node.name().to_string());
        if node.id() == id || path_segments(node.children(), id, segments) {
            return true;
        }
        segments.pop();
    }
    false
}

fn collect_files<'a>(nodes: &'a [FileNode], prefix: &str, out: &mut Vec<(String, &'a FileEntry)>) {
    for node in nodes {
        let path = if prefix.is_empty() {
            node.name().to_string()
        } else {
            format!("{}/{}", prefix, node.name())
        };
        match node {
            FileNode::File(file) => out.push((path, file)),
            FileNode::Folder(folder) => collect_files(&folder.children, &path, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_tree() -> FileTree {
        FileTree::from_nodes(vec![
            FileNode::file("a.html", "<p>a</p>"),
            FileNode::folder(
                "src",
                vec![
                    FileNode::file("b.css", "p { margin: 0; }"),
                    FileNode::folder(
                        "img",
                        vec![
                            FileNode::file("c.png", "png-bytes"),
                            FileNode::folder(
                                "deep",
                                vec![FileNode::file("d.txt", "three levels down")],
                            ),
                        ],
                    ),
                ],
            ),
        ])
    }

    #[test]
    fn test_json_round_trip_preserves_structure() {
        let tree = nested_tree();

        let json = tree.to_json().unwrap();
        let parsed = FileTree::from_json(&json).unwrap();

        assert_eq!(parsed, tree);
        assert_eq!(parsed.nodes()[1].children()[1].children()[1].name(), "deep");
    }

    #[test]
    fn test_persisted_shape() {
        let tree = FileTree::from_nodes(vec![FileNode::folder(
            "src",
            vec![FileNode::file("x.js", "1")],
        )]);

        let value: serde_json::Value = serde_json::from_str(&tree.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"type": "folder", "name": "src", "children": [
                    {"type": "file", "name": "x.js", "content": "1"}
                ]}
            ])
        );
    }

    #[test]
    fn test_parse_accepts_missing_optional_fields() {
        let json = r#"[{"name":"empty.txt","type":"file"},{"name":"lib","type":"folder"}]"#;
        let tree = FileTree::from_json(json).unwrap();

        assert_eq!(tree.nodes()[0].as_file().unwrap().content, "");
        assert!(tree.nodes()[1].children().is_empty());
    }

    #[test]
    fn test_flatten_paths() {
        let flat = nested_tree().flatten();
        let paths: Vec<&str> = flat.paths().collect();

        assert_eq!(
            paths,
            vec!["a.html", "src/b.css", "src/img/c.png", "src/img/deep/d.txt"]
        );
        assert_eq!(flat.get("src/img/c.png"), Some("png-bytes"));
    }

    #[test]
    fn test_flatten_exact_entries() {
        let tree = FileTree::from_nodes(vec![
            FileNode::file("a.html", "A"),
            FileNode::folder(
                "src",
                vec![
                    FileNode::file("b.css", "B"),
                    FileNode::folder("img", vec![FileNode::file("c.png", "C")]),
                ],
            ),
        ]);

        let flat = tree.flatten();
        let entries: Vec<(&str, &str)> = flat.iter().collect();
        assert_eq!(
            entries,
            vec![("a.html", "A"), ("src/b.css", "B"), ("src/img/c.png", "C")]
        );
    }

    #[test]
    fn test_scaffold_contents() {
        let flat = FileTree::scaffold().flatten();

        assert_eq!(flat.len(), 3);
        assert!(flat.get("index.html").unwrap().contains("src/style.css"));
        assert_eq!(flat.get("src/style.css"), Some("body { color: blue; }"));
        assert_eq!(flat.get("src/script.js"), Some("console.log('Hi');"));
    }

    #[test]
    fn test_create_appends_to_folder() {
        let tree = nested_tree();

        let (next, id) = tree.create(NodeKind::File, &["src", "img"], "e.svg").unwrap();
        let id = id.unwrap();

        assert_eq!(next.path_of(id).as_deref(), Some("src/img/e.svg"));
        let img = next.find_path("src/img").unwrap();
        assert_eq!(img.children().last().unwrap().name(), "e.svg");
        // receiver is untouched
        assert!(tree.find(id).is_none());
    }

    #[test]
    fn test_create_at_root_and_folder_kind() {
        let (next, id) = FileTree::new()
            .create::<&str>(NodeKind::Folder, &[], "assets")
            .unwrap();

        let node = next.find(id.unwrap()).unwrap();
        assert_eq!(node.kind(), NodeKind::Folder);
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_create_with_unresolved_parent_is_noop() {
        let tree = nested_tree();

        let (next, id) = tree.create(NodeKind::File, &["missing"], "x.txt").unwrap();
        assert!(id.is_none());
        assert_eq!(next, tree);

        // a file is not a folder either
        let (next, id) = tree.create(NodeKind::File, &["a.html"], "x.txt").unwrap();
        assert!(id.is_none());
        assert_eq!(next, tree);
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_names() {
        let tree = nested_tree();

        assert_eq!(
            tree.create(NodeKind::File, &["src"], "b.css").unwrap_err(),
            TreeError::DuplicateName("b.css".to_string())
        );
        assert!(matches!(
            tree.create::<&str>(NodeKind::File, &[], "a/b"),
            Err(TreeError::InvalidName(_))
        ));
        assert!(matches!(
            tree.create::<&str>(NodeKind::File, &[], "  "),
            Err(TreeError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rename_by_id() {
        let tree = nested_tree();
        let id = tree.find_path("src/b.css").unwrap().id();

        let next = tree.rename(id, "main.css").unwrap();

        assert_eq!(next.path_of(id).as_deref(), Some("src/main.css"));
        assert!(next.find_path("src/b.css").is_none());
        assert!(matches!(
            next.rename(id, "img"),
            Err(TreeError::DuplicateName(_))
        ));
        assert!(matches!(
            next.rename(NodeId::new(), "zzz"),
            Err(TreeError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_delete_by_name_is_global() {
        let tree = FileTree::from_nodes(vec![
            FileNode::file("style.css", "root"),
            FileNode::folder(
                "src",
                vec![
                    FileNode::file("style.css", "nested"),
                    FileNode::file("keep.js", ""),
                ],
            ),
        ]);

        let next = tree.delete_by_name("style.css");
        let flat = next.flatten();

        assert_eq!(flat.len(), 1);
        assert!(flat.contains("src/keep.js"));
    }

    #[test]
    fn test_delete_by_name_removes_subtree() {
        let next = nested_tree().delete_by_name("img");
        assert_eq!(next.flatten().paths().collect::<Vec<_>>(), vec!["a.html", "src/b.css"]);
    }

    #[test]
    fn test_delete_by_id_and_path_are_scoped() {
        let tree = FileTree::from_nodes(vec![
            FileNode::file("style.css", "root"),
            FileNode::folder("src", vec![FileNode::file("style.css", "nested")]),
        ]);
        let nested = tree.find_path("src/style.css").unwrap().id();

        let next = tree.delete(nested).unwrap();
        assert_eq!(next.flatten().paths().collect::<Vec<_>>(), vec!["style.css"]);

        let next = tree.delete_path("style.css").unwrap();
        assert_eq!(next.flatten().paths().collect::<Vec<_>>(), vec!["src/style.css"]);

        assert!(matches!(
            tree.delete_path("nope.txt"),
            Err(TreeError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_update_content() {
        let tree = nested_tree();
        let css = tree.find_path("src/b.css").unwrap().id();
        let folder = tree.find_path("src").unwrap().id();

        let next = tree.update_content(css, "body {}").unwrap();
        assert_eq!(next.flatten().get("src/b.css"), Some("body {}"));
        assert_eq!(tree.flatten().get("src/b.css"), Some("p { margin: 0; }"));

        assert_eq!(
            tree.update_content(folder, "x").unwrap_err(),
            TreeError::NotAFile(folder)
        );
    }

    #[test]
    fn test_update_content_by_name_hits_first_match() {
        let tree = FileTree::from_nodes(vec![
            FileNode::folder("a", vec![FileNode::file("x.txt", "first")]),
            FileNode::file("x.txt", "second"),
        ]);

        let flat = tree.update_content_by_name("x.txt", "new").flatten();
        assert_eq!(flat.get("a/x.txt"), Some("new"));
        assert_eq!(flat.get("x.txt"), Some("second"));
    }

    #[test]
    fn test_ids_are_fresh_after_load() {
        let tree = nested_tree();
        let parsed = FileTree::from_json(&tree.to_json().unwrap()).unwrap();

        assert_ne!(tree.nodes()[0].id(), parsed.nodes()[0].id());
    }
}
