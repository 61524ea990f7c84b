//! Compressed path tree of the source files known to a debug target
//!
//! Nodes live in an arena and are addressed by [`NodeId`]; the root is always
//! [`NodeId::ROOT`]. A node stores its name segment, the path built from its
//! ancestors, its children ordered by name and, once loaded, the lines of the
//! file it names. Nodes are never removed.
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Component, MAIN_SEPARATOR_STR, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// What a node is on disk, evaluated when asked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl NodeKind {
    pub fn is_folder(self) -> bool {
        self == NodeKind::Folder
    }
}

/// One line of a loaded source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// Id of the debugger breakpoint set on this line
    pub breakpoint: Option<u64>,
}

impl Line {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            breakpoint: None,
        }
    }
}

#[derive(Debug)]
pub struct SourceNode {
    name: String,
    path: PathBuf,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    lines: Option<Vec<Line>>,
    open: bool,
    should_switch: bool,
}

impl SourceNode {
    fn new(name: String, path: PathBuf, parent: Option<NodeId>) -> Self {
        Self {
            name,
            path,
            parent,
            children: BTreeMap::new(),
            lines: None,
            open: false,
            should_switch: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn lines(&self) -> Option<&[Line]> {
        self.lines.as_deref()
    }

    pub fn line(&self, index: usize) -> Option<&Line> {
        self.lines.as_ref()?.get(index)
    }

    pub fn line_mut(&mut self, index: usize) -> Option<&mut Line> {
        self.lines.as_mut()?.get_mut(index)
    }

    /// Whether the UI currently shows this file
    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// The label and target of a collapsed chain of single-folder nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookahead {
    pub node: NodeId,
    pub label: PathBuf,
}

#[derive(Debug)]
pub struct SourceTree {
    nodes: Vec<SourceNode>,
}

impl Default for SourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![SourceNode::new(String::new(), PathBuf::new(), None)],
        }
    }

    /// Number of nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing has been inserted
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn node(&self, id: NodeId) -> Option<&SourceNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SourceNode> {
        self.nodes.get_mut(id.0)
    }

    /// Add `path`, creating any missing ancestors, and return its leaf node
    ///
    /// Inserting a path twice returns the same node.
    pub fn insert(&mut self, path: impl AsRef<Path>) -> NodeId {
        let mut current = NodeId::ROOT;
        for segment in segments(path.as_ref()) {
            current = match self.nodes[current.0].children.get(&segment) {
                Some(&child) => child,
                None => {
                    let id = NodeId(self.nodes.len());
                    let path = self.nodes[current.0].path.join(&segment);
                    self.nodes[current.0].children.insert(segment.clone(), id);
                    self.nodes.push(SourceNode::new(segment, path, Some(current)));
                    id
                }
            };
        }
        current
    }

    /// Full path of the node; folders end with a separator
    ///
    /// # Panics
    ///
    /// If `id` does not belong to this tree.
    pub fn path(&self, id: NodeId) -> PathBuf {
        let mut path = self.nodes[id.0].path.clone();
        if self.kind(id).is_folder() {
            path.push("");
        }
        path
    }

    /// Classify the node from the filesystem
    ///
    /// Paths that do not exist count as files, unless the node has children,
    /// in which case it is a folder.
    pub fn kind(&self, id: NodeId) -> NodeKind {
        let node = &self.nodes[id.0];
        let kind = disk_kind(&node.path);
        if kind == NodeKind::File && node.has_children() {
            NodeKind::Folder
        } else {
            kind
        }
    }

    /// Collapse chains of nodes whose only child is a folder
    pub fn lookahead(&self, id: NodeId) -> Lookahead {
        let mut current = id;
        let mut label = PathBuf::from(&self.nodes[id.0].name);

        loop {
            let node = &self.nodes[current.0];
            if node.children.len() != 1 {
                break;
            }
            let Some(only) = node.children().next() else {
                break;
            };
            if !self.kind(only).is_folder() {
                break;
            }
            current = only;
            label.push(&self.nodes[current.0].name);
        }

        Lookahead {
            node: current,
            label,
        }
    }

    /// Read the node's file into lines the first time it is asked for
    ///
    /// Returns `false` when the file cannot be read; the node stays unloaded so
    /// a later call can try again.
    #[tracing::instrument(skip(self))]
    pub fn load_from_disk(&mut self, id: NodeId) -> bool {
        let node = &mut self.nodes[id.0];
        if node.lines.is_some() {
            return true;
        }

        match fs::read(&node.path) {
            Ok(contents) => {
                let lines: Vec<Line> = String::from_utf8_lossy(&contents)
                    .lines()
                    .map(Line::new)
                    .collect();
                tracing::debug!(path = %node.path.display(), count = lines.len(), "loaded source file");
                node.lines = Some(lines);
                true
            }
            Err(e) => {
                tracing::debug!(path = %node.path.display(), error = %e, "could not read source file");
                false
            }
        }
    }

    /// Find the node for `path`
    ///
    /// Walks the tree component by component. A relative path that does not
    /// start at the root is then matched against the end of every node's path,
    /// first match in depth-first order.
    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Option<NodeId> {
        let path = path.as_ref();
        let mut current = NodeId::ROOT;
        let mut walked = false;
        for segment in segments(path) {
            walked = true;
            match self.nodes[current.0].children.get(&segment) {
                Some(&child) => current = child,
                None => {
                    if path.is_relative() {
                        return self.find_by_suffix(path);
                    }
                    return None;
                }
            }
        }
        walked.then_some(current)
    }

    fn find_by_suffix(&self, suffix: &Path) -> Option<NodeId> {
        let found = self
            .depth_first()
            .find(|&id| self.nodes[id.0].path.ends_with(suffix));
        if let Some(id) = found {
            tracing::debug!(suffix = %suffix.display(), path = %self.nodes[id.0].path.display(), "resolved path by suffix");
        }
        found
    }

    /// First node named `filename`, searching depth first in name order
    pub fn find_by_filename(&self, filename: &str) -> Option<NodeId> {
        self.depth_first()
            .find(|&id| self.nodes[id.0].name == filename)
    }

    /// Every node below the root, parents before children, siblings by name
    pub fn depth_first(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack: Vec<NodeId> = self.nodes[0].children.values().rev().copied().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            stack.extend(self.nodes[id.0].children.values().rev().copied());
            Some(id)
        })
    }

    /// Nodes without children, in depth-first order
    pub fn leaves(&self) -> Vec<NodeId> {
        self.depth_first()
            .filter(|&id| !self.nodes[id.0].has_children())
            .collect()
    }

    pub fn set_open(&mut self, id: NodeId, open: bool) {
        self.nodes[id.0].open = open;
    }

    /// Ask the UI to bring this file to the front on its next turn
    pub fn request_switch(&mut self, id: NodeId) {
        self.nodes[id.0].should_switch = true;
    }

    /// Read and clear the switch request
    pub fn take_switch(&mut self, id: NodeId) -> bool {
        std::mem::take(&mut self.nodes[id.0].should_switch)
    }

    /// Indented listing of the tree with single-folder chains collapsed
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(NodeId::ROOT, 0, &mut out);
        out
    }

    fn render_into(&self, id: NodeId, depth: usize, out: &mut String) {
        for child in self.nodes[id.0].children() {
            let Lookahead { node, mut label } = self.lookahead(child);
            if self.kind(node).is_folder() {
                label.push("");
            }
            let _ = writeln!(out, "{}{}", "  ".repeat(depth), label.display());
            self.render_into(node, depth + 1, out);
        }
    }
}

fn segments(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|component| match component {
        Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().into_owned()),
        Component::RootDir => Some(MAIN_SEPARATOR_STR.to_string()),
        Component::CurDir => None,
        Component::ParentDir => Some("..".to_string()),
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
    })
}

fn disk_kind(path: &Path) -> NodeKind {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return NodeKind::File;
    };
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        return NodeKind::Symlink;
    }
    if file_type.is_dir() {
        return NodeKind::Folder;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() {
            return NodeKind::BlockDevice;
        }
        if file_type.is_char_device() {
            return NodeKind::CharDevice;
        }
        if file_type.is_fifo() {
            return NodeKind::Fifo;
        }
        if file_type.is_socket() {
            return NodeKind::Socket;
        }
    }
    NodeKind::File
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut tree = SourceTree::new();
        let first = tree.insert("/src/app/main.cpp");
        let size = tree.len();
        let second = tree.insert("/src/app/main.cpp");

        assert_eq!(first, second);
        assert_eq!(tree.len(), size);
    }

    #[test]
    fn shared_prefixes_share_nodes() {
        let mut tree = SourceTree::new();
        let a = tree.insert("/src/app/a.cpp");
        let b = tree.insert("/src/app/b.cpp");

        assert_ne!(a, b);
        assert_eq!(tree.node(a).unwrap().parent(), tree.node(b).unwrap().parent());
        // root, "/", "src", "app", two files
        assert_eq!(tree.len(), 6);
    }

    #[test]
    fn path_round_trips_for_files() {
        let mut tree = SourceTree::new();
        for path in ["/nonexistent/x/main.cpp", "relative/util.h", "top.c"] {
            let id = tree.insert(path);
            assert_eq!(tree.path(id), PathBuf::from(path));
            assert_eq!(tree.find_by_path(path), Some(id));
        }
    }

    #[test]
    fn folders_get_a_trailing_separator() {
        let mut tree = SourceTree::new();
        let file = tree.insert("/nonexistent/dir/file.c");
        let dir = tree.node(file).unwrap().parent().unwrap();

        let rendered = tree.path(dir);
        assert!(
            rendered.as_os_str().to_string_lossy().ends_with(MAIN_SEPARATOR_STR),
            "{}",
            rendered.display()
        );
        assert_eq!(tree.kind(dir), NodeKind::Folder);
    }

    #[test]
    fn empty_directory_on_disk_is_a_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = SourceTree::new();
        let id = tree.insert(dir.path());

        assert_eq!(tree.kind(id), NodeKind::Folder);
        assert!(tree.path(id).as_os_str().len() > dir.path().as_os_str().len());
    }

    #[test]
    fn missing_leaf_is_a_file() {
        let mut tree = SourceTree::new();
        let id = tree.insert("/nonexistent/file.rs");
        assert_eq!(tree.kind(id), NodeKind::File);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.c");
        fs::write(&target, "int main;\n").unwrap();
        let link = dir.path().join("link.c");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut tree = SourceTree::new();
        let id = tree.insert(&link);
        assert_eq!(tree.kind(id), NodeKind::Symlink);
    }

    #[test]
    fn lookahead_collapses_single_folder_chains() {
        let mut tree = SourceTree::new();
        tree.insert("a/b/c/one.c");
        let two = tree.insert("a/b/c/two.c");
        let c = tree.node(two).unwrap().parent().unwrap();

        let collapsed = tree.lookahead(NodeId::ROOT);
        assert_eq!(collapsed.node, c);
        assert_eq!(collapsed.label, PathBuf::from("a/b/c"));
    }

    #[test]
    fn lookahead_stops_at_files() {
        let mut tree = SourceTree::new();
        tree.insert("a/b/nested.c");
        let top = tree.insert("a/top.c");
        let a = tree.node(top).unwrap().parent().unwrap();

        let collapsed = tree.lookahead(NodeId::ROOT);
        assert_eq!(collapsed.node, a);
        assert_eq!(collapsed.label, PathBuf::from("a"));
    }

    #[test]
    fn lookahead_stops_at_multiple_folders() {
        let mut tree = SourceTree::new();
        tree.insert("a/x/1.c");
        tree.insert("a/y/2.c");

        let collapsed = tree.lookahead(NodeId::ROOT);
        assert_eq!(collapsed.label, PathBuf::from("a"));
    }

    #[cfg(unix)]
    #[test]
    fn lookahead_keeps_nodes_with_a_symlink_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let proj = dir.path().join("proj");
        fs::create_dir_all(proj.join("src")).unwrap();
        fs::write(proj.join("src/main.c"), "int main;\n").unwrap();
        std::os::unix::fs::symlink(proj.join("src/main.c"), proj.join("linked.c")).unwrap();

        let mut tree = SourceTree::new();
        tree.insert(proj.join("src/main.c"));
        let linked = tree.insert(proj.join("linked.c"));
        let proj_node = tree.node(linked).unwrap().parent().unwrap();
        assert_eq!(tree.kind(linked), NodeKind::Symlink);

        let collapsed = tree.lookahead(proj_node);
        assert_eq!(collapsed.node, proj_node);
        assert_eq!(collapsed.label, PathBuf::from("proj"));

        let rendered = tree.render();
        assert!(rendered.contains("linked.c"), "{rendered}");
        assert!(rendered.contains("main.c"), "{rendered}");
    }

    #[test]
    fn load_from_disk_reads_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "second").unwrap();

        let mut tree = SourceTree::new();
        let id = tree.insert(file.path());
        assert!(tree.node(id).unwrap().lines().is_none());
        assert!(tree.load_from_disk(id));
        tree.node_mut(id).unwrap().line_mut(1).unwrap().breakpoint = Some(4);

        // later reads keep the existing lines and their marks
        writeln!(file, "third").unwrap();
        assert!(tree.load_from_disk(id));
        let lines = tree.node(id).unwrap().lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "first");
        assert_eq!(lines[1].breakpoint, Some(4));
    }

    #[test]
    fn load_failure_is_soft_and_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.c");
        let mut tree = SourceTree::new();
        let id = tree.insert(&path);

        assert!(!tree.load_from_disk(id));
        assert!(tree.node(id).unwrap().lines().is_none());

        fs::write(&path, "int x;\n").unwrap();
        assert!(tree.load_from_disk(id));
        assert_eq!(tree.node(id).unwrap().lines().unwrap().len(), 1);
    }

    #[test]
    fn relative_lookup_falls_back_to_suffix() {
        let mut tree = SourceTree::new();
        let id = tree.insert("/nonexistent/proj/src/main.cpp");
        tree.insert("/nonexistent/proj/src/util.cpp");

        assert_eq!(tree.find_by_path("main.cpp"), Some(id));
        assert_eq!(tree.find_by_path("src/main.cpp"), Some(id));
        assert_eq!(tree.find_by_path("other/main.cpp"), None);
        assert_eq!(tree.find_by_path("/elsewhere/main.cpp"), None);
        assert_eq!(tree.find_by_path(""), None);
    }

    #[test]
    fn filename_search_is_depth_first_by_name() {
        let mut tree = SourceTree::new();
        let later = tree.insert("/nonexistent/b/util.c");
        let earlier = tree.insert("/nonexistent/a/util.c");

        assert_eq!(tree.find_by_filename("util.c"), Some(earlier));
        assert_ne!(tree.find_by_filename("util.c"), Some(later));
        assert_eq!(tree.find_by_filename("missing.c"), None);
    }

    #[test]
    fn switch_requests_are_consumed() {
        let mut tree = SourceTree::new();
        let id = tree.insert("/nonexistent/main.c");

        assert!(!tree.take_switch(id));
        tree.request_switch(id);
        assert!(tree.take_switch(id));
        assert!(!tree.take_switch(id));
    }

    #[test]
    fn render_lists_collapsed_chains() {
        let mut tree = SourceTree::new();
        tree.insert("proj/src/main.c");
        tree.insert("proj/src/util.c");

        let rendered = tree.render();
        let expected = format!("proj{sep}src{sep}\n  main.c\n  util.c\n", sep = MAIN_SEPARATOR_STR);
        assert_eq!(rendered, expected);
    }
}
