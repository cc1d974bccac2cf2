use thiserror::Error;

use crate::sync::paths::{ROOT, join_path, split_path};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("merging same-named folders failed at {0}")]
    MergeInvariant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct FolderNode {
    pub name: String,
    pub path: String,
    pub path_segments: Vec<String>,
    /// Set on a placeholder that exists only locally while it is being named.
    pub editing: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Folder hierarchy stored as an arena. Detached nodes stay allocated but are
/// unreachable from the root; every walk starts at the root.
#[derive(Debug, Clone)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
    root: NodeId,
}

impl Default for FolderTree {
    fn default() -> Self {
        Self::with_root(ROOT)
    }
}

impl FolderTree {
    pub fn with_root(name: &str) -> Self {
        let root = FolderNode {
            name: name.to_string(),
            path: name.to_string(),
            path_segments: vec![name.to_string()],
            editing: false,
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &FolderNode {
        &self.nodes[id.0]
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children_of(parent)
            .iter()
            .copied()
            .find(|child| self.node(*child).name == name)
    }

    pub fn add_child(&mut self, parent: NodeId, name: &str, editing: bool) -> NodeId {
        let parent_node = self.node(parent);
        let path = join_path(&parent_node.path, name);
        let mut path_segments = parent_node.path_segments.clone();
        path_segments.push(name.to_string());
        self.insert(
            parent,
            FolderNode {
                name: name.to_string(),
                path,
                path_segments,
                editing,
                parent: None,
                children: Vec::new(),
            },
        )
    }

    fn insert(&mut self, parent: NodeId, mut node: FolderNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        node.children.clear();
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let children = &mut self.nodes[parent.0].children;
        let before = children.len();
        children.retain(|id| *id != child);
        let removed = children.len() != before;
        if removed {
            self.nodes[child.0].parent = None;
        }
        removed
    }

    /// Renames a node and rewrites the paths of its whole subtree.
    pub fn rename(&mut self, id: NodeId, name: &str) {
        self.nodes[id.0].name = name.to_string();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let (path, mut path_segments) = match self.parent_of(current) {
                Some(parent) => {
                    let parent_node = self.node(parent);
                    (
                        join_path(&parent_node.path, &self.node(current).name),
                        parent_node.path_segments.clone(),
                    )
                }
                None => (self.node(current).name.clone(), Vec::new()),
            };
            path_segments.push(self.node(current).name.clone());
            let node = &mut self.nodes[current.0];
            node.path = path;
            node.path_segments = path_segments;
            pending.extend(node.children.iter().copied());
        }
    }

    pub fn set_editing(&mut self, id: NodeId, editing: bool) {
        self.nodes[id.0].editing = editing;
    }

    /// Pre-order list of every node below `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children_of(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children_of(current).iter().rev().copied());
        }
        out
    }

    /// Walks from the root along the segments of `partial_path`. Returns the
    /// first visited node accepted by `stop`, the node at the end of the
    /// path, or `None` when a segment has no matching child.
    pub fn traverse(
        &self,
        partial_path: &str,
        stop: Option<&dyn Fn(&FolderNode) -> bool>,
    ) -> Option<NodeId> {
        let accepts = |id: NodeId| stop.is_some_and(|stop| stop(self.node(id)));
        let segments = split_path(partial_path);
        let mut current = self.root;
        if accepts(current) {
            return Some(current);
        }
        if segments.first() != Some(&self.node(current).name) {
            return None;
        }
        for segment in segments.iter().skip(1).filter(|segment| !segment.is_empty()) {
            current = self.find_child(current, segment)?;
            if accepts(current) {
                return Some(current);
            }
        }
        Some(current)
    }

    pub fn find_path(&self, path: &str) -> Option<NodeId> {
        self.traverse(path, None)
    }

    /// First node in pre-order accepted by `predicate`.
    pub fn search(&self, predicate: impl Fn(&FolderNode) -> bool) -> Option<NodeId> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .find(|id| predicate(self.node(*id)))
    }

    /// Paths of every folder below the root, pre-order.
    pub fn folder_paths(&self) -> Vec<String> {
        self.descendants(self.root)
            .into_iter()
            .map(|id| self.node(id).path.clone())
            .collect()
    }

    /// The locally-created placeholders and their ancestors, nothing else.
    pub fn pending_skeleton(&self) -> FolderTree {
        let mut skeleton = FolderTree::with_root(&self.node(self.root).name);
        for id in self.descendants(self.root) {
            if !self.node(id).editing {
                continue;
            }
            let mut chain = vec![id];
            let mut cursor = self.parent_of(id);
            while let Some(parent) = cursor
                && parent != self.root
            {
                chain.push(parent);
                cursor = self.parent_of(parent);
            }

            let mut target = skeleton.root;
            for node_id in chain.into_iter().rev() {
                let node = self.node(node_id);
                target = match skeleton.find_child(target, &node.name) {
                    Some(existing) => existing,
                    None => skeleton.insert(target, node.clone()),
                };
            }
        }
        skeleton
    }

    /// Walks `segments` below the root (`segments[0]` names the root),
    /// adding the folders that are missing. Returns the last one.
    pub fn insert_path(&mut self, segments: &[String]) -> NodeId {
        let mut cursor = self.root;
        for segment in segments.iter().skip(1) {
            cursor = match self.find_child(cursor, segment) {
                Some(existing) => existing,
                None => self.add_child(cursor, segment, false),
            };
        }
        cursor
    }

    /// In-place [`merge_trees`]: `self` plays `a`, `other` plays `b`.
    /// Returns `false` and leaves `self` untouched when the roots differ.
    pub fn absorb(&mut self, other: &FolderTree) -> bool {
        if self.node(self.root).name != other.node(other.root).name {
            return false;
        }
        self.absorb_at(self.root, other, other.root);
        true
    }

    fn absorb_at(&mut self, id: NodeId, other: &FolderTree, other_id: NodeId) {
        let editing = self.node(id).editing && other.node(other_id).editing;
        self.nodes[id.0].editing = editing;
        for child in other.children_of(other_id) {
            match self.find_child(id, &other.node(*child).name) {
                Some(existing) => self.absorb_at(existing, other, *child),
                None => {
                    other.copy_subtree(*child, self, id);
                }
            }
        }
    }

    pub fn has_editing(&self) -> bool {
        self.search(|node| node.editing).is_some()
    }

    fn copy_subtree(&self, from: NodeId, into: &mut FolderTree, parent: NodeId) -> NodeId {
        let copied = into.insert(parent, self.node(from).clone());
        for child in self.children_of(from) {
            self.copy_subtree(*child, into, copied);
        }
        copied
    }

    pub fn merge(&self, other: &FolderTree) -> Result<Option<FolderTree>, TreeError> {
        merge_trees(self, other)
    }

    fn structurally_equal(&self, id: NodeId, other: &FolderTree, other_id: NodeId) -> bool {
        let left = self.node(id);
        let right = other.node(other_id);
        left.name == right.name
            && left.path == right.path
            && left.path_segments == right.path_segments
            && left.editing == right.editing
            && left.children.len() == right.children.len()
            && left
                .children
                .iter()
                .zip(&right.children)
                .all(|(l, r)| self.structurally_equal(*l, other, *r))
    }
}

impl PartialEq for FolderTree {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equal(self.root, other, other.root)
    }
}

impl Eq for FolderTree {}

/// Folds a segment sequence into a single chain, one node per segment.
pub fn parse_folder_into_tree(segments: &[String]) -> Option<FolderTree> {
    let (first, rest) = segments.split_first()?;
    let mut tree = FolderTree::with_root(first);
    let mut cursor = tree.root;
    for segment in rest {
        cursor = tree.add_child(cursor, segment, false);
    }
    Some(tree)
}

/// Merges `b` into `a`. `a`'s metadata wins; children only in `b` are
/// appended after `a`'s. `None` when the roots differ.
pub fn merge_trees(a: &FolderTree, b: &FolderTree) -> Result<Option<FolderTree>, TreeError> {
    let a_root = a.node(a.root);
    if a_root.name != b.node(b.root).name {
        return Ok(None);
    }
    let mut out = FolderTree {
        nodes: vec![FolderNode {
            editing: a_root.editing && b.node(b.root).editing,
            parent: None,
            children: Vec::new(),
            ..a_root.clone()
        }],
        root: NodeId(0),
    };
    let out_root = out.root;
    merge_children(a, a.root, b, b.root, &mut out, out_root)?;
    Ok(Some(out))
}

fn merge_node(
    a: &FolderTree,
    a_id: NodeId,
    b: &FolderTree,
    b_id: NodeId,
    out: &mut FolderTree,
    parent: NodeId,
) -> Result<Option<NodeId>, TreeError> {
    let left = a.node(a_id);
    let right = b.node(b_id);
    if left.name != right.name {
        return Ok(None);
    }
    let mut merged = left.clone();
    merged.editing = left.editing && right.editing;
    let id = out.insert(parent, merged);
    merge_children(a, a_id, b, b_id, out, id)?;
    Ok(Some(id))
}

fn merge_children(
    a: &FolderTree,
    a_id: NodeId,
    b: &FolderTree,
    b_id: NodeId,
    out: &mut FolderTree,
    out_id: NodeId,
) -> Result<(), TreeError> {
    for a_child in a.children_of(a_id) {
        let name = &a.node(*a_child).name;
        match b.find_child(b_id, name) {
            Some(b_child) => {
                merge_node(a, *a_child, b, b_child, out, out_id)?
                    .ok_or_else(|| TreeError::MergeInvariant(a.node(*a_child).path.clone()))?;
            }
            None => {
                a.copy_subtree(*a_child, out, out_id);
            }
        }
    }
    for b_child in b.children_of(b_id) {
        if a.find_child(a_id, &b.node(*b_child).name).is_none() {
            b.copy_subtree(*b_child, out, out_id);
        }
    }
    Ok(())
}
