use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;

use crate::events::StoreEvent;
use crate::store::CollectionStore;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier assigned to each node in the collection tree.
/// 收藏樹中每個節點的唯一識別碼。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TreeNodeId(u64);

impl TreeNodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TreeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The kind of tree node.
/// 樹節點的類型。
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum TreeNodeKind {
    Workspace,
    Collection,
    Model { path: PathBuf, current: bool },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TreeNode {
    pub id: TreeNodeId,
    pub name: String,
    pub kind: TreeNodeKind,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn new(name: impl Into<String>, kind: TreeNodeKind) -> Self {
        Self {
            id: TreeNodeId::next(),
            name: name.into(),
            kind,
            children: Vec::new(),
        }
    }

    fn sort_children(&mut self) {
        self.children.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// Captures differences after applying one store event.
/// 套用事件後的樹狀差異。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<TreeNodeId>,
    pub removed: Vec<TreeNodeId>,
    pub updated: Vec<TreeNodeId>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("collection node {0} not found")]
    CollectionNotFound(String),
    #[error("model node {0} not found")]
    ModelNotFound(String),
}

/// View model mirroring the store as workspace → collection → model nodes.
/// 以「工作區 → 收藏 → 模型」呈現儲存區的檢視模型。
///
/// The tree never reads the store after construction; it follows the store by
/// applying the [`StoreEvent`]s it publishes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CollectionTree {
    pub revision: u64,
    pub root: TreeNode,
}

impl CollectionTree {
    /// Builds a tree from the current store contents.
    /// 依儲存區目前內容建立樹。
    pub fn from_store(store: &CollectionStore) -> Self {
        let root_name = store
            .root()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| store.root().display().to_string());
        let mut root = TreeNode::new(root_name, TreeNodeKind::Workspace);
        let current = store.current().map(|record| record.name().to_string());

        for collection in store.collections() {
            let mut node = TreeNode::new(collection, TreeNodeKind::Collection);
            if let Ok(models) = store.models_in(collection) {
                for record in models {
                    node.children.push(TreeNode::new(
                        record.name(),
                        TreeNodeKind::Model {
                            path: record.path().to_path_buf(),
                            current: current.as_deref() == Some(record.name()),
                        },
                    ));
                }
            }
            node.sort_children();
            root.children.push(node);
        }
        root.sort_children();
        Self { revision: 0, root }
    }

    pub fn collection(&self, name: &str) -> Option<&TreeNode> {
        self.root.children.iter().find(|node| node.name == name)
    }

    pub fn model(&self, name: &str) -> Option<&TreeNode> {
        self.root
            .children
            .iter()
            .flat_map(|collection| collection.children.iter())
            .find(|node| node.name == name)
    }

    /// Name of the model flagged as current, if any.
    pub fn current_model(&self) -> Option<&str> {
        self.root
            .children
            .iter()
            .flat_map(|collection| collection.children.iter())
            .find(|node| matches!(node.kind, TreeNodeKind::Model { current: true, .. }))
            .map(|node| node.name.as_str())
    }

    /// Applies one store event, bumping the revision when anything changed.
    /// 套用一個儲存區事件；若有變動則遞增版本。
    pub fn apply(&mut self, event: &StoreEvent) -> Result<TreeDiff, TreeError> {
        let mut diff = TreeDiff::default();
        match event {
            StoreEvent::CollectionAdded { name } => {
                if self.collection(name).is_none() {
                    let node = TreeNode::new(name.as_str(), TreeNodeKind::Collection);
                    diff.added.push(node.id);
                    diff.updated.push(self.root.id);
                    self.root.children.push(node);
                    self.root.sort_children();
                }
            }
            StoreEvent::CollectionRemoved { name } => {
                let index = self.collection_index(name)?;
                let node = self.root.children.remove(index);
                diff.removed.push(node.id);
                diff.removed
                    .extend(node.children.iter().map(|child| child.id));
                diff.updated.push(self.root.id);
            }
            StoreEvent::CollectionRenamed { from, to } => {
                let index = self.collection_index(from)?;
                let node = &mut self.root.children[index];
                node.name = to.clone();
                for child in &mut node.children {
                    if let TreeNodeKind::Model { path, .. } = &mut child.kind {
                        rebase(path, to);
                    }
                    diff.updated.push(child.id);
                }
                diff.updated.push(node.id);
                self.root.sort_children();
            }
            StoreEvent::ModelAdded {
                name,
                collection,
                path,
            } => {
                let index = self.collection_index(collection)?;
                let parent = &mut self.root.children[index];
                let node = TreeNode::new(
                    name.as_str(),
                    TreeNodeKind::Model {
                        path: path.clone(),
                        current: false,
                    },
                );
                diff.added.push(node.id);
                diff.updated.push(parent.id);
                parent.children.push(node);
                parent.sort_children();
            }
            StoreEvent::ModelRenamed { from, to } => {
                let node = self.model_mut(from)?;
                node.name = to.clone();
                if let TreeNodeKind::Model { path, .. } = &mut node.kind {
                    path.set_file_name(to);
                }
                diff.updated.push(node.id);
                for collection in &mut self.root.children {
                    collection.sort_children();
                }
            }
            StoreEvent::ModelMoved {
                name,
                from,
                to,
                path,
            } => {
                let source = self.collection_index(from)?;
                let target = self.collection_index(to)?;
                let position = self.root.children[source]
                    .children
                    .iter()
                    .position(|node| &node.name == name)
                    .ok_or_else(|| TreeError::ModelNotFound(name.clone()))?;
                let mut node = self.root.children[source].children.remove(position);
                if let TreeNodeKind::Model {
                    path: node_path, ..
                } = &mut node.kind
                {
                    *node_path = path.clone();
                }
                diff.updated.push(self.root.children[source].id);
                diff.updated.push(self.root.children[target].id);
                diff.updated.push(node.id);
                self.root.children[target].children.push(node);
                self.root.children[target].sort_children();
            }
            StoreEvent::ModelRemoved { name } => {
                for collection in &mut self.root.children {
                    if let Some(position) =
                        collection.children.iter().position(|node| &node.name == name)
                    {
                        let node = collection.children.remove(position);
                        diff.removed.push(node.id);
                        diff.updated.push(collection.id);
                    }
                }
            }
            StoreEvent::CurrentChanged { name, path } => {
                for collection in &mut self.root.children {
                    for node in &mut collection.children {
                        if let TreeNodeKind::Model {
                            path: node_path,
                            current,
                        } = &mut node.kind
                        {
                            let is_current = name.as_deref() == Some(node.name.as_str());
                            let mut changed = *current != is_current;
                            *current = is_current;
                            if let (true, Some(path)) = (is_current, path) {
                                changed |= *node_path != *path;
                                *node_path = path.clone();
                            }
                            if changed {
                                diff.updated.push(node.id);
                            }
                        }
                    }
                }
            }
            StoreEvent::PersistFailed { .. } => {}
        }

        if !diff.is_empty() {
            self.revision = self.revision.wrapping_add(1);
        }
        Ok(diff)
    }

    /// Renders the tree as indented text, marking the current model with `*`.
    /// 以縮排文字輸出樹，目前模型以 `*` 標示。
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.root.name);
        for collection in &self.root.children {
            out.push_str(&format!("  {}/\n", collection.name));
            for model in &collection.children {
                let marker = match model.kind {
                    TreeNodeKind::Model { current: true, .. } => " *",
                    _ => "",
                };
                out.push_str(&format!("    {}{}\n", model.name, marker));
            }
        }
        out
    }

    fn collection_index(&self, name: &str) -> Result<usize, TreeError> {
        self.root
            .children
            .iter()
            .position(|node| node.name == name)
            .ok_or_else(|| TreeError::CollectionNotFound(name.to_string()))
    }

    fn model_mut(&mut self, name: &str) -> Result<&mut TreeNode, TreeError> {
        self.root
            .children
            .iter_mut()
            .flat_map(|collection| collection.children.iter_mut())
            .find(|node| node.name == name)
            .ok_or_else(|| TreeError::ModelNotFound(name.to_string()))
    }
}

fn rebase(path: &mut PathBuf, collection: &str) {
    let Some(file) = path.file_name().map(|name| name.to_os_string()) else {
        return;
    };
    if let Some(root) = path.parent().and_then(|dir| dir.parent()) {
        *path = root.join(collection).join(file);
    }
}
