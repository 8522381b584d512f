//! Arena-backed document
//!
//! Nodes live in a `Vec` and refer to each other by index. Detaching a subtree
//! tombstones its slots; indices are never handed out twice, so a document
//! that is edited in place only grows. [`XmlDocument::compacted`] rebuilds it
//! without the dead slots (node ids are not preserved).

/// Index of a node inside its [`XmlDocument`]
pub type NodeId = usize;

/// Kind of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Named element with ordered children
    Element,
    /// Nameless text content
    Text,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    name: String,
    value: String,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

impl Node {
    fn new(kind: NodeKind, name: String, value: String) -> Self {
        Self {
            kind,
            name,
            value,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
        }
    }
}

/// Owned copy of a subtree, used to move structure between documents
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub kind: NodeKind,
    pub name: String,
    pub value: String,
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Element snapshot without children
    pub fn element(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Element,
            name: name.into(),
            value: String::new(),
            children: Vec::new(),
        }
    }

    /// Text snapshot
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Text,
            name: String::new(),
            value: value.into(),
            children: Vec::new(),
        }
    }
}

/// Hierarchical document with a single root element
#[derive(Debug, Clone)]
pub struct XmlDocument {
    nodes: Vec<Option<Node>>,
    root: NodeId,
}

impl XmlDocument {
    /// Create a document holding only an empty root element
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![Some(Node::new(NodeKind::Element, root_name.into(), String::new()))],
            root: 0,
        }
    }

    /// Build a document from a snapshot (the snapshot becomes the root)
    pub fn from_snapshot(snapshot: &NodeSnapshot) -> Self {
        let mut doc = Self::new(snapshot.name.clone());
        let root = doc.root;
        for child in &snapshot.children {
            doc.insert_snapshot(root, child, true);
        }
        doc
    }

    /// Copy of the live tree without tombstoned slots
    pub fn compacted(&self) -> Self {
        match self.snapshot(self.root) {
            Some(snapshot) => Self::from_snapshot(&snapshot),
            None => self.clone(),
        }
    }

    /// Root element id
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).and_then(|n| n.as_mut())
    }

    /// Whether `id` refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Whether the document only holds its root
    pub fn is_empty(&self) -> bool {
        self.first_child(self.root).is_none()
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(|n| n.kind)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.value.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.first_child)
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.last_child)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.next_sibling)
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.prev_sibling)
    }

    /// Iterate over the direct children of `id`
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            doc: self,
            next: self.first_child(id),
        }
    }

    fn is_element_named(&self, id: NodeId, name: &str) -> bool {
        self.node(id)
            .map(|n| n.kind == NodeKind::Element && n.name == name)
            .unwrap_or(false)
    }

    /// First child element with the given name
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id).find(|c| self.is_element_named(*c, name))
    }

    /// Next sibling element with the given name
    pub fn next_sibling_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let mut cur = self.next_sibling(id);
        while let Some(c) = cur {
            if self.is_element_named(c, name) {
                return Some(c);
            }
            cur = self.next_sibling(c);
        }
        None
    }

    /// Previous sibling element with the given name
    pub fn previous_sibling_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let mut cur = self.previous_sibling(id);
        while let Some(c) = cur {
            if self.is_element_named(c, name) {
                return Some(c);
            }
            cur = self.previous_sibling(c);
        }
        None
    }

    /// Value of the first text child, or "" if there is none
    pub fn child_value(&self, id: NodeId) -> &str {
        self.children(id)
            .find(|c| self.kind(*c) == Some(NodeKind::Text))
            .and_then(|c| self.value(c))
            .unwrap_or("")
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.node(id) {
            Some(n) if n.kind == NodeKind::Text => out.push_str(&n.value),
            Some(_) => {
                for c in self.children(id) {
                    self.collect_text(c, out);
                }
            }
            None => {}
        }
    }

    /// Rename an element. Text nodes have no name.
    pub fn set_name(&mut self, id: NodeId, name: &str) -> bool {
        match self.node_mut(id) {
            Some(n) if n.kind == NodeKind::Element => {
                n.name = name.to_string();
                true
            }
            _ => false,
        }
    }

    /// Replace the value of a text node. Elements carry no value of their own.
    pub fn set_value(&mut self, id: NodeId, value: &str) -> bool {
        match self.node_mut(id) {
            Some(n) if n.kind == NodeKind::Text => {
                n.value = value.to_string();
                true
            }
            _ => false,
        }
    }

    fn alloc(&mut self, kind: NodeKind, name: &str, value: &str) -> NodeId {
        self.nodes
            .push(Some(Node::new(kind, name.to_string(), value.to_string())));
        self.nodes.len() - 1
    }

    fn link_last(&mut self, parent: NodeId, id: NodeId) {
        let prev_last = self.last_child(parent);
        if let Some(n) = self.node_mut(id) {
            n.parent = Some(parent);
            n.prev_sibling = prev_last;
            n.next_sibling = None;
        }
        match prev_last {
            Some(last) => {
                if let Some(n) = self.node_mut(last) {
                    n.next_sibling = Some(id);
                }
            }
            None => {
                if let Some(p) = self.node_mut(parent) {
                    p.first_child = Some(id);
                }
            }
        }
        if let Some(p) = self.node_mut(parent) {
            p.last_child = Some(id);
        }
    }

    fn link_first(&mut self, parent: NodeId, id: NodeId) {
        let prev_first = self.first_child(parent);
        if let Some(n) = self.node_mut(id) {
            n.parent = Some(parent);
            n.prev_sibling = None;
            n.next_sibling = prev_first;
        }
        match prev_first {
            Some(first) => {
                if let Some(n) = self.node_mut(first) {
                    n.prev_sibling = Some(id);
                }
            }
            None => {
                if let Some(p) = self.node_mut(parent) {
                    p.last_child = Some(id);
                }
            }
        }
        if let Some(p) = self.node_mut(parent) {
            p.first_child = Some(id);
        }
    }

    /// Insert a new node under `parent`
    ///
    /// Returns `None` if `parent` is not a live element.
    pub fn insert(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
        value: &str,
        append: bool,
    ) -> Option<NodeId> {
        if self.kind(parent) != Some(NodeKind::Element) {
            return None;
        }
        let id = self.alloc(kind, name, value);
        if append {
            self.link_last(parent, id);
        } else {
            self.link_first(parent, id);
        }
        Some(id)
    }

    /// Deep-copy the subtree at `id` into an owned snapshot
    pub fn snapshot(&self, id: NodeId) -> Option<NodeSnapshot> {
        let node = self.node(id)?;
        Some(NodeSnapshot {
            kind: node.kind,
            name: node.name.clone(),
            value: node.value.clone(),
            children: self
                .children(id)
                .filter_map(|c| self.snapshot(c))
                .collect(),
        })
    }

    /// Insert a snapshot under `parent`, returning the new subtree root
    pub fn insert_snapshot(
        &mut self,
        parent: NodeId,
        snapshot: &NodeSnapshot,
        append: bool,
    ) -> Option<NodeId> {
        let id = self.insert(parent, snapshot.kind, &snapshot.name, &snapshot.value, append)?;
        for child in &snapshot.children {
            self.insert_snapshot(id, child, true);
        }
        Some(id)
    }

    /// Unlink a node from its parent and tombstone its whole subtree
    ///
    /// The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.root || !self.contains(id) {
            return false;
        }
        let (parent, prev, next) = match self.node(id) {
            Some(n) => (n.parent, n.prev_sibling, n.next_sibling),
            None => return false,
        };

        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next_sibling = next;
                }
            }
            None => {
                if let Some(par) = parent.and_then(|p| self.node_mut(p)) {
                    par.first_child = next;
                }
            }
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev_sibling = prev;
                }
            }
            None => {
                if let Some(par) = parent.and_then(|p| self.node_mut(p)) {
                    par.last_child = prev;
                }
            }
        }

        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            stack.extend(self.children(cur));
            self.nodes[cur] = None;
        }
        true
    }
}

/// Iterator over the children of a node
pub struct Children<'a> {
    doc: &'a XmlDocument,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = self.doc.next_sibling(cur);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> XmlDocument {
        let mut doc = XmlDocument::new("desc");
        let root = doc.root();
        let channels = doc.insert(root, NodeKind::Element, "channels", "", true).unwrap();
        for label in ["C3", "C4", "Cz"] {
            let ch = doc.insert(channels, NodeKind::Element, "channel", "", true).unwrap();
            let l = doc.insert(ch, NodeKind::Element, "label", "", true).unwrap();
            doc.insert(l, NodeKind::Text, "", label, true).unwrap();
        }
        doc
    }

    #[test]
    fn test_children_in_order() {
        let doc = sample_doc();
        let channels = doc.child(doc.root(), "channels").unwrap();
        let labels: Vec<String> = doc
            .children(channels)
            .map(|c| doc.child_value(doc.child(c, "label").unwrap()).to_string())
            .collect();
        assert_eq!(labels, vec!["C3", "C4", "Cz"]);
    }

    #[test]
    fn test_prepend_links() {
        let mut doc = XmlDocument::new("root");
        let root = doc.root();
        let b = doc.insert(root, NodeKind::Element, "b", "", true).unwrap();
        let a = doc.insert(root, NodeKind::Element, "a", "", false).unwrap();

        assert_eq!(doc.first_child(root), Some(a));
        assert_eq!(doc.last_child(root), Some(b));
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.previous_sibling(b), Some(a));
    }

    #[test]
    fn test_remove_tombstones_subtree() {
        let mut doc = sample_doc();
        let channels = doc.child(doc.root(), "channels").unwrap();
        let first = doc.first_child(channels).unwrap();
        let label = doc.child(first, "label").unwrap();

        assert!(doc.remove(first));
        assert!(!doc.contains(first));
        assert!(!doc.contains(label));
        assert_eq!(doc.children(channels).count(), 2);

        // Removing twice is harmless
        assert!(!doc.remove(first));
        // Root is never removed
        assert!(!doc.remove(doc.root()));
    }

    #[test]
    fn test_remove_middle_relinks_siblings() {
        let mut doc = XmlDocument::new("root");
        let root = doc.root();
        let a = doc.insert(root, NodeKind::Element, "a", "", true).unwrap();
        let b = doc.insert(root, NodeKind::Element, "b", "", true).unwrap();
        let c = doc.insert(root, NodeKind::Element, "c", "", true).unwrap();

        doc.remove(b);
        assert_eq!(doc.next_sibling(a), Some(c));
        assert_eq!(doc.previous_sibling(c), Some(a));
    }

    #[test]
    fn test_compacted_drops_tombstones() {
        let mut doc = XmlDocument::new("desc");
        let root = doc.root();
        for i in 0..100 {
            let n = doc.insert(root, NodeKind::Element, "tmp", "", true).unwrap();
            doc.insert(n, NodeKind::Text, "", &i.to_string(), true).unwrap();
            doc.remove(n);
        }
        doc.insert(root, NodeKind::Element, "kept", "", true).unwrap();
        assert_eq!(doc.nodes.len(), 202);

        let compact = doc.compacted();
        assert_eq!(compact.nodes.len(), 2);
        assert_eq!(compact.len(), doc.len());
        assert_eq!(compact.snapshot(compact.root()), doc.snapshot(doc.root()));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let doc = sample_doc();
        let snap = doc.snapshot(doc.root()).unwrap();
        let copy = XmlDocument::from_snapshot(&snap);
        assert_eq!(copy.snapshot(copy.root()).unwrap(), snap);
    }

    #[test]
    fn test_text_nodes_have_no_name() {
        let mut doc = XmlDocument::new("root");
        let root = doc.root();
        let t = doc.insert(root, NodeKind::Text, "", "hello", true).unwrap();
        assert!(!doc.set_name(t, "x"));
        assert!(doc.set_value(t, "world"));
        assert!(!doc.set_value(root, "nope"));
        assert_eq!(doc.child_value(root), "world");
        assert!(doc.insert(t, NodeKind::Element, "child", "", true).is_none());
    }
}
