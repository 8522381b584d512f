//! Element handles
//!
//! [`XmlElement`] is a cheap, cloneable cursor into a shared document. All
//! navigation returns another handle, possibly the empty one; all mutation goes
//! through the handle and is visible to every other handle on the same
//! document.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::document::{NodeId, NodeKind, NodeSnapshot, XmlDocument};

/// Handle to a node of a metadata document
#[derive(Clone)]
pub struct XmlElement {
    doc: Arc<Mutex<XmlDocument>>,
    node: Option<NodeId>,
}

impl XmlElement {
    pub(crate) fn new(doc: Arc<Mutex<XmlDocument>>, node: Option<NodeId>) -> Self {
        Self { doc, node }
    }

    /// Handle to the root element of a document
    pub(crate) fn root_of(doc: Arc<Mutex<XmlDocument>>) -> Self {
        let root = doc.lock().root();
        Self::new(doc, Some(root))
    }

    fn live(&self) -> Option<NodeId> {
        let id = self.node?;
        if self.doc.lock().contains(id) {
            Some(id)
        } else {
            None
        }
    }

    fn nav(&self, f: impl FnOnce(&XmlDocument, NodeId) -> Option<NodeId>) -> XmlElement {
        let node = self.node.and_then(|id| {
            let doc = self.doc.lock();
            if doc.contains(id) {
                f(&doc, id)
            } else {
                None
            }
        });
        XmlElement::new(Arc::clone(&self.doc), node)
    }

    fn read<T: Default>(&self, f: impl FnOnce(&XmlDocument, NodeId) -> T) -> T {
        match self.node {
            Some(id) => {
                let doc = self.doc.lock();
                if doc.contains(id) {
                    f(&doc, id)
                } else {
                    T::default()
                }
            }
            None => T::default(),
        }
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Whether this is the empty element (no node, or a removed one)
    pub fn is_empty(&self) -> bool {
        self.live().is_none()
    }

    /// Whether this node is a text node
    pub fn is_text(&self) -> bool {
        self.read(|d, id| d.kind(id) == Some(NodeKind::Text))
    }

    /// Element name; "" for text nodes and the empty element
    pub fn name(&self) -> String {
        self.read(|d, id| d.name(id).unwrap_or_default().to_string())
    }

    /// Text node value; "" for elements and the empty element
    pub fn value(&self) -> String {
        self.read(|d, id| d.value(id).unwrap_or_default().to_string())
    }

    pub fn parent(&self) -> XmlElement {
        self.nav(|d, id| d.parent(id))
    }

    pub fn first_child(&self) -> XmlElement {
        self.nav(|d, id| d.first_child(id))
    }

    pub fn last_child(&self) -> XmlElement {
        self.nav(|d, id| d.last_child(id))
    }

    /// First child element with the given name
    pub fn child(&self, name: &str) -> XmlElement {
        self.nav(|d, id| d.child(id, name))
    }

    pub fn next_sibling(&self) -> XmlElement {
        self.nav(|d, id| d.next_sibling(id))
    }

    /// Next sibling element with the given name
    pub fn next_sibling_named(&self, name: &str) -> XmlElement {
        self.nav(|d, id| d.next_sibling_named(id, name))
    }

    pub fn previous_sibling(&self) -> XmlElement {
        self.nav(|d, id| d.previous_sibling(id))
    }

    /// Previous sibling element with the given name
    pub fn previous_sibling_named(&self, name: &str) -> XmlElement {
        self.nav(|d, id| d.previous_sibling_named(id, name))
    }

    /// Value of the first text child
    pub fn child_value(&self) -> String {
        self.read(|d, id| d.child_value(id).to_string())
    }

    /// Value of the first text child of the named child element
    pub fn child_value_named(&self, name: &str) -> String {
        self.read(|d, id| {
            d.child(id, name)
                .map(|c| d.child_value(c).to_string())
                .unwrap_or_default()
        })
    }

    /// Direct child elements (text nodes skipped)
    pub fn children(&self) -> Vec<XmlElement> {
        let ids: Vec<NodeId> = self.read(|d, id| {
            d.children(id)
                .filter(|c| d.kind(*c) == Some(NodeKind::Element))
                .collect()
        });
        ids.into_iter()
            .map(|c| XmlElement::new(Arc::clone(&self.doc), Some(c)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    fn insert(&self, kind: NodeKind, name: &str, value: &str, append: bool) -> XmlElement {
        let node = self
            .node
            .and_then(|id| self.doc.lock().insert(id, kind, name, value, append));
        XmlElement::new(Arc::clone(&self.doc), node)
    }

    /// Append a child element
    pub fn append_child(&self, name: &str) -> XmlElement {
        self.insert(NodeKind::Element, name, "", true)
    }

    /// Prepend a child element
    pub fn prepend_child(&self, name: &str) -> XmlElement {
        self.insert(NodeKind::Element, name, "", false)
    }

    /// Append a child element holding a text value; returns `self`
    pub fn append_child_value(&self, name: &str, value: &str) -> XmlElement {
        let child = self.append_child(name);
        child.insert(NodeKind::Text, "", value, true);
        self.clone()
    }

    /// Prepend a child element holding a text value; returns `self`
    pub fn prepend_child_value(&self, name: &str, value: &str) -> XmlElement {
        let child = self.prepend_child(name);
        child.insert(NodeKind::Text, "", value, true);
        self.clone()
    }

    fn insert_copy(&self, other: &XmlElement, append: bool) -> XmlElement {
        // Snapshot first: `other` may live in this very document
        let snapshot: Option<NodeSnapshot> = other
            .node
            .and_then(|id| other.doc.lock().snapshot(id));
        let node = match (self.node, snapshot) {
            (Some(id), Some(snap)) => self.doc.lock().insert_snapshot(id, &snap, append),
            _ => None,
        };
        XmlElement::new(Arc::clone(&self.doc), node)
    }

    /// Append a deep copy of `other` (from any document) as the last child
    pub fn append_copy(&self, other: &XmlElement) -> XmlElement {
        self.insert_copy(other, true)
    }

    /// Prepend a deep copy of `other` (from any document) as the first child
    pub fn prepend_copy(&self, other: &XmlElement) -> XmlElement {
        self.insert_copy(other, false)
    }

    /// Rename this element
    pub fn set_name(&self, name: &str) -> bool {
        match self.node {
            Some(id) => self.doc.lock().set_name(id, name),
            None => false,
        }
    }

    /// Set the value of this text node
    pub fn set_value(&self, value: &str) -> bool {
        match self.node {
            Some(id) => self.doc.lock().set_value(id, value),
            None => false,
        }
    }

    /// Set the text of the named child, creating the child and its text node
    /// if needed
    pub fn set_child_value(&self, name: &str, value: &str) -> bool {
        let Some(id) = self.node else {
            return false;
        };
        let mut doc = self.doc.lock();
        if doc.kind(id) != Some(NodeKind::Element) {
            return false;
        }
        let child = match doc.child(id, name) {
            Some(c) => c,
            None => match doc.insert(id, NodeKind::Element, name, "", true) {
                Some(c) => c,
                None => return false,
            },
        };
        let text = doc
            .children(child)
            .find(|c| doc.kind(*c) == Some(NodeKind::Text));
        match text {
            Some(t) => doc.set_value(t, value),
            None => doc.insert(child, NodeKind::Text, "", value, true).is_some(),
        }
    }

    /// Remove the first child element with the given name
    pub fn remove_child_named(&self, name: &str) -> bool {
        let Some(id) = self.node else {
            return false;
        };
        let mut doc = self.doc.lock();
        match doc.child(id, name) {
            Some(c) => doc.remove(c),
            None => false,
        }
    }

    /// Remove a specific child node
    pub fn remove_child(&self, child: &XmlElement) -> bool {
        if !Arc::ptr_eq(&self.doc, &child.doc) {
            return false;
        }
        let (Some(id), Some(cid)) = (self.node, child.node) else {
            return false;
        };
        let mut doc = self.doc.lock();
        if doc.parent(cid) != Some(id) {
            return false;
        }
        doc.remove(cid)
    }
}

impl PartialEq for XmlElement {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.doc, &other.doc) && self.live() == other.live()
    }
}

impl fmt::Debug for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.live() {
            Some(id) => f
                .debug_struct("XmlElement")
                .field("node", &id)
                .field("name", &self.name())
                .finish(),
            None => f.write_str("XmlElement(empty)"),
        }
    }
}
