//! Metadata tree
//!
//! Every stream carries a small hierarchical document describing it (channel
//! labels, units, manufacturer, ...). The tree is stored as an arena of nodes
//! linked by index rather than by pointer:
//!
//! ```text
//!   XmlDocument { nodes: Vec<Option<Node>> }
//!
//!   [0] desc ──first_child──► [1] channels ──first_child──► [2] channel
//!                                  │                             │
//!                             next_sibling                  next_sibling
//!                                  ▼                             ▼
//!                             [5] manufacturer              [3] channel
//! ```
//!
//! Handles ([`XmlElement`]) pair a shared document with a node index. A handle
//! without an index is the *empty element*: every lookup that finds nothing
//! returns it, and every mutation on it is a no-op. Absence is a normal outcome
//! in this tree, never an error.
//!
//! Removed slots are never reused, so a handle to a removed node simply reads
//! as empty afterwards.

pub mod codec;
pub mod document;
pub mod element;

pub use document::{NodeId, NodeKind, XmlDocument};
pub use element::XmlElement;

use std::fmt;

/// Error type for document parsing
#[derive(Debug, Clone, PartialEq)]
pub enum XmlError {
    /// Input contained no element at all
    Empty,
    /// Syntax error reported by the XML reader
    Syntax(String),
    /// More than one top-level element
    MultipleRoots,
    /// Root element had an unexpected name
    UnexpectedRoot(String),
    /// A field held a value that could not be interpreted
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },
    /// Writing the document failed
    Write(String),
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlError::Empty => write!(f, "Document contains no element"),
            XmlError::Syntax(msg) => write!(f, "Malformed XML: {}", msg),
            XmlError::MultipleRoots => write!(f, "Document has more than one root element"),
            XmlError::UnexpectedRoot(name) => write!(f, "Unexpected root element: {}", name),
            XmlError::InvalidField { field, value } => {
                write!(f, "Invalid value for {}: {:?}", field, value)
            }
            XmlError::Write(msg) => write!(f, "Failed to write XML: {}", msg),
        }
    }
}

impl std::error::Error for XmlError {}
