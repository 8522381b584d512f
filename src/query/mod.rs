//! Stream query predicates
//!
//! Resolvers select streams with a subset of XPath 1.0 evaluated against the
//! stream's `info` document:
//!
//! ```text
//! name='BioSemi' and count(desc/channels/channel) >= 8
//! type='EEG' or starts-with(source_id, 'amp-')
//! not(nominal_srate > 0)
//! ```
//!
//! Relative paths start at the `info` element. Comparisons involving a path
//! hold if any selected node satisfies them. The empty query matches every
//! stream.

mod eval;
mod lexer;
mod parser;

use std::fmt;

use crate::xml::XmlDocument;

use eval::Evaluator;
use parser::{Expr, Parser};

/// Malformed query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryError {
    message: String,
    position: usize,
}

impl QueryError {
    pub(crate) fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    /// Byte offset in the query where the problem was detected
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for QueryError {}

/// Parsed predicate
#[derive(Debug, Clone)]
pub struct Query {
    source: String,
    expr: Option<Expr>,
}

impl Query {
    /// Parse a predicate; the empty (or all-whitespace) string matches all
    pub fn parse(source: &str) -> Result<Self, QueryError> {
        if source.trim().is_empty() {
            return Ok(Self::all());
        }
        let tokens = lexer::tokenize(source)?;
        let expr = Parser::new(&tokens, source.len()).parse()?;
        Ok(Self {
            source: source.to_string(),
            expr: Some(expr),
        })
    }

    /// Query matching every stream
    pub fn all() -> Self {
        Self {
            source: String::new(),
            expr: None,
        }
    }

    /// Query text as given
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against an info document (context node = root)
    pub fn matches_document(&self, doc: &XmlDocument) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => {
                let eval = Evaluator::new(doc);
                let value = eval.eval(expr, doc.root());
                eval.to_bool(&value)
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Build the query matching `property = value`
///
/// Property names are restricted to element paths so the query cannot be
/// altered by the caller's input; the value is quoted with whichever quote
/// character it does not contain.
pub(crate) fn property_query(property: &str, value: &str) -> Result<String, QueryError> {
    let valid = !property.is_empty()
        && property.split('/').all(|step| {
            let mut chars = step.chars();
            matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        });
    if !valid {
        return Err(QueryError::new(
            format!("invalid property name '{}'", property),
            0,
        ));
    }
    Ok(format!("{}={}", property, quote_literal(value)?))
}

/// Quote `value` as a string literal; there is no escape syntax
fn quote_literal(value: &str) -> Result<String, QueryError> {
    if !value.contains('\'') {
        Ok(format!("'{}'", value))
    } else if !value.contains('"') {
        Ok(format!("\"{}\"", value))
    } else {
        Err(QueryError::new("value contains both quote characters", 0))
    }
}

/// Restrict a query to streams of one session
pub(crate) fn scoped_query(session_id: &str, query: &str) -> Result<String, QueryError> {
    let session = quote_literal(session_id)?;
    if query.trim().is_empty() {
        Ok(format!("session_id={}", session))
    } else {
        Ok(format!("session_id={} and ({})", session, query))
    }
}
