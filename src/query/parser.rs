//! Recursive-descent parser
//!
//! ```text
//! or_expr    := and_expr ('or' and_expr)*
//! and_expr   := eq_expr ('and' eq_expr)*
//! eq_expr    := rel_expr (('=' | '!=') rel_expr)*
//! rel_expr   := unary (('<' | '<=' | '>' | '>=') unary)*
//! unary      := '-' unary | primary
//! primary    := literal | number | '(' or_expr ')' | call | path
//! call       := name '(' (or_expr (',' or_expr)*)? ')'
//! path       := step ('/' step)*
//! step       := name | '*' | '.' | '..'
//! ```

use super::lexer::{Spanned, Token};
use super::QueryError;

/// Deepest expression tree a query may build. Queries arrive from the
/// network, so nesting must not be able to exhaust the stack.
pub(crate) const MAX_DEPTH: usize = 128;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Built-in function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Not,
    StartsWith,
    Contains,
    Count,
    True,
    False,
}

impl Function {
    fn lookup(name: &str) -> Option<(Function, usize)> {
        match name {
            "not" => Some((Function::Not, 1)),
            "starts-with" => Some((Function::StartsWith, 2)),
            "contains" => Some((Function::Contains, 2)),
            "count" => Some((Function::Count, 1)),
            "true" => Some((Function::True, 0)),
            "false" => Some((Function::False, 0)),
            _ => None,
        }
    }
}

/// One location step
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Child(String),
    AnyChild,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Literal(String),
    Number(f64),
    Call(Function, Vec<Expr>),
    Path(Vec<Step>),
}

pub(crate) struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    end: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(tokens: &'a [Spanned], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end: source_len,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.pos).unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::new(message, self.offset())
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), QueryError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    /// Descend one level, failing once the tree gets too deep
    fn enter(&mut self) -> Result<(), QueryError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("query nested too deeply"));
        }
        Ok(())
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == keyword)
    }

    /// Parse a complete expression, rejecting trailing tokens
    pub(crate) fn parse(mut self) -> Result<Expr, QueryError> {
        let expr = self.or_expr()?;
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn or_expr(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            self.pos += 1;
            self.enter()?;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut left = self.eq_expr()?;
        while self.at_keyword("and") {
            self.pos += 1;
            self.enter()?;
            let right = self.eq_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn eq_expr(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut left = self.rel_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Ne) => CmpOp::Ne,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.rel_expr()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn rel_expr(&mut self) -> Result<Expr, QueryError> {
        let base = self.depth;
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                _ => break,
            };
            self.pos += 1;
            self.enter()?;
            let right = self.unary()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, QueryError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, QueryError> {
        match self.peek().cloned() {
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.or_expr()?;
                self.expect(Token::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::LParen) => {
                self.call(&name)
            }
            Some(Token::Name(_)) | Some(Token::Star) | Some(Token::Dot) | Some(Token::DotDot) => {
                self.path()
            }
            Some(_) => Err(self.error("unexpected token")),
            None => Err(self.error("unexpected end of query")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, QueryError> {
        let (function, arity) = Function::lookup(name)
            .ok_or_else(|| self.error(format!("unknown function '{}'", name)))?;
        self.pos += 2;
        self.enter()?;

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.or_expr()?);
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.or_expr()?);
            }
        }
        self.expect(Token::RParen, "')'")?;
        self.depth -= 1;

        if args.len() != arity {
            return Err(self.error(format!(
                "{}() takes {} argument(s), got {}",
                name,
                arity,
                args.len()
            )));
        }
        Ok(Expr::Call(function, args))
    }

    fn path(&mut self) -> Result<Expr, QueryError> {
        let mut steps = vec![self.step()?];
        while self.peek() == Some(&Token::Slash) {
            self.pos += 1;
            steps.push(self.step()?);
        }
        Ok(Expr::Path(steps))
    }

    fn step(&mut self) -> Result<Step, QueryError> {
        let step = match self.peek() {
            Some(Token::Name(n)) => Step::Child(n.clone()),
            Some(Token::Star) => Step::AnyChild,
            Some(Token::Dot) => Step::SelfNode,
            Some(Token::DotDot) => Step::Parent,
            _ => return Err(self.error("expected a location step")),
        };
        self.pos += 1;
        Ok(step)
    }
}
