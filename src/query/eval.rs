//! Expression evaluation with XPath 1.0 value semantics

use crate::xml::{NodeId, NodeKind, XmlDocument};

use super::parser::{CmpOp, Expr, Function, Step};

/// Result of evaluating a sub-expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Nodes(Vec<NodeId>),
    Str(String),
    Num(f64),
    Bool(bool),
}

fn str_to_num(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn num_to_str(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub(crate) struct Evaluator<'a> {
    doc: &'a XmlDocument,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(doc: &'a XmlDocument) -> Self {
        Self { doc }
    }

    fn node_string(&self, id: NodeId) -> String {
        self.doc.text_content(id)
    }

    fn string_value(&self, v: &Value) -> String {
        match v {
            Value::Nodes(ns) => ns
                .first()
                .map(|n| self.node_string(*n))
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => num_to_str(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn to_number(&self, v: &Value) -> f64 {
        match v {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => str_to_num(&self.string_value(other)),
        }
    }

    pub(crate) fn to_bool(&self, v: &Value) -> bool {
        match v {
            Value::Nodes(ns) => !ns.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    pub(crate) fn eval(&self, expr: &Expr, context: NodeId) -> Value {
        match expr {
            Expr::Or(a, b) => Value::Bool(
                self.to_bool(&self.eval(a, context)) || self.to_bool(&self.eval(b, context)),
            ),
            Expr::And(a, b) => Value::Bool(
                self.to_bool(&self.eval(a, context)) && self.to_bool(&self.eval(b, context)),
            ),
            Expr::Compare(op, a, b) => {
                let left = self.eval(a, context);
                let right = self.eval(b, context);
                Value::Bool(self.compare(*op, &left, &right))
            }
            Expr::Negate(inner) => Value::Num(-self.to_number(&self.eval(inner, context))),
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Call(f, args) => self.call(*f, args, context),
            Expr::Path(steps) => Value::Nodes(self.select(steps, context)),
        }
    }

    fn select(&self, steps: &[Step], context: NodeId) -> Vec<NodeId> {
        let mut current = vec![context];
        for step in steps {
            let mut next: Vec<NodeId> = Vec::new();
            for &node in &current {
                match step {
                    Step::Child(name) => next.extend(self.doc.children(node).filter(|c| {
                        self.doc.kind(*c) == Some(NodeKind::Element)
                            && self.doc.name(*c) == Some(name.as_str())
                    })),
                    Step::AnyChild => next.extend(
                        self.doc
                            .children(node)
                            .filter(|c| self.doc.kind(*c) == Some(NodeKind::Element)),
                    ),
                    Step::SelfNode => next.push(node),
                    Step::Parent => {
                        if let Some(p) = self.doc.parent(node) {
                            if !next.contains(&p) {
                                next.push(p);
                            }
                        }
                    }
                }
            }
            current = next;
        }
        current
    }

    fn call(&self, f: Function, args: &[Expr], context: NodeId) -> Value {
        let arg = |i: usize| -> Value {
            args.get(i)
                .map(|a| self.eval(a, context))
                .unwrap_or(Value::Str(String::new()))
        };
        match f {
            Function::Not => Value::Bool(!self.to_bool(&arg(0))),
            Function::StartsWith => {
                Value::Bool(self.string_value(&arg(0)).starts_with(&self.string_value(&arg(1))))
            }
            Function::Contains => {
                Value::Bool(self.string_value(&arg(0)).contains(&self.string_value(&arg(1))))
            }
            Function::Count => match arg(0) {
                Value::Nodes(ns) => Value::Num(ns.len() as f64),
                _ => Value::Num(f64::NAN),
            },
            Function::True => Value::Bool(true),
            Function::False => Value::Bool(false),
        }
    }

    fn compare(&self, op: CmpOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|x| {
                let sx = Value::Str(self.node_string(*x));
                b.iter().any(|y| {
                    self.compare_atoms(op, &sx, &Value::Str(self.node_string(*y)))
                })
            }),
            (Value::Nodes(ns), Value::Bool(b)) => {
                self.compare_atoms(op, &Value::Bool(!ns.is_empty()), &Value::Bool(*b))
            }
            (Value::Bool(b), Value::Nodes(ns)) => {
                self.compare_atoms(op, &Value::Bool(*b), &Value::Bool(!ns.is_empty()))
            }
            (Value::Nodes(ns), other) => ns.iter().any(|n| {
                self.compare_atoms(op, &self.node_atom(*n, other), other)
            }),
            (other, Value::Nodes(ns)) => ns.iter().any(|n| {
                self.compare_atoms(op, other, &self.node_atom(*n, other))
            }),
            (a, b) => self.compare_atoms(op, a, b),
        }
    }

    /// Convert a node to the type of the value it is compared against
    fn node_atom(&self, node: NodeId, against: &Value) -> Value {
        let s = self.node_string(node);
        match against {
            Value::Num(_) => Value::Num(str_to_num(&s)),
            _ => Value::Str(s),
        }
    }

    fn compare_atoms(&self, op: CmpOp, a: &Value, b: &Value) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Ne => {
                let equal = if matches!(a, Value::Bool(_)) || matches!(b, Value::Bool(_)) {
                    self.to_bool(a) == self.to_bool(b)
                } else if matches!(a, Value::Num(_)) || matches!(b, Value::Num(_)) {
                    self.to_number(a) == self.to_number(b)
                } else {
                    self.string_value(a) == self.string_value(b)
                };
                if op == CmpOp::Eq {
                    equal
                } else {
                    !equal
                }
            }
            _ => {
                let (x, y) = (self.to_number(a), self.to_number(b));
                match op {
                    CmpOp::Lt => x < y,
                    CmpOp::Le => x <= y,
                    CmpOp::Gt => x > y,
                    CmpOp::Ge => x >= y,
                    CmpOp::Eq | CmpOp::Ne => false,
                }
            }
        }
    }
}
