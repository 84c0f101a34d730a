use std::sync::Arc;
use regex::Regex;

/// Comparison operators of selection expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,  // =
    Ne,  // !=
    Lt,  // <
    Gt,  // >
    Le,  // <=
    Ge,  // >=
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// A regex literal compiled once in both case modes.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub sensitive: Regex,
    pub insensitive: Regex,
}

/// Selection expression tree
#[derive(Debug, Clone)]
pub enum Expr {
    /// `Name` (every occurrence) or `Name[N]` (the Nth one)
    Field { name: String, index: Option<usize> },
    /// `#Name`: number of occurrences
    Count(String),
    Str(String),
    Num(f64),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Compare { op: CompareOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// `lhs ~ 'regex'`
    Match { lhs: Box<Expr>, pattern: Pattern },
    Arith { op: ArithOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// `lhs & rhs`: string concatenation
    Concat(Box<Expr>, Box<Expr>),
    /// `cond ? then : otherwise`
    Cond { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
}

/// A compiled selection expression. Cloning is cheap and the tree is
/// immutable, so one compiled expression can be shared across threads.
#[derive(Debug, Clone)]
pub struct SelectionExpr {
    pub(crate) source: Arc<str>,
    pub(crate) root: Arc<Expr>,
}

impl SelectionExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }
}
