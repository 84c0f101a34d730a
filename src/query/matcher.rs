use std::cmp::Ordering;
use crate::core::types::Record;
use crate::query::ast::{ArithOp, CompareOp, Expr, SelectionExpr};

/// Intermediate value while evaluating a selection expression.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    /// Values of a field reference; empty when the field is absent.
    Field(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
    /// Result of an operation on an absent or non-numeric operand.
    Missing,
}

/// Parse a value as a number: decimal, real or `0x` hex.
pub fn as_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(value) = crate::schema::field_type::parse_int(text) {
        return Some(value as f64);
    }
    // Reject "inf", "NaN" and friends that f64 parsing accepts
    if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Order two field values: numerically when both are numbers, else as strings.
pub fn compare_values(a: &str, b: &str, case_insensitive: bool) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => compare_text(a, b, case_insensitive),
    }
}

fn compare_text(a: &str, b: &str, case_insensitive: bool) -> Ordering {
    if case_insensitive {
        a.to_lowercase().cmp(&b.to_lowercase())
    } else {
        a.cmp(b)
    }
}

/// How a comparison orders its operands, decided by the operand kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareMode {
    /// A quoted literal or concatenation is involved.
    Text,
    /// A numeric literal, arithmetic result or count is involved.
    Numeric,
    /// Field against field.
    Auto,
}

impl CompareMode {
    fn of(lhs: &Value, rhs: &Value) -> Self {
        match (lhs, rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) => CompareMode::Text,
            (Value::Num(_) | Value::Bool(_), _) | (_, Value::Num(_) | Value::Bool(_)) => CompareMode::Numeric,
            _ => CompareMode::Auto,
        }
    }

    /// `None` when the pair cannot be ordered in this mode.
    fn order(self, a: &str, b: &str, case_insensitive: bool) -> Option<Ordering> {
        match self {
            CompareMode::Text => Some(compare_text(a, b, case_insensitive)),
            CompareMode::Numeric => match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
            CompareMode::Auto => Some(compare_values(a, b, case_insensitive)),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl Value {
    /// Scalar candidates for comparisons; a multi-valued field yields one per occurrence.
    fn candidates(&self) -> Vec<String> {
        match self {
            Value::Field(values) => values.clone(),
            Value::Str(s) => vec![s.clone()],
            Value::Num(n) => vec![format_number(*n)],
            Value::Bool(b) => vec![if *b { "1" } else { "0" }.to_string()],
            Value::Missing => Vec::new(),
        }
    }

    fn scalar(&self) -> Option<String> {
        self.candidates().into_iter().next()
    }

    fn number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            other => other.scalar().as_deref().and_then(as_number),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            // Bare field reference: existence test
            Value::Field(values) => !values.is_empty(),
            Value::Missing => false,
        }
    }
}

struct Evaluator<'r> {
    record: &'r Record,
    case_insensitive: bool,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Field { name, index } => {
                let values: Vec<String> = match index {
                    Some(n) => self.record.get(name, *n).map(String::from).into_iter().collect(),
                    None => self.record.values(name).map(String::from).collect(),
                };
                Value::Field(values)
            }
            Expr::Count(name) => Value::Num(self.record.field_count(name) as f64),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Num(n) => Value::Num(*n),
            Expr::Not(inner) => Value::Bool(!self.eval(inner).truthy()),
            Expr::And(lhs, rhs) => Value::Bool(self.eval(lhs).truthy() && self.eval(rhs).truthy()),
            Expr::Or(lhs, rhs) => Value::Bool(self.eval(lhs).truthy() || self.eval(rhs).truthy()),
            Expr::Implies(lhs, rhs) => {
                Value::Bool(!self.eval(lhs).truthy() || self.eval(rhs).truthy())
            }
            Expr::Compare { op, lhs, rhs } => {
                Value::Bool(self.compare(*op, &self.eval(lhs), &self.eval(rhs)))
            }
            Expr::Match { lhs, pattern } => {
                let regex = if self.case_insensitive { &pattern.insensitive } else { &pattern.sensitive };
                Value::Bool(self.eval(lhs).candidates().iter().any(|v| regex.is_match(v)))
            }
            Expr::Arith { op, lhs, rhs } => {
                match (self.eval(lhs).number(), self.eval(rhs).number()) {
                    (Some(a), Some(b)) => arithmetic(*op, a, b),
                    _ => Value::Missing,
                }
            }
            Expr::Concat(lhs, rhs) => match (self.eval(lhs).scalar(), self.eval(rhs).scalar()) {
                (Some(a), Some(b)) => Value::Str(a + &b),
                _ => Value::Missing,
            },
            Expr::Cond { cond, then, otherwise } => {
                if self.eval(cond).truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    /// True when any pair of candidates satisfies `op`. An absent field
    /// has no candidates, so every comparison against it is false. Against
    /// a numeric operand, non-numeric values never satisfy the comparison.
    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
        let mode = CompareMode::of(lhs, rhs);
        let left = lhs.candidates();
        let right = rhs.candidates();
        left.iter().any(|a| {
            right.iter().any(|b| {
                let Some(ordering) = mode.order(a, b, self.case_insensitive) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::Le => ordering != Ordering::Greater,
                    CompareOp::Ge => ordering != Ordering::Less,
                }
            })
        })
    }
}

fn arithmetic(op: ArithOp, a: f64, b: f64) -> Value {
    match op {
        ArithOp::Add => Value::Num(a + b),
        ArithOp::Sub => Value::Num(a - b),
        ArithOp::Mul => Value::Num(a * b),
        ArithOp::Div if b == 0.0 => Value::Missing,
        ArithOp::Div => Value::Num(a / b),
        ArithOp::Mod if b == 0.0 => Value::Missing,
        ArithOp::Mod => Value::Num(a % b),
    }
}

impl SelectionExpr {
    /// Evaluate against a record with case-sensitive string semantics.
    pub fn evaluate(&self, record: &Record) -> bool {
        self.evaluate_with(record, false)
    }

    pub fn evaluate_with(&self, record: &Record, case_insensitive: bool) -> bool {
        Evaluator { record, case_insensitive }.eval(&self.root).truthy()
    }
}
