use std::sync::Arc;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, hex_digit1, satisfy},
    combinator::{map, map_res, opt, peek, recognize},
    error::ErrorKind as NomErrorKind,
    sequence::{preceded, terminated},
};
use regex::RegexBuilder;
use crate::core::error::{Error, Result};
use crate::query::ast::{ArithOp, CompareOp, Expr, Pattern, SelectionExpr};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Num(f64),
    Str(String),
    Sym(&'static str),
}

// Longest symbols first
const SYMBOLS: &[&str] = &[
    "&&", "||", "=>", "!=", "<=", ">=", "=", "<", ">", "!", "~", "+", "-", "*", "/", "%", "&",
    "(", ")", "[", "]", "?", ":", "#",
];

fn nom_error(input: &str, kind: NomErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

fn string_literal(input: &str) -> IResult<&str, Token> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, quote @ ('"' | '\''))) => quote,
        _ => return Err(nom_error(input, NomErrorKind::Char)),
    };

    let mut value = String::new();
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            value.push(match c {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((&input[i + c.len_utf8()..], Token::Str(value)));
        } else {
            value.push(c);
        }
    }
    Err(nom::Err::Failure(nom::error::Error::new(input, NomErrorKind::Eof)))
}

fn number(input: &str) -> IResult<&str, Token> {
    alt((
        map_res(preceded(alt((tag("0x"), tag("0X"))), hex_digit1), |hex: &str| {
            i64::from_str_radix(hex, 16).map(|v| Token::Num(v as f64))
        }),
        map_res(recognize((digit1, opt((char('.'), digit1)))), |text: &str| {
            text.parse::<f64>().map(Token::Num)
        }),
    ))
    .parse(input)
}

// `%` starts a name only when a letter follows; otherwise it is the modulo
// operator. Inside a name it is part of the name, so `a%b` is one field.
fn identifier(input: &str) -> IResult<&str, Token> {
    map(
        recognize((
            alt((
                satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
                terminated(char('%'), peek(satisfy(|c: char| c.is_ascii_alphabetic()))),
            )),
            take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '%'),
        )),
        |name: &str| Token::Ident(name.to_string()),
    )
    .parse(input)
}

fn symbol(input: &str) -> IResult<&str, Token> {
    SYMBOLS
        .iter()
        .find_map(|sym| input.strip_prefix(sym).map(|rest| (rest, Token::Sym(*sym))))
        .ok_or_else(|| nom_error(input, NomErrorKind::Tag))
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut input = text.trim_start();

    while !input.is_empty() {
        let offset = text.len() - input.len();
        match alt((string_literal, number, identifier, symbol)).parse(input) {
            Ok((rest, token)) => {
                tokens.push(token);
                input = rest.trim_start();
            }
            Err(nom::Err::Failure(_)) => {
                return Err(Error::compile(format!("unterminated string at offset {}", offset)));
            }
            Err(_) => {
                let snippet: String = input.chars().take(12).collect();
                return Err(Error::compile(format!("unexpected '{}' at offset {}", snippet, offset)));
            }
        }
    }
    Ok(tokens)
}

/// Recursive-descent parser over the token stream, lowest precedence first:
/// `?:`, `=>`, `||`, `&&`, comparisons, `&`, `+ -`, `* / %`, unary.
struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek_sym(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Sym(sym)) => Some(*sym),
            _ => None,
        }
    }

    fn eat(&mut self, sym: &str) -> bool {
        if self.peek_sym() == Some(sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, sym: &str) -> Result<()> {
        if self.eat(sym) {
            Ok(())
        } else {
            Err(Error::compile(format!("expected '{}' {}", sym, self.describe_position())))
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn describe_position(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(token) => format!("near token {} ({:?})", self.pos + 1, token),
            None => "at end of expression".to_string(),
        }
    }

    fn conditional(&mut self) -> Result<Expr> {
        let cond = self.implication()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.conditional()?;
        self.expect(":")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Cond {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn implication(&mut self) -> Result<Expr> {
        let mut lhs = self.disjunction()?;
        while self.eat("=>") {
            let rhs = self.disjunction()?;
            lhs = Expr::Implies(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn disjunction(&mut self) -> Result<Expr> {
        let mut lhs = self.conjunction()?;
        while self.eat("||") {
            let rhs = self.conjunction()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn conjunction(&mut self) -> Result<Expr> {
        let mut lhs = self.comparison()?;
        while self.eat("&&") {
            let rhs = self.comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.concatenation()?;
        let op = match self.peek_sym() {
            Some("=") => CompareOp::Eq,
            Some("!=") => CompareOp::Ne,
            Some("<") => CompareOp::Lt,
            Some(">") => CompareOp::Gt,
            Some("<=") => CompareOp::Le,
            Some(">=") => CompareOp::Ge,
            Some("~") => {
                self.pos += 1;
                return self.regex_match(lhs);
            }
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.concatenation()?;
        Ok(Expr::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn regex_match(&mut self, lhs: Expr) -> Result<Expr> {
        let Some(Token::Str(source)) = self.next() else {
            return Err(Error::compile("'~' must be followed by a quoted regular expression"));
        };
        let sensitive = RegexBuilder::new(&source).build()?;
        let insensitive = RegexBuilder::new(&source).case_insensitive(true).build()?;
        Ok(Expr::Match {
            lhs: Box::new(lhs),
            pattern: Pattern { source, sensitive, insensitive },
        })
    }

    fn concatenation(&mut self) -> Result<Expr> {
        let mut lhs = self.additive()?;
        while self.eat("&") {
            let rhs = self.additive()?;
            lhs = Expr::Concat(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_sym() {
                Some("+") => ArithOp::Add,
                Some("-") => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Arith { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_sym() {
                Some("*") => ArithOp::Mul,
                Some("/") => ArithOp::Div,
                Some("%") => ArithOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Arith { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat("-") {
            let operand = self.unary()?;
            return Ok(match operand {
                Expr::Num(n) => Expr::Num(-n),
                other => Expr::Arith {
                    op: ArithOp::Sub,
                    lhs: Box::new(Expr::Num(0.0)),
                    rhs: Box::new(other),
                },
            });
        }
        if self.eat("#") {
            return match self.next() {
                Some(Token::Ident(name)) => Ok(Expr::Count(name)),
                _ => Err(Error::compile("'#' must be followed by a field name")),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let position = self.describe_position();
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => {
                let index = if self.eat("[") {
                    let index = match self.next() {
                        Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                        _ => return Err(Error::compile(format!("invalid subscript for field '{}'", name))),
                    };
                    self.expect("]")?;
                    Some(index)
                } else {
                    None
                };
                Ok(Expr::Field { name, index })
            }
            Some(Token::Sym("(")) => {
                let inner = self.conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            _ => Err(Error::compile(format!("expected a value {}", position))),
        }
    }
}

impl SelectionExpr {
    /// Compile selection expression text.
    /// Examples:
    /// - `title = 'Go'`
    /// - `pages > 100 && !(author ~ '^K')`
    /// - `#author = 2 || author[1] = "Bob"`
    pub fn compile(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(Error::compile("empty selection expression"));
        }

        let mut parser = ExprParser { tokens, pos: 0 };
        let root = parser.conditional()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::compile(format!("unexpected trailing input {}", parser.describe_position())));
        }

        Ok(SelectionExpr {
            source: Arc::from(text),
            root: Arc::new(root),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::types::Record;

    fn root(text: &str) -> Expr {
        SelectionExpr::compile(text).unwrap().root().clone()
    }

    #[test]
    fn tokenizes_literals_and_names() {
        let tokens = tokenize("%rec = 'a\\'b' && n[2] >= 0x1F").unwrap();
        assert_eq!(tokens, vec![
            Token::Ident("%rec".into()),
            Token::Sym("="),
            Token::Str("a'b".into()),
            Token::Sym("&&"),
            Token::Ident("n".into()),
            Token::Sym("["),
            Token::Num(2.0),
            Token::Sym("]"),
            Token::Sym(">="),
            Token::Num(31.0),
        ]);
    }

    #[test]
    fn modulo_is_not_a_name() {
        let tokens = tokenize("a % 2").unwrap();
        assert_eq!(tokens[1], Token::Sym("%"));
    }

    #[test]
    fn precedence() {
        // && binds tighter than ||
        match root("a = 1 || b = 2 && c = 3") {
            Expr::Or(_, rhs) => assert!(matches!(*rhs, Expr::And(_, _))),
            other => panic!("unexpected tree {:?}", other),
        }
        // arithmetic binds tighter than comparison
        match root("a + 1 * 2 > 3") {
            Expr::Compare { op: CompareOp::Gt, lhs, .. } => {
                assert!(matches!(*lhs, Expr::Arith { op: ArithOp::Add, .. }))
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn subscripts_counts_and_conditionals() {
        assert!(matches!(root("author[1]"), Expr::Field { index: Some(1), .. }));
        assert!(matches!(root("#author"), Expr::Count(ref n) if n == "author"));
        assert!(matches!(root("a ? b : c"), Expr::Cond { .. }));
        assert!(matches!(root("-3"), Expr::Num(n) if n == -3.0));
    }

    #[test]
    fn percent_inside_names() {
        assert!(matches!(root("a%b"), Expr::Field { ref name, .. } if name == "a%b"));
        assert!(matches!(root("a % b"), Expr::Arith { op: ArithOp::Mod, .. }));
        let record = Record::new().with_field("a%b", "7");
        assert!(SelectionExpr::compile("a%b = 7").unwrap().evaluate(&record));
    }

    #[test]
    fn compile_errors() {
        for bad in ["", "title =", "(a = 1", "a = 'open", "a ~ b", "a[x]", "a = 1 b", "a $ b", "# 3"] {
            let err = SelectionExpr::compile(bad).unwrap_err();
            assert!(err.is(ErrorKind::Compile), "{:?} gave {:?}", bad, err);
        }
        assert!(SelectionExpr::compile("a ~ '('").unwrap_err().is(ErrorKind::Compile));
    }
}
