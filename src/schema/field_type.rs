use std::collections::HashMap;
use std::sync::LazyLock;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use uuid::Uuid;
use crate::core::types::is_valid_field_name;

static INT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(0[xX][0-9a-fA-F]+|[0-9]+)$").expect("int pattern"));
static REAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][-+]?[0-9]+)?$").expect("real pattern")
});
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"));
static ENUM_NOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("enum note pattern"));

/// Field value types declared with `%type` / `%typedef`.
#[derive(Debug, Clone)]
pub enum FieldType {
    Int,
    Real,
    Bool,
    Line,
    Size(usize),
    Range(i64, i64),
    Regexp(Regex),
    Date,
    Email,
    Enum(Vec<String>),
    Field,
    Uuid,
    Rec(String),  // Reference to the key of another record set
}

/// Parse an integer literal as used in int fields: decimal or `0x` hex, optional sign.
pub fn parse_int(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_bound(token: &str) -> Option<i64> {
    match token {
        "MIN" => Some(i64::MIN),
        "MAX" => Some(i64::MAX),
        other => parse_int(other),
    }
}

impl FieldType {
    /// Parse a type description such as `int`, `range 0 10` or `enum A B C`.
    /// Bare names are looked up in `typedefs`.
    pub fn parse(descr: &str, typedefs: &HashMap<String, FieldType>) -> Result<FieldType, String> {
        let descr = descr.trim();
        let (keyword, rest) = match descr.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (descr, ""),
        };

        let field_type = match keyword {
            "int" => FieldType::Int,
            "real" => FieldType::Real,
            "bool" => FieldType::Bool,
            "line" => FieldType::Line,
            "date" => FieldType::Date,
            "email" => FieldType::Email,
            "field" => FieldType::Field,
            "uuid" => FieldType::Uuid,
            "size" => {
                let max = rest
                    .parse::<usize>()
                    .map_err(|_| format!("invalid size type '{}'", descr))?;
                FieldType::Size(max)
            }
            "range" => {
                let bounds: Vec<Option<i64>> = rest.split_whitespace().map(parse_bound).collect();
                match bounds.as_slice() {
                    [Some(max)] => FieldType::Range(0, *max),
                    [Some(min), Some(max)] if min <= max => FieldType::Range(*min, *max),
                    _ => return Err(format!("invalid range type '{}'", descr)),
                }
            }
            "regexp" => {
                let mut chars = rest.chars();
                let delimiter = chars.next().ok_or_else(|| "empty regexp type".to_string())?;
                let body = chars.as_str();
                let end = body
                    .rfind(delimiter)
                    .ok_or_else(|| format!("unterminated regexp in '{}'", descr))?;
                let regex = Regex::new(&body[..end])
                    .map_err(|e| format!("invalid regexp in '{}': {}", descr, e))?;
                FieldType::Regexp(regex)
            }
            "enum" => {
                let cleaned = ENUM_NOTE_RE.replace_all(rest, " ");
                let values: Vec<String> = cleaned.split_whitespace().map(String::from).collect();
                if values.is_empty() {
                    return Err("enum type without values".to_string());
                }
                FieldType::Enum(values)
            }
            "rec" => {
                let target = rest.split_whitespace().next().unwrap_or("");
                if !is_valid_field_name(target) {
                    return Err(format!("invalid record type in '{}'", descr));
                }
                FieldType::Rec(target.to_string())
            }
            name if rest.is_empty() => typedefs
                .get(name)
                .cloned()
                .ok_or_else(|| format!("unknown type '{}'", name))?,
            _ => return Err(format!("unknown type '{}'", keyword)),
        };

        Ok(field_type)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Real => "real",
            FieldType::Bool => "bool",
            FieldType::Line => "line",
            FieldType::Size(_) => "size",
            FieldType::Range(_, _) => "range",
            FieldType::Regexp(_) => "regexp",
            FieldType::Date => "date",
            FieldType::Email => "email",
            FieldType::Enum(_) => "enum",
            FieldType::Field => "field",
            FieldType::Uuid => "uuid",
            FieldType::Rec(_) => "rec",
        }
    }

    /// Counter-like types that `%auto` increments.
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::Range(_, _))
    }

    /// Check `value` against the type's syntax.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            FieldType::Int => INT_RE.is_match(value.trim()),
            FieldType::Real => REAL_RE.is_match(value.trim()),
            FieldType::Bool => matches!(value.trim(), "yes" | "no" | "true" | "false" | "1" | "0"),
            FieldType::Line => !value.contains('\n'),
            FieldType::Size(max) => value.chars().count() <= *max,
            FieldType::Range(min, max) => {
                parse_int(value).is_some_and(|v| *min <= v && v <= *max)
            }
            FieldType::Regexp(regex) => regex.is_match(value),
            FieldType::Date => is_date(value.trim()),
            FieldType::Email => EMAIL_RE.is_match(value.trim()),
            FieldType::Enum(values) => values.iter().any(|v| v == value.trim()),
            FieldType::Field => is_valid_field_name(value.trim()),
            FieldType::Uuid => Uuid::parse_str(value.trim()).is_ok(),
            FieldType::Rec(_) => true,
        }
    }
}

fn is_date(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || DateTime::parse_from_rfc2822(value).is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(descr: &str) -> FieldType {
        FieldType::parse(descr, &HashMap::new()).unwrap()
    }

    #[test]
    fn integers() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-0x1F"), Some(-31));
        assert_eq!(parse_int("4.2"), None);
        assert!(parse("int").accepts("-17"));
        assert!(!parse("int").accepts("seventeen"));
    }

    #[test]
    fn ranges() {
        let range = parse("range 1 5");
        assert!(range.accepts("1"));
        assert!(range.accepts("5"));
        assert!(!range.accepts("6"));
        assert!(matches!(parse("range 10"), FieldType::Range(0, 10)));
        assert!(FieldType::parse("range 5 1", &HashMap::new()).is_err());
    }

    #[test]
    fn enums_ignore_notes() {
        let kind = parse("enum Novel (fiction) Essay");
        assert!(kind.accepts("Essay"));
        assert!(!kind.accepts("fiction"));
    }

    #[test]
    fn regexp_with_custom_delimiter() {
        let code = parse("regexp |^[A-Z]{3}$|");
        assert!(code.accepts("ABC"));
        assert!(!code.accepts("abcd"));
    }

    #[test]
    fn dates_uuids_emails() {
        assert!(parse("date").accepts("2024-02-29"));
        assert!(parse("date").accepts("2024-02-29T10:00:00Z"));
        assert!(!parse("date").accepts("yesterday"));
        assert!(parse("uuid").accepts("67e55044-10b1-426f-9247-bb680e5fe0c8"));
        assert!(parse("email").accepts("ann@example.org"));
        assert!(!parse("email").accepts("ann.example.org"));
    }

    #[test]
    fn typedef_lookup() {
        let mut typedefs = HashMap::new();
        typedefs.insert("Id_t".to_string(), FieldType::Int);
        assert!(matches!(FieldType::parse("Id_t", &typedefs), Ok(FieldType::Int)));
        assert!(FieldType::parse("Missing_t", &typedefs).is_err());
        assert!(matches!(parse("rec Author"), FieldType::Rec(ref t) if t == "Author"));
    }
}
