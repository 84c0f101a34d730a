use std::collections::HashMap;
use crate::core::types::{Record, is_valid_field_name};
use crate::schema::field_type::FieldType;

/// Meta-fields the engine interprets. Others are kept but not acted on.
pub const KNOWN_META_FIELDS: &[&str] = &[
    "%rec", "%key", "%mandatory", "%allowed", "%prohibit", "%unique", "%type",
    "%typedef", "%size", "%sort", "%auto", "%confidential", "%doc",
];

/// Meta-fields that may only carry one value per record type.
pub const SINGLETON_META_FIELDS: &[&str] = &["%key", "%size", "%sort"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeOp {
    Lt,
    Le,
    Eq,
    Gt,
    Ge,
}

/// `%size` constraint on the number of records in a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeConstraint {
    pub op: SizeOp,
    pub count: usize,
}

impl SizeConstraint {
    /// Parse `[<|<=|=|>|>=] N`. A bare number is an upper bound.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (op, rest) = if let Some(rest) = value.strip_prefix("<=") {
            (SizeOp::Le, rest)
        } else if let Some(rest) = value.strip_prefix(">=") {
            (SizeOp::Ge, rest)
        } else if let Some(rest) = value.strip_prefix('<') {
            (SizeOp::Lt, rest)
        } else if let Some(rest) = value.strip_prefix('>') {
            (SizeOp::Gt, rest)
        } else if let Some(rest) = value.strip_prefix('=') {
            (SizeOp::Eq, rest)
        } else {
            (SizeOp::Le, value)
        };
        let count = rest.trim().parse::<usize>().ok()?;
        Some(SizeConstraint { op, count })
    }

    pub fn max(&self) -> Option<usize> {
        match self.op {
            SizeOp::Lt => Some(self.count.saturating_sub(1)),
            SizeOp::Le | SizeOp::Eq => Some(self.count),
            SizeOp::Gt | SizeOp::Ge => None,
        }
    }

    pub fn min(&self) -> Option<usize> {
        match self.op {
            SizeOp::Gt => Some(self.count + 1),
            SizeOp::Ge | SizeOp::Eq => Some(self.count),
            SizeOp::Lt | SizeOp::Le => None,
        }
    }

    pub fn allows(&self, records: usize) -> bool {
        self.min().is_none_or(|min| records >= min) && self.max().is_none_or(|max| records <= max)
    }
}

#[derive(Debug, Clone)]
pub struct TypeRule {
    pub field: String,
    pub field_type: FieldType,
}

/// Constraints of a record set, interpreted from its descriptor record.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub type_name: Option<String>,
    pub source: Option<String>,         // Trailing text after the type in `%rec`
    pub key: Option<String>,
    pub mandatory: Vec<String>,
    pub allowed: Vec<String>,
    pub prohibited: Vec<String>,
    pub unique: Vec<String>,
    pub types: Vec<TypeRule>,
    pub typedefs: HashMap<String, FieldType>,
    pub size: Option<SizeConstraint>,
    pub sort: Vec<String>,
    pub auto: Vec<String>,
    pub confidential: Vec<String>,
    pub doc: Option<String>,
    pub unknown_meta: Vec<String>,
    /// Descriptor problems found while interpreting it.
    pub problems: Vec<String>,
}

impl Schema {
    pub fn from_descriptor(descriptor: &Record) -> Self {
        let mut schema = Schema::default();

        // Typedefs first so %type lines may use names declared further down
        for field in descriptor.fields().filter(|f| f.name == "%typedef") {
            schema.add_typedef(&field.value);
        }

        for field in descriptor.fields() {
            let value = field.value.as_str();
            match field.name.as_str() {
                "%rec" => schema.set_type(value),
                "%key" => schema.set_key(value),
                "%mandatory" => schema.mandatory.extend(names(value, "%mandatory", &mut schema.problems)),
                "%allowed" => schema.allowed.extend(names(value, "%allowed", &mut schema.problems)),
                "%prohibit" => schema.prohibited.extend(names(value, "%prohibit", &mut schema.problems)),
                "%unique" => schema.unique.extend(names(value, "%unique", &mut schema.problems)),
                "%sort" => schema.sort.extend(names(value, "%sort", &mut schema.problems)),
                "%auto" => schema.auto.extend(names(value, "%auto", &mut schema.problems)),
                "%confidential" => schema
                    .confidential
                    .extend(names(value, "%confidential", &mut schema.problems)),
                "%type" => schema.add_type(value),
                "%typedef" => {}
                "%size" => match SizeConstraint::parse(value) {
                    Some(size) if schema.size.is_none() => schema.size = Some(size),
                    Some(_) => schema.problems.push("%size declared more than once".to_string()),
                    None => schema.problems.push(format!("invalid %size '{}'", value)),
                },
                "%doc" => schema.doc = Some(value.to_string()),
                name if name.starts_with('%') => schema.unknown_meta.push(name.to_string()),
                name => schema
                    .problems
                    .push(format!("regular field '{}' in descriptor", name)),
            }
        }

        if schema.type_name.is_none() {
            schema.problems.push("descriptor without %rec type".to_string());
        }

        schema
    }

    fn set_type(&mut self, value: &str) {
        let mut parts = value.split_whitespace();
        let Some(name) = parts.next() else {
            self.problems.push("empty %rec".to_string());
            return;
        };
        if !is_valid_field_name(name) {
            self.problems.push(format!("invalid record type name '{}'", name));
        }
        match &self.type_name {
            Some(existing) if existing != name => {
                self.problems.push(format!("%rec declared as both '{}' and '{}'", existing, name));
            }
            Some(_) => {}
            None => {
                self.type_name = Some(name.to_string());
                let source: Vec<&str> = parts.collect();
                if !source.is_empty() {
                    self.source = Some(source.join(" "));
                }
            }
        }
    }

    fn set_key(&mut self, value: &str) {
        let key = value.trim();
        if !is_valid_field_name(key) {
            self.problems.push(format!("invalid %key '{}'", key));
            return;
        }
        match &self.key {
            Some(_) => self.problems.push("%key declared more than once".to_string()),
            None => self.key = Some(key.to_string()),
        }
    }

    fn add_typedef(&mut self, value: &str) {
        let Some((name, descr)) = value.trim().split_once(char::is_whitespace) else {
            self.problems.push(format!("invalid %typedef '{}'", value));
            return;
        };
        match FieldType::parse(descr, &self.typedefs) {
            Ok(field_type) => {
                self.typedefs.insert(name.to_string(), field_type);
            }
            Err(message) => self.problems.push(format!("%typedef {}: {}", name, message)),
        }
    }

    fn add_type(&mut self, value: &str) {
        let Some((fields, descr)) = value.trim().split_once(char::is_whitespace) else {
            self.problems.push(format!("invalid %type '{}'", value));
            return;
        };
        let field_type = match FieldType::parse(descr, &self.typedefs) {
            Ok(field_type) => field_type,
            Err(message) => {
                self.problems.push(format!("%type {}: {}", fields, message));
                return;
            }
        };
        for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if !is_valid_field_name(field) {
                self.problems.push(format!("invalid field name '{}' in %type", field));
                continue;
            }
            self.types.push(TypeRule {
                field: field.to_string(),
                field_type: field_type.clone(),
            });
        }
    }

    /// The declared type of `field`; later declarations win.
    pub fn field_type(&self, field: &str) -> Option<&FieldType> {
        self.types
            .iter()
            .rev()
            .find(|rule| rule.field == field)
            .map(|rule| &rule.field_type)
    }

    pub fn is_confidential(&self, field: &str) -> bool {
        self.confidential.iter().any(|f| f == field)
    }

    /// Per-record constraint violations: mandatory, key, unique, allowed,
    /// prohibited and typed fields. Set-wide checks live elsewhere.
    pub fn record_violations(&self, record: &Record) -> Vec<String> {
        let mut violations = Vec::new();

        for name in &self.mandatory {
            if !record.has_field(name) {
                violations.push(format!("missing mandatory field '{}'", name));
            }
        }

        if let Some(key) = &self.key {
            match record.field_count(key) {
                0 => violations.push(format!("missing key field '{}'", key)),
                1 => {}
                n => violations.push(format!("key field '{}' occurs {} times", key, n)),
            }
        }

        for name in &self.unique {
            let count = record.field_count(name);
            if count > 1 {
                violations.push(format!("unique field '{}' occurs {} times", name, count));
            }
        }

        if !self.allowed.is_empty() {
            for field in record.fields() {
                let permitted = self.allowed.contains(&field.name)
                    || self.mandatory.contains(&field.name)
                    || self.key.as_ref() == Some(&field.name);
                if !permitted {
                    violations.push(format!("field '{}' is not allowed", field.name));
                }
            }
        }

        for name in &self.prohibited {
            if record.has_field(name) {
                violations.push(format!("field '{}' is prohibited", name));
            }
        }

        for field in record.fields() {
            if let Some(field_type) = self.field_type(&field.name) {
                if !field_type.accepts(&field.value) {
                    violations.push(format!(
                        "field '{}': '{}' is not a valid {}",
                        field.name,
                        field.value,
                        field_type.name()
                    ));
                }
            }
        }

        violations
    }
}

fn names(value: &str, meta: &str, problems: &mut Vec<String>) -> Vec<String> {
    value
        .split_whitespace()
        .filter(|name| {
            let valid = is_valid_field_name(name);
            if !valid {
                problems.push(format!("invalid field name '{}' in {}", name, meta));
            }
            valid
        })
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(fields: &[(&str, &str)]) -> Record {
        fields
            .iter()
            .fold(Record::new(), |record, (name, value)| record.with_field(*name, *value))
    }

    #[test]
    fn interprets_known_meta_fields() {
        let schema = Schema::from_descriptor(&descriptor(&[
            ("%rec", "Book books.rec"),
            ("%key", "isbn"),
            ("%mandatory", "title author"),
            ("%typedef", "Year_t range 1450 2100"),
            ("%type", "year Year_t"),
            ("%type", "isbn,pages int"),
            ("%size", "< 100"),
            ("%note", "kept"),
        ]));

        assert_eq!(schema.type_name.as_deref(), Some("Book"));
        assert_eq!(schema.source.as_deref(), Some("books.rec"));
        assert_eq!(schema.key.as_deref(), Some("isbn"));
        assert_eq!(schema.mandatory, vec!["title", "author"]);
        assert!(matches!(schema.field_type("year"), Some(FieldType::Range(1450, 2100))));
        assert!(matches!(schema.field_type("pages"), Some(FieldType::Int)));
        assert_eq!(schema.size.and_then(|s| s.max()), Some(99));
        assert_eq!(schema.unknown_meta, vec!["%note"]);
        assert!(schema.problems.is_empty(), "{:?}", schema.problems);
    }

    #[test]
    fn records_problems_instead_of_failing() {
        let schema = Schema::from_descriptor(&descriptor(&[
            ("%rec", "Book"),
            ("%key", "isbn"),
            ("%key", "title"),
            ("%size", "lots"),
            ("%type", "year Unknown_t"),
        ]));
        assert_eq!(schema.key.as_deref(), Some("isbn"));
        assert_eq!(schema.problems.len(), 3);
    }

    #[test]
    fn size_bounds() {
        let exact = SizeConstraint::parse("= 2").unwrap();
        assert!(exact.allows(2));
        assert!(!exact.allows(3));
        assert!(!exact.allows(1));
        let at_least = SizeConstraint::parse(">=1").unwrap();
        assert_eq!(at_least.min(), Some(1));
        assert!(at_least.allows(10));
        assert!(SizeConstraint::parse("10").unwrap().allows(10));
        assert!(SizeConstraint::parse("<= x").is_none());
    }

    #[test]
    fn record_violations_cover_each_rule() {
        let schema = Schema::from_descriptor(&descriptor(&[
            ("%rec", "Book"),
            ("%key", "isbn"),
            ("%mandatory", "title"),
            ("%unique", "year"),
            ("%prohibit", "price"),
            ("%type", "year int"),
        ]));
        let record = Record::new()
            .with_field("year", "nineteen")
            .with_field("year", "1999")
            .with_field("price", "3");

        let violations = schema.record_violations(&record);
        assert!(violations.iter().any(|v| v.contains("mandatory field 'title'")));
        assert!(violations.iter().any(|v| v.contains("missing key field 'isbn'")));
        assert!(violations.iter().any(|v| v.contains("unique field 'year'")));
        assert!(violations.iter().any(|v| v.contains("'price' is prohibited")));
        assert!(violations.iter().any(|v| v.contains("'nineteen' is not a valid int")));
        assert_eq!(violations.len(), 5);
    }

    #[test]
    fn allowed_includes_key_and_mandatory() {
        let schema = Schema::from_descriptor(&descriptor(&[
            ("%rec", "Tag"),
            ("%key", "id"),
            ("%mandatory", "label"),
            ("%allowed", "color"),
        ]));
        let ok = Record::new().with_field("id", "1").with_field("label", "x").with_field("color", "red");
        assert!(schema.record_violations(&ok).is_empty());
        let extra = ok.clone().with_field("size", "big");
        assert_eq!(schema.record_violations(&extra), vec!["field 'size' is not allowed"]);
    }
}
