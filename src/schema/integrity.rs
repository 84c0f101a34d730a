use std::collections::{HashMap, HashSet};
use std::fmt;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;
use crate::core::database::Database;
use crate::core::types::{Location, RecordSet};
use crate::schema::field_type::FieldType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Also report descriptor problems and unknown meta-fields.
    pub verify_descriptors: bool,
    /// Resolve every `rec` typed field against the referenced set.
    pub verify_remote_references: bool,
}

impl CheckOptions {
    pub fn all() -> Self {
        CheckOptions {
            verify_descriptors: true,
            verify_remote_references: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub record_type: Option<String>,
    /// Record position in its set; `None` for set-level findings.
    pub record: Option<usize>,
    pub location: Option<Location>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.location {
            Some(location) => write!(f, "{}:{}: {}", location.line, level, self.message),
            None => write!(f, "{}: {}", level, self.message),
        }
    }
}

struct SetChecker<'a> {
    db: &'a Database,
    set: &'a RecordSet,
    options: CheckOptions,
    found: Vec<Diagnostic>,
}

impl SetChecker<'_> {
    fn report(&mut self, severity: Severity, record: Option<usize>, location: Option<Location>, message: String) {
        self.found.push(Diagnostic {
            severity,
            record_type: self.set.type_name().map(String::from),
            record,
            location,
            message,
        });
    }

    fn descriptor_location(&self) -> Option<Location> {
        self.set.descriptor().and_then(|d| d.location)
    }

    fn check_descriptor(&mut self) {
        let (db, set) = (self.db, self.set);
        let schema = set.schema();
        let location = self.descriptor_location();
        for problem in &schema.problems {
            self.report(Severity::Error, None, location, problem.clone());
        }
        for meta in &schema.unknown_meta {
            self.report(Severity::Warning, None, location, format!("unknown meta-field '{}'", meta));
        }
        for rule in &schema.types {
            if let FieldType::Rec(target) = &rule.field_type {
                if !db.has_type(target) {
                    let message = format!("field '{}' references unknown type '{}'", rule.field, target);
                    self.report(Severity::Error, None, location, message);
                }
            }
        }
    }

    fn check_records(&mut self) {
        let set = self.set;
        let schema = set.schema();
        let mut first_with_key: HashMap<&str, usize> = HashMap::new();

        for (position, record) in set.records().enumerate() {
            for violation in schema.record_violations(record) {
                self.report(Severity::Error, Some(position), record.location, violation);
            }
            let Some(key) = schema.key.as_deref().and_then(|k| record.first(k)) else {
                continue;
            };
            match first_with_key.get(key) {
                Some(first) => {
                    let message = format!("duplicate key '{}' (first used by record {})", key, first);
                    self.report(Severity::Error, Some(position), record.location, message);
                }
                None => {
                    first_with_key.insert(key, position);
                }
            }
        }

        if let Some(size) = schema.size {
            let count = set.num_records();
            if !size.allows(count) {
                let message = format!("record set has {} records, violating %size", count);
                self.report(Severity::Error, None, self.descriptor_location(), message);
            }
        }
    }

    fn check_references(&mut self) {
        let (db, set) = (self.db, self.set);
        let schema = set.schema();
        for rule in &schema.types {
            let FieldType::Rec(target_type) = &rule.field_type else {
                continue;
            };
            let Some(target) = db.record_set_by_type(target_type) else {
                // Already reported with the descriptor checks
                if !self.options.verify_descriptors {
                    let message = format!("field '{}' references unknown type '{}'", rule.field, target_type);
                    self.report(Severity::Error, None, self.descriptor_location(), message);
                }
                continue;
            };
            let Some(key) = target.schema().key.as_deref() else {
                let message = format!("referenced type '{}' declares no %key", target_type);
                self.report(Severity::Warning, None, self.descriptor_location(), message);
                continue;
            };

            let known: HashSet<&str> = target.records().filter_map(|r| r.first(key)).collect();
            for (position, record) in set.records().enumerate() {
                for value in record.values(&rule.field).filter(|v| !known.contains(v)) {
                    let message = format!("dangling reference '{}' in field '{}' to {}", value, rule.field, target_type);
                    self.report(Severity::Error, Some(position), record.location, message);
                }
            }
        }
    }
}

/// Check every record set. Sets are checked in parallel; diagnostics come
/// back in set order, then record order. The database is never modified.
pub fn check(db: &Database, options: CheckOptions) -> Vec<Diagnostic> {
    let diagnostics: Vec<Diagnostic> = db
        .record_sets()
        .par_iter()
        .map(|set| {
            let mut checker = SetChecker { db, set, options, found: Vec::new() };
            if options.verify_descriptors {
                checker.check_descriptor();
            }
            checker.check_records();
            if options.verify_remote_references {
                checker.check_references();
            }
            checker.found
        })
        .flatten()
        .collect();

    debug!(
        record_sets = db.size(),
        diagnostics = diagnostics.len(),
        "integrity check finished"
    );
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parser::parse;

    fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn clean_database_has_no_findings() {
        let db = parse("%rec: Book\n%key: isbn\n%type: year int\n\nisbn: 1\nyear: 2001\n").unwrap();
        assert!(check(&db, CheckOptions::all()).is_empty());
    }

    #[test]
    fn record_constraints() {
        let db = parse(
            "%rec: Book\n%key: isbn\n%mandatory: title\n%type: year int\n%size: 2\n\n\
             isbn: 1\ntitle: A\nyear: old\n\nisbn: 1\ntitle: B\n\ntitle: C\n",
        )
        .unwrap();
        let found = check(&db, CheckOptions::default());
        assert_eq!(
            messages(&found),
            [
                "field 'year': 'old' is not a valid int",
                "duplicate key '1' (first used by record 0)",
                "missing key field 'isbn'",
                "record set has 3 records, violating %size",
            ]
        );
        assert_eq!(found[0].record, Some(0));
        assert_eq!(found[0].location.map(|l| l.line), Some(7));
        assert!(found.iter().all(|d| d.severity == Severity::Error));
        assert_eq!(found[3].record, None);
    }

    #[test]
    fn descriptor_findings_only_when_asked() {
        let db = parse("%rec: T\n%colour: blue\n%size: lots\n\na: 1\n").unwrap();
        assert!(check(&db, CheckOptions::default()).is_empty());

        let found = check(&db, CheckOptions { verify_descriptors: true, ..Default::default() });
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|d| d.severity == Severity::Warning && d.message.contains("%colour")));
        assert!(found.iter().any(|d| d.severity == Severity::Error && d.message.contains("%size")));
    }

    #[test]
    fn remote_references() {
        let db = parse(
            "%rec: Book\n%type: author rec Author\n\ntitle: A\nauthor: a1\n\ntitle: B\nauthor: nobody\n\n\
             %rec: Author\n%key: id\n\nid: a1\n",
        )
        .unwrap();
        assert!(check(&db, CheckOptions::default()).is_empty());

        let found = check(&db, CheckOptions { verify_remote_references: true, ..Default::default() });
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record, Some(1));
        assert_eq!(found[0].record_type.as_deref(), Some("Book"));
        assert!(found[0].message.contains("nobody"));

        let missing = parse("%rec: Book\n%type: author rec Ghost\n\nauthor: x\n").unwrap();
        let found = check(&missing, CheckOptions::all());
        assert_eq!(messages(&found), ["field 'author' references unknown type 'Ghost'"]);
    }

    #[test]
    fn check_does_not_modify() {
        let db = parse("%rec: T\n%key: k\n\nk: 1\n\nk: 1\n").unwrap();
        let before = db.clone();
        assert_eq!(check(&db, CheckOptions::all()).len(), 1);
        assert_eq!(db, before);
    }
}
