use std::io::{Read, Write};
use serde::Serialize;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::{DatabaseStats, SetStats};
use crate::core::types::{Comment, RecordSet};
use crate::query::executor::{self, QueryResult};
use crate::query::types::QueryParams;
use crate::reader::parser::RecParser;
use crate::schema::integrity::{self, CheckOptions, Diagnostic};
use crate::writer::mutation::{self, DeleteParams, InsertParams, MutationReport, SetFieldsParams};
use crate::writer::text_writer;

/// An ordered collection of record sets, at most one per type.
/// An untyped (default) set, when present, is always first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Database {
    /// Standalone comments that precede the first record set.
    pub prologue: Vec<Comment>,
    sets: Vec<RecordSet>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    /// Parse text with the default configuration.
    pub fn parse(input: &str) -> Result<Self> {
        RecParser::new(&Config::default()).parse_str(input)
    }

    pub fn from_reader<R: Read>(reader: R, config: &Config) -> Result<Self> {
        RecParser::new(config).parse_reader(reader)
    }

    /// Number of record sets.
    pub fn size(&self) -> usize {
        self.sets.len()
    }

    pub fn record_sets(&self) -> &[RecordSet] {
        &self.sets
    }

    pub(crate) fn sets_mut(&mut self) -> &mut Vec<RecordSet> {
        &mut self.sets
    }

    pub fn record_set(&self, position: usize) -> Option<&RecordSet> {
        self.sets.get(position)
    }

    pub fn record_set_mut(&mut self, position: usize) -> Option<&mut RecordSet> {
        self.sets.get_mut(position)
    }

    pub fn has_type(&self, record_type: &str) -> bool {
        self.type_position(record_type).is_some()
    }

    pub fn record_set_by_type(&self, record_type: &str) -> Option<&RecordSet> {
        self.type_position(record_type).map(|i| &self.sets[i])
    }

    pub fn record_set_by_type_mut(&mut self, record_type: &str) -> Option<&mut RecordSet> {
        self.type_position(record_type).map(move |i| &mut self.sets[i])
    }

    fn type_position(&self, record_type: &str) -> Option<usize> {
        self.sets.iter().position(|set| set.type_name() == Some(record_type))
    }

    /// Insert a set at `position` (clamped to the end).
    pub fn insert_record_set(&mut self, set: RecordSet, position: usize) -> Result<()> {
        let position = position.min(self.sets.len());
        match set.type_name() {
            Some(name) if self.has_type(name) => {
                return Err(Error::invalid_argument(format!("record type '{}' already exists", name)));
            }
            Some(_) => {
                if position == 0 && self.sets.first().is_some_and(|s| s.type_name().is_none()) {
                    return Err(Error::invalid_argument("the untyped record set must stay first"));
                }
            }
            None => {
                if position != 0 || self.sets.iter().any(|s| s.type_name().is_none()) {
                    return Err(Error::invalid_argument("only one untyped record set, at position 0"));
                }
            }
        }
        self.sets.insert(position, set);
        Ok(())
    }

    pub fn remove_record_set(&mut self, position: usize) -> Result<RecordSet> {
        if position >= self.sets.len() {
            return Err(Error::invalid_argument(format!("no record set at position {}", position)));
        }
        Ok(self.sets.remove(position))
    }

    /// Position of the set an operation targets. With no type: the untyped
    /// set, else the first set; `None` for an empty database.
    pub fn resolve(&self, record_type: Option<&str>) -> Result<Option<usize>> {
        match record_type {
            Some(name) => self
                .type_position(name)
                .map(Some)
                .ok_or_else(|| Error::unknown_type(name)),
            None if self.sets.is_empty() => Ok(None),
            None => Ok(Some(
                self.sets.iter().position(|s| s.type_name().is_none()).unwrap_or(0),
            )),
        }
    }

    pub fn query(&self, params: &QueryParams) -> Result<QueryResult> {
        executor::execute(self, params)
    }

    pub fn insert(&mut self, params: &InsertParams) -> Result<MutationReport> {
        mutation::insert(self, params)
    }

    pub fn delete(&mut self, params: &DeleteParams) -> Result<MutationReport> {
        mutation::delete(self, params)
    }

    pub fn set_fields(&mut self, params: &SetFieldsParams) -> Result<MutationReport> {
        mutation::set_fields(self, params)
    }

    pub fn check_integrity(&self, options: CheckOptions) -> Vec<Diagnostic> {
        integrity::check(self, options)
    }

    pub fn to_text(&self) -> String {
        text_writer::serialize_database(self)
    }

    pub fn write_to<W: Write>(&self, sink: W) -> Result<()> {
        text_writer::write_database(self, sink)
    }

    pub fn stats(&self) -> DatabaseStats {
        let sets: Vec<SetStats> = self
            .sets
            .iter()
            .map(|set| SetStats {
                record_type: set.type_name().map(String::from),
                records: set.num_records(),
                comments: set.num_comments(),
            })
            .collect();

        DatabaseStats {
            record_sets: sets.len(),
            records: sets.iter().map(|s| s.records).sum(),
            comments: sets.iter().map(|s| s.comments).sum::<usize>() + self.prologue.len(),
            sets,
        }
    }
}
