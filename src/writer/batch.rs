use std::collections::HashMap;
use serde::Serialize;
use tracing::warn;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Comment, Entry, Record, RecordSet};

/// A record whose change was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    /// Record position in the set when the operation started.
    pub position: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// Summary of a mutation: records changed plus the ones rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationReport {
    pub changed: usize,
    pub failures: Vec<RecordFailure>,
}

impl MutationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies per-record changes to one record set. Each change is validated
/// against a working copy before it replaces the live record, so a rejected
/// record leaves the set as it was while earlier changes stay committed.
pub struct RecordBatch<'s> {
    set: &'s mut RecordSet,
    /// Key value -> number of records holding it.
    keys: HashMap<String, usize>,
    report: MutationReport,
}

impl<'s> RecordBatch<'s> {
    pub fn new(set: &'s mut RecordSet) -> Self {
        let mut keys = HashMap::new();
        if let Some(key) = set.schema().key.clone() {
            for record in set.records() {
                for value in record.values(&key) {
                    *keys.entry(value.to_string()).or_insert(0) += 1;
                }
            }
        }
        RecordBatch {
            set,
            keys,
            report: MutationReport::default(),
        }
    }

    pub fn record(&self, position: usize) -> Option<&Record> {
        self.set.record(position)
    }

    fn key_of<'r>(&self, record: &'r Record) -> Option<&'r str> {
        self.set.schema().key.as_deref().and_then(|key| record.first(key))
    }

    fn index_key(&mut self, record: &Record, delta: isize) {
        let Some(key) = self.key_of(record).map(String::from) else {
            return;
        };
        let count = self.keys.entry(key).or_insert(0);
        *count = count.saturating_add_signed(delta);
    }

    fn fail(&mut self, position: usize, error: Error) {
        warn!(
            record_type = self.set.type_name().unwrap_or("<default>"),
            position,
            reason = %error.context,
            "record change rejected"
        );
        self.report.failures.push(RecordFailure {
            position,
            kind: error.kind,
            message: error.context,
        });
    }

    /// Check a new record for insertion at the end of validation order:
    /// field constraints, key collision and the `%size` maximum.
    fn check_insert(&self, record: &Record) -> Result<()> {
        if let Some(violation) = self.set.schema().record_violations(record).into_iter().next() {
            return Err(Error::constraint(violation));
        }
        if let Some(key) = self.key_of(record) {
            if self.keys.get(key).is_some_and(|n| *n > 0) {
                return Err(Error::constraint(format!("duplicate key '{}'", key)));
            }
        }
        if let Some(max) = self.set.schema().size.as_ref().and_then(|s| s.max()) {
            if self.set.num_records() + 1 > max {
                return Err(Error::constraint(format!("record set limited to {} records", max)));
            }
        }
        Ok(())
    }

    /// Insert before `position`, or append when `None` or past the end.
    /// A rejected insertion is returned as an error and changes nothing.
    pub fn stage_insert(&mut self, position: Option<usize>, record: Record) -> Result<()> {
        self.check_insert(&record)?;
        self.index_key(&record, 1);
        match position {
            Some(position) => self.set.insert_record(position, record),
            None => self.set.push_record(record),
        }
        self.report.changed += 1;
        Ok(())
    }

    /// Replace the record at `position`, rejecting it when the new version
    /// introduces a violation the old one did not have or takes a key held
    /// by another record. Returns whether the record changed.
    pub fn stage_replace(&mut self, position: usize, record: Record) -> bool {
        let Some(old) = self.set.record(position).cloned() else {
            return false;
        };
        if old == record {
            return false;
        }

        let before = self.set.schema().record_violations(&old);
        let introduced = self
            .set
            .schema()
            .record_violations(&record)
            .into_iter()
            .find(|violation| !before.contains(violation));
        if let Some(violation) = introduced {
            self.fail(position, Error::constraint(violation));
            return false;
        }

        let old_key = self.key_of(&old).map(String::from);
        if let Some(new_key) = self.key_of(&record) {
            let held = self.keys.get(new_key).copied().unwrap_or(0);
            let held_by_others = if old_key.as_deref() == Some(new_key) { held.saturating_sub(1) } else { held };
            if held_by_others > 0 {
                let error = Error::constraint(format!("duplicate key '{}'", new_key));
                self.fail(position, error);
                return false;
            }
        }

        self.index_key(&old, -1);
        self.index_key(&record, 1);
        self.set.replace_record(position, Entry::Record(record));
        self.report.changed += 1;
        true
    }

    /// Remove the records at `positions`, or turn them into standalone
    /// comments holding their text. Respects the `%size` minimum.
    pub fn stage_remove(&mut self, positions: &[usize], comment_out: bool) {
        let mut positions = positions.to_vec();
        positions.sort_unstable();
        positions.dedup();

        let min = self.set.schema().size.as_ref().and_then(|s| s.min()).unwrap_or(0);
        // Highest first so lower positions stay valid
        for &position in positions.iter().rev() {
            let Some(record) = self.set.record(position).cloned() else {
                continue;
            };
            if self.set.num_records() <= min {
                let error = Error::constraint(format!("record set needs at least {} records", min));
                self.fail(position, error);
                continue;
            }

            self.index_key(&record, -1);
            if comment_out {
                let mut text = record.text();
                if text.ends_with('\n') {
                    text.pop();
                }
                self.set.replace_record(position, Entry::Comment(Comment::new(text)));
            } else {
                self.set.remove_record(position);
            }
            self.report.changed += 1;
        }
    }

    pub fn finish(mut self) -> MutationReport {
        self.report.failures.sort_by_key(|failure| failure.position);
        self.report
    }
}
