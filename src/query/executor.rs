use std::cmp::Ordering;
use std::collections::HashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};
use crate::core::database::Database;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Field, Record, RecordItem, RecordSet};
use crate::query::fex::FieldExpr;
use crate::query::matcher::compare_values;
use crate::query::types::{QueryParams, RecordFilter};
use crate::schema::field_type::FieldType;

/// Outcome of a query: a fresh record set carrying the source descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub records: RecordSet,
    /// Records dropped because their join reference did not resolve.
    pub skipped: usize,
    /// Number of source records merged into each result record by group-by.
    pub group_sizes: Vec<usize>,
}

impl QueryResult {
    fn empty(records: RecordSet) -> Self {
        QueryResult {
            records,
            skipped: 0,
            group_sizes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.num_records()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Positions of the records that pass the index, fast-string and selection
/// filters, in record order. Sampling is not applied.
pub(crate) fn matching_positions(set: &RecordSet, filter: &RecordFilter) -> Vec<usize> {
    if let Some(index) = filter.index {
        return if index < set.num_records() { vec![index] } else { Vec::new() };
    }

    let icase = filter.case_insensitive;
    let needle = filter
        .fast_string
        .as_ref()
        .map(|s| if icase { s.to_lowercase() } else { s.clone() });

    set.records()
        .enumerate()
        .filter(|(_, record)| match &needle {
            Some(needle) => {
                let text = record.text();
                if icase {
                    text.to_lowercase().contains(needle.as_str())
                } else {
                    text.contains(needle.as_str())
                }
            }
            None => true,
        })
        .filter(|(_, record)| {
            filter
                .selection
                .as_ref()
                .is_none_or(|selection| selection.evaluate_with(record, icase))
        })
        .map(|(position, _)| position)
        .collect()
}

/// Draw `count` of `items` uniformly without replacement, keeping their order.
pub(crate) fn sample<T>(items: Vec<T>, count: usize, seed: Option<u64>) -> Vec<T> {
    if count >= items.len() {
        return items;
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut picked = rand::seq::index::sample(&mut rng, items.len(), count).into_vec();
    picked.sort_unstable();

    let mut picked = picked.into_iter().peekable();
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            if picked.peek() == Some(&i) {
                picked.next();
                Some(item)
            } else {
                None
            }
        })
        .collect()
}

/// Positions an operation's filter resolves to, sampling included.
pub(crate) fn target_positions(set: &RecordSet, filter: &RecordFilter) -> Vec<usize> {
    let positions = matching_positions(set, filter);
    match (filter.index, filter.random) {
        (None, Some(count)) => sample(positions, count, filter.seed),
        _ => positions,
    }
}

/// Run the query pipeline: resolve, filter, join, sample, group, sort,
/// redact and project.
pub fn execute(db: &Database, params: &QueryParams) -> Result<QueryResult> {
    let filter = &params.filter;
    let Some(set_position) = db.resolve(filter.record_type.as_deref())? else {
        return Ok(QueryResult::empty(RecordSet::new()));
    };
    let Some(set) = db.record_set(set_position) else {
        return Ok(QueryResult::empty(RecordSet::new()));
    };

    let mut result = set.empty_like();
    if params.descriptor_only {
        return Ok(QueryResult::empty(result));
    }

    let positions = matching_positions(set, filter);
    let matched = positions.len();
    let mut records: Vec<Record> = positions
        .into_iter()
        .filter_map(|p| set.record(p).cloned())
        .collect();

    let mut skipped = 0;
    if let Some(join_field) = &params.join {
        let join = Join::prepare(db, set, join_field, params.password.is_some())?;
        let before = records.len();
        records = records
            .into_iter()
            .filter_map(|record| match join.apply(&record) {
                Joined::Merged(merged) => Some(merged),
                Joined::NoReference => None,
                Joined::Dangling(value) => {
                    trace!(field = %join_field, reference = %value, "dangling reference skipped");
                    skipped += 1;
                    None
                }
            })
            .collect();
        debug!(field = %join_field, before, after = records.len(), skipped, "join applied");
    }

    if filter.index.is_none() {
        if let Some(count) = filter.random {
            records = sample(records, count, filter.seed);
        }
    }

    // Each record paired with the number of source records it stands for
    let mut records: Vec<(Record, usize)> = records.into_iter().map(|r| (r, 1)).collect();
    if let Some(group_by) = &params.group_by {
        records = group(records, group_by);
    }

    match &params.sort_by {
        Some(sort_by) => sort_records(&mut records, sort_by),
        None => {
            let default_sort = set.schema().sort.join(",");
            if !default_sort.is_empty() {
                // %sort names were validated when the descriptor was read
                if let Ok(sort_by) = FieldExpr::compile(&default_sort) {
                    sort_records(&mut records, &sort_by);
                }
            }
        }
    }

    if params.password.is_none() && !set.schema().confidential.is_empty() {
        for (record, _) in &mut records {
            redact(record, |name| set.schema().is_confidential(name));
        }
    }

    let group_sizes = match params.group_by {
        Some(_) => records.iter().map(|(_, size)| *size).collect(),
        None => Vec::new(),
    };
    for (record, _) in records {
        let record = match &params.fields {
            Some(fields) => fields.project(&record),
            None => record,
        };
        result.push_record(record);
    }

    debug!(
        record_type = set.type_name().unwrap_or("<default>"),
        matched,
        skipped,
        returned = result.num_records(),
        "query executed"
    );

    Ok(QueryResult {
        records: result,
        skipped,
        group_sizes,
    })
}

fn redact(record: &mut Record, confidential: impl Fn(&str) -> bool) {
    record.items.retain(|item| match item {
        RecordItem::Field(field) => !confidential(&field.name),
        RecordItem::Comment(_) => true,
    });
}

fn compare_keys(a: &[Option<String>], b: &[Option<String>]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ordering = match (x, y) {
            (Some(x), Some(y)) => compare_values(x, y, false),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable ascending sort on the values the expression selects.
fn sort_records<T>(records: &mut Vec<(Record, T)>, sort_by: &FieldExpr) {
    let mut keyed: Vec<(Vec<Option<String>>, (Record, T))> = records
        .drain(..)
        .map(|entry| (sort_by.values_for(&entry.0), entry))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b));
    records.extend(keyed.into_iter().map(|(_, entry)| entry));
}

/// Merge runs of records with equal group values into their first record,
/// which receives the non-group fields of the others.
fn group(mut records: Vec<(Record, usize)>, group_by: &FieldExpr) -> Vec<(Record, usize)> {
    sort_records(&mut records, group_by);
    let names = group_by.names();

    let mut grouped: Vec<(Vec<Option<String>>, (Record, usize))> = Vec::new();
    for (record, size) in records {
        let key = group_by.values_for(&record);
        match grouped.last_mut() {
            Some((last_key, (representative, total))) if compare_keys(last_key, &key) == Ordering::Equal => {
                for field in record.fields().filter(|f| !names.contains(&f.name.as_str())) {
                    representative.push_field(field.clone());
                }
                *total += size;
            }
            _ => grouped.push((key, (record, size))),
        }
    }
    grouped.into_iter().map(|(_, entry)| entry).collect()
}

enum Joined {
    Merged(Record),
    NoReference,
    Dangling(String),
}

/// A resolved join: the referenced set indexed by key value.
struct Join<'a> {
    field: &'a str,
    by_key: HashMap<&'a str, &'a Record>,
    target: &'a RecordSet,
    with_confidential: bool,
}

impl<'a> Join<'a> {
    fn prepare(db: &'a Database, set: &RecordSet, field: &'a str, with_confidential: bool) -> Result<Self> {
        let target_type = match set.schema().field_type(field) {
            Some(FieldType::Rec(target)) => target,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "field '{}' is not declared as a record reference",
                    field
                )));
            }
        };
        let target = db
            .record_set_by_type(target_type)
            .ok_or_else(|| Error::unknown_type(target_type))?;
        let key = target.schema().key.as_deref().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("referenced type '{}' declares no %key", target_type),
            )
        })?;

        let mut by_key = HashMap::new();
        for record in target.records() {
            if let Some(value) = record.first(key) {
                by_key.entry(value).or_insert(record);
            }
        }
        Ok(Join { field, by_key, target, with_confidential })
    }

    /// Replace the reference field with the referenced record's fields,
    /// renamed `<field>_<name>`.
    fn apply(&self, record: &Record) -> Joined {
        let Some(reference) = record.first(self.field) else {
            return Joined::NoReference;
        };
        let Some(referenced) = self.by_key.get(reference) else {
            return Joined::Dangling(reference.to_string());
        };

        let mut merged = Record {
            items: Vec::with_capacity(record.items.len() + referenced.num_fields()),
            location: record.location,
        };
        let mut inserted = false;
        for item in &record.items {
            match item {
                RecordItem::Field(field) if field.name == self.field => {
                    if inserted {
                        continue;
                    }
                    inserted = true;
                    for remote in referenced.fields() {
                        if !self.with_confidential && self.target.schema().is_confidential(&remote.name) {
                            continue;
                        }
                        merged.push_field(Field::new(format!("{}_{}", self.field, remote.name), remote.value.clone()));
                    }
                }
                other => merged.items.push(other.clone()),
            }
        }
        Joined::Merged(merged)
    }
}
