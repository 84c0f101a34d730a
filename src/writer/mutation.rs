use tracing::debug;
use uuid::Uuid;
use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::core::types::{is_valid_field_name, Entry, Field, Record, RecordItem, RecordSet};
use crate::query::executor::target_positions;
use crate::query::fex::{FieldExpr, SetAction};
use crate::query::types::RecordFilter;
use crate::schema::field_type::{parse_int, FieldType};
use crate::writer::batch::RecordBatch;

pub use crate::writer::batch::{MutationReport, RecordFailure};

#[derive(Debug, Clone)]
pub struct InsertParams {
    /// Selects the insertion point: before the first matched record.
    /// With `replace`, every matched record is replaced instead.
    pub filter: RecordFilter,
    pub record: Record,
    pub replace: bool,
}

impl InsertParams {
    pub fn new(record: Record) -> Self {
        InsertParams {
            filter: RecordFilter::default(),
            record,
            replace: false,
        }
    }

    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteParams {
    pub filter: RecordFilter,
    /// Turn matched records into comments instead of removing them.
    pub comment_out: bool,
}

#[derive(Debug, Clone)]
pub struct SetFieldsParams {
    pub filter: RecordFilter,
    pub fields: FieldExpr,
    pub action: SetAction,
}

/// Target set for a mutation; `None` when the database has no sets at all.
fn target_set<'d>(db: &'d mut Database, filter: &RecordFilter) -> Result<Option<&'d mut RecordSet>> {
    Ok(match db.resolve(filter.record_type.as_deref())? {
        Some(position) => db.record_set_mut(position),
        None => None,
    })
}

fn check_new_record(record: &Record) -> Result<()> {
    if record.num_fields() == 0 {
        return Err(Error::invalid_argument("cannot insert a record without fields"));
    }
    if let Some(field) = record.fields().find(|f| !is_valid_field_name(&f.name) || f.is_meta()) {
        return Err(Error::invalid_argument(format!("invalid field name '{}'", field.name)));
    }
    Ok(())
}

/// Generated values for the `%auto` fields the record lacks.
fn auto_fields(set: &RecordSet, record: &Record) -> Vec<Field> {
    let schema = set.schema();
    let mut generated = Vec::new();
    for name in schema.auto.iter().filter(|name| !record.has_field(name)) {
        let value = match schema.field_type(name) {
            Some(field_type) if field_type.is_integer() => {
                let next = set
                    .records()
                    .flat_map(|r| r.values(name))
                    .filter_map(parse_int)
                    .max()
                    .map_or(0, |max| max + 1);
                next.to_string()
            }
            Some(FieldType::Uuid) => Uuid::new_v4().to_string(),
            Some(FieldType::Date) => chrono::Utc::now().to_rfc3339(),
            _ => continue,
        };
        generated.push(Field::new(name.clone(), value));
    }
    generated
}

/// Insert a record, or replace the matched records with it. A plain insert
/// that violates the set constraints fails with no change.
pub fn insert(db: &mut Database, params: &InsertParams) -> Result<MutationReport> {
    check_new_record(&params.record)?;

    if db.size() == 0 && params.filter.record_type.is_none() {
        db.insert_record_set(RecordSet::new(), 0)?;
    }
    let Some(set) = target_set(db, &params.filter)? else {
        return Ok(MutationReport::default());
    };

    let positions = if params.filter.is_unrestricted() {
        Vec::new()
    } else {
        target_positions(set, &params.filter)
    };

    if params.replace && !params.filter.is_unrestricted() {
        let mut batch = RecordBatch::new(set);
        for &position in &positions {
            batch.stage_replace(position, params.record.clone());
        }
        let report = batch.finish();
        debug!(matched = positions.len(), changed = report.changed, "records replaced");
        return Ok(report);
    }

    let mut record = params.record.clone();
    let generated = auto_fields(set, &record);
    if !generated.is_empty() {
        let mut items: Vec<RecordItem> = generated.into_iter().map(RecordItem::Field).collect();
        items.append(&mut record.items);
        record.items = items;
    }

    let mut batch = RecordBatch::new(set);
    batch.stage_insert(positions.first().copied(), record)?;
    let report = batch.finish();
    debug!(position = ?positions.first(), "record inserted");
    Ok(report)
}

pub fn delete(db: &mut Database, params: &DeleteParams) -> Result<MutationReport> {
    let Some(set) = target_set(db, &params.filter)? else {
        return Ok(MutationReport::default());
    };
    let positions = target_positions(set, &params.filter);

    let mut batch = RecordBatch::new(set);
    batch.stage_remove(&positions, params.comment_out);
    let report = batch.finish();
    fold_empty_default_set(db);
    debug!(
        matched = positions.len(),
        changed = report.changed,
        comment_out = params.comment_out,
        "records deleted"
    );
    Ok(report)
}

/// An untyped set without records is written as bare comment blocks, which
/// read back as the database prologue. Keep the in-memory form the same.
fn fold_empty_default_set(db: &mut Database) {
    let empty = db
        .record_sets()
        .first()
        .is_some_and(|set| set.descriptor().is_none() && set.num_records() == 0);
    if !empty {
        return;
    }
    if let Ok(set) = db.remove_record_set(0) {
        db.prologue.extend(set.entries().iter().filter_map(|entry| match entry {
            Entry::Comment(comment) => Some(comment.clone()),
            Entry::Record(_) => None,
        }));
    }
}

/// Apply a set-field action to the selected fields of every matched record.
pub fn set_fields(db: &mut Database, params: &SetFieldsParams) -> Result<MutationReport> {
    params.action.validate()?;
    let Some(set) = target_set(db, &params.filter)? else {
        return Ok(MutationReport::default());
    };
    let positions = target_positions(set, &params.filter);

    let mut batch = RecordBatch::new(set);
    for &position in &positions {
        let Some(updated) = batch.record(position).map(|r| params.fields.apply(r, &params.action)) else {
            continue;
        };
        batch.stage_replace(position, updated);
    }
    let report = batch.finish();
    debug!(
        fields = params.fields.source(),
        matched = positions.len(),
        changed = report.changed,
        "fields updated"
    );
    Ok(report)
}
