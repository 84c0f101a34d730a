use serde::{Serialize, Deserialize};
use crate::schema::schema::Schema;
use crate::writer::text_writer;

/// Where a record started in the parsed text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,    // 1-based
    pub offset: usize,  // Byte offset of the first line
}

/// Check the field name syntax: letters, digits, `_` and `%`, not starting with a digit.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '%' || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '%')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Meta-fields (`%rec`, `%key`, ...) only have meaning inside descriptors.
    pub fn is_meta(&self) -> bool {
        self.name.starts_with('%')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,  // Without the leading `#`, lines joined by '\n'
}

impl Comment {
    pub fn new(text: impl Into<String>) -> Self {
        Comment { text: text.into() }
    }
}

/// One element of a record: a field or a comment line group kept in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordItem {
    Field(Field),
    Comment(Comment),
}

impl RecordItem {
    pub fn as_field(&self) -> Option<&Field> {
        match self {
            RecordItem::Field(field) => Some(field),
            RecordItem::Comment(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub items: Vec<RecordItem>,
    pub location: Option<Location>,
}

// Source location is diagnostic metadata, not content.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for Record {}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_field(Field::new(name, value));
        self
    }

    pub fn push_field(&mut self, field: Field) {
        self.items.push(RecordItem::Field(field));
    }

    pub fn push_comment(&mut self, comment: Comment) {
        self.items.push(RecordItem::Comment(comment));
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.items.iter().filter_map(RecordItem::as_field)
    }

    pub fn comments(&self) -> impl Iterator<Item = &Comment> {
        self.items.iter().filter_map(|item| match item {
            RecordItem::Comment(comment) => Some(comment),
            RecordItem::Field(_) => None,
        })
    }

    pub fn num_fields(&self) -> usize {
        self.fields().count()
    }

    /// All values of `name`, in record order.
    pub fn values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.fields()
            .filter(move |f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// The `n`-th (0-based) occurrence of `name`.
    pub fn get(&self, name: &str, n: usize) -> Option<&str> {
        self.values(name).nth(n)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name, 0)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields().any(|f| f.name == name)
    }

    pub fn field_count(&self, name: &str) -> usize {
        self.values(name).count()
    }

    /// True when a field called `name` holds exactly `value`.
    pub fn contains_field(&self, name: &str, value: &str) -> bool {
        self.values(name).any(|v| v == value)
    }

    /// True when any field holds exactly `value`.
    pub fn contains_value(&self, value: &str, case_insensitive: bool) -> bool {
        if case_insensitive {
            let value = value.to_lowercase();
            self.fields().any(|f| f.value.to_lowercase() == value)
        } else {
            self.fields().any(|f| f.value == value)
        }
    }

    /// The record in the text format, without a trailing blank line.
    pub fn text(&self) -> String {
        let mut out = String::new();
        text_writer::write_record(&mut out, self);
        out
    }
}

/// A record set keeps records and standalone comments interleaved in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    Record(Record),
    Comment(Comment),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordSet {
    descriptor: Option<Record>,
    entries: Vec<Entry>,
    #[serde(skip)]
    schema: Schema,
}

impl PartialEq for RecordSet {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.entries == other.entries
    }
}

impl RecordSet {
    /// An untyped set without descriptor.
    pub fn new() -> Self {
        RecordSet::default()
    }

    pub fn with_descriptor(descriptor: Record) -> Self {
        let mut set = RecordSet::new();
        set.set_descriptor(Some(descriptor));
        set
    }

    /// A set declaring only its type name.
    pub fn typed(record_type: &str) -> Self {
        Self::with_descriptor(Record::new().with_field("%rec", record_type))
    }

    pub fn descriptor(&self) -> Option<&Record> {
        self.descriptor.as_ref()
    }

    /// Replace the descriptor and rebuild the derived schema.
    pub fn set_descriptor(&mut self, descriptor: Option<Record>) {
        self.schema = descriptor
            .as_ref()
            .map(Schema::from_descriptor)
            .unwrap_or_default();
        self.descriptor = descriptor;
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn type_name(&self) -> Option<&str> {
        self.schema.type_name.as_deref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Record(record) => Some(record),
            Entry::Comment(_) => None,
        })
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.entries.iter_mut().filter_map(|entry| match entry {
            Entry::Record(record) => Some(record),
            Entry::Comment(_) => None,
        })
    }

    pub fn num_records(&self) -> usize {
        self.records().count()
    }

    pub fn num_comments(&self) -> usize {
        self.entries.len() - self.num_records()
    }

    pub fn record(&self, position: usize) -> Option<&Record> {
        self.records().nth(position)
    }

    pub fn record_mut(&mut self, position: usize) -> Option<&mut Record> {
        self.records_mut().nth(position)
    }

    pub fn push_record(&mut self, record: Record) {
        self.entries.push(Entry::Record(record));
    }

    pub fn push_comment(&mut self, comment: Comment) {
        self.entries.push(Entry::Comment(comment));
    }

    /// Insert before the record currently at `position`; appends when past the end.
    pub fn insert_record(&mut self, position: usize, record: Record) {
        match self.entry_index(position) {
            Some(index) => self.entries.insert(index, Entry::Record(record)),
            None => self.entries.push(Entry::Record(record)),
        }
    }

    /// Swap the record at `position` for `entry`, returning the old record.
    pub fn replace_record(&mut self, position: usize, entry: Entry) -> Option<Record> {
        let index = self.entry_index(position)?;
        match std::mem::replace(&mut self.entries[index], entry) {
            Entry::Record(old) => Some(old),
            Entry::Comment(_) => None,
        }
    }

    pub fn remove_record(&mut self, position: usize) -> Option<Record> {
        let index = self.entry_index(position)?;
        match self.entries.remove(index) {
            Entry::Record(old) => Some(old),
            Entry::Comment(_) => None,
        }
    }

    /// Entry index of the `position`-th record.
    fn entry_index(&self, position: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| matches!(entry, Entry::Record(_)))
            .nth(position)
            .map(|(index, _)| index)
    }

    /// An empty copy carrying the same descriptor.
    pub fn empty_like(&self) -> Self {
        RecordSet {
            descriptor: self.descriptor.clone(),
            entries: Vec::new(),
            schema: self.schema.clone(),
        }
    }
}
