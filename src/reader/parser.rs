use std::borrow::Cow;
use std::io::Read;
use nom::{IResult, Parser, bytes::complete::take_while1, character::complete::char, combinator::rest, sequence::separated_pair};
use tracing::debug;
use crate::core::config::Config;
use crate::core::database::Database;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Comment, Field, Location, Record, RecordItem, RecordSet, is_valid_field_name};
use crate::schema::schema::SINGLETON_META_FIELDS;

pub const DESCRIPTOR_MARKER: &str = "%rec";

/// One physical line of input.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    offset: usize,
    text: &'a str,
}

impl Line<'_> {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Parser for the line-oriented record text format.
pub struct RecParser<'c> {
    config: &'c Config,
}

/// Parse with the default configuration.
pub fn parse(input: &str) -> Result<Database> {
    RecParser::new(&Config::default()).parse_str(input)
}

impl<'c> RecParser<'c> {
    pub fn new(config: &'c Config) -> Self {
        RecParser { config }
    }

    pub fn parse_reader<R: Read>(&self, mut reader: R) -> Result<Database> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.parse_bytes(&bytes)
    }

    /// Rejects malformed UTF-8, reporting the line of the first bad sequence.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Database> {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.parse_str(text),
            Err(err) => {
                let valid = &bytes[..err.valid_up_to()];
                let line = valid.iter().filter(|b| **b == b'\n').count() + 1;
                Err(Error::at_line(ErrorKind::Encoding, line, err.to_string()))
            }
        }
    }

    pub fn parse_str(&self, input: &str) -> Result<Database> {
        let lines = split_lines(input);
        let mut builder = DatabaseBuilder::default();

        // Blocks are runs of non-blank lines
        let mut start = 0;
        while start < lines.len() {
            if lines[start].is_blank() {
                start += 1;
                continue;
            }
            let end = lines[start..]
                .iter()
                .position(Line::is_blank)
                .map_or(lines.len(), |n| start + n);
            let items = self.parse_block(&lines[start..end])?;
            builder.add_block(items, &lines[start])?;
            start = end;
        }

        let db = builder.finish();
        debug!(
            record_sets = db.size(),
            records = db.record_sets().iter().map(RecordSet::num_records).sum::<usize>(),
            "parsed record database"
        );
        Ok(db)
    }

    fn parse_block(&self, lines: &[Line<'_>]) -> Result<Vec<RecordItem>> {
        let mut items: Vec<RecordItem> = Vec::new();
        let mut joining = false;

        for line in lines {
            if joining {
                // Previous physical line ended with a backslash
                let (text, more) = self.split_line_end(line.text);
                if let Some(RecordItem::Field(field)) = items.last_mut() {
                    field.value.push_str(&text);
                }
                joining = more;
                continue;
            }

            if let Some(text) = line.text.strip_prefix('#') {
                match items.last_mut() {
                    Some(RecordItem::Comment(comment)) => {
                        comment.text.push('\n');
                        comment.text.push_str(text);
                    }
                    _ => items.push(RecordItem::Comment(Comment::new(text))),
                }
                continue;
            }

            if let Some(text) = line.text.strip_prefix('+') {
                let Some(RecordItem::Field(field)) = items.last_mut() else {
                    return Err(Error::parse(line.number, "continuation line without a preceding field"));
                };
                let (text, more) = self.split_line_end(strip_one_blank(text));
                field.value.push('\n');
                field.value.push_str(&text);
                joining = more;
                continue;
            }

            let field = parse_field_line(line.text).map_err(|message| Error::parse(line.number, message))?;
            let (text, more) = self.split_line_end(&field.value);
            let field = Field::new(field.name, text);
            items.push(RecordItem::Field(field));
            joining = more;
        }

        if joining {
            let last = lines.last().map_or(0, |line| line.number);
            return Err(Error::parse(last, "unterminated multi-line value"));
        }
        Ok(items)
    }

    fn split_line_end<'a>(&self, text: &'a str) -> (Cow<'a, str>, bool) {
        decode_line_end(text, self.config.allow_backslash_continuation)
    }
}

/// Decode the backslashes ending a value line. Each doubled backslash is
/// one literal backslash; an unpaired last one joins the next line when
/// `joins` is set and is kept literally otherwise.
fn decode_line_end(text: &str, joins: bool) -> (Cow<'_, str>, bool) {
    let head = text.trim_end_matches('\\');
    let run = text.len() - head.len();
    if run == 0 {
        return (Cow::Borrowed(text), false);
    }
    let continued = run % 2 == 1 && joins;
    let literal = run / 2 + usize::from(run % 2 == 1 && !continued);
    (Cow::Owned(format!("{}{}", head, "\\".repeat(literal))), continued)
}

fn split_lines(input: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for (index, raw) in input.split_inclusive('\n').enumerate() {
        let text = raw.strip_suffix('\n').unwrap_or(raw);
        let text = text.strip_suffix('\r').unwrap_or(text);
        lines.push(Line { number: index + 1, offset, text });
        offset += raw.len();
    }
    lines
}

fn strip_one_blank(text: &str) -> &str {
    text.strip_prefix(' ')
        .or_else(|| text.strip_prefix('\t'))
        .unwrap_or(text)
}

fn name_value(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '%'),
        char(':'),
        rest,
    )
    .parse(input)
}

/// Parse a single `name: value` line.
pub fn parse_field_line(line: &str) -> std::result::Result<Field, String> {
    let (_, (name, value)) =
        name_value(line).map_err(|_| format!("malformed field line '{}'", line))?;
    if !is_valid_field_name(name) {
        return Err(format!("invalid field name '{}'", name));
    }
    Ok(Field::new(name, strip_one_blank(value)))
}

/// Read back a field from its text form (`name: value` plus `+` lines),
/// as stored in commented-out fields.
pub fn parse_field_text(text: &str) -> Option<Field> {
    let mut lines = text.split('\n');
    let mut field = parse_field_line(lines.next()?).ok()?;
    field.value = decode_line_end(&field.value, false).0.into_owned();
    for line in lines {
        let continuation = line.strip_prefix('+')?;
        field.value.push('\n');
        field.value.push_str(&decode_line_end(strip_one_blank(continuation), false).0);
    }
    Some(field)
}

#[derive(Default)]
struct DatabaseBuilder {
    db: Database,
    current: Option<usize>,     // Index of the set receiving records
    pending: Vec<Comment>,      // Standalone comments seen before any set exists
}

impl DatabaseBuilder {
    fn add_block(&mut self, items: Vec<RecordItem>, first: &Line<'_>) -> Result<()> {
        let location = Location { line: first.number, offset: first.offset };
        let first_field = items.iter().find_map(RecordItem::as_field);

        match first_field {
            None => {
                // Comment-only block
                let text = items
                    .into_iter()
                    .filter_map(|item| match item {
                        RecordItem::Comment(comment) => Some(comment.text),
                        RecordItem::Field(_) => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                match self.current {
                    Some(index) => self.db.sets_mut()[index].push_comment(Comment::new(text)),
                    None => self.pending.push(Comment::new(text)),
                }
            }
            Some(field) if field.name == DESCRIPTOR_MARKER => {
                let record_type = field.value.split_whitespace().next().unwrap_or("").to_string();
                if record_type.is_empty() {
                    return Err(Error::parse(first.number, "descriptor without a record type"));
                }
                let descriptor = Record { items, location: Some(location) };
                self.add_descriptor(&record_type, descriptor, first.number)?;
            }
            Some(_) => {
                let record = Record { items, location: Some(location) };
                let index = self.current_or_default();
                self.db.sets_mut()[index].push_record(record);
            }
        }
        Ok(())
    }

    fn add_descriptor(&mut self, record_type: &str, descriptor: Record, line: usize) -> Result<()> {
        if self.current.is_none() {
            self.db.prologue.append(&mut self.pending);
        }

        let existing = self
            .db
            .record_sets()
            .iter()
            .position(|set| set.type_name() == Some(record_type));

        match existing {
            Some(index) => {
                let set = &mut self.db.sets_mut()[index];
                let merged = merge_descriptor(set.descriptor(), descriptor, record_type, line)?;
                set.set_descriptor(Some(merged));
                self.current = Some(index);
            }
            None => {
                self.db.sets_mut().push(RecordSet::with_descriptor(descriptor));
                self.current = Some(self.db.size() - 1);
            }
        }
        Ok(())
    }

    fn current_or_default(&mut self) -> usize {
        if let Some(index) = self.current {
            return index;
        }
        let mut set = RecordSet::new();
        for comment in self.pending.drain(..) {
            set.push_comment(comment);
        }
        self.db.sets_mut().push(set);
        self.current = Some(0);
        0
    }

    fn finish(mut self) -> Database {
        // Trailing comments of an otherwise empty input
        self.db.prologue.append(&mut self.pending);
        self.db
    }
}

/// Fold a repeated descriptor for `record_type` into the existing one.
fn merge_descriptor(existing: Option<&Record>, incoming: Record, record_type: &str, line: usize) -> Result<Record> {
    let mut merged = existing.cloned().unwrap_or_default();

    for item in incoming.items {
        let RecordItem::Field(field) = &item else {
            merged.items.push(item);
            continue;
        };
        if field.name == DESCRIPTOR_MARKER || merged.contains_field(&field.name, &field.value) {
            continue;
        }
        if SINGLETON_META_FIELDS.contains(&field.name.as_str()) && merged.has_field(&field.name) {
            return Err(Error::parse(
                line,
                format!("conflicting {} redeclared for record type '{}'", field.name, record_type),
            ));
        }
        merged.items.push(item);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Entry;

    const BOOKS: &str = "%rec: Book\n%key: isbn\n\nisbn: 1\ntitle: Go\n\nisbn: 2\ntitle: Rust\n";

    #[test]
    fn parses_typed_set() {
        let db = parse(BOOKS).unwrap();
        assert_eq!(db.size(), 1);
        let set = db.record_set_by_type("Book").unwrap();
        assert_eq!(set.num_records(), 2);
        assert_eq!(set.schema().key.as_deref(), Some("isbn"));
        assert_eq!(set.record(1).unwrap().first("title"), Some("Rust"));
        assert_eq!(set.record(0).unwrap().location.map(|l| l.line), Some(4));
    }

    #[test]
    fn records_before_descriptor_form_default_set() {
        let db = parse("a: 1\n\n%rec: T\n\nb: 2\n").unwrap();
        assert_eq!(db.size(), 2);
        assert_eq!(db.record_sets()[0].type_name(), None);
        assert_eq!(db.record_sets()[1].type_name(), Some("T"));
    }

    #[test]
    fn continuation_lines() {
        let db = parse("note: first\n+ second\n+\n+third\nlong: ab\\\ncd\n").unwrap();
        let record = db.record_sets()[0].record(0).unwrap();
        assert_eq!(record.first("note"), Some("first\nsecond\n\nthird"));
        assert_eq!(record.first("long"), Some("abcd"));
    }

    #[test]
    fn doubled_backslashes_are_literal() {
        let db = parse("a: C:\\\\\nb: x\\\\\\\\\nc: y\\\\\\\nz\n").unwrap();
        let record = db.record_sets()[0].record(0).unwrap();
        assert_eq!(record.first("a"), Some("C:\\"));
        assert_eq!(record.first("b"), Some("x\\\\"));
        assert_eq!(record.first("c"), Some("y\\z"));

        let config = Config { allow_backslash_continuation: false, ..Config::default() };
        let db = RecParser::new(&config).parse_str("a: C:\\\\\n").unwrap();
        assert_eq!(db.record_sets()[0].record(0).unwrap().first("a"), Some("C:\\"));
        assert_eq!(parse_field_text("p: D:\\\\").map(|f| f.value), Some("D:\\".to_string()));
    }

    #[test]
    fn backslash_can_be_disabled() {
        let config = Config { allow_backslash_continuation: false, ..Config::default() };
        let db = RecParser::new(&config).parse_str("path: C:\\\n").unwrap();
        assert_eq!(db.record_sets()[0].record(0).unwrap().first("path"), Some("C:\\"));
    }

    #[test]
    fn comments_attach_or_stand_alone() {
        let db = parse("# header\n\n%rec: T\n\n# about r1\nid: 1\n# inline\n\n# loose\n").unwrap();
        assert_eq!(db.prologue, vec![Comment::new(" header")]);
        let set = db.record_set_by_type("T").unwrap();
        let record = set.record(0).unwrap();
        assert_eq!(record.comments().count(), 2);
        assert!(matches!(&set.entries()[1], Entry::Comment(c) if c.text == " loose"));
    }

    #[test]
    fn repeated_descriptor_merges() {
        let db = parse("%rec: T\n%mandatory: a\n\na: 1\n\n%rec: U\n\nb: 1\n\n%rec: T\n%mandatory: b\n\na: 2\n").unwrap();
        assert_eq!(db.size(), 2);
        let set = db.record_set_by_type("T").unwrap();
        assert_eq!(set.num_records(), 2);
        assert_eq!(set.schema().mandatory, vec!["a", "b"]);
    }

    #[test]
    fn conflicting_key_is_rejected() {
        let err = parse("%rec: T\n%key: a\n\n%rec: T\n%key: b\n").unwrap_err();
        assert!(err.is(ErrorKind::Parse));
        assert_eq!(err.line, Some(4));
    }

    #[test]
    fn malformed_input_errors() {
        let err = parse("title Go\n").unwrap_err();
        assert_eq!((err.kind, err.line), (ErrorKind::Parse, Some(1)));

        let err = parse("# lead\n+ orphan\n").unwrap_err();
        assert_eq!(err.line, Some(2));

        let err = parse("a: 1\nb: open\\\n").unwrap_err();
        assert!(err.context.contains("unterminated"));

        let err = parse("%rec:\n").unwrap_err();
        assert!(err.context.contains("descriptor"));

        let err = parse("1a: x\n").unwrap_err();
        assert!(err.context.contains("invalid field name"));
    }

    #[test]
    fn invalid_utf8_reports_line() {
        let err = RecParser::new(&Config::default())
            .parse_bytes(b"a: 1\nb: \xff\n")
            .unwrap_err();
        assert_eq!((err.kind, err.line), (ErrorKind::Encoding, Some(2)));
    }

    #[test]
    fn field_text_round_trip() {
        let field = parse_field_text("note: a\n+ b").unwrap();
        assert_eq!(field, Field::new("note", "a\nb"));
        assert!(parse_field_text("just words").is_none());
    }
}
