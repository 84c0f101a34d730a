use std::io::Write;
use crate::core::database::Database;
use crate::core::error::Result;
use crate::core::types::{Comment, Entry, Field, Record, RecordItem, RecordSet};

/// Append `name: value`, with `+` lines for every further value line.
pub fn write_field(out: &mut String, field: &Field) {
    let mut lines = field.value.split('\n');
    out.push_str(&field.name);
    out.push(':');
    if let Some(first) = lines.next() {
        if !first.is_empty() {
            out.push(' ');
            write_value_line(out, first);
        }
    }
    out.push('\n');
    for line in lines {
        out.push('+');
        if !line.is_empty() {
            out.push(' ');
            write_value_line(out, line);
        }
        out.push('\n');
    }
}

// Backslashes ending a line are doubled so they do not read back as a line join
fn write_value_line(out: &mut String, line: &str) {
    out.push_str(line);
    let run = line.len() - line.trim_end_matches('\\').len();
    out.push_str(&line[line.len() - run..]);
}

pub fn write_comment(out: &mut String, comment: &Comment) {
    for line in comment.text.split('\n') {
        out.push('#');
        out.push_str(line);
        out.push('\n');
    }
}

pub fn write_record(out: &mut String, record: &Record) {
    for item in &record.items {
        match item {
            RecordItem::Field(field) => write_field(out, field),
            RecordItem::Comment(comment) => write_comment(out, comment),
        }
    }
}

/// Text of one field as stored when the field is commented out.
pub fn field_text(field: &Field) -> String {
    let mut out = String::new();
    write_field(&mut out, field);
    out.pop();
    out
}

/// Writes blocks separated by exactly one blank line.
struct BlockWriter<'a> {
    out: &'a mut String,
    started: bool,
}

impl BlockWriter<'_> {
    fn block(&mut self, write: impl FnOnce(&mut String)) {
        if self.started {
            self.out.push('\n');
        }
        write(self.out);
        self.started = true;
    }

    fn record_set(&mut self, set: &RecordSet) {
        if let Some(descriptor) = set.descriptor() {
            self.block(|out| write_record(out, descriptor));
        }
        for entry in set.entries() {
            match entry {
                Entry::Record(record) => self.block(|out| write_record(out, record)),
                Entry::Comment(comment) => self.block(|out| write_comment(out, comment)),
            }
        }
    }
}

pub fn serialize_record_set(set: &RecordSet) -> String {
    let mut out = String::new();
    BlockWriter { out: &mut out, started: false }.record_set(set);
    out
}

pub fn serialize_database(db: &Database) -> String {
    let mut out = String::new();
    let mut writer = BlockWriter { out: &mut out, started: false };
    for comment in &db.prologue {
        writer.block(|out| write_comment(out, comment));
    }
    for set in db.record_sets() {
        writer.record_set(set);
    }
    out
}

pub fn write_database<W: Write>(db: &Database, mut sink: W) -> Result<()> {
    sink.write_all(serialize_database(db).as_bytes())?;
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parser::parse;

    #[test]
    fn multi_line_values_use_continuations() {
        let mut out = String::new();
        write_field(&mut out, &Field::new("note", "a\n\n b"));
        assert_eq!(out, "note: a\n+\n+  b\n");
        assert_eq!(field_text(&Field::new("empty", "")), "empty:");
    }

    #[test]
    fn database_round_trip_is_exact() {
        let input = "# db header\n\n%rec: Book\n%key: isbn\n\n# first\nisbn: 1\ntitle: Go\n\n#loose\n\nisbn: 2\ntitle: Rust\n+ second line\n";
        let db = parse(input).unwrap();
        let text = serialize_database(&db);
        assert_eq!(text, input);
        assert_eq!(parse(&text).unwrap(), db);
    }

    #[test]
    fn trailing_backslashes_survive_a_reparse() {
        let mut out = String::new();
        write_field(&mut out, &Field::new("path", "C:\\\nD:\\\\"));
        assert_eq!(out, "path: C:\\\\\n+ D:\\\\\\\\\n");

        let mut db = parse("%rec: Path\n").unwrap();
        let set = db.record_set_by_type_mut("Path").unwrap();
        set.push_record(Record::new().with_field("p", "C:\\"));
        set.push_record(Record::new().with_field("p", "next"));
        let text = serialize_database(&db);
        assert_eq!(parse(&text).unwrap(), db);
    }

    #[test]
    fn write_to_sink() {
        let db = parse("a: 1\n").unwrap();
        let mut sink = Vec::new();
        write_database(&db, &mut sink).unwrap();
        assert_eq!(sink, b"a: 1\n");
    }
}
