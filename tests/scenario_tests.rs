//! End-to-end tests over the public API: parse, query, mutate, check, write back.

use recbase::*;

const BOOKS: &str = "%rec: Book\n%key: isbn\n\nisbn: 1\ntitle: Go\n\nisbn: 2\ntitle: Rust\n";

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn book_filter() -> RecordFilter {
    RecordFilter::new().with_type("Book")
}

#[test]
fn test_parse_and_select() {
    init_logging();
    let db = Database::parse(BOOKS).unwrap();
    assert_eq!(db.size(), 1);
    let set = db.record_set_by_type("Book").unwrap();
    assert_eq!(set.num_records(), 2);

    let params = QueryParams::new().with_type("Book").select("title = \"Go\"").unwrap();
    let result = db.query(&params).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.records.record(0).and_then(|r| r.first("isbn")), Some("1"));
}

#[test]
fn test_duplicate_key_insert_rejected() {
    init_logging();
    let mut db = Database::parse(BOOKS).unwrap();
    let record = Record::new().with_field("isbn", "1").with_field("title", "C");
    let err = db
        .insert(&InsertParams::new(record).with_filter(book_filter()))
        .unwrap_err();

    assert!(err.is(ErrorKind::ConstraintViolation), "got {}", err);
    assert_eq!(db.record_set_by_type("Book").map(RecordSet::num_records), Some(2));
}

#[test]
fn test_rename_field() {
    let mut db = Database::parse(BOOKS).unwrap();
    let params = SetFieldsParams {
        filter: book_filter(),
        fields: FieldExpr::compile("title").unwrap(),
        action: SetAction::parse("rename", Some("name")).unwrap(),
    };
    let report = db.set_fields(&params).unwrap();
    assert_eq!(report.changed, 2);

    let set = db.record_set_by_type("Book").unwrap();
    let names: Vec<&str> = set.records().filter_map(|r| r.first("name")).collect();
    assert_eq!(names, ["Go", "Rust"]);
    assert!(set.records().all(|r| !r.has_field("title")));
}

#[test]
fn test_comment_out_delete() {
    let mut db = Database::parse(BOOKS).unwrap();
    let params = DeleteParams {
        filter: book_filter().select("isbn = 2").unwrap(),
        comment_out: true,
    };
    db.delete(&params).unwrap();

    let set = db.record_set_by_type("Book").unwrap();
    assert_eq!(set.num_records(), 1);
    let comment = set
        .entries()
        .iter()
        .find_map(|entry| match entry {
            Entry::Comment(comment) => Some(comment.text.clone()),
            Entry::Record(_) => None,
        })
        .unwrap();
    assert_eq!(comment, "isbn: 2\ntitle: Rust");

    // Written back, the tombstone survives a re-parse
    let reparsed = Database::parse(&db.to_text()).unwrap();
    assert_eq!(reparsed, db);
}

#[test]
fn test_set_on_absent_field_is_noop() {
    let mut db = Database::parse(BOOKS).unwrap();
    let params = SetFieldsParams {
        filter: book_filter(),
        fields: FieldExpr::compile("price").unwrap(),
        action: SetAction::Set("10".into()),
    };
    assert_eq!(db.set_fields(&params).unwrap().changed, 0);
    assert_eq!(db, Database::parse(BOOKS).unwrap());

    let add = SetFieldsParams { action: SetAction::SetOrAdd("10".into()), ..params };
    assert_eq!(db.set_fields(&add).unwrap().changed, 2);
    assert!(db.record_set(0).unwrap().records().all(|r| r.first("price") == Some("10")));
}

#[test]
fn test_outcomes_are_distinguishable() {
    let mut db = Database::parse(BOOKS).unwrap();

    // Failed entirely
    let err = db.query(&QueryParams::new().with_type("Film")).unwrap_err();
    assert!(err.is(ErrorKind::UnknownType));

    // Succeeded with zero matches
    let none = db.query(&QueryParams::new().select("isbn = 9").unwrap()).unwrap();
    assert!(none.is_empty());

    // Partially succeeded
    let params = SetFieldsParams {
        filter: RecordFilter::new(),
        fields: FieldExpr::compile("isbn").unwrap(),
        action: SetAction::Set("5".into()),
    };
    let report = db.set_fields(&params).unwrap();
    assert_eq!(report.changed, 1);
    assert!(!report.is_complete());
}

#[test]
fn test_parse_errors_carry_line() {
    let err = Database::parse("a: 1\nbroken line\n").unwrap_err();
    assert!(err.is(ErrorKind::Parse));
    assert_eq!(err.line, Some(2));

    let err = Database::parse("+ orphan\n").unwrap_err();
    assert_eq!(err.line, Some(1));

    let err = Database::from_reader(&b"a: \xff\n"[..], &Config::default()).unwrap_err();
    assert!(err.is(ErrorKind::Encoding));
}

#[test]
fn test_integrity_after_mutations() {
    let mut db = Database::parse(
        "%rec: Book\n%key: isbn\n%type: author rec Author\n\nisbn: 1\nauthor: a1\n\n\
         %rec: Author\n%key: id\n\nid: a1\nname: Ann\n",
    )
    .unwrap();
    assert!(db.check_integrity(CheckOptions::all()).is_empty());

    let params = DeleteParams {
        filter: RecordFilter::new().with_type("Author"),
        comment_out: false,
    };
    db.delete(&params).unwrap();
    let found = db.check_integrity(CheckOptions::all());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].severity, Severity::Error);
    assert_eq!(found[0].record_type.as_deref(), Some("Book"));
}

#[test]
fn test_shared_database_round_trip() {
    let shared = SharedDatabase::parse(BOOKS, Config::default()).unwrap();
    let selection = shared.selection("isbn >= 2").unwrap();
    let params = DeleteParams {
        filter: RecordFilter::new().with_selection(selection),
        comment_out: false,
    };
    shared.delete(&params).unwrap();
    assert_eq!(
        shared.to_text(),
        "%rec: Book\n%key: isbn\n\nisbn: 1\ntitle: Go\n"
    );
}
