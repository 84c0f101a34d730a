//! Property tests: round trip, filter composition, sampling bound, key uniqueness.

use std::collections::HashSet;
use proptest::prelude::*;
use recbase::*;

fn field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}"
}

fn field_value() -> impl Strategy<Value = String> {
    // Printable text, optionally multi-line, with leading blanks and trailing backslashes
    prop::collection::vec("[A-Za-z0-9 .,:=\\\\-]{0,12}", 1..3).prop_map(|lines| lines.join("\n"))
}

fn record() -> impl Strategy<Value = Record> {
    prop::collection::vec((field_name(), field_value()), 1..5).prop_map(|fields| {
        fields
            .into_iter()
            .fold(Record::new(), |record, (name, value)| record.with_field(name, value))
    })
}

fn numbered(count: usize) -> Database {
    let mut text = String::from("%rec: Item\n%key: id\n");
    for id in 0..count {
        text.push_str(&format!("\nid: {}\nparity: {}\n", id, id % 2));
    }
    Database::parse(&text).unwrap()
}

proptest! {
    #[test]
    fn prop_round_trip(records in prop::collection::vec(record(), 1..6), typed in any::<bool>()) {
        let mut set = if typed { RecordSet::typed("Thing") } else { RecordSet::new() };
        for record in records {
            set.push_record(record);
        }
        set.push_comment(Comment::new(" trailing note"));
        let mut db = Database::new();
        db.insert_record_set(set, 0).unwrap();

        let text = db.to_text();
        let reparsed = Database::parse(&text).unwrap();
        prop_assert_eq!(reparsed.to_text(), text);
        prop_assert_eq!(reparsed, db);
    }

    #[test]
    fn prop_filter_composition(count in 0usize..30, threshold in 0i64..30) {
        let db = numbered(count);
        let all = db.query(&QueryParams::new().with_type("Item")).unwrap();
        let expression = format!("id < {} && parity = 0", threshold);
        let selected = db
            .query(&QueryParams::new().with_type("Item").select(&expression).unwrap())
            .unwrap();

        let selection = SelectionExpr::compile(&expression).unwrap();
        let everything: Vec<&Record> = all.records.records().collect();
        for record in selected.records.records() {
            prop_assert!(everything.contains(&record));
            prop_assert!(selection.evaluate(record));
        }
    }

    #[test]
    fn prop_sampling_bound(count in 0usize..25, k in 0usize..40, seed in any::<u64>()) {
        let db = numbered(count);
        let filter = RecordFilter::new().with_type("Item").with_random(k).with_seed(seed);
        let result = db.query(&QueryParams::new().with_filter(filter)).unwrap();

        prop_assert_eq!(result.len(), k.min(count));
        let ids: HashSet<&str> = result.records.records().filter_map(|r| r.first("id")).collect();
        prop_assert_eq!(ids.len(), result.len());
    }

    #[test]
    fn prop_keys_stay_unique(ops in prop::collection::vec((0u8..3, 0usize..6, 0usize..6), 1..20)) {
        let mut db = numbered(3);
        for (op, a, b) in ops {
            let outcome = match op {
                0 => db
                    .insert(&InsertParams::new(Record::new().with_field("id", a.to_string())))
                    .map(|_| ()),
                1 => {
                    let params = SetFieldsParams {
                        filter: RecordFilter::new().with_index(a),
                        fields: FieldExpr::compile("id").unwrap(),
                        action: SetAction::Set(b.to_string()),
                    };
                    db.set_fields(&params).map(|_| ())
                }
                _ => {
                    let params = SetFieldsParams {
                        filter: RecordFilter::new().with_index(a),
                        fields: FieldExpr::compile("id").unwrap(),
                        action: SetAction::Add(b.to_string()),
                    };
                    db.set_fields(&params).map(|_| ())
                }
            };
            if let Err(err) = outcome {
                prop_assert!(err.is(ErrorKind::ConstraintViolation));
            }

            let set = db.record_set(0).unwrap();
            let keys: Vec<&str> = set.records().filter_map(|r| r.first("id")).collect();
            let distinct: HashSet<&str> = keys.iter().copied().collect();
            prop_assert_eq!(distinct.len(), keys.len());
            prop_assert!(set.records().all(|r| r.field_count("id") == 1));
        }
    }

    #[test]
    fn prop_query_idempotent(count in 0usize..20, seed in any::<u64>()) {
        let db = numbered(count);
        let filter = RecordFilter::new().with_random(count / 2).with_seed(seed);
        let params = QueryParams::new()
            .with_filter(filter)
            .sort_by(FieldExpr::compile("parity,id").unwrap());
        prop_assert_eq!(db.query(&params).unwrap(), db.query(&params).unwrap());
    }
}
