pub mod core;
pub mod reader;
pub mod writer;
pub mod schema;
pub mod query;

pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::database_rw::SharedDatabase;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{Comment, Entry, Field, Record, RecordSet};
pub use crate::query::ast::SelectionExpr;
pub use crate::query::executor::QueryResult;
pub use crate::query::fex::{FieldExpr, SetAction};
pub use crate::query::types::{QueryParams, RecordFilter};
pub use crate::schema::integrity::{CheckOptions, Diagnostic, Severity};
pub use crate::writer::mutation::{DeleteParams, InsertParams, MutationReport, SetFieldsParams};

/*
┌──────────────────────────────────── RECBASE ARCHITECTURE ────────────────────────────────────┐
│                                                                                              │
│   text ──► reader::parser ──► core::Database ──► writer::text_writer ──► text                │
│                                    │   ▲                                                     │
│              ┌─────────────────────┘   └──────────────────────┐                              │
│              ▼                                                │                              │
│   ┌────────────────────── QUERY LAYER ──────────────┐   ┌──── WRITE LAYER ─────────────┐     │
│   │ parser ─► ast ─► matcher    (selection expr)    │   │ mutation: insert / delete /  │     │
│   │ fex                          (field expr)       │   │           set-fields         │     │
│   │ executor: filter ► join ► sample ► group ►      │   │ batch: per-record validate   │     │
│   │           sort ► redact ► project               │   │        then commit           │     │
│   │ cache: LRU of compiled expressions              │   └──────────────────────────────┘     │
│   └─────────────────────────────────────────────────┘                                        │
│                                                                                              │
│   ┌────────────────────── SCHEMA LAYER ─────────────┐   ┌──── SHARED HANDLE ───────────┐     │
│   │ schema: descriptor ─► constraints               │   │ database_rw: Arc<RwLock<Db>> │     │
│   │ field_type: int real bool date enum rec ...     │   │ reads ║ concurrent          │     │
│   │ integrity: rayon over record sets ─► Diagnostic │   │ writes ═ exclusive          │     │
│   └─────────────────────────────────────────────────┘   └──────────────────────────────┘     │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/
