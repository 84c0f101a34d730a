use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::config::Config;
use crate::core::database::Database;
use crate::core::error::Result;
use crate::core::stats::{CacheStats, DatabaseStats};
use crate::query::ast::SelectionExpr;
use crate::query::cache::ExpressionCache;
use crate::query::executor::QueryResult;
use crate::query::fex::FieldExpr;
use crate::query::types::{QueryParams, RecordFilter};
use crate::reader::parser::RecParser;
use crate::schema::integrity::{CheckOptions, Diagnostic};
use crate::writer::mutation::{DeleteParams, InsertParams, MutationReport, SetFieldsParams};

/// Database handle shared between threads: queries take the read lock,
/// mutations the write lock, so writers are serialized against each other
/// and against readers.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<RwLock<Database>>,
    cache: Arc<ExpressionCache>,
    config: Arc<Config>,
}

impl SharedDatabase {
    pub fn new(db: Database, config: Config) -> Self {
        SharedDatabase {
            inner: Arc::new(RwLock::new(db)),
            cache: Arc::new(ExpressionCache::new(config.expression_cache_size)),
            config: Arc::new(config),
        }
    }

    pub fn parse(input: &str, config: Config) -> Result<Self> {
        let db = RecParser::new(&config).parse_str(input)?;
        Ok(Self::new(db, config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compile a selection expression through the shared cache.
    pub fn selection(&self, text: &str) -> Result<SelectionExpr> {
        self.cache.selection(text)
    }

    pub fn fields(&self, text: &str) -> Result<FieldExpr> {
        self.cache.fields(text)
    }

    /// Fill the configured sample seed into a filter that has none.
    fn seeded(&self, filter: &RecordFilter) -> Option<RecordFilter> {
        match (filter.random, filter.seed, self.config.sample_seed) {
            (Some(_), None, Some(seed)) => Some(filter.clone().with_seed(seed)),
            _ => None,
        }
    }

    pub fn query(&self, params: &QueryParams) -> Result<QueryResult> {
        let db = self.inner.read();
        match self.seeded(&params.filter) {
            Some(filter) => db.query(&params.clone().with_filter(filter)),
            None => db.query(params),
        }
    }

    pub fn insert(&self, params: &InsertParams) -> Result<MutationReport> {
        let mut db = self.inner.write();
        match self.seeded(&params.filter) {
            Some(filter) => db.insert(&params.clone().with_filter(filter)),
            None => db.insert(params),
        }
    }

    pub fn delete(&self, params: &DeleteParams) -> Result<MutationReport> {
        let mut db = self.inner.write();
        match self.seeded(&params.filter) {
            Some(filter) => db.delete(&DeleteParams { filter, comment_out: params.comment_out }),
            None => db.delete(params),
        }
    }

    pub fn set_fields(&self, params: &SetFieldsParams) -> Result<MutationReport> {
        let mut db = self.inner.write();
        match self.seeded(&params.filter) {
            Some(filter) => db.set_fields(&SetFieldsParams { filter, ..params.clone() }),
            None => db.set_fields(params),
        }
    }

    pub fn check(&self, options: CheckOptions) -> Vec<Diagnostic> {
        self.inner.read().check_integrity(options)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Database {
        self.inner.read().clone()
    }

    pub fn stats(&self) -> DatabaseStats {
        self.inner.read().stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn to_text(&self) -> String {
        self.inner.read().to_text()
    }
}
