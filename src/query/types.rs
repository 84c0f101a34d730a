use crate::core::error::Result;
use crate::query::ast::SelectionExpr;
use crate::query::fex::FieldExpr;

/// Which records of which set an operation targets. Shared by queries and
/// mutations; every absent member means "no restriction".
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub record_type: Option<String>,
    /// Single record position; short-circuits the other filters.
    pub index: Option<usize>,
    pub selection: Option<SelectionExpr>,
    /// Substring looked up in the record text before the selection runs.
    pub fast_string: Option<String>,
    /// Number of matched records to draw at random.
    pub random: Option<usize>,
    pub case_insensitive: bool,
    /// Seed for `random`; entropy when absent.
    pub seed: Option<u64>,
}

impl RecordFilter {
    pub fn new() -> Self {
        RecordFilter::default()
    }

    pub fn with_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    /// True when every record of the target set passes.
    pub fn is_unrestricted(&self) -> bool {
        self.index.is_none() && self.selection.is_none() && self.fast_string.is_none() && self.random.is_none()
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_selection(mut self, selection: SelectionExpr) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Compile `text` and use it as the selection.
    pub fn select(self, text: &str) -> Result<Self> {
        Ok(self.with_selection(SelectionExpr::compile(text)?))
    }

    pub fn with_fast_string(mut self, needle: impl Into<String>) -> Self {
        self.fast_string = Some(needle.into());
        self
    }

    pub fn with_random(mut self, count: usize) -> Self {
        self.random = Some(count);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub filter: RecordFilter,
    /// Reference field whose target records are merged into each result.
    pub join: Option<String>,
    /// Projection applied last.
    pub fields: Option<FieldExpr>,
    /// Without a password, confidential fields are left out.
    pub password: Option<String>,
    pub group_by: Option<FieldExpr>,
    pub sort_by: Option<FieldExpr>,
    pub descriptor_only: bool,
}

impl QueryParams {
    pub fn new() -> Self {
        QueryParams::default()
    }

    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_type(mut self, record_type: impl Into<String>) -> Self {
        self.filter.record_type = Some(record_type.into());
        self
    }

    pub fn select(mut self, text: &str) -> Result<Self> {
        self.filter = self.filter.select(text)?;
        Ok(self)
    }

    pub fn with_join(mut self, field: impl Into<String>) -> Self {
        self.join = Some(field.into());
        self
    }

    pub fn with_fields(mut self, fields: FieldExpr) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn group_by(mut self, fields: FieldExpr) -> Self {
        self.group_by = Some(fields);
        self
    }

    pub fn sort_by(mut self, fields: FieldExpr) -> Self {
        self.sort_by = Some(fields);
        self
    }

    pub fn descriptor_only(mut self) -> Self {
        self.descriptor_only = true;
        self
    }
}
