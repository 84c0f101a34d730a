pub mod schema;
pub mod field_type;
pub mod integrity;
