pub mod types;
pub mod database;
pub mod database_rw;
pub mod config;
pub mod error;
pub mod stats;
