pub mod ast;
pub mod parser;
pub mod matcher;
pub mod fex;
pub mod types;
pub mod cache;
pub mod executor;
