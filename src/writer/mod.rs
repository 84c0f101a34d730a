pub mod text_writer;
pub mod batch;
pub mod mutation;
