//! Record sinks

pub mod memory;
pub mod sqlite;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;
