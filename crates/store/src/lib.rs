//! Persistence adapters behind the [`common::SignalStore`] contract.
//!
//! `FileStore` writes via a temp file and an atomic rename; `SqliteStore`
//! upserts in a single statement; `MemoryStore` backs tests and can inject
//! write failures.

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
