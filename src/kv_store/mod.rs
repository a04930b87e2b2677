// Durable string-keyed blob storage used by the history store.
// Two backends: SQLite (production) and an in-memory map (tests, persistence disabled).

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use std::future::Future;

/// Get/set of opaque blobs keyed by `<targetId>_<name>`.
pub trait KvStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = anyhow::Result<Option<Vec<u8>>>> + Send;

    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = anyhow::Result<()>> + Send;
}
