pub mod memory_store;
pub mod notifier;
pub mod sqlite_store;

pub use memory_store::MemoryStore;
pub use notifier::{LogNotifier, RecordingNotifier};
pub use sqlite_store::SqliteStore;
