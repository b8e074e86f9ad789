pub mod config;
pub mod memory;
pub mod sled;

pub use self::config::{open_store, StorageBackend, StorageConfig};
pub use self::memory::MemoryNodeStore;
pub use self::sled::SledNodeStore;
