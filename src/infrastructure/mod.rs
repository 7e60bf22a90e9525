pub mod clock;
pub mod gateway;
pub mod in_memory;
pub mod processor;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
