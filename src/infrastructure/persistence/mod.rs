//! Call-record store implementations

pub mod http_call_store;
pub mod memory_call_store;

pub use http_call_store::HttpCallStore;
pub use memory_call_store::InMemoryCallStore;
