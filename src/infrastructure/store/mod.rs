mod in_memory;

pub use in_memory::{shared_in_memory_store, InMemoryStore};
