mod loader;

pub use loader::load;
