// Owlbench Data Model
// JSON-backed databases driving the benchmark harness

pub mod types;
pub mod loader;

pub use types::*;
pub use loader::{DataPaths, DatabaseError, LoadCache};
