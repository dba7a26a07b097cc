pub mod baseline;
pub mod defs;
pub mod empty;
pub mod state;

pub use baseline::InMemoryStore;
pub use defs::*;
pub use state::{SessionStore, Store, StoreError, StoreResult};
