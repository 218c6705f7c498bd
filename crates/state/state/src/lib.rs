pub mod error;
pub mod key;
pub mod persistence;
pub mod store;
pub mod testing;

pub use error::StateError;
pub use key::{KeyKind, StateKey};
pub use persistence::{PersistenceStore, StatePersistence};
pub use store::StateStore;
