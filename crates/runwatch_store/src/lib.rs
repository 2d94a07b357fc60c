//! Persisted job store for Runwatch.
//!
//! [`StateStore`] is the only entry point: it wraps a backend selected by URL
//! (`memory:` or `sqlite:<path>`) and exposes the `Job` and `Reservation`
//! collections through [`JobStore`] and [`ReservationStore`].

pub mod error;
pub mod memory;
pub mod query;
pub mod sqlite;
pub mod state_store;

pub use error::{Result, StoreError};
pub use memory::MemoryBackend;
pub use query::{JobQuery, TimeWindow};
pub use sqlite::SqliteBackend;
pub use state_store::{JobStore, ReservationStore, StateStore, StateStoreBackend, StateStoreUrl};
