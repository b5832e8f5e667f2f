//! Domain types for the snapshot engine
//! Plain data shared by the diff engine, the state manager and the lock coordinator.

pub mod error;
pub mod lock;
pub mod snapshot;

pub use error::*;
pub use lock::*;
pub use snapshot::*;
