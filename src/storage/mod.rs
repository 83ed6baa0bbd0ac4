//! Collaborators at the edge of the core: local attendance log, roster and
//! the cloud API.

pub mod cloud;
pub mod memory;
pub mod sql;
pub mod traits;

pub use cloud::HttpCloudClient;
pub use memory::{MemoryLocalStore, MemoryRoster};
pub use sql::{SqlLocalStore, SqlRoster};
pub use traits::{
    CloudClient, CloudError, LocalStore, RosterError, RosterLookup, StorageError, StoredAttendance,
};
