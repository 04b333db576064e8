//! Directory access: connections, filters, attribute mapping, raw entries.

pub mod entry;
pub mod escape;
pub mod fields;
pub mod filter;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod session;
pub mod transport;

pub use entry::RawEntry;
pub use escape::escape;
pub use fields::{FieldMap, GroupField, LogicalField, UserField};
#[cfg(any(test, feature = "testing"))]
pub use filter::Filter;
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryDirectory, Operation};
pub use session::{BoundAs, DirectorySession};
pub use transport::{AttributeValues, Connector, LdapConnector, Transport};
