//! Tessera Adapter: compiles object queries and writes down to a native
//! document store, caches class schemas, resolves references and runs
//! transactional write batches.

pub mod adapter;
pub mod codec;
pub mod compile;
pub mod config;
pub mod connection;
pub mod events;
pub mod index;
pub mod native;
pub mod relation;
pub mod resolver;
pub mod schema_cache;
pub mod schema_store;
pub mod store;
pub mod transaction;

pub use adapter::DocumentAdapter;
pub use config::{AdapterConfig, IndexCreationConfig, LoggedEventConfig};
pub use connection::escape_uri;
pub use events::{EventLogger, StoreEvent, StoreEventListener};
pub use index::{IndexManager, IndexOutcome, IndexPurpose};
pub use resolver::{ObjectFetcher, ReferenceResolver};
pub use schema_cache::{SchemaCache, SchemaChange, SchemaSource};
pub use store::{MemoryStore, SessionId, StoreDriver};
pub use transaction::{BatchExecutor, BatchOptions, PreparedWrite, WriteOp, WriteResult};
