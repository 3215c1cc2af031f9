//! Tessera Core: value model, class schemas, filters, updates and include paths.

pub mod context;
pub mod error;
pub mod include;
pub mod query;
pub mod schema;
pub mod types;
pub mod update;

pub use context::{Principal, RequestContext};
pub use error::{EngineError, EngineResult};
pub use include::{IncludeEdge, IncludeTree};
pub use query::{CompareOp, Constraint, Filter, FindOptions, GeoRegion, SortKey};
pub use schema::{ClassSchema, FieldType, IndexDescriptor};
pub use types::{Acl, AclAccess, Document, FileRef, GeoPoint, Pointer, RawValue, Value};
pub use update::{UpdateOp, UpdateOperatorMap};
