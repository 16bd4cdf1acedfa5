//! # Knowledge Graph Model
//!
//! Plain DTOs that cross every boundary: loader ↔ extractor ↔ schema ↔
//! store ↔ query ↔ user.
//!
//! This module is pure data with no I/O or async.

pub mod document;
pub mod entity;
pub mod path;
pub mod property_map;
pub mod relation;
pub mod span;
pub mod value;

pub use document::{Checksum, Document, DocumentId, DocumentStatus, SourceFormat};
pub use entity::{Entity, EntityId, Provenance, normalize_label};
pub use path::{Path, Subgraph};
pub use property_map::PropertyMap;
pub use relation::{Direction, Relation, RelationId};
pub use span::{SpanKind, SpanRef, TextSpan};
pub use value::Value;
