//! GraphTTL MemGraph - In-Memory Graph Store
//!
//! A small concurrent graph implementing [`graphttl_core::EntityStore`]:
//! - Vertices with an optional time-to-live
//! - Outgoing arcs with their own time-to-live
//! - Reference counted ownership shares
//! - Non-blocking per-vertex write locks
//! - Readonly mode and injectable access faults for failure testing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod graph;
pub mod vertex;

pub use clock::Clock;
pub use error::{GraphError, Result};
pub use graph::{GraphMode, MemGraph, ShareStats};
pub use vertex::{Edge, Vertex, VertexWriteGuard};
