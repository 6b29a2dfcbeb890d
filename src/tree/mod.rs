//! # Node model and plan projection
//!
//! The rendered workflow graph: an arena-indexed tree of [`Node`] records
//! with ordered props, the host mutation operations the reconciler drives,
//! stable per-sibling-type node paths, content hashing for idempotent
//! re-execution, and the XML plan serializer.
//!
//! ## Core pieces
//!
//! - **[`Tree`] / [`Node`] / [`NodeId`]**: the arena. Parent links are
//!   indices, so ancestor walks are cheap and the graph cannot form
//!   reference cycles.
//! - **Host ops** (`host`): create/append/insert/remove/commit primitives
//!   with the containment invariant enforced on every attach.
//! - **Paths** (`path`): `ROOT/kind[i]` identity with per-sibling-type
//!   indexing; the key space of the execution store.
//! - **Hashing** (`hash`): SHA-256 content fingerprints over kind, public
//!   props, and child text/structure.
//! - **XML** (`xml`): the deterministic plan serialization used for
//!   previews and agent prompts.

/// Node records, prop values, and the arena tree.
pub mod node;

/// Host mutation operations driven by the reconciler.
pub mod host;

/// Node path generation and resolution.
pub mod path;

/// Content hashing for idempotent re-execution.
pub mod hash;

/// XML plan serialization.
pub mod xml;

pub use hash::content_hash;
pub use host::UpdatePayload;
pub use node::{
    ExecutionState, ExecutionStatus, Node, NodeId, NodeKind, PropCallback, PropValue, Props, Tree,
};
pub use path::{generate_node_paths, node_path, resolve_path};
pub use xml::{serialize, serialize_with_paths};
