//! # Reactive element layer
//!
//! Authors describe workflows as [`Element`] trees: plain node descriptions,
//! text, fragments, and component closures that are re-invoked every frame
//! with the current [`RenderScope`]. The reconciler materializes element
//! output into the retained [`crate::tree::Tree`] through host operations,
//! and the [`StateHandle`] store carries results from node callbacks into
//! the next frame's render.

/// Element values, builders, and the `dsl` constructor namespace.
pub mod element;

/// The workflow state store with queued updates and cooperative flush.
pub mod state;

/// Positional reconciliation of elements into the retained tree.
pub mod reconcile;

pub use element::{dsl, ComponentFn, Element, ElementBuilder, RenderScope};
pub use reconcile::{render, should_set_text_content, unmount};
pub use state::{StateHandle, StateSnapshot};
