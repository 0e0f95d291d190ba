//! Drawpile Canvas - replicated canvas state
//!
//! This crate holds the state every participant derives from the command
//! stream:
//! - Tree: layer tree in nested-set encoding, rebuilt and swapped atomically
//! - Acl: user tiers, feature tiers and per-layer access entries
//! - State: `CanvasState::apply` and the catch-up `snapshot`
//! - Fill: flood fill over a frozen layer snapshot, producing `PutImage` commands
//!
//! Pixel compositing belongs to the paint engine; this crate validates pixel
//! commands structurally and tracks everything else.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acl;
pub mod error;
pub mod fill;
pub mod state;
pub mod tree;

// Re-export main types
pub use acl::{AclState, LayerAcl};
pub use error::{AclError, CanvasError, FillError, Result};
pub use fill::{flood_fill, FillParams, FillResult, FillSelector, FillSource, LayerImage};
pub use state::{CanvasState, CanvasSummary, MAX_CANVAS_SIZE};
pub use tree::{Layer, LayerTree};
