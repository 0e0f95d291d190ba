//! Error types for drawpile-canvas
//!
//! Structural errors ([`CanvasError`]) and permission errors ([`AclError`])
//! are reported to the author of a rejected command as `conflict` and
//! `permission` respectively. Region fill has its own [`FillError`].

use drawpile_msg::{Feature, LayerId, MessageType};
use thiserror::Error;

/// Structural error while applying a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanvasError {
    /// Layer id 0 was used for a new layer
    #[error("layer id 0 is reserved")]
    ReservedLayerId,

    /// A layer with this id already exists
    #[error("layer {0} already exists")]
    LayerExists(LayerId),

    /// Referenced layer does not exist
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    /// Operation needs a group
    #[error("layer {0} is not a group")]
    NotAGroup(LayerId),

    /// Operation needs a non-group layer
    #[error("layer {0} is a group")]
    IsAGroup(LayerId),

    /// The sibling below is not the expected merge target
    #[error("cannot merge {layer} into {expected}: layer below is {found}")]
    MergeTargetMoved {
        /// Layer being merged
        layer: LayerId,
        /// Merge target named by the command
        expected: LayerId,
        /// Sibling actually below, 0 when there is none
        found: LayerId,
    },

    /// Merge target is locked
    #[error("cannot merge into locked layer {0}")]
    MergeTargetLocked(LayerId),

    /// Reorder list does not describe the current layer set
    #[error("invalid layer order: {0}")]
    InvalidOrder(String),

    /// Resize would produce an unsupported canvas size
    #[error("invalid canvas size {width}x{height}")]
    InvalidSize {
        /// Resulting width
        width: i64,
        /// Resulting height
        height: i64,
    },
}

impl CanvasError {
    /// Get error code for rejection replies
    #[must_use]
    pub fn code(&self) -> &'static str {
        "conflict"
    }
}

/// Permission error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    /// The user is locked
    #[error("user {0} is locked")]
    UserLocked(u8),

    /// Only the server may send this message type
    #[error("{0} may only be sent by the server")]
    ServerOnly(MessageType),

    /// The user's tier is below the feature's tier
    #[error("feature {} not permitted", .0.name())]
    MissingFeature(Feature),

    /// Session operators only
    #[error("operator privileges required")]
    NotOperator,

    /// The layer id belongs to another user's namespace
    #[error("layer {0} is not owned by the user")]
    NotOwner(LayerId),

    /// The layer is locked
    #[error("layer {0} is locked")]
    LayerLocked(LayerId),

    /// The layer is restricted to an exclusive user list
    #[error("layer {0} is restricted to other users")]
    NotExclusiveUser(LayerId),

    /// The user's tier is below the layer's tier
    #[error("layer {0} requires a higher access tier")]
    TierTooLow(LayerId),
}

impl AclError {
    /// Get error code for rejection replies
    #[must_use]
    pub fn code(&self) -> &'static str {
        "permission"
    }
}

/// Region fill error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FillError {
    /// Seed outside the canvas
    #[error("fill origin {x},{y} is outside the canvas")]
    OutOfBounds {
        /// Seed x
        x: i64,
        /// Seed y
        y: i64,
    },

    /// Selected layer does not exist
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    /// Selected layer is a group
    #[error("cannot fill group {0}")]
    IsAGroup(LayerId),

    /// Filled region exceeds the size limit
    #[error("fill region exceeds {limit} pixels")]
    TooLarge {
        /// Configured pixel limit
        limit: usize,
    },

    /// Result could not be packed into commands
    #[error("fill result encoding failed: {0}")]
    Encoding(String),
}

/// Result type alias for canvas operations
pub type Result<T> = std::result::Result<T, CanvasError>;
