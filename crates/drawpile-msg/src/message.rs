//! Message and command types
//!
//! A [`Message`] is one entry of the ordered session stream: the context id of
//! the authoring user plus a [`Command`]. Commands are a closed sum type over
//! the protocol taxonomy. Type numbers 0-31 are control messages, 32-127 are
//! meta messages and 128-255 are canvas commands.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::blend::BlendMode;

/// Context id reserved for the server itself
pub const SERVER_CONTEXT: u8 = 0;

/// Highest context id that can be assigned to a user
pub const MAX_USER_CONTEXT: u8 = 254;

/// Layer identifier
///
/// The high byte is the context id of the creator and the low byte a
/// per-creator sequence number. Id 0 means "no layer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u16);

impl LayerId {
    /// The "no layer" id
    pub const NONE: Self = Self(0);

    /// Build an id from a creator context and a sequence number
    #[must_use]
    pub fn new(creator: u8, index: u8) -> Self {
        Self(u16::from(creator) << 8 | u16::from(index))
    }

    /// Context id of the user who created the layer
    #[must_use]
    pub fn creator(self) -> u8 {
        ((self.0 & 0xff00) >> 8) as u8
    }

    /// Per-creator sequence number
    #[must_use]
    pub fn index(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Whether this is the "no layer" id
    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Ordered permission level
///
/// A higher tier always satisfies a lower requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AccessTier {
    /// Anyone
    #[default]
    Guest = 0,
    /// Users logged in with a registered account
    Registered = 1,
    /// Session operators
    Operator = 2,
}

impl AccessTier {
    /// Wire value
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Guest),
            1 => Some(Self::Registered),
            2 => Some(Self::Operator),
            _ => None,
        }
    }

    /// Text name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Registered => "registered",
            Self::Operator => "operator",
        }
    }

    /// Parse a text name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "guest" => Some(Self::Guest),
            "registered" => Some(Self::Registered),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

/// Session features gated by an access tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Pixel commands (put image, fill)
    PutImage,
    /// Canvas resize
    Resize,
    /// Create, edit and delete any layer
    EditLayers,
    /// Create layers and edit the ones you created
    OwnLayers,
    /// Undo and redo
    Undo,
    /// Session metadata
    Metadata,
    /// Laser pointer
    Laser,
}

impl Feature {
    /// Number of features carried by `FeatureAccessLevels`
    pub const COUNT: usize = 7;

    /// All features in wire order
    pub const ALL: [Feature; Self::COUNT] = [
        Feature::PutImage,
        Feature::Resize,
        Feature::EditLayers,
        Feature::OwnLayers,
        Feature::Undo,
        Feature::Metadata,
        Feature::Laser,
    ];

    /// Tier a fresh session requires for this feature
    #[must_use]
    pub fn default_tier(self) -> AccessTier {
        match self {
            Self::Resize | Self::EditLayers | Self::Metadata => AccessTier::Operator,
            Self::PutImage | Self::OwnLayers | Self::Undo | Self::Laser => AccessTier::Guest,
        }
    }

    /// Text name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PutImage => "putimage",
            Self::Resize => "resize",
            Self::EditLayers => "editlayers",
            Self::OwnLayers => "ownlayers",
            Self::Undo => "undo",
            Self::Metadata => "metadata",
            Self::Laser => "laser",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Feature to tier map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureTiers(pub [AccessTier; Feature::COUNT]);

impl FeatureTiers {
    /// Tier required for a feature
    #[must_use]
    pub fn get(&self, feature: Feature) -> AccessTier {
        self.0[feature.index()]
    }

    /// Change the tier required for a feature
    pub fn set(&mut self, feature: Feature, tier: AccessTier) {
        self.0[feature.index()] = tier;
    }

    /// Iterate over (feature, tier) pairs in wire order
    pub fn iter(&self) -> impl Iterator<Item = (Feature, AccessTier)> + '_ {
        Feature::ALL.iter().map(|f| (*f, self.get(*f)))
    }
}

impl Default for FeatureTiers {
    fn default() -> Self {
        Self(Feature::ALL.map(Feature::default_tier))
    }
}

/// Why a connection is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DisconnectReason {
    /// Protocol or server error
    Error = 0,
    /// Kicked by an operator
    Kick = 1,
    /// Server is shutting down
    Shutdown = 2,
    /// Anything else
    Other = 3,
}

impl DisconnectReason {
    /// Parse a wire value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Error),
            1 => Some(Self::Kick),
            2 => Some(Self::Shutdown),
            3 => Some(Self::Other),
            _ => None,
        }
    }

    /// Text name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Kick => "kick",
            Self::Shutdown => "shutdown",
            Self::Other => "other",
        }
    }

    /// Parse a text name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Error, Self::Kick, Self::Shutdown, Self::Other]
            .into_iter()
            .find(|r| r.name() == name)
    }
}

/// `Join` flags
pub mod join_flags {
    /// Logged in with a registered account
    pub const AUTHENTICATED: u8 = 0x01;
    /// Server moderator
    pub const MODERATOR: u8 = 0x02;
    /// Bit/name table for the text form
    pub const NAMES: &[(u8, &str)] = &[(AUTHENTICATED, "auth"), (MODERATOR, "mod")];
}

/// `Chat` and `PrivateChat` flags
pub mod chat_flags {
    /// Not logged in the session history
    pub const BYPASS: u8 = 0x01;
    /// Shout (highlighted) message
    pub const SHOUT: u8 = 0x02;
    /// `/me` action
    pub const ACTION: u8 = 0x04;
    /// Pinned message
    pub const PIN: u8 = 0x08;
    /// Bit/name table for the text form
    pub const NAMES: &[(u8, &str)] = &[
        (BYPASS, "bypass"),
        (SHOUT, "shout"),
        (ACTION, "action"),
        (PIN, "pin"),
    ];
}

/// `LayerCreate` flags
pub mod create_flags {
    /// The new layer is a group
    pub const GROUP: u8 = 0x01;
    /// Insert as the topmost child of the target group
    pub const INTO: u8 = 0x02;
    /// Bit/name table for the text form
    pub const NAMES: &[(u8, &str)] = &[(GROUP, "group"), (INTO, "into")];
}

/// `LayerAttributes` flags
pub mod attr_flags {
    /// Hidden for users who opted out of censored content
    pub const CENSOR: u8 = 0x01;
    /// Excluded from animation frame changes
    pub const FIXED: u8 = 0x02;
    /// Group is composited in isolation
    pub const ISOLATED: u8 = 0x04;
    /// All attribute bits
    pub const ALL: u8 = CENSOR | FIXED | ISOLATED;
    /// Bit/name table for the text form
    pub const NAMES: &[(u8, &str)] = &[(CENSOR, "censor"), (FIXED, "fixed"), (ISOLATED, "isolated")];
}

/// One entry of a `LayerOrder` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerOrderEntry {
    /// Layer id
    pub id: LayerId,
    /// Number of direct children that follow (groups only)
    pub children: u16,
}

/// Command type numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum MessageType {
    ServerCommand = 0,
    Disconnect = 1,
    Ping = 2,
    Join = 32,
    Leave = 33,
    SessionOwner = 34,
    Chat = 35,
    PrivateChat = 38,
    Interval = 64,
    MovePointer = 66,
    Marker = 67,
    UserAcl = 68,
    LayerAcl = 69,
    FeatureAccessLevels = 70,
    DefaultLayer = 71,
    UndoPoint = 128,
    CanvasResize = 129,
    LayerCreate = 130,
    LayerAttributes = 131,
    LayerRetitle = 132,
    LayerOrder = 133,
    LayerDelete = 134,
    LayerVisibility = 135,
    PutImage = 136,
    FillRect = 137,
}

impl MessageType {
    /// Every known type, in wire order
    pub const ALL: [MessageType; 25] = [
        Self::ServerCommand,
        Self::Disconnect,
        Self::Ping,
        Self::Join,
        Self::Leave,
        Self::SessionOwner,
        Self::Chat,
        Self::PrivateChat,
        Self::Interval,
        Self::MovePointer,
        Self::Marker,
        Self::UserAcl,
        Self::LayerAcl,
        Self::FeatureAccessLevels,
        Self::DefaultLayer,
        Self::UndoPoint,
        Self::CanvasResize,
        Self::LayerCreate,
        Self::LayerAttributes,
        Self::LayerRetitle,
        Self::LayerOrder,
        Self::LayerDelete,
        Self::LayerVisibility,
        Self::PutImage,
        Self::FillRect,
    ];

    /// Wire value
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Look up a type by wire value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_u8() == value)
    }

    /// Name used by the text form
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ServerCommand => "servercommand",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::SessionOwner => "sessionowner",
            Self::Chat => "chat",
            Self::PrivateChat => "privatechat",
            Self::Interval => "interval",
            Self::MovePointer => "movepointer",
            Self::Marker => "marker",
            Self::UserAcl => "useracl",
            Self::LayerAcl => "layeracl",
            Self::FeatureAccessLevels => "featureaccess",
            Self::DefaultLayer => "defaultlayer",
            Self::UndoPoint => "undopoint",
            Self::CanvasResize => "resize",
            Self::LayerCreate => "newlayer",
            Self::LayerAttributes => "layerattr",
            Self::LayerRetitle => "retitlelayer",
            Self::LayerOrder => "layerorder",
            Self::LayerDelete => "deletelayer",
            Self::LayerVisibility => "layervisibility",
            Self::PutImage => "putimage",
            Self::FillRect => "fillrect",
        }
    }

    /// Look up a type by text name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Control messages are handled by the server and never logged
    #[must_use]
    pub fn is_control(self) -> bool {
        self.as_u8() < 32
    }

    /// Meta messages carry session metadata, chat and ACL changes
    #[must_use]
    pub fn is_meta(self) -> bool {
        (32..128).contains(&self.as_u8())
    }

    /// Canvas commands mutate the drawing
    #[must_use]
    pub fn is_canvas(self) -> bool {
        self.as_u8() >= 128
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A protocol command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// JSON request or reply exchanged with the server
    ServerCommand {
        /// UTF-8 JSON document
        json: String,
    },
    /// Connection is being closed
    Disconnect {
        /// Reason code
        reason: DisconnectReason,
        /// Human readable explanation
        message: String,
    },
    /// Keepalive
    Ping {
        /// Whether this is the reply
        is_pong: bool,
    },
    /// A user joined the session
    Join {
        /// See [`join_flags`]
        flags: u8,
        /// Display name, at most 255 bytes
        name: String,
        /// Avatar image
        avatar: Vec<u8>,
    },
    /// A user left the session
    Leave,
    /// Full list of session operators
    SessionOwner {
        /// Operator context ids
        users: Vec<u8>,
    },
    /// Public chat message
    Chat {
        /// See [`chat_flags`]
        flags: u8,
        /// Message text
        message: String,
    },
    /// Chat message to one user
    PrivateChat {
        /// Recipient context id
        target: u8,
        /// See [`chat_flags`]
        flags: u8,
        /// Message text
        message: String,
    },
    /// Recording playback pause
    Interval {
        /// Pause length in milliseconds
        msecs: u16,
    },
    /// Laser/cursor position
    MovePointer {
        /// X coordinate
        x: i32,
        /// Y coordinate
        y: i32,
    },
    /// Recording bookmark
    Marker {
        /// Marker text
        text: String,
    },
    /// Full list of locked users
    UserAcl {
        /// Locked context ids
        users: Vec<u8>,
    },
    /// Per-layer access control entry, replaces the previous one
    LayerAcl {
        /// Layer
        id: LayerId,
        /// Nobody may draw on the layer
        locked: bool,
        /// Minimum tier required to draw
        tier: AccessTier,
        /// When non-empty, only these users may draw
        exclusive: Vec<u8>,
    },
    /// Session feature map
    FeatureAccessLevels {
        /// Tier per feature
        tiers: FeatureTiers,
    },
    /// Layer selected for new users
    DefaultLayer {
        /// Layer
        id: LayerId,
    },
    /// Undo boundary
    UndoPoint,
    /// Grow or shrink the canvas on each side
    CanvasResize {
        /// Pixels added at the top
        top: i32,
        /// Pixels added on the right
        right: i32,
        /// Pixels added at the bottom
        bottom: i32,
        /// Pixels added on the left
        left: i32,
    },
    /// Create a layer or group
    LayerCreate {
        /// New layer id
        id: LayerId,
        /// Layer whose content is copied, or none
        source: LayerId,
        /// Placement target, or none for the top of the root
        target: LayerId,
        /// Initial fill color (ARGB)
        fill: u32,
        /// See [`create_flags`]
        flags: u8,
        /// Title
        title: String,
    },
    /// Change layer attributes
    LayerAttributes {
        /// Layer
        id: LayerId,
        /// New flag values, see [`attr_flags`]
        flags: u8,
        /// Which flag bits to change
        mask: u8,
        /// Opacity 0-255
        opacity: u8,
        /// Layer blend mode
        blend: BlendMode,
    },
    /// Change a layer title
    LayerRetitle {
        /// Layer
        id: LayerId,
        /// New title
        title: String,
    },
    /// Full new layer ordering
    LayerOrder {
        /// Depth-first, bottom-to-top entries
        entries: Vec<LayerOrderEntry>,
    },
    /// Delete a layer, optionally merging it into the layer below
    LayerDelete {
        /// Layer to delete
        id: LayerId,
        /// Expected sibling below to merge into, or none
        merge_to: LayerId,
    },
    /// Local visibility toggle, never sent to the server
    LayerVisibility {
        /// Layer
        id: LayerId,
        /// Visible or hidden
        visible: bool,
    },
    /// Draw an image onto a layer
    PutImage {
        /// Target layer
        layer: LayerId,
        /// Blend mode
        mode: BlendMode,
        /// Left edge
        x: u32,
        /// Top edge
        y: u32,
        /// Width
        w: u32,
        /// Height
        h: u32,
        /// zlib compressed ARGB pixels
        image: Vec<u8>,
    },
    /// Fill a rectangle with a solid color
    FillRect {
        /// Target layer
        layer: LayerId,
        /// Blend mode
        mode: BlendMode,
        /// Left edge
        x: u32,
        /// Top edge
        y: u32,
        /// Width
        w: u32,
        /// Height
        h: u32,
        /// ARGB color
        color: u32,
    },
}

impl Command {
    /// Type number of this command
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ServerCommand { .. } => MessageType::ServerCommand,
            Self::Disconnect { .. } => MessageType::Disconnect,
            Self::Ping { .. } => MessageType::Ping,
            Self::Join { .. } => MessageType::Join,
            Self::Leave => MessageType::Leave,
            Self::SessionOwner { .. } => MessageType::SessionOwner,
            Self::Chat { .. } => MessageType::Chat,
            Self::PrivateChat { .. } => MessageType::PrivateChat,
            Self::Interval { .. } => MessageType::Interval,
            Self::MovePointer { .. } => MessageType::MovePointer,
            Self::Marker { .. } => MessageType::Marker,
            Self::UserAcl { .. } => MessageType::UserAcl,
            Self::LayerAcl { .. } => MessageType::LayerAcl,
            Self::FeatureAccessLevels { .. } => MessageType::FeatureAccessLevels,
            Self::DefaultLayer { .. } => MessageType::DefaultLayer,
            Self::UndoPoint => MessageType::UndoPoint,
            Self::CanvasResize { .. } => MessageType::CanvasResize,
            Self::LayerCreate { .. } => MessageType::LayerCreate,
            Self::LayerAttributes { .. } => MessageType::LayerAttributes,
            Self::LayerRetitle { .. } => MessageType::LayerRetitle,
            Self::LayerOrder { .. } => MessageType::LayerOrder,
            Self::LayerDelete { .. } => MessageType::LayerDelete,
            Self::LayerVisibility { .. } => MessageType::LayerVisibility,
            Self::PutImage { .. } => MessageType::PutImage,
            Self::FillRect { .. } => MessageType::FillRect,
        }
    }

    /// Whether the command only affects the local view
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        matches!(self, Self::LayerVisibility { .. })
    }

    /// Whether the command mutates the drawing
    #[must_use]
    pub fn is_canvas(&self) -> bool {
        self.message_type().is_canvas()
    }

    /// The layer a pixel command draws on
    #[must_use]
    pub fn pixel_target(&self) -> Option<LayerId> {
        match self {
            Self::PutImage { layer, .. } | Self::FillRect { layer, .. } => Some(*layer),
            _ => None,
        }
    }
}

/// A command together with its author
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Authoring context id, 0 for the server
    pub context_id: u8,
    /// The command
    pub command: Command,
}

impl Message {
    /// Create a message
    #[must_use]
    pub fn new(context_id: u8, command: Command) -> Self {
        Self {
            context_id,
            command,
        }
    }

    /// Create a server-authored message
    #[must_use]
    pub fn server(command: Command) -> Self {
        Self::new(SERVER_CONTEXT, command)
    }

    /// Type number of the command
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.command.message_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_id_parts() {
        let id = LayerId::new(3, 7);
        assert_eq!(id.0, 0x0307);
        assert_eq!(id.creator(), 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.to_string(), "0x0307");
        assert!(LayerId::NONE.is_none());
    }

    #[test]
    fn test_tiers_are_ordered() {
        assert!(AccessTier::Guest < AccessTier::Registered);
        assert!(AccessTier::Registered < AccessTier::Operator);
        assert_eq!(AccessTier::from_name("registered"), Some(AccessTier::Registered));
        assert_eq!(AccessTier::from_u8(3), None);
    }

    #[test]
    fn test_default_feature_tiers() {
        let tiers = FeatureTiers::default();
        assert_eq!(tiers.get(Feature::PutImage), AccessTier::Guest);
        assert_eq!(tiers.get(Feature::Resize), AccessTier::Operator);
        assert_eq!(tiers.get(Feature::EditLayers), AccessTier::Operator);
        assert_eq!(tiers.get(Feature::OwnLayers), AccessTier::Guest);
        assert_eq!(tiers.get(Feature::Metadata), AccessTier::Operator);
        assert_eq!(tiers.iter().count(), Feature::COUNT);
    }

    #[test]
    fn test_message_type_categories() {
        assert!(MessageType::Ping.is_control());
        assert!(MessageType::LayerAcl.is_meta());
        assert!(MessageType::UndoPoint.is_canvas());
        assert_eq!(MessageType::from_u8(36), None);
        assert_eq!(MessageType::from_name("newlayer"), Some(MessageType::LayerCreate));
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_u8(t.as_u8()), Some(t));
            assert_eq!(MessageType::from_name(t.name()), Some(t));
        }
    }

    #[test]
    fn test_local_only() {
        let cmd = Command::LayerVisibility {
            id: LayerId(0x0101),
            visible: false,
        };
        assert!(cmd.is_local_only());
        assert!(!Command::UndoPoint.is_local_only());
        assert_eq!(
            Command::FillRect {
                layer: LayerId(0x0101),
                mode: BlendMode::Normal,
                x: 0,
                y: 0,
                w: 1,
                h: 1,
                color: 0xff00_0000
            }
            .pixel_target(),
            Some(LayerId(0x0101))
        );
    }
}
