//! Drawpile Msg - protocol message codec
//!
//! This crate defines the command stream shared by the server, recordings and
//! drawing clients:
//! - Message: the `Command` sum type and its supporting ids, tiers and flags
//! - Codec: binary wire form with bounds-checked decoding
//! - Text: human-readable form used by text recordings
//! - Protocol: JSON requests and replies carried by `ServerCommand`
//! - SessionUrl: `drawpile://` session addresses
//!
//! ## Usage
//!
//! ```
//! use drawpile_msg::{decode, encode, Command, LayerId, Message};
//!
//! let message = Message::new(1, Command::DefaultLayer { id: LayerId(0x0101) });
//! let frame = encode(&message).unwrap();
//! assert_eq!(decode(&frame).unwrap(), message);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blend;
pub mod codec;
pub mod error;
pub mod message;
pub mod protocol;
pub mod session_url;
pub mod text;

// Re-export main types
pub use blend::BlendMode;
pub use codec::{decode, decode_stream, encode, frame_len, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use error::{CodecError, Result, TextError, UrlError};
pub use message::{
    attr_flags, chat_flags, create_flags, join_flags, AccessTier, Command, DisconnectReason,
    Feature, FeatureTiers, LayerId, LayerOrderEntry, Message, MessageType, MAX_USER_CONTEXT,
    SERVER_CONTEXT,
};
pub use protocol::{ClientRequest, ServerReply};
pub use session_url::{SessionUrl, DEFAULT_PORT};
pub use text::{parse_header, parse_text, write_header, write_message, write_messages};
