//! Binary wire codec
//!
//! Every frame is a 4 byte header (payload length `u16` big-endian, type
//! `u8`, context id `u8`) followed by the payload. Multi-byte integers are
//! big-endian. Variable-length fields either carry an explicit length or run
//! to the end of the payload, so each type has exactly one layout.

use bytes::{Buf, BufMut};

use crate::blend::BlendMode;
use crate::error::{CodecError, Result};
use crate::message::{
    AccessTier, Command, DisconnectReason, Feature, FeatureTiers, LayerId, LayerOrderEntry,
    Message, MessageType,
};

/// Frame header length
pub const HEADER_LEN: usize = 4;

/// Largest payload the length field can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Bit of the `LayerAcl` flags byte that marks the layer as locked
pub const ACL_LOCKED_BIT: u8 = 0x80;

/// Fixed prefix of a `PutImage` payload before the image data
pub const PUT_IMAGE_HEADER_LEN: usize = 19;

/// Encode a message into a complete frame
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let kind = message.message_type();
    let mut payload = Vec::new();
    write_payload(&message.command, &mut payload)?;

    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLong {
            kind: kind.name(),
            len: payload.len(),
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.put_u16(payload.len() as u16);
    frame.put_u8(kind.as_u8());
    frame.put_u8(message.context_id);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode exactly one frame
pub fn decode(buf: &[u8]) -> Result<Message> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }

    let expected = HEADER_LEN + usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    if buf.len() < expected {
        return Err(CodecError::Truncated {
            needed: expected,
            available: buf.len(),
        });
    }
    if buf.len() > expected {
        return Err(CodecError::TrailingBytes {
            expected,
            actual: buf.len(),
        });
    }

    let kind = MessageType::from_u8(buf[2]).ok_or(CodecError::UnknownType(buf[2]))?;
    let command = read_payload(kind, &buf[HEADER_LEN..])?;
    Ok(Message::new(buf[3], command))
}

/// Length of the first frame in `buf`, if it is complete
#[must_use]
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len = HEADER_LEN + usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    (buf.len() >= len).then_some(len)
}

/// Split a buffer of concatenated frames
///
/// Returns the decoded messages and the number of bytes consumed. Decoding
/// stops at an incomplete trailing frame, which is left unconsumed. A
/// complete frame that fails to decode is an error.
pub fn decode_stream(buf: &[u8]) -> Result<(Vec<Message>, usize)> {
    let mut messages = Vec::new();
    let mut consumed = 0;
    while let Some(len) = frame_len(&buf[consumed..]) {
        messages.push(decode(&buf[consumed..consumed + len])?);
        consumed += len;
    }
    Ok((messages, consumed))
}

fn put_layer(out: &mut Vec<u8>, id: LayerId) {
    out.put_u16(id.0);
}

fn put_rect(out: &mut Vec<u8>, x: u32, y: u32, w: u32, h: u32) {
    out.put_u32(x);
    out.put_u32(y);
    out.put_u32(w);
    out.put_u32(h);
}

fn write_payload(command: &Command, out: &mut Vec<u8>) -> Result<()> {
    match command {
        Command::ServerCommand { json } => out.extend_from_slice(json.as_bytes()),
        Command::Disconnect { reason, message } => {
            out.put_u8(*reason as u8);
            out.extend_from_slice(message.as_bytes());
        }
        Command::Ping { is_pong } => out.put_u8(u8::from(*is_pong)),
        Command::Join {
            flags,
            name,
            avatar,
        } => {
            let name_len = u8::try_from(name.len())
                .map_err(|_| CodecError::invalid("join", "name longer than 255 bytes"))?;
            out.put_u8(*flags);
            out.put_u8(name_len);
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(avatar);
        }
        Command::Leave | Command::UndoPoint => {}
        Command::SessionOwner { users } | Command::UserAcl { users } => {
            out.extend_from_slice(users);
        }
        Command::Chat { flags, message } => {
            out.put_u8(*flags);
            out.extend_from_slice(message.as_bytes());
        }
        Command::PrivateChat {
            target,
            flags,
            message,
        } => {
            out.put_u8(*target);
            out.put_u8(*flags);
            out.extend_from_slice(message.as_bytes());
        }
        Command::Interval { msecs } => out.put_u16(*msecs),
        Command::MovePointer { x, y } => {
            out.put_i32(*x);
            out.put_i32(*y);
        }
        Command::Marker { text } => out.extend_from_slice(text.as_bytes()),
        Command::LayerAcl {
            id,
            locked,
            tier,
            exclusive,
        } => {
            put_layer(out, *id);
            let locked = if *locked { ACL_LOCKED_BIT } else { 0 };
            out.put_u8(locked | tier.as_u8());
            out.extend_from_slice(exclusive);
        }
        Command::FeatureAccessLevels { tiers } => {
            for (_, tier) in tiers.iter() {
                out.put_u8(tier.as_u8());
            }
        }
        Command::DefaultLayer { id } => put_layer(out, *id),
        Command::CanvasResize {
            top,
            right,
            bottom,
            left,
        } => {
            out.put_i32(*top);
            out.put_i32(*right);
            out.put_i32(*bottom);
            out.put_i32(*left);
        }
        Command::LayerCreate {
            id,
            source,
            target,
            fill,
            flags,
            title,
        } => {
            put_layer(out, *id);
            put_layer(out, *source);
            put_layer(out, *target);
            out.put_u32(*fill);
            out.put_u8(*flags);
            out.extend_from_slice(title.as_bytes());
        }
        Command::LayerAttributes {
            id,
            flags,
            mask,
            opacity,
            blend,
        } => {
            put_layer(out, *id);
            out.put_u8(*flags);
            out.put_u8(*mask);
            out.put_u8(*opacity);
            out.put_u8(blend.as_u8());
        }
        Command::LayerRetitle { id, title } => {
            put_layer(out, *id);
            out.extend_from_slice(title.as_bytes());
        }
        Command::LayerOrder { entries } => {
            for entry in entries {
                put_layer(out, entry.id);
                out.put_u16(entry.children);
            }
        }
        Command::LayerDelete { id, merge_to } => {
            put_layer(out, *id);
            put_layer(out, *merge_to);
        }
        Command::LayerVisibility { id, visible } => {
            put_layer(out, *id);
            out.put_u8(u8::from(*visible));
        }
        Command::PutImage {
            layer,
            mode,
            x,
            y,
            w,
            h,
            image,
        } => {
            put_layer(out, *layer);
            out.put_u8(mode.as_u8());
            put_rect(out, *x, *y, *w, *h);
            out.extend_from_slice(image);
        }
        Command::FillRect {
            layer,
            mode,
            x,
            y,
            w,
            h,
            color,
        } => {
            put_layer(out, *layer);
            out.put_u8(mode.as_u8());
            put_rect(out, *x, *y, *w, *h);
            out.put_u32(*color);
        }
    }
    Ok(())
}

/// Bounds-checked payload cursor
struct Payload<'a> {
    kind: &'static str,
    buf: &'a [u8],
}

impl<'a> Payload<'a> {
    fn new(kind: MessageType, buf: &'a [u8]) -> Self {
        Self {
            kind: kind.name(),
            buf,
        }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(CodecError::invalid(
                self.kind,
                format!("expected {n} more bytes, have {}", self.buf.remaining()),
            ));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn layer(&mut self) -> Result<LayerId> {
        self.u16().map(LayerId)
    }

    fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::invalid(self.kind, format!("bad boolean {other}"))),
        }
    }

    fn blend(&mut self) -> Result<BlendMode> {
        let value = self.u8()?;
        BlendMode::from_u8(value)
            .ok_or_else(|| CodecError::invalid(self.kind, format!("unknown blend mode {value}")))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head.to_vec())
    }

    fn rest(&mut self) -> Vec<u8> {
        let rest = self.buf.to_vec();
        self.buf = &[];
        rest
    }

    fn rest_str(&mut self) -> Result<String> {
        let rest = self.rest();
        String::from_utf8(rest).map_err(|_| CodecError::invalid(self.kind, "invalid UTF-8"))
    }

    fn finish<T>(self, value: T) -> Result<T> {
        if self.buf.has_remaining() {
            return Err(CodecError::invalid(
                self.kind,
                format!("{} unexpected trailing bytes", self.buf.remaining()),
            ));
        }
        Ok(value)
    }
}

fn read_payload(kind: MessageType, buf: &[u8]) -> Result<Command> {
    let mut p = Payload::new(kind, buf);
    let command = match kind {
        MessageType::ServerCommand => Command::ServerCommand {
            json: p.rest_str()?,
        },
        MessageType::Disconnect => {
            let value = p.u8()?;
            let reason = DisconnectReason::from_u8(value)
                .ok_or_else(|| CodecError::invalid(p.kind, format!("unknown reason {value}")))?;
            Command::Disconnect {
                reason,
                message: p.rest_str()?,
            }
        }
        MessageType::Ping => Command::Ping { is_pong: p.bool()? },
        MessageType::Join => {
            let flags = p.u8()?;
            let name_len = usize::from(p.u8()?);
            let name = String::from_utf8(p.bytes(name_len)?)
                .map_err(|_| CodecError::invalid(p.kind, "invalid UTF-8 in name"))?;
            Command::Join {
                flags,
                name,
                avatar: p.rest(),
            }
        }
        MessageType::Leave => Command::Leave,
        MessageType::SessionOwner => Command::SessionOwner { users: p.rest() },
        MessageType::Chat => Command::Chat {
            flags: p.u8()?,
            message: p.rest_str()?,
        },
        MessageType::PrivateChat => Command::PrivateChat {
            target: p.u8()?,
            flags: p.u8()?,
            message: p.rest_str()?,
        },
        MessageType::Interval => Command::Interval { msecs: p.u16()? },
        MessageType::MovePointer => Command::MovePointer {
            x: p.i32()?,
            y: p.i32()?,
        },
        MessageType::Marker => Command::Marker {
            text: p.rest_str()?,
        },
        MessageType::UserAcl => Command::UserAcl { users: p.rest() },
        MessageType::LayerAcl => {
            let id = p.layer()?;
            let flags = p.u8()?;
            let tier = AccessTier::from_u8(flags & !ACL_LOCKED_BIT).ok_or_else(|| {
                CodecError::invalid(p.kind, format!("unknown tier in flags {flags:#04x}"))
            })?;
            Command::LayerAcl {
                id,
                locked: flags & ACL_LOCKED_BIT != 0,
                tier,
                exclusive: p.rest(),
            }
        }
        MessageType::FeatureAccessLevels => {
            if buf.len() != Feature::COUNT {
                return Err(CodecError::invalid(
                    p.kind,
                    format!("expected {} tiers, got {}", Feature::COUNT, buf.len()),
                ));
            }
            let mut tiers = FeatureTiers::default();
            for feature in Feature::ALL {
                let value = p.u8()?;
                let tier = AccessTier::from_u8(value)
                    .ok_or_else(|| CodecError::invalid(p.kind, format!("unknown tier {value}")))?;
                tiers.set(feature, tier);
            }
            Command::FeatureAccessLevels { tiers }
        }
        MessageType::DefaultLayer => Command::DefaultLayer { id: p.layer()? },
        MessageType::UndoPoint => Command::UndoPoint,
        MessageType::CanvasResize => Command::CanvasResize {
            top: p.i32()?,
            right: p.i32()?,
            bottom: p.i32()?,
            left: p.i32()?,
        },
        MessageType::LayerCreate => Command::LayerCreate {
            id: p.layer()?,
            source: p.layer()?,
            target: p.layer()?,
            fill: p.u32()?,
            flags: p.u8()?,
            title: p.rest_str()?,
        },
        MessageType::LayerAttributes => Command::LayerAttributes {
            id: p.layer()?,
            flags: p.u8()?,
            mask: p.u8()?,
            opacity: p.u8()?,
            blend: p.blend()?,
        },
        MessageType::LayerRetitle => Command::LayerRetitle {
            id: p.layer()?,
            title: p.rest_str()?,
        },
        MessageType::LayerOrder => {
            if buf.len() % 4 != 0 {
                return Err(CodecError::invalid(
                    p.kind,
                    format!("length {} is not a multiple of 4", buf.len()),
                ));
            }
            let mut entries = Vec::with_capacity(buf.len() / 4);
            while p.buf.has_remaining() {
                entries.push(LayerOrderEntry {
                    id: p.layer()?,
                    children: p.u16()?,
                });
            }
            Command::LayerOrder { entries }
        }
        MessageType::LayerDelete => Command::LayerDelete {
            id: p.layer()?,
            merge_to: p.layer()?,
        },
        MessageType::LayerVisibility => Command::LayerVisibility {
            id: p.layer()?,
            visible: p.bool()?,
        },
        MessageType::PutImage => Command::PutImage {
            layer: p.layer()?,
            mode: p.blend()?,
            x: p.u32()?,
            y: p.u32()?,
            w: p.u32()?,
            h: p.u32()?,
            image: p.rest(),
        },
        MessageType::FillRect => Command::FillRect {
            layer: p.layer()?,
            mode: p.blend()?,
            x: p.u32()?,
            y: p.u32()?,
            w: p.u32()?,
            h: p.u32()?,
            color: p.u32()?,
        },
    };
    p.finish(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{attr_flags, chat_flags, create_flags, join_flags};

    fn roundtrip(message: Message) {
        let frame = encode(&message).unwrap();
        assert_eq!(decode(&frame).unwrap(), message);
    }

    fn every_variant() -> Vec<Command> {
        vec![
            Command::ServerCommand {
                json: r#"{"cmd":"login"}"#.to_string(),
            },
            Command::Disconnect {
                reason: DisconnectReason::Kick,
                message: "bye".to_string(),
            },
            Command::Ping { is_pong: true },
            Command::Join {
                flags: join_flags::AUTHENTICATED,
                name: "alice".to_string(),
                avatar: vec![1, 2, 3],
            },
            Command::Leave,
            Command::SessionOwner { users: vec![1, 4] },
            Command::Chat {
                flags: chat_flags::SHOUT,
                message: "hello there".to_string(),
            },
            Command::PrivateChat {
                target: 2,
                flags: 0,
                message: "psst".to_string(),
            },
            Command::Interval { msecs: 1500 },
            Command::MovePointer { x: -5, y: 900 },
            Command::Marker {
                text: "chapter 1".to_string(),
            },
            Command::UserAcl { users: vec![3] },
            Command::LayerAcl {
                id: LayerId(0x0101),
                locked: true,
                tier: AccessTier::Operator,
                exclusive: vec![1, 2],
            },
            Command::FeatureAccessLevels {
                tiers: FeatureTiers::default(),
            },
            Command::DefaultLayer {
                id: LayerId(0x0102),
            },
            Command::UndoPoint,
            Command::CanvasResize {
                top: 10,
                right: -20,
                bottom: 0,
                left: 64,
            },
            Command::LayerCreate {
                id: LayerId(0x0103),
                source: LayerId::NONE,
                target: LayerId(0x0102),
                fill: 0xffff_ffff,
                flags: create_flags::GROUP | create_flags::INTO,
                title: "Sketch".to_string(),
            },
            Command::LayerAttributes {
                id: LayerId(0x0103),
                flags: attr_flags::CENSOR,
                mask: attr_flags::ALL,
                opacity: 128,
                blend: BlendMode::Multiply,
            },
            Command::LayerRetitle {
                id: LayerId(0x0103),
                title: "Ink".to_string(),
            },
            Command::LayerOrder {
                entries: vec![
                    LayerOrderEntry {
                        id: LayerId(0x0102),
                        children: 1,
                    },
                    LayerOrderEntry {
                        id: LayerId(0x0103),
                        children: 0,
                    },
                ],
            },
            Command::LayerDelete {
                id: LayerId(0x0103),
                merge_to: LayerId(0x0101),
            },
            Command::LayerVisibility {
                id: LayerId(0x0101),
                visible: false,
            },
            Command::PutImage {
                layer: LayerId(0x0101),
                mode: BlendMode::Normal,
                x: 1,
                y: 2,
                w: 3,
                h: 4,
                image: vec![0x78, 0x9c, 0x01],
            },
            Command::FillRect {
                layer: LayerId(0x0101),
                mode: BlendMode::Replace,
                x: 0,
                y: 0,
                w: 100,
                h: 50,
                color: 0x80ff_0000,
            },
        ]
    }

    #[test]
    fn test_roundtrip_every_variant() {
        let commands = every_variant();
        assert_eq!(commands.len(), MessageType::ALL.len());
        for command in commands {
            roundtrip(Message::new(7, command));
        }
    }

    #[test]
    fn test_roundtrip_empty_payloads() {
        for command in [
            Command::Leave,
            Command::UndoPoint,
            Command::ServerCommand {
                json: String::new(),
            },
            Command::SessionOwner { users: vec![] },
            Command::LayerOrder { entries: vec![] },
        ] {
            let frame = encode(&Message::new(1, command.clone())).unwrap();
            assert_eq!(frame.len(), HEADER_LEN);
            roundtrip(Message::new(1, command));
        }
    }

    #[test]
    fn test_roundtrip_max_length_payload() {
        let image = vec![0xab; MAX_PAYLOAD_LEN - PUT_IMAGE_HEADER_LEN];
        let message = Message::new(
            3,
            Command::PutImage {
                layer: LayerId(0x0301),
                mode: BlendMode::Normal,
                x: 0,
                y: 0,
                w: 64,
                h: 64,
                image,
            },
        );
        let frame = encode(&message).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + MAX_PAYLOAD_LEN);
        assert_eq!(decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let message = Message::new(
            3,
            Command::PutImage {
                layer: LayerId(0x0301),
                mode: BlendMode::Normal,
                x: 0,
                y: 0,
                w: 64,
                h: 64,
                image: vec![0; MAX_PAYLOAD_LEN],
            },
        );
        assert!(matches!(
            encode(&message),
            Err(CodecError::PayloadTooLong { kind: "putimage", .. })
        ));
    }

    #[test]
    fn test_encode_is_deterministic() {
        for command in every_variant() {
            let message = Message::new(9, command);
            assert_eq!(encode(&message).unwrap(), encode(&message).unwrap());
        }
    }

    #[test]
    fn test_header_layout() {
        let frame = encode(&Message::new(5, Command::Interval { msecs: 0x1234 })).unwrap();
        assert_eq!(frame, vec![0x00, 0x02, 64, 5, 0x12, 0x34]);
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(decode(&[0, 2]), Err(CodecError::Truncated { .. })));
        assert!(matches!(
            decode(&[0, 2, 64, 5, 0x12]),
            Err(CodecError::Truncated {
                needed: 6,
                available: 5
            })
        ));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        assert!(matches!(
            decode(&[0, 0, 128, 1, 0xff]),
            Err(CodecError::TrailingBytes {
                expected: 4,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(decode(&[0, 0, 99, 1]), Err(CodecError::UnknownType(99)));
    }

    #[test]
    fn test_decode_inconsistent_payloads() {
        // fixed-size payload with an extra byte
        assert!(matches!(
            decode(&[0, 3, 64, 1, 0, 1, 2]),
            Err(CodecError::InvalidPayload { kind: "interval", .. })
        ));
        // fixed-size payload too short
        assert!(matches!(
            decode(&[0, 1, 134, 1, 0]),
            Err(CodecError::InvalidPayload { kind: "deletelayer", .. })
        ));
        // layer order entries are 4 bytes each
        assert!(matches!(
            decode(&[0, 3, 133, 1, 1, 1, 0]),
            Err(CodecError::InvalidPayload { kind: "layerorder", .. })
        ));
        // wrong feature count
        assert!(matches!(
            decode(&[0, 2, 70, 1, 0, 0]),
            Err(CodecError::InvalidPayload { kind: "featureaccess", .. })
        ));
        // name length beyond payload
        assert!(matches!(
            decode(&[0, 3, 32, 1, 0, 9, b'a']),
            Err(CodecError::InvalidPayload { kind: "join", .. })
        ));
        // invalid UTF-8
        assert!(matches!(
            decode(&[0, 2, 67, 1, 0xff, 0xfe]),
            Err(CodecError::InvalidPayload { kind: "marker", .. })
        ));
        // unknown blend mode
        assert!(matches!(
            decode(&[0, 6, 131, 1, 1, 1, 0, 0, 255, 77]),
            Err(CodecError::InvalidPayload { kind: "layerattr", .. })
        ));
    }

    #[test]
    fn test_join_name_too_long() {
        let message = Message::new(
            1,
            Command::Join {
                flags: 0,
                name: "x".repeat(256),
                avatar: vec![],
            },
        );
        assert!(matches!(
            encode(&message),
            Err(CodecError::InvalidPayload { kind: "join", .. })
        ));
    }

    #[test]
    fn test_decode_stream_stops_at_partial_frame() {
        let mut buf = encode(&Message::new(1, Command::UndoPoint)).unwrap();
        buf.extend(encode(&Message::new(2, Command::Ping { is_pong: false })).unwrap());
        let full = buf.len();
        buf.extend(&[0, 8, 129]);

        let (messages, consumed) = decode_stream(&buf).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(consumed, full);
        assert_eq!(messages[1].context_id, 2);
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(&[0, 1]), None);
        assert_eq!(frame_len(&[0, 1, 2, 3]), None);
        assert_eq!(frame_len(&[0, 1, 2, 3, 0]), Some(5));
        assert_eq!(frame_len(&[0, 0, 128, 3, 0, 0]), Some(4));
    }
}
