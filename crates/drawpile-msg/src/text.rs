//! Human-readable text form
//!
//! Each message is written as `<ctx> <name> key=value ...`. Values that
//! contain whitespace, and base64 values longer than [`BASE64_LINE_WIDTH`],
//! are moved into a block of `\tkey=line` continuation lines:
//!
//! ```text
//! 1 chat flags=shout {
//! 	message=hello
//! 	message=world
//! }
//! ```
//!
//! Undo points are followed by an extra blank line so undo groups stand out
//! in recordings. Text recordings start with `!key=value` header lines and a
//! blank line.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::fmt::{Display, Write};

use crate::blend::BlendMode;
use crate::codec;
use crate::error::TextError;
use crate::message::{
    attr_flags, chat_flags, create_flags, join_flags, AccessTier, Command, DisconnectReason,
    Feature, FeatureTiers, LayerId, LayerOrderEntry, Message, MessageType,
};

/// Width at which long base64 values are wrapped
pub const BASE64_LINE_WIDTH: usize = 70;

/// Render one message in text form, including its terminating newline(s)
#[must_use]
pub fn write_message(message: &Message) -> String {
    let mut w = ArgWriter::default();
    match &message.command {
        Command::ServerCommand { json } => w.string("msg", json),
        Command::Disconnect { reason, message } => {
            w.arg("reason", reason.name());
            w.string("message", message);
        }
        Command::Ping { is_pong } => w.arg("is_pong", is_pong),
        Command::Join {
            flags,
            name,
            avatar,
        } => {
            w.flags("flags", *flags, join_flags::NAMES);
            w.string("name", name);
            w.base64("avatar", avatar);
        }
        Command::Leave | Command::UndoPoint => {}
        Command::SessionOwner { users } | Command::UserAcl { users } => w.list("users", users),
        Command::Chat { flags, message } => {
            w.flags("flags", *flags, chat_flags::NAMES);
            w.string("message", message);
        }
        Command::PrivateChat {
            target,
            flags,
            message,
        } => {
            w.arg("target", target);
            w.flags("flags", *flags, chat_flags::NAMES);
            w.string("message", message);
        }
        Command::Interval { msecs } => w.arg("msecs", msecs),
        Command::MovePointer { x, y } => {
            w.arg("x", x);
            w.arg("y", y);
        }
        Command::Marker { text } => w.string("text", text),
        Command::LayerAcl {
            id,
            locked,
            tier,
            exclusive,
        } => {
            w.arg("id", id);
            w.arg("locked", locked);
            w.arg("tier", tier.name());
            w.list("exclusive", exclusive);
        }
        Command::FeatureAccessLevels { tiers } => {
            for (feature, tier) in tiers.iter() {
                w.arg(feature.name(), tier.name());
            }
        }
        Command::DefaultLayer { id } => w.arg("id", id),
        Command::CanvasResize {
            top,
            right,
            bottom,
            left,
        } => {
            w.arg("top", top);
            w.arg("right", right);
            w.arg("bottom", bottom);
            w.arg("left", left);
        }
        Command::LayerCreate {
            id,
            source,
            target,
            fill,
            flags,
            title,
        } => {
            w.arg("id", id);
            w.arg("source", source);
            w.arg("target", target);
            w.color("fill", *fill);
            w.flags("flags", *flags, create_flags::NAMES);
            w.string("title", title);
        }
        Command::LayerAttributes {
            id,
            flags,
            mask,
            opacity,
            blend,
        } => {
            w.arg("id", id);
            w.flags("flags", *flags, attr_flags::NAMES);
            w.flags("mask", *mask, attr_flags::NAMES);
            w.opacity("opacity", *opacity);
            w.arg("blend", blend.svg_name());
        }
        Command::LayerRetitle { id, title } => {
            w.arg("id", id);
            w.string("title", title);
        }
        Command::LayerOrder { entries } => {
            let layers: Vec<String> = entries
                .iter()
                .map(|e| format!("{}:{}", e.id, e.children))
                .collect();
            w.arg("layers", layers.join(","));
        }
        Command::LayerDelete { id, merge_to } => {
            w.arg("id", id);
            w.arg("merge", merge_to);
        }
        Command::LayerVisibility { id, visible } => {
            w.arg("id", id);
            w.arg("visible", visible);
        }
        Command::PutImage {
            layer,
            mode,
            x,
            y,
            w: width,
            h,
            image,
        } => {
            w.arg("layer", layer);
            w.arg("mode", mode.svg_name());
            w.arg("x", x);
            w.arg("y", y);
            w.arg("w", width);
            w.arg("h", h);
            w.base64("image", image);
        }
        Command::FillRect {
            layer,
            mode,
            x,
            y,
            w: width,
            h,
            color,
        } => {
            w.arg("layer", layer);
            w.arg("mode", mode.svg_name());
            w.arg("x", x);
            w.arg("y", y);
            w.arg("w", width);
            w.arg("h", h);
            w.color("color", *color);
        }
    }
    w.finish(message)
}

/// Render a sequence of messages
#[must_use]
pub fn write_messages<'a>(messages: impl IntoIterator<Item = &'a Message>) -> String {
    messages.into_iter().map(write_message).collect()
}

/// Render recording header lines followed by the separating blank line
#[must_use]
pub fn write_header<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        let _ = writeln!(out, "!{key}={value}");
    }
    out.push('\n');
    out
}

#[derive(Default)]
struct ArgWriter {
    line: String,
    block: String,
}

impl ArgWriter {
    fn arg(&mut self, key: &str, value: impl Display) {
        let _ = write!(self.line, " {key}={value}");
    }

    fn color(&mut self, key: &str, argb: u32) {
        if argb & 0xff00_0000 == 0xff00_0000 {
            self.arg(key, format_args!("#{:06x}", argb & 0x00ff_ffff));
        } else {
            self.arg(key, format_args!("#{argb:08x}"));
        }
    }

    fn opacity(&mut self, key: &str, value: u8) {
        self.arg(key, format_args!("{:.2}", f64::from(value) / 255.0 * 100.0));
    }

    /// Named bits by name, any remaining bits as one hex token
    fn flags(&mut self, key: &str, value: u8, names: &[(u8, &str)]) {
        let mut set: Vec<String> = Vec::new();
        let mut rest = value;
        for (bit, name) in names {
            if value & bit != 0 {
                set.push((*name).to_string());
                rest &= !bit;
            }
        }
        if rest != 0 {
            set.push(format!("{rest:#04x}"));
        }
        if !set.is_empty() {
            self.arg(key, set.join(","));
        }
    }

    fn list(&mut self, key: &str, values: &[u8]) {
        let values: Vec<String> = values.iter().map(u8::to_string).collect();
        self.arg(key, values.join(","));
    }

    fn string(&mut self, key: &str, value: &str) {
        if value.chars().any(char::is_whitespace) {
            for line in value.split('\n') {
                self.block_line(key, line);
            }
        } else {
            self.arg(key, value);
        }
    }

    fn base64(&mut self, key: &str, value: &[u8]) {
        let encoded = STANDARD.encode(value);
        if encoded.len() <= BASE64_LINE_WIDTH {
            self.arg(key, encoded);
        } else {
            // base64 output is ASCII, so byte chunks are valid str slices
            for chunk in encoded.as_bytes().chunks(BASE64_LINE_WIDTH) {
                self.block_line(key, &String::from_utf8_lossy(chunk));
            }
        }
    }

    fn block_line(&mut self, key: &str, value: &str) {
        let _ = write!(self.block, "\n\t{key}={value}");
    }

    fn finish(self, message: &Message) -> String {
        let mut out = format!(
            "{} {}{}",
            message.context_id,
            message.message_type().name(),
            self.line
        );
        if self.block.is_empty() {
            out.push('\n');
        } else {
            out.push_str(" {");
            out.push_str(&self.block);
            out.push_str("\n}\n");
        }
        if matches!(message.command, Command::UndoPoint) {
            out.push('\n');
        }
        out
    }
}

/// Parse header lines (`!key=value`) at the start of a text recording
#[must_use]
pub fn parse_header(input: &str) -> BTreeMap<String, String> {
    input
        .split('\n')
        .map(str::trim_end)
        .take_while(|line| line.starts_with('!'))
        .filter_map(|line| line[1..].split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Parse text form back into messages
///
/// Header lines, blank lines and `#` comments are skipped. Every parsed
/// message is checked to be encodable.
pub fn parse_text(input: &str) -> Result<Vec<Message>, TextError> {
    let mut messages = Vec::new();
    let mut lines = input.split_terminator('\n').enumerate();

    while let Some((index, raw)) = lines.next() {
        let line_no = index + 1;
        let line = raw.trim_end();
        if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
            continue;
        }

        let (head, has_block) = match line.strip_suffix(" {") {
            Some(head) => (head, true),
            None => (line, false),
        };

        let mut tokens = head.split_whitespace();
        let context_id = tokens
            .next()
            .and_then(|t| t.parse::<u8>().ok())
            .ok_or(TextError::MalformedLine { line: line_no })?;
        let name = tokens
            .next()
            .ok_or(TextError::MalformedLine { line: line_no })?;
        let kind = MessageType::from_name(name).ok_or_else(|| TextError::UnknownName {
            line: line_no,
            name: name.to_string(),
        })?;

        let mut fields = Fields::new(line_no);
        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or(TextError::MalformedLine { line: line_no })?;
            fields.push(key, value);
        }

        if has_block {
            let mut closed = false;
            for (_, raw) in lines.by_ref() {
                if raw.trim_end_matches('\r') == "}" {
                    closed = true;
                    break;
                }
                let (key, value) = raw
                    .strip_prefix('\t')
                    .and_then(|l| l.split_once('='))
                    .ok_or(TextError::MalformedLine { line: line_no })?;
                fields.push(key, value);
            }
            if !closed {
                return Err(TextError::UnterminatedBlock { line: line_no });
            }
        }

        let message = Message::new(context_id, fields.command(kind)?);
        codec::encode(&message).map_err(|source| TextError::Codec {
            line: line_no,
            source,
        })?;
        messages.push(message);
    }

    Ok(messages)
}

/// Collected `key=value` pairs of one message
struct Fields {
    line: usize,
    values: BTreeMap<String, Vec<String>>,
}

impl Fields {
    fn new(line: usize) -> Self {
        Self {
            line,
            values: BTreeMap::new(),
        }
    }

    fn push(&mut self, key: &str, value: &str) {
        self.values
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    fn bad(&self, key: &str, reason: impl Into<String>) -> TextError {
        TextError::BadValue {
            line: self.line,
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    fn parts(&self, key: &str) -> Result<&[String], TextError> {
        self.values
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| TextError::MissingField {
                line: self.line,
                key: key.to_string(),
            })
    }

    fn raw(&self, key: &str) -> Result<&str, TextError> {
        match self.parts(key)? {
            [single] => Ok(single),
            _ => Err(self.bad(key, "value is split across lines")),
        }
    }

    fn string(&self, key: &str) -> Result<String, TextError> {
        Ok(self.parts(key)?.join("\n"))
    }

    fn base64(&self, key: &str) -> Result<Vec<u8>, TextError> {
        let joined = self.parts(key)?.concat();
        STANDARD
            .decode(joined.as_bytes())
            .map_err(|e| self.bad(key, e.to_string()))
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Result<T, TextError> {
        let raw = self.raw(key)?;
        raw.parse().map_err(|_| self.bad(key, format!("'{raw}' is not a number")))
    }

    fn bool(&self, key: &str) -> Result<bool, TextError> {
        match self.raw(key)? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(self.bad(key, format!("'{other}' is not a boolean"))),
        }
    }

    fn id(&self, key: &str) -> Result<LayerId, TextError> {
        parse_id(self.raw(key)?)
            .map(LayerId)
            .ok_or_else(|| self.bad(key, "expected a 16-bit id"))
    }

    fn color(&self, key: &str) -> Result<u32, TextError> {
        let raw = self.raw(key)?;
        let hex = raw
            .strip_prefix('#')
            .ok_or_else(|| self.bad(key, "color must start with '#'"))?;
        let value =
            u32::from_str_radix(hex, 16).map_err(|_| self.bad(key, "invalid hex color"))?;
        match hex.len() {
            6 => Ok(value | 0xff00_0000),
            8 => Ok(value),
            _ => Err(self.bad(key, "expected 6 or 8 hex digits")),
        }
    }

    fn opacity(&self, key: &str) -> Result<u8, TextError> {
        let percent: f64 = self.number(key)?;
        if !(0.0..=100.0).contains(&percent) {
            return Err(self.bad(key, "opacity must be between 0 and 100"));
        }
        Ok((percent / 100.0 * 255.0).round() as u8)
    }

    /// Missing flags mean no flag is set
    fn flags(&self, key: &str, names: &[(u8, &str)]) -> Result<u8, TextError> {
        if !self.values.contains_key(key) {
            return Ok(0);
        }
        let mut value = 0;
        for name in self.raw(key)?.split(',').filter(|n| !n.is_empty()) {
            if let Some(hex) = name.strip_prefix("0x") {
                value |= u8::from_str_radix(hex, 16)
                    .map_err(|_| self.bad(key, format!("invalid flag bits '{name}'")))?;
                continue;
            }
            let (bit, _) = names
                .iter()
                .find(|(_, n)| *n == name)
                .ok_or_else(|| self.bad(key, format!("unknown flag '{name}'")))?;
            value |= bit;
        }
        Ok(value)
    }

    fn list(&self, key: &str) -> Result<Vec<u8>, TextError> {
        self.raw(key)?
            .split(',')
            .filter(|v| !v.is_empty())
            .map(|v| v.parse().map_err(|_| self.bad(key, format!("'{v}' is not a user id"))))
            .collect()
    }

    fn blend(&self, key: &str) -> Result<BlendMode, TextError> {
        let raw = self.raw(key)?;
        BlendMode::from_svg_name(raw).ok_or_else(|| self.bad(key, format!("unknown blend mode '{raw}'")))
    }

    fn tier(&self, key: &str) -> Result<AccessTier, TextError> {
        let raw = self.raw(key)?;
        AccessTier::from_name(raw).ok_or_else(|| self.bad(key, format!("unknown tier '{raw}'")))
    }

    fn layer_order(&self, key: &str) -> Result<Vec<LayerOrderEntry>, TextError> {
        self.raw(key)?
            .split(',')
            .filter(|v| !v.is_empty())
            .map(|entry| {
                let (id, children) = entry
                    .split_once(':')
                    .ok_or_else(|| self.bad(key, format!("'{entry}' is not id:children")))?;
                Ok(LayerOrderEntry {
                    id: parse_id(id)
                        .map(LayerId)
                        .ok_or_else(|| self.bad(key, format!("bad id '{id}'")))?,
                    children: children
                        .parse()
                        .map_err(|_| self.bad(key, format!("bad child count '{children}'")))?,
                })
            })
            .collect()
    }

    fn command(&self, kind: MessageType) -> Result<Command, TextError> {
        Ok(match kind {
            MessageType::ServerCommand => Command::ServerCommand {
                json: self.string("msg")?,
            },
            MessageType::Disconnect => {
                let raw = self.raw("reason")?;
                Command::Disconnect {
                    reason: DisconnectReason::from_name(raw)
                        .ok_or_else(|| self.bad("reason", format!("unknown reason '{raw}'")))?,
                    message: self.string("message")?,
                }
            }
            MessageType::Ping => Command::Ping {
                is_pong: self.bool("is_pong")?,
            },
            MessageType::Join => Command::Join {
                flags: self.flags("flags", join_flags::NAMES)?,
                name: self.string("name")?,
                avatar: self.base64("avatar")?,
            },
            MessageType::Leave => Command::Leave,
            MessageType::SessionOwner => Command::SessionOwner {
                users: self.list("users")?,
            },
            MessageType::Chat => Command::Chat {
                flags: self.flags("flags", chat_flags::NAMES)?,
                message: self.string("message")?,
            },
            MessageType::PrivateChat => Command::PrivateChat {
                target: self.number("target")?,
                flags: self.flags("flags", chat_flags::NAMES)?,
                message: self.string("message")?,
            },
            MessageType::Interval => Command::Interval {
                msecs: self.number("msecs")?,
            },
            MessageType::MovePointer => Command::MovePointer {
                x: self.number("x")?,
                y: self.number("y")?,
            },
            MessageType::Marker => Command::Marker {
                text: self.string("text")?,
            },
            MessageType::UserAcl => Command::UserAcl {
                users: self.list("users")?,
            },
            MessageType::LayerAcl => Command::LayerAcl {
                id: self.id("id")?,
                locked: self.bool("locked")?,
                tier: self.tier("tier")?,
                exclusive: self.list("exclusive")?,
            },
            MessageType::FeatureAccessLevels => {
                let mut tiers = FeatureTiers::default();
                for feature in Feature::ALL {
                    tiers.set(feature, self.tier(feature.name())?);
                }
                Command::FeatureAccessLevels { tiers }
            }
            MessageType::DefaultLayer => Command::DefaultLayer { id: self.id("id")? },
            MessageType::UndoPoint => Command::UndoPoint,
            MessageType::CanvasResize => Command::CanvasResize {
                top: self.number("top")?,
                right: self.number("right")?,
                bottom: self.number("bottom")?,
                left: self.number("left")?,
            },
            MessageType::LayerCreate => Command::LayerCreate {
                id: self.id("id")?,
                source: self.id("source")?,
                target: self.id("target")?,
                fill: self.color("fill")?,
                flags: self.flags("flags", create_flags::NAMES)?,
                title: self.string("title")?,
            },
            MessageType::LayerAttributes => Command::LayerAttributes {
                id: self.id("id")?,
                flags: self.flags("flags", attr_flags::NAMES)?,
                mask: self.flags("mask", attr_flags::NAMES)?,
                opacity: self.opacity("opacity")?,
                blend: self.blend("blend")?,
            },
            MessageType::LayerRetitle => Command::LayerRetitle {
                id: self.id("id")?,
                title: self.string("title")?,
            },
            MessageType::LayerOrder => Command::LayerOrder {
                entries: self.layer_order("layers")?,
            },
            MessageType::LayerDelete => Command::LayerDelete {
                id: self.id("id")?,
                merge_to: self.id("merge")?,
            },
            MessageType::LayerVisibility => Command::LayerVisibility {
                id: self.id("id")?,
                visible: self.bool("visible")?,
            },
            MessageType::PutImage => Command::PutImage {
                layer: self.id("layer")?,
                mode: self.blend("mode")?,
                x: self.number("x")?,
                y: self.number("y")?,
                w: self.number("w")?,
                h: self.number("h")?,
                image: self.base64("image")?,
            },
            MessageType::FillRect => Command::FillRect {
                layer: self.id("layer")?,
                mode: self.blend("mode")?,
                x: self.number("x")?,
                y: self.number("y")?,
                w: self.number("w")?,
                h: self.number("h")?,
                color: self.color("color")?,
            },
        })
    }
}

fn parse_id(raw: &str) -> Option<u16> {
    match raw.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
