//! Framed socket codec
//!
//! Splits the byte stream into frames by their length prefix. A frame that
//! does not decode is yielded as `Err` without losing sync, so the
//! connection can count malformed messages instead of dropping at once.

use bytes::{BufMut, BytesMut};
use drawpile_msg::{decode, encode, CodecError, Message, HEADER_LEN};
use tokio_util::codec::{Decoder, Encoder};

/// Message codec for `tokio_util::codec::Framed`
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Result<Message, CodecError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = HEADER_LEN + usize::from(u16::from_be_bytes([src[0], src[1]]));
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        let frame = src.split_to(len);
        Ok(Some(decode(&frame)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            // a partial frame at end of stream decodes as truncated
            None => Ok(Some(decode(&src.split()))),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        dst.put_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawpile_msg::{Command, LayerId};
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn chat(text: &str) -> Message {
        Message::new(
            3,
            Command::Chat {
                flags: 0,
                message: text.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_reads_frames_split_across_reads() {
        let frame = encode(&chat("hello")).unwrap();
        let second = encode(&Message::new(3, Command::UndoPoint)).unwrap();
        let mock = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..])
            .read(&second)
            .build();

        let mut reader = FramedRead::new(mock, MessageCodec);
        assert_eq!(reader.next().await.unwrap().unwrap().unwrap(), chat("hello"));
        assert_eq!(
            reader.next().await.unwrap().unwrap().unwrap(),
            Message::new(3, Command::UndoPoint)
        );
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bad_frame_keeps_stream_in_sync() {
        // unknown type 200 with a 2 byte payload
        let bad = [0u8, 2, 200, 1, 0xaa, 0xbb];
        let good = encode(&chat("after")).unwrap();
        let mock = tokio_test::io::Builder::new().read(&bad).read(&good).build();

        let mut reader = FramedRead::new(mock, MessageCodec);
        assert!(matches!(
            reader.next().await.unwrap().unwrap(),
            Err(CodecError::UnknownType(200))
        ));
        assert_eq!(reader.next().await.unwrap().unwrap().unwrap(), chat("after"));
    }

    #[tokio::test]
    async fn test_truncated_eof() {
        let frame = encode(&chat("cut")).unwrap();
        let mock = tokio_test::io::Builder::new().read(&frame[..5]).build();

        let mut reader = FramedRead::new(mock, MessageCodec);
        assert!(matches!(
            reader.next().await.unwrap().unwrap(),
            Err(CodecError::Truncated { .. })
        ));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_writes_frames() {
        let message = Message::new(1, Command::DefaultLayer { id: LayerId(0x0101) });
        let frame = encode(&message).unwrap();
        let mock = tokio_test::io::Builder::new().write(&frame).build();

        let mut writer = FramedWrite::new(mock, MessageCodec);
        writer.send(message).await.unwrap();
    }
}
