use std::io;

use itertools::Itertools;
use tokio_util::codec;

use super::codec::{self as wire_codec, Unpacked};
use super::events::GearmanEvent;
use super::protocol::{Command, Response};

/// A decoder for a stream of Gearman protocol messages.
///
/// The connection's framing is decided once, from the first byte seen: `\0`
/// means binary packets follow, anything else switches the connection
/// permanently into line-oriented text mode for the administrative
/// command set.
///
/// A class of client error that leaves the stream out of sync puts the
/// decoder into a recovery state that discards bytes up to the next
/// plausible resync point rather than tearing down the connection
/// outright.
#[derive(Debug, Default)]
pub enum Decoder {
    #[default]
    Unknown,
    Binary,
    Text,
    /// Resync after a framing error: discard bytes up to the next `\n`.
    DiscardToNewline,
}

impl codec::Decoder for Decoder {
    type Item = GearmanEvent;
    type Error = Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if matches!(self, Decoder::Unknown) {
            let Some(&first) = src.first() else {
                return Ok(None);
            };
            *self = if first == 0 { Decoder::Binary } else { Decoder::Text };
        }

        match self {
            Decoder::Binary => self.decode_binary(src),
            Decoder::Text => self.decode_text(src),
            Decoder::DiscardToNewline => self.discard_to_newline(src),
            Decoder::Unknown => unreachable!("resolved above"),
        }
    }
}

impl Decoder {
    fn decode_binary(&mut self, src: &mut bytes::BytesMut) -> Result<Option<GearmanEvent>, Error> {
        match wire_codec::unpack(src) {
            Ok(Unpacked::NeedMore) => Ok(None),
            Ok(Unpacked::Packet(raw, consumed)) => {
                wire_codec::advance(src, consumed);
                let cmd = Command::try_from(raw)?;
                Ok(Some(GearmanEvent::Command(cmd)))
            },
            Err(err) => {
                *self = Decoder::DiscardToNewline;
                Err(err.into())
            },
        }
    }

    fn decode_text(&mut self, src: &mut bytes::BytesMut) -> Result<Option<GearmanEvent>, Error> {
        use bytes::Buf;

        // Find a line terminated by \n, with an optional trailing \r
        // stripped.
        match src.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let mut line = src.split_to(idx);
                src.advance(1); // discard the \n itself
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                let tokens: Vec<Vec<u8>> = line
                    .as_ref()
                    .split(|&b| b == b' ' || b == b'\t')
                    .filter(|t| !t.is_empty())
                    .map(|t| t.to_vec())
                    .collect();
                Ok(Some(GearmanEvent::Admin(tokens)))
            },
            None => Ok(None),
        }
    }

    fn discard_to_newline(&mut self, src: &mut bytes::BytesMut) -> Result<Option<GearmanEvent>, Error> {
        use bytes::Buf;

        if src.is_empty() {
            return Ok(None);
        }

        match src
            .iter()
            .tuple_windows()
            .find_position(|&(&a, &b)| a == b'\r' && b == b'\n')
        {
            Some((idx, _)) => {
                src.advance(idx + 2);
                *self = Decoder::Binary;
                Ok(Some(GearmanEvent::Discarded))
            },
            None => {
                let keep_last = src.len().saturating_sub(1);
                src.advance(keep_last);
                Ok(Some(GearmanEvent::Discarded))
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Client(#[from] wire_codec::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The response to send the client before closing, for errors that are
    /// not recoverable in-stream.
    pub fn as_response(&self) -> Option<Response> {
        match self {
            Error::Client(_) => Some(Response::Error { code: "invalid_packet", text: "invalid packet".into() }),
            Error::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::wire::protocol::{CommandId, Magic, Priority, RawPacket};

    fn submit_bytes(function: &[u8], unique: &[u8], data: &[u8]) -> Vec<u8> {
        use bytes::BufMut;
        let mut body = bytes::BytesMut::new();
        body.put_slice(function);
        body.put_u8(0);
        body.put_slice(unique);
        body.put_u8(0);
        body.put_slice(data);

        let mut out = bytes::BytesMut::new();
        out.put_slice(super::super::protocol::MAGIC_REQ);
        out.put_u32(CommandId::SubmitJob as u32);
        out.put_u32(body.len() as u32);
        out.extend_from_slice(&body);
        out.to_vec()
    }

    #[tokio::test]
    async fn decodes_binary_submit_job() {
        let stream = submit_bytes(b"reverse", b"", b"abc");
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());

        let evt = framed.next().await.unwrap().unwrap();
        assert_eq!(
            evt,
            GearmanEvent::Command(Command::SubmitJob {
                priority: Priority::Normal,
                background: false,
                function: Bytes::from_static(b"reverse"),
                unique: Bytes::new(),
                data: Bytes::from_static(b"abc"),
            })
        );
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn decodes_admin_text_line() {
        let stream = b"workers\r\n".to_vec();
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());

        let evt = framed.next().await.unwrap().unwrap();
        assert_eq!(evt, GearmanEvent::Admin(vec![b"workers".to_vec()]));
    }

    #[tokio::test]
    async fn splits_multiple_whitespace_tokens() {
        let stream = b"maxqueue  reverse   100\n".to_vec();
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());

        let evt = framed.next().await.unwrap().unwrap();
        assert_eq!(
            evt,
            GearmanEvent::Admin(vec![b"maxqueue".to_vec(), b"reverse".to_vec(), b"100".to_vec()])
        );
    }

    #[test]
    fn raw_packet_roundtrip_shape() {
        let raw = RawPacket {
            magic: Magic::Request,
            command: CommandId::EchoReq,
            args: vec![Bytes::from_static(b"hi")],
        };
        let cmd = Command::try_from(raw).unwrap();
        assert_eq!(cmd, Command::EchoReq { data: Bytes::from_static(b"hi") });
    }
}
