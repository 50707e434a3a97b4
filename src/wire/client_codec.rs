//! Client/worker-side framing: the mirror image of
//! [`super::decoder`]/[`super::encoder`]. A client or worker only ever
//! speaks binary, so there is no text-mode resolution step -- it sends
//! [`Command`]s and receives [`Response`]s.

use bytes::{Buf, BufMut};
use tokio_util::codec;

use super::codec::{self as wire_codec, Unpacked};
use super::protocol::{Command, Response};

#[derive(Debug, Default)]
pub struct ClientCodec;

impl codec::Decoder for ClientCodec {
    type Item = Response;
    type Error = super::decoder::Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match wire_codec::unpack(src) {
            Ok(Unpacked::NeedMore) => Ok(None),
            Ok(Unpacked::Packet(raw, consumed)) => {
                src.advance(consumed);
                Ok(Some(Response::try_from(raw)?))
            },
            Err(err) => Err(err.into()),
        }
    }
}

impl codec::Encoder<Command> for ClientCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Command, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&wire_codec::pack_command(item));
        Ok(())
    }
}
