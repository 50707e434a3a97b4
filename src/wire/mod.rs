use events::GearmanEvent;
use protocol::Response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{self, Framed};

pub mod client_codec;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod events;
pub mod protocol;

/// Either a typed binary [`Response`] or a pre-formatted text line, the two
/// shapes a connection's outbox can hold: binary wire vs. the text-mode
/// administrative protocol.
#[derive(Debug, Clone)]
pub enum Outbound {
    Response(Response),
    Text(Vec<u8>),
}

impl From<Response> for Outbound {
    fn from(r: Response) -> Self {
        Outbound::Response(r)
    }
}

pub fn framed<T: AsyncRead + AsyncWrite>(stream: T) -> Framed<T, Codec> {
    Framed::new(stream, Default::default())
}

/// The client/worker side of the same wire protocol.
pub fn client_framed<T: AsyncRead + AsyncWrite>(stream: T) -> Framed<T, client_codec::ClientCodec> {
    Framed::new(stream, Default::default())
}

#[derive(Default)]
pub struct Codec {
    d: decoder::Decoder,
    e: encoder::Encoder,
    t: encoder::TextEncoder,
}

impl codec::Decoder for Codec {
    type Item = GearmanEvent;
    type Error = decoder::Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.d.decode(src)
    }
}

impl codec::Encoder<Outbound> for Codec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Outbound, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        match item {
            Outbound::Response(r) => codec::Encoder::encode(&mut self.e, r, dst),
            Outbound::Text(t) => codec::Encoder::encode(&mut self.t, t, dst),
        }
    }
}
