use bytes::BufMut;
use tokio_util::codec;

use super::codec as wire_codec;
use super::protocol::Response;

/// Encodes typed [`Response`]s into their binary wire form. Text-mode
/// administrative responses are plain lines, written directly by
/// [`crate::admin`] rather than through this encoder.
#[derive(Debug, Default)]
pub struct Encoder {}

impl codec::Encoder<Response> for Encoder {
    type Error = std::io::Error;

    fn encode(&mut self, item: Response, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&wire_codec::pack(item));
        Ok(())
    }
}

/// Encodes a pre-formatted text line (used for administrative command
/// responses, which are not subject to the binary command table).
#[derive(Debug, Default)]
pub struct TextEncoder {}

impl codec::Encoder<Vec<u8>> for TextEncoder {
    type Error = std::io::Error;

    fn encode(&mut self, item: Vec<u8>, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}
