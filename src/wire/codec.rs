//! Pure packet framing: `pack`/`unpack` know nothing about
//! sockets or async; [`super::decoder`] and [`super::encoder`] are thin
//! `tokio_util::codec` adapters around them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::protocol::{Command, CommandId, Magic, RawPacket, Response, MAGIC_REQ, MAGIC_RES};

pub const HEADER_SIZE: usize = 12;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    #[error("invalid magic")]
    InvalidMagic,
    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    #[error("too many args")]
    TooManyArgs,
}

pub enum Unpacked {
    Packet(RawPacket, usize),
    NeedMore,
}

/// Attempts to decode one binary packet from the front of `buf`. Returns
/// [`Unpacked::NeedMore`] without consuming anything if `buf` doesn't yet
/// hold a complete packet.
pub fn unpack(buf: &[u8]) -> Result<Unpacked, Error> {
    if buf.len() < HEADER_SIZE {
        return Ok(Unpacked::NeedMore);
    }

    let magic = match &buf[0..4] {
        m if m == MAGIC_REQ => Magic::Request,
        m if m == MAGIC_RES => Magic::Response,
        _ => return Err(Error::InvalidMagic),
    };

    let command_id = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    let command = CommandId::from_u32(command_id).ok_or(Error::InvalidCommand("unknown id"))?;

    if !command.allowed_magics().contains(&magic) {
        return Err(Error::InvalidMagic);
    }

    let length = u32::from_be_bytes(buf[8..12].try_into().unwrap()) as usize;
    let total = HEADER_SIZE + length;
    if buf.len() < total {
        return Ok(Unpacked::NeedMore);
    }

    let body = &buf[HEADER_SIZE..total];
    let args = split_args(body, command.field_count(), command.has_data())?;

    Ok(Unpacked::Packet(RawPacket { magic, command, args }, total))
}

/// Splits a packet body into `n_fields` NUL-delimited byte strings. When
/// `has_data` is set, the final field absorbs everything to the end of
/// `body`, including any embedded NUL bytes; earlier fields may not contain
/// one.
fn split_args(body: &[u8], n_fields: usize, has_data: bool) -> Result<Vec<Bytes>, Error> {
    if n_fields == 0 {
        if !body.is_empty() {
            return Err(Error::InvalidPacket("unexpected body"));
        }
        return Ok(vec![]);
    }

    let mut args = Vec::with_capacity(n_fields);
    let mut rest = body;
    let fixed_fields = if has_data { n_fields - 1 } else { n_fields };

    for i in 0..fixed_fields {
        let is_last_fixed = i + 1 == fixed_fields;
        if is_last_fixed && !has_data {
            // The final (non-data) field runs to the end of the body and
            // must not itself contain a NUL separator.
            if rest.contains(&0) {
                return Err(Error::TooManyArgs);
            }
            args.push(Bytes::copy_from_slice(rest));
            rest = &[];
        } else {
            match rest.iter().position(|&b| b == 0) {
                Some(idx) => {
                    args.push(Bytes::copy_from_slice(&rest[..idx]));
                    rest = &rest[idx + 1..];
                },
                None => return Err(Error::InvalidPacket("missing field separator")),
            }
        }
    }

    if has_data {
        args.push(Bytes::copy_from_slice(rest));
    }

    Ok(args)
}

/// Serialises a typed response into its binary wire form.
pub fn pack(resp: Response) -> Bytes {
    let command = resp.command_id();
    let fields = resp.into_fields();
    let body_len: usize = fields.iter().map(|f| f.len()).sum::<usize>()
        + fields.len().saturating_sub(1);

    let mut out = BytesMut::with_capacity(HEADER_SIZE + body_len);
    out.put_slice(MAGIC_RES);
    out.put_u32(command as u32);
    out.put_u32(body_len as u32);

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.put_u8(0);
        }
        out.put_slice(field);
    }

    out.freeze()
}

/// Serialises a typed request (client/worker -> server direction) into its
/// binary wire form. Mirrors [`pack`], swapping `MAGIC_RES` for `MAGIC_REQ`.
pub fn pack_command(cmd: Command) -> Bytes {
    let command = cmd.command_id();
    let fields = cmd.into_fields();
    let body_len: usize = fields.iter().map(|f| f.len()).sum::<usize>()
        + fields.len().saturating_sub(1);

    let mut out = BytesMut::with_capacity(HEADER_SIZE + body_len);
    out.put_slice(MAGIC_REQ);
    out.put_u32(command as u32);
    out.put_u32(body_len as u32);

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.put_u8(0);
        }
        out.put_slice(field);
    }

    out.freeze()
}

pub fn advance(buf: &mut BytesMut, n: usize) {
    buf.advance(n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::protocol::Priority;

    fn raw_submit(function: &[u8], unique: &[u8], data: &[u8]) -> Bytes {
        let mut body = BytesMut::new();
        body.put_slice(function);
        body.put_u8(0);
        body.put_slice(unique);
        body.put_u8(0);
        body.put_slice(data);

        let mut out = BytesMut::new();
        out.put_slice(MAGIC_REQ);
        out.put_u32(CommandId::SubmitJob as u32);
        out.put_u32(body.len() as u32);
        out.extend_from_slice(&body);
        out.freeze()
    }

    #[test]
    fn unpack_submit_job() {
        let buf = raw_submit(b"reverse", b"", b"abc");
        let Unpacked::Packet(pkt, consumed) = unpack(&buf).unwrap() else {
            panic!("expected a complete packet");
        };
        assert_eq!(consumed, buf.len());
        assert_eq!(pkt.magic, Magic::Request);
        assert_eq!(pkt.command, CommandId::SubmitJob);
        assert_eq!(pkt.args, vec![Bytes::from_static(b"reverse"), Bytes::new(), Bytes::from_static(b"abc")]);
    }

    #[test]
    fn unpack_needs_more_on_truncated_header() {
        let buf = raw_submit(b"reverse", b"", b"abc");
        assert!(matches!(unpack(&buf[..8]).unwrap(), Unpacked::NeedMore));
    }

    #[test]
    fn unpack_needs_more_on_truncated_body() {
        let buf = raw_submit(b"reverse", b"", b"abcdef");
        assert!(matches!(unpack(&buf[..buf.len() - 2]).unwrap(), Unpacked::NeedMore));
    }

    #[test]
    fn unpack_rejects_bad_magic() {
        let mut buf = raw_submit(b"reverse", b"", b"abc").to_vec();
        buf[0..4].copy_from_slice(b"ABCD");
        assert_eq!(unpack(&buf).unwrap_err(), Error::InvalidMagic);
    }

    #[test]
    fn unpack_allows_embedded_nul_in_data_only() {
        let buf = raw_submit(b"reverse", b"", b"a\0b\0c");
        let Unpacked::Packet(pkt, _) = unpack(&buf).unwrap() else {
            panic!()
        };
        assert_eq!(pkt.args[2], Bytes::from_static(b"a\0b\0c"));
    }

    #[test]
    fn pack_job_created_round_trips_into_echo() {
        let packed = pack(Response::JobCreated { handle: Bytes::from_static(b"H:host:1") });
        assert_eq!(&packed[0..4], MAGIC_RES);
        assert_eq!(u32::from_be_bytes(packed[4..8].try_into().unwrap()), CommandId::JobCreated as u32);
        assert_eq!(&packed[HEADER_SIZE..], b"H:host:1");
    }

    #[test]
    fn pack_zero_arg_response_has_empty_body() {
        let packed = pack(Response::NoJob);
        assert_eq!(packed.len(), HEADER_SIZE);
    }

    #[test]
    fn submit_job_priority_is_carried_by_the_typed_command() {
        use crate::wire::protocol::Command;
        let raw = RawPacket {
            magic: Magic::Request,
            command: CommandId::SubmitJobHigh,
            args: vec![Bytes::from_static(b"f"), Bytes::new(), Bytes::from_static(b"d")],
        };
        let cmd = Command::try_from(raw).unwrap();
        assert_eq!(
            cmd,
            Command::SubmitJob {
                priority: Priority::High,
                background: false,
                function: Bytes::from_static(b"f"),
                unique: Bytes::new(),
                data: Bytes::from_static(b"d"),
            }
        );
    }
}
