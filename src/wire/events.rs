use super::protocol::Command;

/// An event produced by the decoder for the dispatcher to act on.
#[derive(Clone, Debug, PartialEq)]
pub enum GearmanEvent {
    /// A binary command, ready to be dispatched.
    Command(Command),
    /// A whitespace-split line received while the connection is in text
    /// mode, bound for the administrative command set.
    Admin(Vec<Vec<u8>>),
    /// Part of the input was discarded after a framing error from which the
    /// decoder can still recover (`InvalidMagic` / `InvalidCommand` /
    /// `InvalidPacket` / `TooManyArgs`).
    Discarded,
}
