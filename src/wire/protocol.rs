use bytes::Bytes;

/// Which framing a packet was (or must be) sent under.
///
/// On the wire, binary packets begin with a 4-byte magic: `"\0REQ"` for
/// [`Magic::Request`] or `"\0RES"` for [`Magic::Response`]. A connection
/// whose first byte is not `\0` is in [`Magic::Text`] mode instead: each
/// line up to the next `\n` is a whitespace-split administrative command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Magic {
    Text,
    Request,
    Response,
}

pub const MAGIC_REQ: &[u8; 4] = b"\0REQ";
pub const MAGIC_RES: &[u8; 4] = b"\0RES";

/// Numeric command IDs, stable and append-only.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum CommandId {
    Text = 0,
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
    SubmitJobSched = 35,
    SubmitJobEpoch = 36,
}

impl CommandId {
    pub fn from_u32(v: u32) -> Option<Self> {
        use CommandId::*;
        Some(match v {
            0 => Text,
            1 => CanDo,
            2 => CantDo,
            3 => ResetAbilities,
            4 => PreSleep,
            6 => Noop,
            7 => SubmitJob,
            8 => JobCreated,
            9 => GrabJob,
            10 => NoJob,
            11 => JobAssign,
            12 => WorkStatus,
            13 => WorkComplete,
            14 => WorkFail,
            15 => GetStatus,
            16 => EchoReq,
            17 => EchoRes,
            18 => SubmitJobBg,
            19 => Error,
            20 => StatusRes,
            21 => SubmitJobHigh,
            22 => SetClientId,
            23 => CanDoTimeout,
            24 => AllYours,
            25 => WorkException,
            26 => OptionReq,
            27 => OptionRes,
            28 => WorkData,
            29 => WorkWarning,
            30 => GrabJobUniq,
            31 => JobAssignUniq,
            32 => SubmitJobHighBg,
            33 => SubmitJobLow,
            34 => SubmitJobLowBg,
            35 => SubmitJobSched,
            36 => SubmitJobEpoch,
            _ => return None,
        })
    }

    /// Number of NUL-delimited fields in the packet body, counting the
    /// trailing data field (if any) as one.
    pub fn field_count(self) -> usize {
        use CommandId::*;
        match self {
            Text => 0,
            CanDo | CantDo | JobCreated | WorkFail | GetStatus | SetClientId
            | OptionReq | OptionRes | EchoReq | EchoRes => 1,
            ResetAbilities | PreSleep | Noop | GrabJob | NoJob | AllYours
            | GrabJobUniq => 0,
            CanDoTimeout | WorkComplete | WorkException | WorkData
            | WorkWarning | Error => 2,
            SubmitJob | JobAssign | WorkStatus | SubmitJobBg | SubmitJobHigh
            | SubmitJobHighBg | SubmitJobLow | SubmitJobLowBg => 3,
            JobAssignUniq | SubmitJobEpoch => 4,
            StatusRes => 5,
            SubmitJobSched => 8,
        }
    }

    /// Whether the final field is an opaque "data" blob which may contain
    /// embedded NUL bytes (every earlier field may not).
    pub fn has_data(self) -> bool {
        use CommandId::*;
        matches!(
            self,
            SubmitJob
                | JobAssign
                | WorkComplete
                | EchoReq
                | EchoRes
                | Error
                | SubmitJobHigh
                | WorkException
                | WorkData
                | WorkWarning
                | JobAssignUniq
                | SubmitJobHighBg
                | SubmitJobLow
                | SubmitJobLowBg
                | SubmitJobSched
                | SubmitJobEpoch
        )
    }

    /// Magics under which this command may legally arrive. A few WORK_*
    /// commands travel both ways (worker -> server as REQUEST, then
    /// forwarded server -> client as RESPONSE) so both are accepted.
    pub fn allowed_magics(self) -> &'static [Magic] {
        use CommandId::*;
        match self {
            Text => &[Magic::Text],
            CanDo | CantDo | ResetAbilities | PreSleep | GrabJob | GetStatus
            | EchoReq | SubmitJobBg | SubmitJobHigh | SetClientId
            | CanDoTimeout | AllYours | OptionReq | GrabJobUniq
            | SubmitJobHighBg | SubmitJobLow | SubmitJobLowBg
            | SubmitJobSched | SubmitJobEpoch | SubmitJob => &[Magic::Request],
            Noop | JobCreated | NoJob | JobAssign | Error | StatusRes
            | EchoRes | OptionRes | JobAssignUniq => &[Magic::Response],
            WorkStatus | WorkComplete | WorkFail | WorkException | WorkData
            | WorkWarning => &[Magic::Request, Magic::Response],
        }
    }

    pub fn name(self) -> &'static str {
        use CommandId::*;
        match self {
            Text => "TEXT",
            CanDo => "CAN_DO",
            CantDo => "CANT_DO",
            ResetAbilities => "RESET_ABILITIES",
            PreSleep => "PRE_SLEEP",
            Noop => "NOOP",
            SubmitJob => "SUBMIT_JOB",
            JobCreated => "JOB_CREATED",
            GrabJob => "GRAB_JOB",
            NoJob => "NO_JOB",
            JobAssign => "JOB_ASSIGN",
            WorkStatus => "WORK_STATUS",
            WorkComplete => "WORK_COMPLETE",
            WorkFail => "WORK_FAIL",
            GetStatus => "GET_STATUS",
            EchoReq => "ECHO_REQ",
            EchoRes => "ECHO_RES",
            SubmitJobBg => "SUBMIT_JOB_BG",
            Error => "ERROR",
            StatusRes => "STATUS_RES",
            SubmitJobHigh => "SUBMIT_JOB_HIGH",
            SetClientId => "SET_CLIENT_ID",
            CanDoTimeout => "CAN_DO_TIMEOUT",
            AllYours => "ALL_YOURS",
            WorkException => "WORK_EXCEPTION",
            OptionReq => "OPTION_REQ",
            OptionRes => "OPTION_RES",
            WorkData => "WORK_DATA",
            WorkWarning => "WORK_WARNING",
            GrabJobUniq => "GRAB_JOB_UNIQ",
            JobAssignUniq => "JOB_ASSIGN_UNIQ",
            SubmitJobHighBg => "SUBMIT_JOB_HIGH_BG",
            SubmitJobLow => "SUBMIT_JOB_LOW",
            SubmitJobLowBg => "SUBMIT_JOB_LOW_BG",
            SubmitJobSched => "SUBMIT_JOB_SCHED",
            SubmitJobEpoch => "SUBMIT_JOB_EPOCH",
        }
    }
}

/// Job priority, ordered HIGH > NORMAL > LOW.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}

/// A decoded binary packet, still in its raw (untyped) field form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawPacket {
    pub magic: Magic,
    pub command: CommandId,
    pub args: Vec<Bytes>,
}

/// A typed request, sent client/worker -> server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    CanDo { function: Bytes },
    CanDoTimeout { function: Bytes, timeout: u32 },
    CantDo { function: Bytes },
    ResetAbilities,
    PreSleep,
    GrabJob,
    GrabJobUniq,
    WorkStatus { handle: Bytes, numerator: u32, denominator: u32 },
    WorkComplete { handle: Bytes, data: Bytes },
    WorkFail { handle: Bytes },
    WorkData { handle: Bytes, data: Bytes },
    WorkWarning { handle: Bytes, data: Bytes },
    WorkException { handle: Bytes, data: Bytes },
    AllYours,
    SetClientId { id: Bytes },
    SubmitJob {
        priority: Priority,
        background: bool,
        function: Bytes,
        unique: Bytes,
        data: Bytes,
    },
    SubmitJobSched {
        function: Bytes,
        unique: Bytes,
        minute: u32,
        hour: u32,
        day: u32,
        month: u32,
        year: u32,
        data: Bytes,
    },
    SubmitJobEpoch { function: Bytes, unique: Bytes, epoch: u64, data: Bytes },
    GetStatus { handle: Bytes },
    OptionReq { option: Bytes },
    EchoReq { data: Bytes },
}

/// A typed response, sent server -> client/worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Noop,
    JobCreated { handle: Bytes },
    NoJob,
    JobAssign { handle: Bytes, function: Bytes, data: Bytes },
    JobAssignUniq { handle: Bytes, function: Bytes, unique: Bytes, data: Bytes },
    WorkStatus { handle: Bytes, numerator: u32, denominator: u32 },
    WorkComplete { handle: Bytes, data: Bytes },
    WorkFail { handle: Bytes },
    WorkData { handle: Bytes, data: Bytes },
    WorkWarning { handle: Bytes, data: Bytes },
    WorkException { handle: Bytes, data: Bytes },
    StatusRes {
        handle: Bytes,
        known: bool,
        running: bool,
        numerator: u32,
        denominator: u32,
    },
    OptionRes { option: Bytes },
    EchoRes { data: Bytes },
    Error { code: &'static str, text: Bytes },
}

fn u32_field(bytes: &Bytes, what: &'static str) -> Result<u32, super::codec::Error> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(super::codec::Error::InvalidPacket(what))
}

fn u64_field(bytes: &Bytes, what: &'static str) -> Result<u64, super::codec::Error> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(super::codec::Error::InvalidPacket(what))
}

impl TryFrom<RawPacket> for Command {
    type Error = super::codec::Error;

    fn try_from(p: RawPacket) -> Result<Self, Self::Error> {
        use super::codec::Error as E;
        if p.magic != Magic::Request {
            return Err(E::InvalidMagic);
        }
        let mut a = p.args.into_iter();
        let mut next = || a.next().ok_or(E::InvalidPacket("missing field"));

        Ok(match p.command {
            CommandId::CanDo => Command::CanDo { function: next()? },
            CommandId::CanDoTimeout => {
                let function = next()?;
                let timeout = u32_field(&next()?, "timeout")?;
                Command::CanDoTimeout { function, timeout }
            },
            CommandId::CantDo => Command::CantDo { function: next()? },
            CommandId::ResetAbilities => Command::ResetAbilities,
            CommandId::PreSleep => Command::PreSleep,
            CommandId::GrabJob => Command::GrabJob,
            CommandId::GrabJobUniq => Command::GrabJobUniq,
            CommandId::WorkStatus => {
                let handle = next()?;
                let numerator = u32_field(&next()?, "numerator")?;
                let denominator = u32_field(&next()?, "denominator")?;
                Command::WorkStatus { handle, numerator, denominator }
            },
            CommandId::WorkComplete => {
                let handle = next()?;
                let data = next()?;
                Command::WorkComplete { handle, data }
            },
            CommandId::WorkFail => Command::WorkFail { handle: next()? },
            CommandId::WorkData => {
                let handle = next()?;
                let data = next()?;
                Command::WorkData { handle, data }
            },
            CommandId::WorkWarning => {
                let handle = next()?;
                let data = next()?;
                Command::WorkWarning { handle, data }
            },
            CommandId::WorkException => {
                let handle = next()?;
                let data = next()?;
                Command::WorkException { handle, data }
            },
            CommandId::AllYours => Command::AllYours,
            CommandId::SetClientId => Command::SetClientId { id: next()? },
            CommandId::SubmitJob => {
                let function = next()?;
                let unique = next()?;
                let data = next()?;
                Command::SubmitJob {
                    priority: Priority::Normal,
                    background: false,
                    function,
                    unique,
                    data,
                }
            },
            CommandId::SubmitJobBg => {
                let function = next()?;
                let unique = next()?;
                let data = next()?;
                Command::SubmitJob {
                    priority: Priority::Normal,
                    background: true,
                    function,
                    unique,
                    data,
                }
            },
            CommandId::SubmitJobHigh => {
                let function = next()?;
                let unique = next()?;
                let data = next()?;
                Command::SubmitJob {
                    priority: Priority::High,
                    background: false,
                    function,
                    unique,
                    data,
                }
            },
            CommandId::SubmitJobHighBg => {
                let function = next()?;
                let unique = next()?;
                let data = next()?;
                Command::SubmitJob {
                    priority: Priority::High,
                    background: true,
                    function,
                    unique,
                    data,
                }
            },
            CommandId::SubmitJobLow => {
                let function = next()?;
                let unique = next()?;
                let data = next()?;
                Command::SubmitJob {
                    priority: Priority::Low,
                    background: false,
                    function,
                    unique,
                    data,
                }
            },
            CommandId::SubmitJobLowBg => {
                let function = next()?;
                let unique = next()?;
                let data = next()?;
                Command::SubmitJob {
                    priority: Priority::Low,
                    background: true,
                    function,
                    unique,
                    data,
                }
            },
            CommandId::SubmitJobSched => {
                let function = next()?;
                let unique = next()?;
                let minute = u32_field(&next()?, "minute")?;
                let hour = u32_field(&next()?, "hour")?;
                let day = u32_field(&next()?, "day")?;
                let month = u32_field(&next()?, "month")?;
                let year = u32_field(&next()?, "year")?;
                let data = next()?;
                Command::SubmitJobSched { function, unique, minute, hour, day, month, year, data }
            },
            CommandId::SubmitJobEpoch => {
                let function = next()?;
                let unique = next()?;
                let epoch = u64_field(&next()?, "epoch")?;
                let data = next()?;
                Command::SubmitJobEpoch { function, unique, epoch, data }
            },
            CommandId::GetStatus => Command::GetStatus { handle: next()? },
            CommandId::OptionReq => Command::OptionReq { option: next()? },
            CommandId::EchoReq => Command::EchoReq { data: next()? },
            other => return Err(E::InvalidCommand(other.name())),
        })
    }
}

impl Response {
    pub fn command_id(&self) -> CommandId {
        match self {
            Response::Noop => CommandId::Noop,
            Response::JobCreated { .. } => CommandId::JobCreated,
            Response::NoJob => CommandId::NoJob,
            Response::JobAssign { .. } => CommandId::JobAssign,
            Response::JobAssignUniq { .. } => CommandId::JobAssignUniq,
            Response::WorkStatus { .. } => CommandId::WorkStatus,
            Response::WorkComplete { .. } => CommandId::WorkComplete,
            Response::WorkFail { .. } => CommandId::WorkFail,
            Response::WorkData { .. } => CommandId::WorkData,
            Response::WorkWarning { .. } => CommandId::WorkWarning,
            Response::WorkException { .. } => CommandId::WorkException,
            Response::StatusRes { .. } => CommandId::StatusRes,
            Response::OptionRes { .. } => CommandId::OptionRes,
            Response::EchoRes { .. } => CommandId::EchoRes,
            Response::Error { .. } => CommandId::Error,
        }
    }

    /// Breaks the typed response into the raw NUL-delimited field list that
    /// [`super::codec::pack`] serialises.
    pub fn into_fields(self) -> Vec<Bytes> {
        fn num(n: impl std::fmt::Display) -> Bytes {
            Bytes::from(n.to_string())
        }
        match self {
            Response::Noop | Response::NoJob => vec![],
            Response::JobCreated { handle } => vec![handle],
            Response::JobAssign { handle, function, data } => vec![handle, function, data],
            Response::JobAssignUniq { handle, function, unique, data } => {
                vec![handle, function, unique, data]
            },
            Response::WorkStatus { handle, numerator, denominator } => {
                vec![handle, num(numerator), num(denominator)]
            },
            Response::WorkComplete { handle, data } => vec![handle, data],
            Response::WorkFail { handle } => vec![handle],
            Response::WorkData { handle, data } => vec![handle, data],
            Response::WorkWarning { handle, data } => vec![handle, data],
            Response::WorkException { handle, data } => vec![handle, data],
            Response::StatusRes { handle, known, running, numerator, denominator } => vec![
                handle,
                num(known as u8),
                num(running as u8),
                num(numerator),
                num(denominator),
            ],
            Response::OptionRes { option } => vec![option],
            Response::EchoRes { data } => vec![data],
            Response::Error { code, text } => vec![Bytes::from(code), text],
        }
    }
}

/// Maps a wire error code back to one of the static strings the server
/// emits, for client-side decoding. Unrecognised codes fall back to a
/// generic label rather than failing to decode the packet.
fn known_error_code(code: &[u8]) -> &'static str {
    match code {
        b"job_queue_full" => "job_queue_full",
        b"queue_error" => "queue_error",
        b"unknown_option" => "unknown_option",
        b"invalid_packet" => "invalid_packet",
        _ => "error",
    }
}

impl TryFrom<RawPacket> for Response {
    type Error = super::codec::Error;

    fn try_from(p: RawPacket) -> Result<Self, Self::Error> {
        use super::codec::Error as E;
        if p.magic != Magic::Response {
            return Err(E::InvalidMagic);
        }
        let mut a = p.args.into_iter();
        let mut next = || a.next().ok_or(E::InvalidPacket("missing field"));

        Ok(match p.command {
            CommandId::Noop => Response::Noop,
            CommandId::JobCreated => Response::JobCreated { handle: next()? },
            CommandId::NoJob => Response::NoJob,
            CommandId::JobAssign => {
                let handle = next()?;
                let function = next()?;
                let data = next()?;
                Response::JobAssign { handle, function, data }
            },
            CommandId::JobAssignUniq => {
                let handle = next()?;
                let function = next()?;
                let unique = next()?;
                let data = next()?;
                Response::JobAssignUniq { handle, function, unique, data }
            },
            CommandId::WorkStatus => {
                let handle = next()?;
                let numerator = u32_field(&next()?, "numerator")?;
                let denominator = u32_field(&next()?, "denominator")?;
                Response::WorkStatus { handle, numerator, denominator }
            },
            CommandId::WorkComplete => {
                let handle = next()?;
                let data = next()?;
                Response::WorkComplete { handle, data }
            },
            CommandId::WorkFail => Response::WorkFail { handle: next()? },
            CommandId::WorkData => {
                let handle = next()?;
                let data = next()?;
                Response::WorkData { handle, data }
            },
            CommandId::WorkWarning => {
                let handle = next()?;
                let data = next()?;
                Response::WorkWarning { handle, data }
            },
            CommandId::WorkException => {
                let handle = next()?;
                let data = next()?;
                Response::WorkException { handle, data }
            },
            CommandId::StatusRes => {
                let handle = next()?;
                let known = u32_field(&next()?, "known")? != 0;
                let running = u32_field(&next()?, "running")? != 0;
                let numerator = u32_field(&next()?, "numerator")?;
                let denominator = u32_field(&next()?, "denominator")?;
                Response::StatusRes { handle, known, running, numerator, denominator }
            },
            CommandId::OptionRes => Response::OptionRes { option: next()? },
            CommandId::EchoRes => Response::EchoRes { data: next()? },
            CommandId::Error => {
                let code = next()?;
                let text = next()?;
                Response::Error { code: known_error_code(&code), text }
            },
            other => return Err(E::InvalidCommand(other.name())),
        })
    }
}

impl Command {
    pub fn command_id(&self) -> CommandId {
        match self {
            Command::CanDo { .. } => CommandId::CanDo,
            Command::CanDoTimeout { .. } => CommandId::CanDoTimeout,
            Command::CantDo { .. } => CommandId::CantDo,
            Command::ResetAbilities => CommandId::ResetAbilities,
            Command::PreSleep => CommandId::PreSleep,
            Command::GrabJob => CommandId::GrabJob,
            Command::GrabJobUniq => CommandId::GrabJobUniq,
            Command::WorkStatus { .. } => CommandId::WorkStatus,
            Command::WorkComplete { .. } => CommandId::WorkComplete,
            Command::WorkFail { .. } => CommandId::WorkFail,
            Command::WorkData { .. } => CommandId::WorkData,
            Command::WorkWarning { .. } => CommandId::WorkWarning,
            Command::WorkException { .. } => CommandId::WorkException,
            Command::AllYours => CommandId::AllYours,
            Command::SetClientId { .. } => CommandId::SetClientId,
            Command::SubmitJob { priority, background, .. } => match (priority, background) {
                (Priority::Normal, false) => CommandId::SubmitJob,
                (Priority::Normal, true) => CommandId::SubmitJobBg,
                (Priority::High, false) => CommandId::SubmitJobHigh,
                (Priority::High, true) => CommandId::SubmitJobHighBg,
                (Priority::Low, false) => CommandId::SubmitJobLow,
                (Priority::Low, true) => CommandId::SubmitJobLowBg,
            },
            Command::SubmitJobSched { .. } => CommandId::SubmitJobSched,
            Command::SubmitJobEpoch { .. } => CommandId::SubmitJobEpoch,
            Command::GetStatus { .. } => CommandId::GetStatus,
            Command::OptionReq { .. } => CommandId::OptionReq,
            Command::EchoReq { .. } => CommandId::EchoReq,
        }
    }

    /// Breaks the typed request into the raw NUL-delimited field list a
    /// client/worker-side encoder serialises (mirrors [`Response::into_fields`]).
    pub fn into_fields(self) -> Vec<Bytes> {
        fn num(n: impl std::fmt::Display) -> Bytes {
            Bytes::from(n.to_string())
        }
        match self {
            Command::CanDo { function } => vec![function],
            Command::CanDoTimeout { function, timeout } => vec![function, num(timeout)],
            Command::CantDo { function } => vec![function],
            Command::ResetAbilities | Command::PreSleep | Command::GrabJob | Command::GrabJobUniq | Command::AllYours => {
                vec![]
            },
            Command::WorkStatus { handle, numerator, denominator } => {
                vec![handle, num(numerator), num(denominator)]
            },
            Command::WorkComplete { handle, data } => vec![handle, data],
            Command::WorkFail { handle } => vec![handle],
            Command::WorkData { handle, data } => vec![handle, data],
            Command::WorkWarning { handle, data } => vec![handle, data],
            Command::WorkException { handle, data } => vec![handle, data],
            Command::SetClientId { id } => vec![id],
            Command::SubmitJob { function, unique, data, .. } => vec![function, unique, data],
            Command::SubmitJobSched { function, unique, minute, hour, day, month, year, data } => {
                vec![function, unique, num(minute), num(hour), num(day), num(month), num(year), data]
            },
            Command::SubmitJobEpoch { function, unique, epoch, data } => {
                vec![function, unique, num(epoch), data]
            },
            Command::GetStatus { handle } => vec![handle],
            Command::OptionReq { option } => vec![option],
            Command::EchoReq { data } => vec![data],
        }
    }
}
