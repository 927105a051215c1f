use btoi::btou;
use nom::{
    bytes::streaming::take_while_m_n,
    character::is_digit,
    combinator::map_res,
    IResult,
};
use std::fmt;

mod ascii;
pub use ascii::{parse_ascii_response, parse_ascii_stats_response};

/// A value from MemcacheDB.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    /// The key, as sent on the wire (i.e. namespaced).
    pub key: Vec<u8>,
    /// Flags stored alongside this key.
    pub flags: u32,
    /// Data for this key.
    pub data: Vec<u8>,
}

/// Status of a MemcacheDB operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    /// The value was stored.
    Stored,
    /// The value was not stored.
    NotStored,
    /// The key was deleted.
    Deleted,
    /// The key was not found.
    NotFound,
    /// The command was acknowledged (`flush_all`).
    Ok,
    /// An error occurred for the given operation.
    Error(ErrorKind),
}

/// Errors related to a MemcacheDB operation.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    /// A bare `ERROR` reply: the command does not exist or failed generically.
    Generic(String),
    /// Protocol-level error i.e. an invalid response from the server for the
    /// given operation.
    Protocol(Option<String>),
    /// An error from the server related to CLIENT_ERROR.
    Client(String),
    /// An error from the server related to SERVER_ERROR.
    Server(String),
}

/// Response to a MemcacheDB operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// The status of a given operation, which may or may not have succeeded.
    Status(Status),
    /// Data response, which is only returned for retrievals. `None` means the
    /// reply was a bare `END` with no values.
    Data(Option<Vec<Value>>),
    /// Resulting value of a key after an increment/decrement operation.
    IncrDecr(u64),
}

/// One frame of a `stats` reply.
#[derive(Clone, Debug, PartialEq)]
pub enum StatsResponse {
    /// A stats entry, represented by a name and its raw value.
    Entry(String, String),
    /// End of stats output.
    End,
}

/// A `stats` value after interpretation.
#[derive(Clone, Debug, PartialEq)]
pub enum StatValue {
    Int(u64),
    Float(f64),
    Text(String),
}

/// Interprets a raw stat value. `version` always stays textual,
/// `rusage_user`/`rusage_system` are `<sec>:<usec>` pairs converted to
/// seconds (a missing `:<usec>` means zero), all-digit values become
/// integers, and anything else is passed through as text.
pub fn interpret_stat(name: &str, raw: String) -> StatValue {
    match name {
        "version" => StatValue::Text(raw),
        "rusage_user" | "rusage_system" => {
            let mut parts = raw.splitn(2, ':');
            let seconds = parts.next().unwrap_or("").parse::<f64>();
            let micros = match parts.next() {
                Some(us) => us.parse::<f64>(),
                None => Ok(0.0),
            };
            match (seconds, micros) {
                (Ok(s), Ok(us)) => StatValue::Float(s + us / 1_000_000.0),
                _ => StatValue::Text(raw),
            }
        }
        _ => {
            if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
                match raw.parse::<u64>() {
                    Ok(n) => StatValue::Int(n),
                    Err(_) => StatValue::Text(raw),
                }
            } else {
                StatValue::Text(raw)
            }
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Stored => write!(f, "stored"),
            Self::NotStored => write!(f, "not stored"),
            Self::Deleted => write!(f, "deleted"),
            Self::NotFound => write!(f, "not found"),
            Self::Ok => write!(f, "ok"),
            Self::Error(ek) => write!(f, "error: {}", ek),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Generic(s) => {
                if s.is_empty() {
                    write!(f, "generic")
                } else {
                    write!(f, "generic: {}", s)
                }
            }
            Self::Protocol(s) => match s {
                Some(s) => write!(f, "protocol: {}", s),
                None => write!(f, "protocol"),
            },
            Self::Client(s) => write!(f, "client: {}", s),
            Self::Server(s) => write!(f, "server: {}", s),
        }
    }
}

// shared parsing functions
pub(crate) fn parse_u64(buf: &[u8]) -> IResult<&[u8], u64> {
    map_res(take_while_m_n(1, 20, is_digit), btou)(buf)
}

pub(crate) fn parse_u32(buf: &[u8]) -> IResult<&[u8], u32> {
    map_res(take_while_m_n(1, 10, is_digit), btou)(buf)
}

pub(crate) fn is_key_char(chr: u8) -> bool {
    chr > 32 && chr < 127
}
