use nom::{
    branch::alt,
    bytes::streaming::{tag, take, take_until, take_while, take_while1},
    character::streaming::crlf,
    combinator::{map, map_res, value},
    multi::fold_many0,
    sequence::{preceded, terminated, tuple},
    IResult,
};

use super::{is_key_char, parse_u32, parse_u64, ErrorKind, Response, StatsResponse, Status, Value};

fn parse_ascii_status(buf: &[u8]) -> IResult<&[u8], Response> {
    terminated(
        alt((
            value(Response::Status(Status::Stored), tag(b"STORED")),
            value(Response::Status(Status::NotStored), tag(b"NOT_STORED")),
            value(Response::Status(Status::Deleted), tag(b"DELETED")),
            value(Response::Status(Status::NotFound), tag(b"NOT_FOUND")),
            value(Response::Status(Status::Ok), tag(b"OK")),
        )),
        crlf,
    )(buf)
}

fn parse_ascii_error(buf: &[u8]) -> IResult<&[u8], Response> {
    let parser = terminated(
        alt((
            map_res(preceded(tag(b"CLIENT_ERROR "), take_until("\r\n")), |s| {
                std::str::from_utf8(s).map(|s| ErrorKind::Client(s.to_string()))
            }),
            map_res(preceded(tag(b"SERVER_ERROR "), take_until("\r\n")), |s| {
                std::str::from_utf8(s).map(|s| ErrorKind::Server(s.to_string()))
            }),
            map_res(preceded(tag(b"ERROR"), take_until("\r\n")), |s: &[u8]| {
                std::str::from_utf8(s).map(|s| ErrorKind::Generic(s.trim().to_string()))
            }),
        )),
        crlf,
    );

    map(parser, |e| Response::Status(Status::Error(e)))(buf)
}

// The reply to incr/decr may carry trailing spaces before the CRLF.
fn parse_ascii_incrdecr(buf: &[u8]) -> IResult<&[u8], Response> {
    terminated(
        map(parse_u64, Response::IncrDecr),
        tuple((take_while(|chr| chr == b' '), crlf)),
    )(buf)
}

fn parse_ascii_value(buf: &[u8]) -> IResult<&[u8], Value> {
    // VALUE <key> <flags> <bytes>\r\n
    // <data block>\r\n
    let (buf, (_, key, _, flags, _, len, _)) = tuple((
        tag("VALUE "),
        take_while1(is_key_char),
        tag(" "),
        parse_u32,
        tag(" "),
        parse_u64,
        crlf,
    ))(buf)?;
    let (buf, data) = terminated(take(len), crlf)(buf)?;
    Ok((
        buf,
        Value {
            key: key.to_vec(),
            flags,
            data: data.to_vec(),
        },
    ))
}

fn parse_ascii_data(buf: &[u8]) -> IResult<&[u8], Response> {
    let values = map(
        fold_many0(
            parse_ascii_value,
            || None,
            |xs, x| {
                let mut xs: Vec<Value> = xs.unwrap_or_default();
                xs.push(x);
                Some(xs)
            },
        ),
        Response::Data,
    );

    terminated(values, tag("END\r\n"))(buf)
}

fn parse_ascii_response_inner(buf: &[u8]) -> IResult<&[u8], Response> {
    alt((
        parse_ascii_status,
        parse_ascii_error,
        parse_ascii_incrdecr,
        parse_ascii_data,
    ))(buf)
}

/// Attempts to parse one complete response from `buf`.
///
/// `Ok(Some((n, response)))` means a full response was parsed out of the
/// first `n` bytes. `Ok(None)` means more data is needed. `Err` means the
/// buffer does not match the protocol.
pub fn parse_ascii_response(buf: &[u8]) -> Result<Option<(usize, Response)>, ErrorKind> {
    let total_bytes = buf.len();

    match parse_ascii_response_inner(buf) {
        Ok((remaining, response)) => Ok(Some((total_bytes - remaining.len(), response))),
        Err(nom::Err::Incomplete(_)) => Ok(None),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(ErrorKind::Protocol(Some(e.code.description().to_string())))
        }
    }
}

fn parse_ascii_stat_entry(buf: &[u8]) -> IResult<&[u8], StatsResponse> {
    // STAT <name> <value>\r\n
    let (buf, (_, name, _, val, _)) = tuple((
        tag("STAT "),
        take_while1(is_key_char),
        tag(" "),
        take_until("\r\n"),
        crlf,
    ))(buf)?;

    let name = String::from_utf8_lossy(name).to_string();
    let val = String::from_utf8_lossy(val).to_string();
    Ok((buf, StatsResponse::Entry(name, val)))
}

fn parse_ascii_stats_inner(buf: &[u8]) -> IResult<&[u8], StatsResponse> {
    alt((
        parse_ascii_stat_entry,
        value(StatsResponse::End, terminated(tag("END"), crlf)),
    ))(buf)
}

/// Attempts to parse one frame of a `stats` reply; same contract as
/// [`parse_ascii_response`].
pub fn parse_ascii_stats_response(buf: &[u8]) -> Result<Option<(usize, StatsResponse)>, ErrorKind> {
    let total_bytes = buf.len();

    match parse_ascii_stats_inner(buf) {
        Ok((remaining, response)) => Ok(Some((total_bytes - remaining.len(), response))),
        Err(nom::Err::Incomplete(_)) => Ok(None),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(ErrorKind::Protocol(Some(e.code.description().to_string())))
        }
    }
}
