//! A single MemcacheDB server endpoint.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, warn};

use crate::connection::Connection;
use crate::error::{Error, OpError};
use crate::parser::{parse_ascii_response, parse_ascii_stats_response, ErrorKind};
use crate::parser::{Response, StatsResponse, Status};

/// Port MemcacheDB listens on by default.
pub const DEFAULT_PORT: u16 = 21201;

/// Default weight for a server given without one.
pub const DEFAULT_WEIGHT: u32 = 1;

/// How long a server stays quarantined after being marked dead.
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(30);

/// One backend server: at most one TCP connection, opened lazily on first
/// use and torn down on failure. While quarantined, no connection attempts
/// are made.
pub(crate) struct Node {
    host: String,
    port: u16,
    weight: u32,
    status: String,
    retry_at: Option<Instant>,
    conn: Option<Connection>,
    buf: BytesMut,
    last_read_n: Option<usize>,
    timeout: Option<Duration>,
}

impl Node {
    /// Creates a node from a `host`, `host:port`, or `host:port:weight`
    /// spec. No connection is made until the first request targets the node.
    pub(crate) fn new(spec: &str, timeout: Option<Duration>) -> Result<Node, Error> {
        let bad = || Error::BadArgument(format!("invalid server spec `{}`", spec));

        let mut parts = spec.split(':');
        let host = match parts.next() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(bad()),
        };
        let port = match parts.next() {
            Some(port) => port.parse::<u16>().map_err(|_| bad())?,
            None => DEFAULT_PORT,
        };
        let weight = match parts.next() {
            Some(weight) => weight.parse::<u32>().map_err(|_| bad())?,
            None => DEFAULT_WEIGHT,
        };
        if weight == 0 || parts.next().is_some() {
            return Err(bad());
        }

        Ok(Node {
            host,
            port,
            weight,
            status: "NOT CONNECTED".to_string(),
            retry_at: None,
            conn: None,
            buf: BytesMut::new(),
            last_read_n: None,
            timeout,
        })
    }

    pub(crate) fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn weight(&self) -> u32 {
        self.weight
    }

    pub(crate) fn status(&self) -> &str {
        &self.status
    }

    /// Returns the live connection, opening one if needed. `None` means the
    /// node is dead: quarantined, or the fresh connect attempt just failed.
    pub(crate) fn socket(&mut self) -> Option<&mut Connection> {
        if self.conn.is_some() {
            return self.conn.as_mut();
        }

        if let Some(retry_at) = self.retry_at {
            if retry_at > Instant::now() {
                return None;
            }
        }

        match Connection::connect(&self.host, self.port, self.timeout) {
            Ok(conn) => {
                debug!("{}: connected", self.name());
                self.conn = Some(conn);
                self.retry_at = None;
                self.status = "CONNECTED".to_string();
                self.buf.clear();
                self.last_read_n = None;
                self.conn.as_mut()
            }
            Err(e) => {
                self.mark_dead(&e.to_string());
                None
            }
        }
    }

    /// Whether a request could be served right now. Opens the connection as
    /// a side effect, the same probe routing performs.
    pub(crate) fn alive(&mut self) -> bool {
        self.socket().is_some()
    }

    /// Quarantines the node for [`RETRY_DELAY`].
    pub(crate) fn mark_dead(&mut self, reason: &str) {
        if let Some(mut conn) = self.conn.take() {
            conn.shutdown();
        }
        self.buf.clear();
        self.last_read_n = None;
        self.retry_at = Some(Instant::now() + RETRY_DELAY);
        self.status = format!(
            "DEAD: {}, will retry in {}s",
            reason,
            RETRY_DELAY.as_secs()
        );
        warn!("{} marked dead: {}", self.name(), reason);
    }

    /// Closes the connection without quarantining; the next use reconnects
    /// immediately.
    pub(crate) fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.shutdown();
        }
        self.buf.clear();
        self.last_read_n = None;
        self.retry_at = None;
        self.status = "NOT CONNECTED".to_string();
    }

    /// Runs one command against this node: write the request, read the reply
    /// with `read`. A socket-level failure (I/O error, timeout, EOF, reply
    /// that doesn't parse) is retried once on a fresh connection; a second
    /// failure quarantines the node and reports it unusable so the caller
    /// can fail over. Errors the server reported on a well-formed reply line
    /// are final.
    pub(crate) fn exchange<R, F>(&mut self, command: &[u8], read: F) -> Result<R, OpError>
    where
        F: Fn(&mut Node) -> Result<R, Error>,
    {
        let mut retried = false;
        loop {
            if self.socket().is_none() {
                return Err(OpError::Unusable(Error::Connection(self.status.clone())));
            }

            let result = match self.send(command) {
                Ok(()) => read(self),
                Err(e) => Err(e),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_server_reported() => return Err(OpError::Fail(err)),
                Err(err) => {
                    if retried {
                        self.mark_dead(&err.to_string());
                        return Err(OpError::Unusable(Error::Connection(self.status.clone())));
                    }
                    warn!("{}: socket failure, retrying: {}", self.name(), err);
                    self.close();
                    retried = true;
                }
            }
        }
    }

    fn send(&mut self, command: &[u8]) -> Result<(), Error> {
        match self.conn.as_mut() {
            Some(conn) => conn.write_all(command).map_err(Error::Io),
            None => Err(Error::Connection(self.status.clone())),
        }
    }

    fn drive_receive<R, F>(&mut self, op: F) -> Result<R, Error>
    where
        F: Fn(&[u8]) -> Result<Option<(usize, R)>, ErrorKind>,
    {
        // If we serviced a previous request, advance our buffer forward.
        if let Some(n) = self.last_read_n.take() {
            let _ = self.buf.split_to(n);
        }

        let mut needs_more_data = false;
        loop {
            if self.buf.is_empty() || needs_more_data {
                let conn = match self.conn.as_mut() {
                    Some(conn) => conn,
                    None => return Err(Error::Connection(self.status.clone())),
                };
                let n = conn.read_into(&mut self.buf)?;
                if n == 0 {
                    return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
            }

            // Try and parse out a response.
            match op(&self.buf) {
                // We got a response.
                Ok(Some((n, response))) => {
                    self.last_read_n = Some(n);
                    return Ok(response);
                }
                // We didn't have enough data, so loop around and try again.
                Ok(None) => {
                    needs_more_data = true;
                    continue;
                }
                // Invalid data not matching the protocol.
                Err(kind) => return Err(Status::Error(kind).into()),
            }
        }
    }

    pub(crate) fn read_response(&mut self) -> Result<Response, Error> {
        self.drive_receive(parse_ascii_response)
    }

    pub(crate) fn read_stats_response(&mut self) -> Result<StatsResponse, Error> {
        self.drive_receive(parse_ascii_stats_response)
    }
}
