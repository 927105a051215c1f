use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Deadline for establishing a fresh TCP connection, much shorter than the
/// per-I/O timeout.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

const READ_CHUNK_SIZE: usize = 4096;

/// One TCP connection to one backend.
#[derive(Debug)]
pub(crate) enum Connection {
    Tcp(TcpStream),
}

impl Connection {
    /// Connects to `host:port`, trying each resolved address in turn with
    /// [`CONNECT_TIMEOUT`]. `timeout` bounds every subsequent read and write
    /// on the stream; `None` disables the per-I/O deadline.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<Self> {
        let addrs = (host, port).to_socket_addrs()?.collect::<Vec<SocketAddr>>();

        let mut last_err = None;

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(timeout)?;
                    stream.set_write_timeout(timeout)?;
                    return Ok(Connection::Tcp(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "could not resolve to any address",
            )
        }))
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.write_all(buf),
        }
    }

    /// Reads one chunk off the stream into `buf`, returning the number of
    /// bytes read. Zero means the peer closed the connection.
    pub fn read_into(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = match self {
            Connection::Tcp(s) => s.read(&mut chunk)?,
        };
        buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Best-effort shutdown; errors on an already-broken stream are ignored.
    pub fn shutdown(&mut self) {
        match self {
            Connection::Tcp(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
        }
    }
}
