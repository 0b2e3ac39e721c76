//! Minimal RESP2 client codec.
//!
//! ```text
//! Request  *<argc>\r\n($<len>\r\n<arg>\r\n)*
//! Replies  +simple  -error  :integer  $<len> bulk ($-1 nil)  *<n> array (*-1 nil)
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{BackendError, BackendResult};

/// One decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub(crate) fn into_integer(self) -> BackendResult<i64> {
        match self {
            RespValue::Integer(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Bulk string, `None` for nil.
    pub(crate) fn into_string(self) -> BackendResult<Option<String>> {
        match self {
            RespValue::Bulk(None) => Ok(None),
            RespValue::Bulk(Some(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| BackendError::Protocol(format!("non-utf8 reply: {e}"))),
            RespValue::Simple(s) => Ok(Some(s)),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    /// Array of bulk strings; nil arrays are empty.
    pub(crate) fn into_strings(self) -> BackendResult<Vec<String>> {
        match self {
            RespValue::Array(None) => Ok(Vec::new()),
            RespValue::Array(Some(items)) => items
                .into_iter()
                .map(|item| {
                    item.into_string()?
                        .ok_or_else(|| BackendError::Protocol("nil array element".to_string()))
                })
                .collect(),
            other => Err(unexpected("array", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &RespValue) -> BackendError {
    BackendError::Protocol(format!("expected {wanted}, got {got:?}"))
}

/// Build a RESP array command from parts.
pub(crate) fn encode_command(parts: &[&str]) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(16 + parts.iter().map(|p| p.len() + 16).sum::<usize>());
    cmd.push(b'*');
    cmd.extend_from_slice(parts.len().to_string().as_bytes());
    cmd.extend_from_slice(b"\r\n");
    for part in parts {
        cmd.push(b'$');
        cmd.extend_from_slice(part.len().to_string().as_bytes());
        cmd.extend_from_slice(b"\r\n");
        cmd.extend_from_slice(part.as_bytes());
        cmd.extend_from_slice(b"\r\n");
    }
    cmd
}

/// Decode one reply from a buffered reader.
pub(crate) fn read_value<R: BufRead>(reader: &mut R) -> BackendResult<RespValue> {
    let line = read_line(reader)?;
    let (tag, rest) = line
        .split_first()
        .ok_or_else(|| BackendError::Protocol("empty reply line".to_string()))?;
    let text = || String::from_utf8_lossy(rest).into_owned();

    match tag {
        b'+' => Ok(RespValue::Simple(text())),
        b'-' => Ok(RespValue::Error(text())),
        b':' => Ok(RespValue::Integer(parse_int(rest)?)),
        b'$' => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(RespValue::Bulk(None));
            }
            let mut buf = vec![0u8; len as usize + 2];
            reader.read_exact(&mut buf)?;
            if !buf.ends_with(b"\r\n") {
                return Err(BackendError::Protocol("bulk string missing CRLF".to_string()));
            }
            buf.truncate(len as usize);
            Ok(RespValue::Bulk(Some(buf)))
        }
        b'*' => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(RespValue::Array(None));
            }
            let items = (0..len)
                .map(|_| read_value(reader))
                .collect::<BackendResult<Vec<_>>>()?;
            Ok(RespValue::Array(Some(items)))
        }
        other => Err(BackendError::Protocol(format!(
            "unknown reply type {:?}",
            *other as char
        ))),
    }
}

/// Read up to CRLF, returning the line without it.
fn read_line<R: BufRead>(reader: &mut R) -> BackendResult<Vec<u8>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(BackendError::Closed);
    }
    if !line.ends_with(b"\r\n") {
        return Err(BackendError::Protocol("reply line missing CRLF".to_string()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_int(bytes: &[u8]) -> BackendResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            BackendError::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(bytes)
            ))
        })
}

/// A TCP connection speaking RESP.
pub(crate) struct RespConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl RespConnection {
    /// Connect with `timeout` applied to the connect and to every read/write.
    ///
    /// `addr` may list several `host:port` entries separated by commas; they
    /// are tried in order and the first that accepts is used.
    pub(crate) fn open(addr: &str, timeout: Duration) -> BackendResult<Self> {
        let connect_err = |reason: String| BackendError::Connect {
            addr: addr.to_string(),
            reason,
        };

        let mut last_err = None;
        let mut socks = Vec::new();
        for entry in addr.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            match entry.to_socket_addrs() {
                Ok(resolved) => socks.extend(resolved),
                Err(e) => last_err = Some(format!("{entry}: {e}")),
            }
        }

        for sock in socks {
            match TcpStream::connect_timeout(&sock, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    let writer = stream.try_clone()?;
                    return Ok(Self {
                        reader: BufReader::new(stream),
                        writer,
                    });
                }
                Err(e) => last_err = Some(e.to_string()),
            }
        }
        Err(connect_err(
            last_err.unwrap_or_else(|| "no addresses resolved".to_string()),
        ))
    }

    pub(crate) fn send(&mut self, parts: &[&str]) -> BackendResult<()> {
        self.writer.write_all(&encode_command(parts))?;
        self.writer.flush()?;
        Ok(())
    }

    pub(crate) fn read(&mut self) -> BackendResult<RespValue> {
        read_value(&mut self.reader)
    }

    /// Send a command and wait for its reply. Error replies become
    /// [`BackendError::Server`].
    pub(crate) fn call(&mut self, parts: &[&str]) -> BackendResult<RespValue> {
        self.send(parts)?;
        match self.read()? {
            RespValue::Error(msg) => Err(BackendError::Server(msg)),
            value => Ok(value),
        }
    }

    /// Like [`Self::read`], but returns `Ok(None)` when the read timeout
    /// lapses before any byte of a new reply has arrived.
    pub(crate) fn poll(&mut self) -> BackendResult<Option<RespValue>> {
        if self.reader.buffer().is_empty() {
            match self.reader.fill_buf() {
                Ok([]) => return Err(BackendError::Closed),
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.read().map(Some)
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) -> BackendResult<()> {
        self.writer.set_read_timeout(timeout)?;
        Ok(())
    }
}
