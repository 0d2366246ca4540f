//! RESP2 encoder and decoder used by the pooled connections

use std::io::{self, BufRead};

use super::error::ConnectionError;

const CRLF: &[u8] = b"\r\n";

/// A decoded reply
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n
    BulkString(Vec<u8>),
    /// $-1\r\n or *-1\r\n
    Null,
    /// *2\r\n...
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Error message, if this is an error reply
    pub fn error_message(&self) -> Option<&str> {
        match self {
            RespValue::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Turn an error reply into `ConnectionError::Server`
    pub fn into_result(self) -> Result<RespValue, ConnectionError> {
        match self {
            RespValue::Error(e) => Err(ConnectionError::Server(e)),
            other => Ok(other),
        }
    }

    /// Simple or bulk string as UTF-8
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s == "OK")
    }
}

/// Command encoder with a reusable buffer
pub struct RespEncoder {
    buf: Vec<u8>,
}

impl RespEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode one command as an array of bulk strings
    pub fn encode_command(&mut self, args: &[&[u8]]) {
        self.header(b'*', args.len());
        for arg in args {
            self.header(b'$', arg.len());
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(CRLF);
        }
    }

    pub fn encode_command_str(&mut self, args: &[&str]) {
        let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
        self.encode_command(&byte_args);
    }

    /// `<prefix><n>\r\n`
    #[inline]
    fn header(&mut self, prefix: u8, n: usize) {
        let mut digits = itoa::Buffer::new();
        self.buf.push(prefix);
        self.buf.extend_from_slice(digits.format(n).as_bytes());
        self.buf.extend_from_slice(CRLF);
    }
}

/// Reads replies one at a time from a buffered stream
pub struct RespDecoder<R> {
    reader: R,
    line: String,
}

impl<R: BufRead> RespDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::with_capacity(128),
        }
    }

    /// Next complete reply; EOF before any byte is `UnexpectedEof`
    pub fn decode(&mut self) -> io::Result<RespValue> {
        let (kind, content) = self.next_line()?;
        match kind {
            b'+' => Ok(RespValue::SimpleString(content)),
            b'-' => Ok(RespValue::Error(content)),
            b':' => content
                .parse()
                .map(RespValue::Integer)
                .map_err(|_| invalid_data(format!("bad integer reply {:?}", content))),
            b'$' => match parse_length(&content)? {
                None => Ok(RespValue::Null),
                Some(len) => self.read_bulk(len).map(RespValue::BulkString),
            },
            b'*' => match parse_length(&content)? {
                None => Ok(RespValue::Null),
                Some(count) => (0..count)
                    .map(|_| self.decode())
                    .collect::<io::Result<Vec<_>>>()
                    .map(RespValue::Array),
            },
            other => Err(invalid_data(format!(
                "unknown reply type {:?}",
                other as char
            ))),
        }
    }

    /// Type byte and the rest of the line without CRLF
    fn next_line(&mut self) -> io::Result<(u8, String)> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ));
        }

        let line = self.line.trim_end_matches(['\r', '\n']);
        match line.as_bytes().first() {
            Some(&kind) => Ok((kind, line[1..].to_string())),
            None => Err(invalid_data("empty reply line".to_string())),
        }
    }

    fn read_bulk(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut data = vec![0u8; len + CRLF.len()];
        self.reader.read_exact(&mut data)?;
        if !data.ends_with(CRLF) {
            return Err(invalid_data("bulk string missing CRLF".to_string()));
        }
        data.truncate(len);
        Ok(data)
    }
}

/// Bulk/array length; negative means null
fn parse_length(content: &str) -> io::Result<Option<usize>> {
    let len: i64 = content
        .parse()
        .map_err(|_| invalid_data(format!("bad length {:?}", content)))?;
    Ok(usize::try_from(len).ok())
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
