//! Raw TCP connection to a single node
//!
//! The reader and writer halves are split over cloned sockets so replies can
//! be decoded straight from a `BufReader` while commands are batched in a
//! `BufWriter`.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::trace;

use super::commands::Commands;
use crate::config::{Endpoint, GroupConfig};
use crate::utils::{ConnectionError, RespDecoder, RespEncoder, RespValue};

/// One socket to one node
pub struct RawConnection {
    endpoint: Endpoint,
    writer: BufWriter<TcpStream>,
    reader: BufReader<TcpStream>,
    encoder: RespEncoder,
    read_timeout_ms: u64,
}

impl RawConnection {
    /// Open a TCP connection with a connect timeout
    pub fn connect(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self, ConnectionError> {
        let connect_failed = |source: io::Error| ConnectionError::ConnectFailed {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source,
        };

        let addr = endpoint
            .to_string()
            .to_socket_addrs()
            .map_err(connect_failed)?
            .next()
            .ok_or_else(|| {
                connect_failed(io::Error::new(
                    io::ErrorKind::NotFound,
                    "No addresses found",
                ))
            })?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(connect_failed)?;
        stream.set_nodelay(true).ok();

        let writer = BufWriter::with_capacity(16 * 1024, stream.try_clone().map_err(connect_failed)?);
        let reader = BufReader::with_capacity(16 * 1024, stream);

        trace!(endpoint = %endpoint, "Opened connection");

        Ok(Self {
            endpoint: endpoint.clone(),
            writer,
            reader,
            encoder: RespEncoder::with_capacity(256),
            read_timeout_ms: 0,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn set_timeouts(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
        self.reader.get_ref().set_read_timeout(timeout)?;
        self.writer.get_ref().set_write_timeout(timeout)
    }

    /// Send AUTH, with a username when ACLs are in use
    pub fn authenticate(&mut self, password: &str, username: Option<&str>) -> Result<(), ConnectionError> {
        let response = match username {
            Some(user) => self.execute_str(&["AUTH", user, password]),
            None => self.execute_str(&["AUTH", password]),
        }
        .map_err(|e| ConnectionError::AuthFailed(e.to_string()))?;

        match response {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(ConnectionError::AuthFailed(e)),
            other => Err(ConnectionError::AuthFailed(format!(
                "Unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Send SELECT (standalone and sharded only)
    pub fn select_db(&mut self, db: u32) -> Result<(), ConnectionError> {
        let mut buffer = itoa::Buffer::new();
        let reply = self.execute_str(&["SELECT", buffer.format(db)])?.into_result()?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(ConnectionError::Protocol(format!(
                "Unexpected SELECT response: {:?}",
                reply
            )))
        }
    }

    /// Raw CLUSTER NODES text
    pub fn cluster_nodes(&mut self) -> Result<String, ConnectionError> {
        match self.execute_str(&["CLUSTER", "NODES"])?.into_result()? {
            RespValue::BulkString(data) => String::from_utf8(data)
                .map_err(|e| ConnectionError::Protocol(format!("Invalid UTF-8: {}", e))),
            other => Err(ConnectionError::Protocol(format!(
                "Unexpected CLUSTER NODES response: {:?}",
                other
            ))),
        }
    }

    fn map_io(&self, e: io::Error) -> ConnectionError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                ConnectionError::Timeout(self.read_timeout_ms)
            }
            io::ErrorKind::UnexpectedEof => ConnectionError::Closed,
            _ => ConnectionError::Io(e),
        }
    }
}

impl Commands for RawConnection {
    fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        self.encoder.clear();
        self.encoder.encode_command(args);

        let sent = self
            .writer
            .write_all(self.encoder.as_bytes())
            .and_then(|_| self.writer.flush());
        if let Err(e) = sent {
            return Err(self.map_io(e));
        }

        let reply = RespDecoder::new(&mut self.reader).decode();
        reply.map_err(|e| self.map_io(e))
    }
}

/// Opens authenticated, database-selected connections for one group
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub auth_password: Option<String>,
    pub auth_username: Option<String>,
    pub dbnum: Option<u32>,
}

impl ConnectionFactory {
    pub fn from_group(config: &GroupConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            auth_password: config.password().map(String::from),
            auth_username: config.username().map(String::from),
            dbnum: config.database(),
        }
    }

    pub fn create(&self, endpoint: &Endpoint) -> Result<RawConnection, ConnectionError> {
        let mut conn = RawConnection::connect(endpoint, self.connect_timeout)?;

        conn.set_timeouts(Some(self.read_timeout))?;

        if let Some(ref password) = self.auth_password {
            conn.authenticate(password, self.auth_username.as_deref())?;
        }

        if let Some(db) = self.dbnum.filter(|&db| db != 0) {
            conn.select_db(db)?;
        }

        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CommandsExt;
    use std::net::TcpListener;

    #[test]
    fn test_connect_refused_reports_endpoint() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Endpoint::new("127.0.0.1", port);

        let err = RawConnection::connect(&endpoint, Duration::from_millis(200))
            .err()
            .unwrap();
        match err {
            ConnectionError::ConnectFailed { host, port: p, .. } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(p, port);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_execute_against_scripted_server() {
        use std::io::{BufRead, Write as _};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            // *1\r\n $4\r\n PING\r\n
            let mut line = String::new();
            for _ in 0..3 {
                line.clear();
                reader.read_line(&mut line).unwrap();
            }
            writer.write_all(b"+PONG\r\n").unwrap();
        });

        let mut conn =
            RawConnection::connect(&Endpoint::new("127.0.0.1", port), Duration::from_secs(1))
                .unwrap();
        conn.set_timeouts(Some(Duration::from_secs(2))).unwrap();
        assert!(conn.ping().unwrap());
        server.join().unwrap();
    }

    #[test]
    #[ignore]
    fn test_connection_factory() {
        let factory = ConnectionFactory {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            auth_password: None,
            auth_username: None,
            dbnum: None,
        };

        let mut conn = factory
            .create(&Endpoint::new("127.0.0.1", 6379))
            .expect("Failed to connect");
        assert!(conn.ping().expect("Ping failed"));
    }
}
