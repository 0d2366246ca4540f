//! Uniform command execution across topologies
//!
//! Every pooled connection type (single node, shard set, cluster) implements
//! `Commands`, so callers holding a lease never branch on topology to send a
//! command. Routing, where it exists, keys off `args[1]`.

use crate::utils::{ConnectionError, RespValue};

/// Execute raw commands on a connection
pub trait Commands {
    /// Execute one command
    ///
    /// `args[0]` is the command name; `args[1]`, when present, is the key used
    /// for shard or slot routing. Error replies are returned as
    /// `RespValue::Error`, not as `Err`.
    fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError>;

    /// Execute a command built from string slices
    fn execute_str(&mut self, args: &[&str]) -> Result<RespValue, ConnectionError> {
        let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
        self.execute(&byte_args)
    }
}

/// Convenience commands built on `Commands`
///
/// Error replies are mapped to `ConnectionError::Server`.
pub trait CommandsExt: Commands {
    fn ping(&mut self) -> Result<bool, ConnectionError> {
        match self.execute_str(&["PING"])?.into_result()? {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            _ => Ok(false),
        }
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, ConnectionError> {
        match self.execute_str(&["GET", key])?.into_result()? {
            RespValue::BulkString(data) => Ok(Some(data)),
            RespValue::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), ConnectionError> {
        let reply = self.execute(&[&b"SET"[..], key.as_bytes(), value])?.into_result()?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(unexpected("SET", &reply))
        }
    }

    fn set_ex(&mut self, key: &str, value: &[u8], seconds: u64) -> Result<(), ConnectionError> {
        let mut buffer = itoa::Buffer::new();
        let seconds = buffer.format(seconds);
        let reply = self
            .execute(&[&b"SET"[..], key.as_bytes(), value, &b"EX"[..], seconds.as_bytes()])?
            .into_result()?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(unexpected("SET", &reply))
        }
    }

    fn del(&mut self, key: &str) -> Result<bool, ConnectionError> {
        integer_reply(self.execute_str(&["DEL", key])?, "DEL").map(|n| n > 0)
    }

    fn exists(&mut self, key: &str) -> Result<bool, ConnectionError> {
        integer_reply(self.execute_str(&["EXISTS", key])?, "EXISTS").map(|n| n > 0)
    }

    fn incr(&mut self, key: &str) -> Result<i64, ConnectionError> {
        integer_reply(self.execute_str(&["INCR", key])?, "INCR")
    }
}

impl<T: Commands + ?Sized> CommandsExt for T {}

fn integer_reply(reply: RespValue, command: &str) -> Result<i64, ConnectionError> {
    let reply = reply.into_result()?;
    reply.as_i64().ok_or_else(|| unexpected(command, &reply))
}

fn unexpected(command: &str, reply: &RespValue) -> ConnectionError {
    ConnectionError::UnexpectedReply(format!("{} returned {:?}", command, reply))
}
