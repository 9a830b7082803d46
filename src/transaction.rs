//! A single request/response exchange with the motor controller.

use log::trace;
use std::time::{Duration, Instant};

use crate::channel::SerialChannel;
use crate::codec;
use crate::constants::{END_CHAR, ERROR_CHAR, START_CHAR_IN};
use crate::error::{Result, SyntaError};
use crate::types::AxisId;

/// How the body of a successful response is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Little-endian hex value
    Numeric,
    /// Raw text, possibly empty
    Direct,
}

/// Resolved value of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(u32),
    Text(String),
}

impl Reply {
    pub fn value(&self) -> Result<u32> {
        match self {
            Reply::Value(v) => Ok(*v),
            Reply::Text(text) => Err(SyntaError::InvalidData(format!(
                "expected a numeric reply, got {text:?}"
            ))),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Reply::Text(text) => text,
            Reply::Value(_) => "",
        }
    }
}

/// One framed command waiting for its terminator-delimited reply
#[derive(Debug, Clone)]
pub struct Transaction {
    command: String,
    kind: ReplyKind,
    timeout: Duration,
    min_digits: usize,
}

impl Transaction {
    pub fn new(command: String, kind: ReplyKind, timeout: Duration) -> Self {
        Self {
            command,
            kind,
            timeout,
            min_digits: 0,
        }
    }

    /// Require a direct reply to start with `count` hex digits.
    pub fn expect_digits(mut self, count: usize) -> Self {
        self.min_digits = count;
        self
    }

    /// Frame `command` for `axis` with a `width`-digit parameter.
    pub fn encode(
        axis: AxisId,
        command: char,
        parameter: u32,
        width: usize,
        kind: ReplyKind,
        timeout: Duration,
    ) -> Result<Self> {
        let framed = codec::encode(axis, command, parameter, width)?;
        Ok(Self::new(framed, kind, timeout))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Write the command and block until the reply or the timeout.
    pub fn submit(&self, channel: &mut dyn SerialChannel) -> Result<Reply> {
        channel.clear_input()?;
        channel.write_all(self.command.as_bytes())?;
        let raw = self.await_response(channel)?;
        trace!("Received: {:?}", String::from_utf8_lossy(&raw));
        self.resolve(&raw)
    }

    /// Collect bytes from the first response marker up to the terminator.
    fn await_response(&self, channel: &mut dyn SerialChannel) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SyntaError::Timeout);
            }
            let Some(byte) = channel.read_byte(remaining)? else {
                continue;
            };

            if buf.is_empty() && byte != START_CHAR_IN && byte != ERROR_CHAR {
                // echo or line noise ahead of the reply
                continue;
            }
            buf.push(byte);
            if byte == END_CHAR {
                return Ok(buf);
            }
        }
    }

    /// Interpret a complete raw response.
    pub fn resolve(&self, raw: &[u8]) -> Result<Reply> {
        match self.kind {
            ReplyKind::Numeric => codec::decode_bcd(raw).map(Reply::Value),
            ReplyKind::Direct => {
                let body = codec::response_body(raw)?;
                let digits = body.as_bytes().get(..self.min_digits);
                if !digits.is_some_and(|d| d.iter().all(u8::is_ascii_hexdigit)) {
                    return Err(SyntaError::InvalidData(format!(
                        "expected {} hex digits, got {body:?}",
                        self.min_digits
                    )));
                }
                Ok(Reply::Text(body.to_string()))
            }
        }
    }
}
