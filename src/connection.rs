//! Reference-counted ownership of the serial channel and transaction dispatch.
//!
//! Every logical user of the link (the `connect` caller, and each dispatch
//! for the duration of its call) holds one reference. The physical channel
//! is closed when the last reference goes away.

use log::{debug, info, warn};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::channel::{PortSettings, SerialChannel};
use crate::error::{Result, SyntaError};
use crate::transaction::{Reply, Transaction};

pub struct Connection<C: SerialChannel> {
    channel: C,
    settings: Option<PortSettings>,
    references: usize,
    retry_count: u32,
}

impl<C: SerialChannel> Connection<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            settings: None,
            references: 0,
            retry_count: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.references > 0 && self.channel.is_open()
    }

    pub fn references(&self) -> usize {
        self.references
    }

    /// Per-transaction timeout of the open connection
    pub fn timeout(&self) -> Result<Duration> {
        self.settings
            .as_ref()
            .map(|s| s.timeout)
            .ok_or(SyntaError::NotConnected)
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Take a logical reference, opening the channel for the first one.
    ///
    /// Returns `true` when the physical channel was opened by this call.
    pub fn open(&mut self, settings: &PortSettings, retry_count: u32) -> Result<bool> {
        if self.references > 0 {
            match &self.settings {
                Some(current) if current.port != settings.port => {
                    return Err(SyntaError::AlreadyConnected {
                        port: current.port.clone(),
                    });
                }
                _ => {
                    self.references += 1;
                    debug!("Connection reference taken ({})", self.references);
                    return Ok(false);
                }
            }
        }

        self.channel.open(settings)?;
        self.settings = Some(settings.clone());
        self.retry_count = retry_count.max(1);
        self.references = 1;
        info!("Opened channel to {}", settings.port);
        Ok(true)
    }

    /// Drop a logical reference. Returns the references left.
    pub fn release(&mut self) -> Result<usize> {
        if self.references == 0 {
            return Err(SyntaError::NotConnected);
        }
        self.references -= 1;
        if self.references == 0 {
            self.shutdown();
        } else {
            debug!("Connection reference released ({} left)", self.references);
        }
        Ok(self.references)
    }

    fn shutdown(&mut self) {
        self.channel.close();
        if let Some(settings) = self.settings.take() {
            info!("Closed channel to {}", settings.port);
        }
    }

    /// Drop every reference after the link failed underneath us.
    pub fn reset(&mut self) {
        warn!("Resetting connection after transport fault");
        self.references = 0;
        self.shutdown();
    }

    /// Hold the channel for the duration of one call.
    fn acquire(&mut self) -> Result<ChannelGuard<'_, C>> {
        if !self.is_connected() {
            return Err(SyntaError::NotConnected);
        }
        self.references += 1;
        Ok(ChannelGuard { connection: self })
    }

    /// Submit `transaction`, retrying timeouts and garbled replies.
    ///
    /// The channel reference taken here is released on every exit path;
    /// a transport fault resets the whole connection to `NotConnected`.
    pub fn dispatch(&mut self, transaction: &Transaction) -> Result<Reply> {
        let attempts = self.retry_count;
        let mut guard = self.acquire()?;
        let mut last_error = SyntaError::Timeout;

        for attempt in 1..=attempts {
            match transaction.submit(&mut guard.channel) {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transport_fault() => {
                    warn!("{} failed: {}", transaction.command().trim_end(), e);
                    guard.reset();
                    return Err(SyntaError::NotConnected);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        transaction.command().trim_end(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

/// One dispatch's reference on the connection, released on drop
struct ChannelGuard<'a, C: SerialChannel> {
    connection: &'a mut Connection<C>,
}

impl<C: SerialChannel> Deref for ChannelGuard<'_, C> {
    type Target = Connection<C>;

    fn deref(&self) -> &Self::Target {
        self.connection
    }
}

impl<C: SerialChannel> DerefMut for ChannelGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
    }
}

impl<C: SerialChannel> Drop for ChannelGuard<'_, C> {
    fn drop(&mut self) {
        if self.connection.references > 0 {
            let _ = self.connection.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::cmd;
    use crate::transaction::ReplyKind;
    use crate::types::AxisId;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeChannel {
        open: bool,
        opened: usize,
        writes: usize,
        replies: VecDeque<Result<Vec<u8>>>,
        pending: VecDeque<u8>,
    }

    impl SerialChannel for FakeChannel {
        fn open(&mut self, _settings: &PortSettings) -> Result<()> {
            self.open = true;
            self.opened += 1;
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn clear_input(&mut self) -> Result<()> {
            self.pending.clear();
            Ok(())
        }

        fn write_all(&mut self, _data: &[u8]) -> Result<()> {
            self.writes += 1;
            match self.replies.pop_front() {
                Some(Ok(bytes)) => self.pending.extend(bytes),
                Some(Err(e)) => return Err(e),
                None => {}
            }
            Ok(())
        }

        fn read_byte(&mut self, _timeout: Duration) -> Result<Option<u8>> {
            Ok(self.pending.pop_front())
        }
    }

    fn settings(port: &str) -> PortSettings {
        PortSettings {
            timeout: Duration::from_millis(5),
            ..PortSettings::new(port)
        }
    }

    fn query() -> Transaction {
        Transaction::encode(
            AxisId::Primary,
            cmd::GET_TIMER_FREQUENCY,
            0,
            0,
            ReplyKind::Numeric,
            Duration::from_millis(5),
        )
        .unwrap()
    }

    #[test]
    fn nested_open_is_reference_counted() {
        let mut conn = Connection::new(FakeChannel::default());
        assert!(conn.open(&settings("/dev/ttyUSB0"), 3).unwrap());
        assert!(!conn.open(&settings("/dev/ttyUSB0"), 3).unwrap());
        assert_eq!(conn.channel().opened, 1);

        assert_eq!(conn.release().unwrap(), 1);
        assert!(conn.channel().is_open());
        assert_eq!(conn.release().unwrap(), 0);
        assert!(!conn.channel().is_open());
        assert!(matches!(conn.release(), Err(SyntaError::NotConnected)));
    }

    #[test]
    fn other_port_is_refused_while_open() {
        let mut conn = Connection::new(FakeChannel::default());
        conn.open(&settings("COM3"), 1).unwrap();
        let err = conn.open(&settings("COM4"), 1).unwrap_err();
        assert!(matches!(err, SyntaError::AlreadyConnected { port } if port == "COM3"));
        assert_eq!(conn.references(), 1);
    }

    #[test]
    fn dispatch_without_connection_fails_fast() {
        let mut conn = Connection::new(FakeChannel::default());
        assert!(matches!(conn.dispatch(&query()), Err(SyntaError::NotConnected)));
        assert_eq!(conn.channel().writes, 0);
    }

    #[test]
    fn dispatch_retries_then_succeeds_and_releases() {
        let mut conn = Connection::new(FakeChannel::default());
        conn.open(&settings("COM3"), 3).unwrap();
        conn.channel_mut().replies = VecDeque::from(vec![
            Ok(b"=zz\r".to_vec()),
            Ok(Vec::new()),
            Ok(b"=87FD00\r".to_vec()),
        ]);

        let reply = conn.dispatch(&query()).unwrap();
        assert_eq!(reply.value().unwrap(), 0x00FD87);
        assert_eq!(conn.channel().writes, 3);
        assert_eq!(conn.references(), 1);
    }

    #[test]
    fn dispatch_surfaces_last_failure_after_retries() {
        let mut conn = Connection::new(FakeChannel::default());
        conn.open(&settings("COM3"), 2).unwrap();
        let err = conn.dispatch(&query()).unwrap_err();
        assert!(matches!(err, SyntaError::Timeout));
        assert_eq!(conn.channel().writes, 2);
        assert_eq!(conn.references(), 1);
        assert!(conn.channel().is_open());
    }

    #[test]
    fn firmware_errors_are_not_retried() {
        let mut conn = Connection::new(FakeChannel::default());
        conn.open(&settings("COM3"), 5).unwrap();
        conn.channel_mut().replies = VecDeque::from(vec![Ok(b"!4\r".to_vec())]);
        let err = conn.dispatch(&query()).unwrap_err();
        assert!(matches!(err, SyntaError::MotorNotInitialized));
        assert_eq!(conn.channel().writes, 1);
    }

    #[test]
    fn transport_fault_resets_connection() {
        let mut conn = Connection::new(FakeChannel::default());
        conn.open(&settings("COM3"), 3).unwrap();
        conn.open(&settings("COM3"), 3).unwrap();
        conn.channel_mut().replies = VecDeque::from(vec![Err(SyntaError::Io(
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"),
        ))]);

        let err = conn.dispatch(&query()).unwrap_err();
        assert!(matches!(err, SyntaError::NotConnected));
        assert_eq!(conn.references(), 0);
        assert!(!conn.channel().is_open());
        assert!(!conn.is_connected());
    }
}
