#[cfg(feature = "defmt")]
use defmt::{debug, warn};
use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use heapless::{String, format};
#[cfg(not(feature = "defmt"))]
use log::{debug, warn};

use super::response::{AT_COMMAND_SIZE, ModemReplyBuffer, ReplyPool};
use crate::config::ModemConfig;
use crate::error::Error;

pub trait RxWithIdle {
    /// Read from UART until it's idle. Return the number of read bytes.
    fn read_until_idle(
        &mut self,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = crate::Result<usize>>;
}

pub trait Tx {
    /// Write bytes to the TX part of UART.
    fn write(&mut self, buffer: &[u8]) -> impl core::future::Future<Output = crate::Result<()>>;
}

/// Reads from `rx` forever and feeds every received byte into `replies`.
///
/// Used mainly to plug into a `embassy_executor::task`.
pub async fn rx_loop(mut rx: impl RxWithIdle, replies: &ModemReplyBuffer) -> ! {
    const RX_BUF_SIZE: usize = 64;
    let mut buf = [0; RX_BUF_SIZE];
    loop {
        match rx.read_until_idle(&mut buf).await {
            Ok(len) => replies.on_receive(&buf[..len]),
            Err(err) => warn!("Modem UART read failed: {}", err),
        }
    }
}

/// Number of polls made before giving up on a reply.
pub fn max_attempts(config: &ModemConfig) -> u32 {
    let poll_ms = config.poll_interval.as_millis().max(1);
    config.reply_timeout.as_millis().div_ceil(poll_ms) as u32
}

/// AT UART struct.
///
/// Commands go out through `Tx`, replies are collected into a `ModemReplyBuffer` by `rx_loop`
/// and polled at a fixed interval.
pub struct AtUart<'a, T: Tx, D: DelayNs> {
    tx: T,
    delay: D,
    replies: &'a ModemReplyBuffer,
    config: ModemConfig,
}

impl<'a, T: Tx, D: DelayNs> AtUart<'a, T, D> {
    pub fn new(tx: T, delay: D, replies: &'a ModemReplyBuffer, config: ModemConfig) -> Self {
        Self {
            tx,
            delay,
            replies,
            config,
        }
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Clears the reply pool and sends `AT{command}` followed by a carriage return.
    pub async fn send_command(&mut self, command: &str) -> crate::Result<()> {
        let command: String<AT_COMMAND_SIZE> = format!(AT_COMMAND_SIZE; "AT{command}\r")
            .map_err(|_| Error::BufferTooSmallError)?;
        self.replies.clear();
        self.tx
            .write(command.as_bytes())
            .await
            .map_err(|_| Error::UartWriteError)
    }

    /// Waits until a reply line starting with `header` arrives.
    ///
    /// The pool is checked after every poll interval, at most `timeout / poll_interval` times.
    /// A line "ERROR" ends the wait early.
    pub async fn await_reply(&mut self, header: &str, timeout: Duration) -> crate::Result<()> {
        let start = Instant::now();
        let attempts = max_attempts(&ModemConfig {
            reply_timeout: timeout,
            ..self.config
        });
        let poll_ms = self.config.poll_interval.as_millis() as u32;
        for _ in 0..attempts {
            self.delay.delay_ms(poll_ms).await;
            let (found, error) = self
                .replies
                .with(|pool| (pool.find_prefix(header), pool.contains_line("ERROR")));
            if found {
                debug!(
                    "Got {} after {}ms",
                    header,
                    (Instant::now() - start).as_millis()
                );
                return Ok(());
            }
            if error {
                return Err(Error::AtErrorResponse);
            }
        }
        warn!("No {} reply after {} polls", header, attempts);
        Err(Error::TimeoutError)
    }

    /// Sends `command` and waits for "OK" within the configured timeout.
    pub async fn call_at(&mut self, command: &str) -> crate::Result<()> {
        self.send_command(command).await?;
        self.await_reply("OK", self.config.reply_timeout).await
    }

    /// Runs `f` on the replies collected so far.
    pub fn replies<R>(&self, f: impl FnOnce(&ReplyPool) -> R) -> R {
        self.replies.with(f)
    }
}

/// Fake `Tx` struct, to be used in tests.
///
/// Every written command is checked against a script and the scripted reply is fed into the reply
/// buffer right away.
pub struct FakeTx<'a> {
    replies: &'a ModemReplyBuffer,
    script: heapless::Deque<(&'static str, &'static str), 8>,
    written: heapless::Vec<String<AT_COMMAND_SIZE>, 8>,
}

impl<'a> FakeTx<'a> {
    pub fn new(replies: &'a ModemReplyBuffer, script: &[(&'static str, &'static str)]) -> Self {
        let mut deque = heapless::Deque::new();
        for interaction in script.iter().take(deque.capacity()) {
            let _ = deque.push_back(*interaction);
        }
        Self {
            replies,
            script: deque,
            written: heapless::Vec::new(),
        }
    }

    /// Commands written so far, with their terminator.
    pub fn written(&self) -> &[String<AT_COMMAND_SIZE>] {
        &self.written
    }

    pub fn all_done(&self) -> bool {
        self.script.is_empty()
    }
}

impl Tx for FakeTx<'_> {
    async fn write(&mut self, buffer: &[u8]) -> crate::Result<()> {
        let command = core::str::from_utf8(buffer).map_err(|_| Error::StringEncodingError)?;
        let command = String::try_from(command).map_err(|_| Error::BufferTooSmallError)?;
        match self.script.pop_front() {
            Some((expected, reply)) if expected == command.as_str() => {
                self.replies.on_receive(reply.as_bytes());
            }
            _ => return Err(Error::UartWriteError),
        }
        self.written.push(command).map_err(|_| Error::BufferTooSmallError)
    }
}

#[cfg(test)]
mod test_at {
    use super::*;
    use embassy_futures::block_on;

    /// Delay that delivers `reply` right before returning from call number `deliver_at`.
    struct CountingDelay<'a> {
        calls: u32,
        deliver_at: u32,
        reply: &'static str,
        replies: &'a ModemReplyBuffer,
    }

    impl DelayNs for CountingDelay<'_> {
        async fn delay_ns(&mut self, _ns: u32) {
            self.calls += 1;
            if self.calls == self.deliver_at {
                self.replies.on_receive(self.reply.as_bytes());
            }
        }
    }

    fn uart<'a>(
        replies: &'a ModemReplyBuffer,
        deliver_at: u32,
    ) -> AtUart<'a, FakeTx<'a>, CountingDelay<'a>> {
        let delay = CountingDelay {
            calls: 0,
            deliver_at,
            reply: "\r\nOK\r\n",
            replies,
        };
        AtUart::new(
            FakeTx::new(replies, &[("AT$RC\r", "")]),
            delay,
            replies,
            ModemConfig::default(),
        )
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(max_attempts(&ModemConfig::default()), 70);
    }

    #[test]
    fn test_reply_on_last_poll() {
        let replies = ModemReplyBuffer::new();
        let mut uart = uart(&replies, 70);
        assert_eq!(block_on(uart.call_at("$RC")), Ok(()));
        assert_eq!(uart.delay.calls, 70);
    }

    #[test]
    fn test_reply_after_last_poll() {
        let replies = ModemReplyBuffer::new();
        let mut uart = uart(&replies, 71);
        assert_eq!(block_on(uart.call_at("$RC")), Err(Error::TimeoutError));
        assert_eq!(uart.delay.calls, 70);
    }

    #[test]
    fn test_first_poll_wins() {
        let replies = ModemReplyBuffer::new();
        let mut uart = uart(&replies, 1);
        assert_eq!(block_on(uart.call_at("$RC")), Ok(()));
        assert_eq!(uart.delay.calls, 1);
    }

    #[test]
    fn test_error_reply() {
        let replies = ModemReplyBuffer::new();
        let mut uart = uart(&replies, 3);
        uart.delay.reply = "ERROR\r\n";
        assert_eq!(block_on(uart.call_at("$RC")), Err(Error::AtErrorResponse));
        assert_eq!(uart.delay.calls, 3);
    }

    #[test]
    fn test_send_clears_stale_replies() {
        let replies = ModemReplyBuffer::new();
        replies.on_receive(b"OK\r\n");
        let mut uart = uart(&replies, 5);
        block_on(uart.send_command("$RC")).unwrap();
        assert!(!replies.with(|pool| pool.find_prefix("OK")));
        assert_eq!(uart.tx.written()[0].as_str(), "AT$RC\r");
        assert!(uart.tx.all_done());
    }

    #[test]
    fn test_unexpected_command() {
        let replies = ModemReplyBuffer::new();
        let mut uart = uart(&replies, 1);
        assert_eq!(block_on(uart.send_command("$I=10")), Err(Error::UartWriteError));
    }
}
