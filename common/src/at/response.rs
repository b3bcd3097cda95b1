use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use heapless::{String, Vec};

use crate::RawMutex;
use crate::error::Error;

pub const AT_COMMAND_SIZE: usize = 40;
/// Number of reply lines kept by the pool.
pub const REPLY_LINES: usize = 8;
pub const REPLY_LINE_SIZE: usize = 32;
/// Bytes of a modem endpoint id.
pub const ENDPOINT_ID_LEN: usize = 4;

/// One line received from the modem, without its terminator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplyLine {
    bytes: Vec<u8, REPLY_LINE_SIZE>,
    complete: bool,
}

impl ReplyLine {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.complete = false;
    }
}

/// Fixed pool of reply lines, filled one byte at a time.
///
/// Lines are used round-robin: once a line-feed completes a line, the following bytes go to the
/// next one, wrapping around and overwriting the oldest line. Carriage returns are ignored and
/// bytes past the line capacity are dropped.
#[derive(Debug, Default)]
pub struct ReplyPool {
    lines: [ReplyLine; REPLY_LINES],
    current: usize,
    overflow: bool,
}

impl ReplyPool {
    pub const fn new() -> Self {
        const EMPTY: ReplyLine = ReplyLine {
            bytes: Vec::new(),
            complete: false,
        };
        Self {
            lines: [EMPTY; REPLY_LINES],
            current: 0,
            overflow: false,
        }
    }

    pub fn on_receive(&mut self, byte: u8) {
        match byte {
            b'\r' => {}
            b'\n' => {
                let line = &mut self.lines[self.current];
                if !line.bytes.is_empty() {
                    line.complete = true;
                    self.current = (self.current + 1) % REPLY_LINES;
                    self.lines[self.current].clear();
                }
            }
            byte => {
                if self.lines[self.current].bytes.push(byte).is_err() {
                    self.overflow = true;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        for line in self.lines.iter_mut() {
            line.clear();
        }
        self.current = 0;
        self.overflow = false;
    }

    /// Whether any byte was dropped since the last clear.
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Completed lines, oldest first.
    pub fn completed(&self) -> impl Iterator<Item = &[u8]> {
        (1..=REPLY_LINES)
            .map(move |offset| &self.lines[(self.current + offset) % REPLY_LINES])
            .filter(|line| line.complete)
            .map(ReplyLine::as_bytes)
    }

    /// Returns true if a completed line starts with `header`.
    pub fn find_prefix(&self, header: &str) -> bool {
        self.completed().any(|line| line.starts_with(header.as_bytes()))
    }

    /// Returns true if a completed line is exactly `line`.
    pub fn contains_line(&self, line: &str) -> bool {
        self.completed().any(|l| l == line.as_bytes())
    }

    /// Finds the longest run of hexadecimal digits over all completed lines. The first run wins
    /// on a tie.
    pub fn longest_hex_run(&self) -> &[u8] {
        let mut best: &[u8] = &[];
        for line in self.completed() {
            let run = longest_hex_run(line);
            if run.len() > best.len() {
                best = run;
            }
        }
        best
    }
}

/// Reply pool shared between the UART receiver and the command side.
pub struct ModemReplyBuffer {
    inner: Mutex<RawMutex, RefCell<ReplyPool>>,
}

impl Default for ModemReplyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ModemReplyBuffer {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ReplyPool::new())),
        }
    }

    pub fn on_receive(&self, bytes: &[u8]) {
        self.inner.lock(|pool| {
            let mut pool = pool.borrow_mut();
            for byte in bytes {
                pool.on_receive(*byte);
            }
        });
    }

    pub fn clear(&self) {
        self.inner.lock(|pool| pool.borrow_mut().clear());
    }

    /// Runs `f` on the pool while holding the lock.
    pub fn with<R>(&self, f: impl FnOnce(&ReplyPool) -> R) -> R {
        self.inner.lock(|pool| f(&pool.borrow()))
    }
}

pub fn longest_hex_run(line: &[u8]) -> &[u8] {
    let mut best = &line[..0];
    let mut start = None;
    for (i, byte) in line.iter().enumerate() {
        match (byte.is_ascii_hexdigit(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s > best.len() {
                    best = &line[s..i];
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start
        && line.len() - s > best.len()
    {
        best = &line[s..];
    }
    best
}

/// Decodes hexadecimal digits right-aligned into `N` bytes.
///
/// Missing high digits are zeros, a longer input keeps only its rightmost digits.
pub fn decode_hex_right_aligned<const N: usize>(digits: &[u8]) -> crate::Result<[u8; N]> {
    let mut padded: Vec<u8, 16> = Vec::new();
    let width = 2 * N;
    if width > padded.capacity() {
        return Err(Error::BufferTooSmallError);
    }
    let digits = &digits[digits.len().saturating_sub(width)..];
    for _ in digits.len()..width {
        padded.push(b'0').map_err(|_| Error::BufferTooSmallError)?;
    }
    padded.extend_from_slice(digits).map_err(|_| Error::BufferTooSmallError)?;

    let mut bytes = [0; N];
    for (byte, pair) in bytes.iter_mut().zip(padded.chunks(2)) {
        let pair = core::str::from_utf8(pair).map_err(|_| Error::StringEncodingError)?;
        *byte = u8::from_str_radix(pair, 16).map_err(|_| Error::ParseError)?;
    }
    Ok(bytes)
}

/// Reads the endpoint id out of the replies to an identification command.
pub fn parse_endpoint_id(pool: &ReplyPool) -> crate::Result<[u8; ENDPOINT_ID_LEN]> {
    let run = pool.longest_hex_run();
    if run.is_empty() {
        return Err(Error::ParseError);
    }
    decode_hex_right_aligned(run)
}

/// Uppercase hexadecimal representation of `bytes`.
pub fn encode_hex<const N: usize>(bytes: &[u8]) -> crate::Result<String<N>> {
    use core::fmt::Write;

    let mut hex = String::new();
    for byte in bytes {
        write!(hex, "{byte:02X}").map_err(|_| Error::BufferTooSmallError)?;
    }
    Ok(hex)
}

#[cfg(test)]
mod test_response {
    use super::*;

    fn pool_with(text: &str) -> ReplyPool {
        let mut pool = ReplyPool::new();
        for byte in text.bytes() {
            pool.on_receive(byte);
        }
        pool
    }

    #[test]
    fn test_lines_complete_on_line_feed() {
        let pool = pool_with("\r\nOK\r\nERR");
        assert!(pool.find_prefix("OK"));
        assert!(!pool.find_prefix("ERR"));
        assert_eq!(pool.completed().count(), 1);
    }

    #[test]
    fn test_round_robin_overwrites_oldest() {
        let pool = pool_with("L0\nL1\nL2\nL3\nL4\nL5\nL6\nL7\nL8\n");
        assert!(!pool.contains_line("L0"));
        assert!(pool.contains_line("L1"));
        assert!(pool.contains_line("L8"));

        let pool = pool_with("A\nB\nC\n");
        let lines: Vec<&[u8], REPLY_LINES> = pool.completed().collect();
        assert_eq!(lines.as_slice(), [b"A", b"B", b"C"]);
    }

    #[test]
    fn test_overflow_drops_bytes() {
        let mut pool = pool_with("0123456789012345678901234567890123456789\n");
        assert!(pool.overflowed());
        assert_eq!(pool.completed().next().map(<[u8]>::len), Some(REPLY_LINE_SIZE));
        pool.clear();
        assert!(!pool.overflowed());
        assert_eq!(pool.completed().count(), 0);
    }

    #[test]
    fn test_longest_hex_run() {
        assert_eq!(longest_hex_run(b"ID: 00A1 x 12345"), b"12345");
        assert_eq!(longest_hex_run(b"OK"), b"");
        assert_eq!(longest_hex_run(b"BEEF-CAFE"), b"BEEF");
        let pool = pool_with("AT$I=10\r\n0012AB34\r\nOK\r\n");
        assert_eq!(pool.longest_hex_run(), b"0012AB34");
    }

    #[test]
    fn test_endpoint_id_right_aligned() {
        assert_eq!(parse_endpoint_id(&pool_with("A1B2\r\nOK\r\n")), Ok([0x00, 0x00, 0xA1, 0xB2]));
        assert_eq!(
            parse_endpoint_id(&pool_with("1234ABCD\r\nOK\r\n")),
            Ok([0x12, 0x34, 0xAB, 0xCD])
        );
        assert_eq!(
            parse_endpoint_id(&pool_with("FF1234ABCD\r\n")),
            Ok([0x12, 0x34, 0xAB, 0xCD])
        );
        assert_eq!(parse_endpoint_id(&pool_with("OK\r\n")), Err(Error::ParseError));
    }

    #[test]
    fn test_encode_hex() {
        let hex: String<24> = encode_hex(&[0x01, 0xAB, 0xFF]).unwrap();
        assert_eq!(hex.as_str(), "01ABFF");
        assert_eq!(encode_hex::<4>(&[1, 2, 3]), Err(Error::BufferTooSmallError));
    }

    #[test]
    fn test_shared_buffer() {
        let buffer = ModemReplyBuffer::new();
        buffer.on_receive(b"OK\r\n");
        assert!(buffer.with(|pool| pool.find_prefix("OK")));
        buffer.clear();
        assert!(!buffer.with(|pool| pool.find_prefix("OK")));
    }
}
