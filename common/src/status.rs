use core::cell::{Cell, RefCell};

#[cfg(feature = "defmt")]
use defmt::warn;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Deque;
#[cfg(not(feature = "defmt"))]
use log::warn;

use crate::RawMutex;
use crate::error::{Error, ErrorSource};
use crate::range::RangeLevel;

/// Temperature value standing for "unavailable".
pub const TMCU_UNAVAILABLE: i8 = 0x7F;

/// Latest measurement of the board.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub vout_mv: i32,
    pub iout_ua: i32,
    pub vmcu_mv: i32,
    pub tmcu_degrees: i8,
    pub range: RangeLevel,
    pub bypass: bool,
}

/// Sample shared between the sampling task and its readers.
///
/// The whole struct is copied in and out under a critical section, so readers never see a sample
/// that is half updated.
pub struct SampleStore {
    inner: Mutex<RawMutex, Cell<Sample>>,
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleStore {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Sample {
                vout_mv: 0,
                iout_ua: 0,
                vmcu_mv: 0,
                tmcu_degrees: TMCU_UNAVAILABLE,
                range: RangeLevel::None,
                bypass: false,
            })),
        }
    }

    pub fn publish(&self, sample: Sample) {
        self.inner.lock(|cell| cell.set(sample));
    }

    pub fn latest(&self) -> Sample {
        self.inner.lock(|cell| cell.get())
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.inner.lock(|cell| {
            let mut sample = cell.get();
            sample.bypass = bypass;
            cell.set(sample);
        });
    }
}

/// Maximum number of pending error codes, one error-stack frame worth.
pub const ERROR_STACK_SIZE: usize = 6;

struct ErrorEntries {
    codes: Deque<u16, ERROR_STACK_SIZE>,
    dropped: u16,
}

/// Error codes waiting to be reported, oldest first.
///
/// Any component may push. When the stack is full, new codes are dropped and counted.
pub struct ErrorStack {
    inner: Mutex<RawMutex, RefCell<ErrorEntries>>,
}

impl Default for ErrorStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorStack {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ErrorEntries {
                codes: Deque::new(),
                dropped: 0,
            })),
        }
    }

    pub fn push(&self, source: ErrorSource, error: Error) {
        self.push_code(error.code(source));
    }

    pub fn push_code(&self, code: u16) {
        let dropped = self.inner.lock(|entries| {
            let mut entries = entries.borrow_mut();
            if entries.codes.push_back(code).is_err() {
                entries.dropped = entries.dropped.saturating_add(1);
                true
            } else {
                false
            }
        });
        if dropped {
            warn!("Error stack full, dropped code {:x}", code);
        }
    }

    /// Pushes the code unless it is already waiting to be reported.
    pub fn push_once(&self, source: ErrorSource, error: Error) {
        let code = error.code(source);
        if !self.inner.lock(|entries| entries.borrow().codes.iter().any(|&c| c == code)) {
            self.push_code(code);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|entries| entries.borrow().codes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of codes dropped since the last drain.
    pub fn dropped(&self) -> u16 {
        self.inner.lock(|entries| entries.borrow().dropped)
    }

    /// Takes every pending code, oldest first, and resets the stack.
    pub fn drain(&self) -> Deque<u16, ERROR_STACK_SIZE> {
        self.inner.lock(|entries| {
            let mut entries = entries.borrow_mut();
            entries.dropped = 0;
            core::mem::replace(&mut entries.codes, Deque::new())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sample_store() {
        let store = SampleStore::new();
        assert_eq!(store.latest().tmcu_degrees, TMCU_UNAVAILABLE);
        let sample = Sample {
            vout_mv: 12000,
            iout_ua: 1500,
            vmcu_mv: 3300,
            tmcu_degrees: 25,
            range: RangeLevel::Middle,
            bypass: false,
        };
        store.publish(sample);
        store.set_bypass(true);
        assert_eq!(
            store.latest(),
            Sample {
                bypass: true,
                ..sample
            }
        );
    }

    #[test]
    fn test_error_stack_drops_newest() {
        let stack = ErrorStack::new();
        for code in 1..=8u16 {
            stack.push_code(code);
        }
        assert_eq!(stack.len(), ERROR_STACK_SIZE);
        assert_eq!(stack.dropped(), 2);

        let codes = stack.drain();
        assert_eq!(codes.iter().copied().collect::<heapless::Vec<u16, 6>>(), [1, 2, 3, 4, 5, 6]);
        assert!(stack.is_empty());
        assert_eq!(stack.dropped(), 0);
    }

    #[test]
    fn test_push_once() {
        let stack = ErrorStack::new();
        for _ in 0..10 {
            stack.push_once(ErrorSource::Analog, Error::CalibrationMissing);
            stack.push_once(ErrorSource::Analog, Error::TimeoutError);
        }
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.dropped(), 0);

        stack.drain();
        stack.push_once(ErrorSource::Analog, Error::CalibrationMissing);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_error_stack_codes() {
        let stack = ErrorStack::new();
        stack.push(ErrorSource::Analog, Error::CalibrationMissing);
        assert_eq!(stack.drain().pop_front(), Some(0x0202));
    }
}
