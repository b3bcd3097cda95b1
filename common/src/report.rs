//! Periodic refresh of the local outputs, the display and the serial log.

use core::cell::RefCell;
use core::fmt::Write;

#[cfg(feature = "defmt")]
use defmt::warn;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{String, format};
#[cfg(not(feature = "defmt"))]
use log::warn;

use crate::RawMutex;
use crate::config::FirmwareInfo;
use crate::error::{Error, ErrorSource};
use crate::hw::{Display, SerialLog};
use crate::range::RangeLevel;
use crate::status::{ErrorStack, Sample, SampleStore, TMCU_UNAVAILABLE};

pub const DISPLAY_ROWS: usize = 4;
pub const DISPLAY_COLUMNS: usize = 20;
const LOG_LINE_SIZE: usize = 64;

/// Display shared between the reporting task and the supervisor.
pub struct SharedDisplay<D: Display> {
    inner: Mutex<RawMutex, RefCell<D>>,
}

impl<D: Display> SharedDisplay<D> {
    pub fn new(display: D) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(display)),
        }
    }

    pub fn lock<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.inner.lock(|display| f(&mut display.borrow_mut()))
    }

    /// Shows the firmware version and the modem endpoint id.
    pub fn banner(&self, info: &FirmwareInfo, endpoint_id: Option<[u8; 4]>) {
        let mut version: String<DISPLAY_COLUMNS> = String::new();
        let _ = write!(
            version,
            "FW {}.{}-{}",
            info.major_version, info.minor_version, info.commit_index
        );
        let mut id: String<DISPLAY_COLUMNS> = String::new();
        let _ = match endpoint_id {
            Some(endpoint_id) => write!(id, "ID {:08X}", u32::from_be_bytes(endpoint_id)),
            None => write!(id, "ID unknown"),
        };
        self.lock(|display| {
            display.clear();
            display.print_string(0, 0, "PSU monitor");
            display.print_string(1, 0, &version);
            display.print_string(2, 0, &id);
        });
    }

    pub fn clear(&self) {
        self.lock(|display| display.clear());
    }
}

fn range_name(range: RangeLevel) -> &'static str {
    match range {
        RangeLevel::None => "OFF",
        RangeLevel::Low => "LOW",
        RangeLevel::Middle => "MID",
        RangeLevel::High => "HIGH",
    }
}

/// Renders the latest sample to the display and optionally to the serial log.
pub struct Reporter<'a, D: Display, L: SerialLog> {
    display: &'a SharedDisplay<D>,
    log: L,
    samples: &'a SampleStore,
    errors: &'a ErrorStack,
    serial_log: bool,
}

impl<'a, D: Display, L: SerialLog> Reporter<'a, D, L> {
    pub fn new(
        display: &'a SharedDisplay<D>,
        log: L,
        samples: &'a SampleStore,
        errors: &'a ErrorStack,
        serial_log: bool,
    ) -> Self {
        Self {
            display,
            log,
            samples,
            errors,
            serial_log,
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn refresh(&mut self) {
        let sample = self.samples.latest();
        self.display.lock(|display| {
            display.print_value(0, sample.vout_mv, 3, "V");
            if sample.bypass {
                display.print_string(1, 0, "BYPASS");
            } else {
                display.print_value(1, sample.iout_ua, 3, "mA");
            }
            display.print_string(2, 0, range_name(sample.range));
            display.print_value(3, sample.vmcu_mv, 3, "V");
        });

        if self.serial_log {
            let result = Self::log_line(&sample).and_then(|line| self.log.write_line(&line));
            if let Err(err) = result {
                warn!("Serial log failed: {}", err);
                self.errors.push(ErrorSource::Supervisor, err);
            }
        }
    }

    /// `vout_mv,iout_ua,range,vmcu_mv,tmcu`, the temperature empty when unavailable.
    fn log_line(sample: &Sample) -> crate::Result<String<LOG_LINE_SIZE>> {
        let mut line = String::new();
        write!(
            line,
            "{},{},{},{},",
            sample.vout_mv,
            if sample.bypass { -1 } else { sample.iout_ua },
            range_name(sample.range),
            sample.vmcu_mv
        )
        .map_err(|_| Error::BufferTooSmallError)?;
        if sample.tmcu_degrees != TMCU_UNAVAILABLE {
            write!(line, "{}", sample.tmcu_degrees).map_err(|_| Error::BufferTooSmallError)?;
        }
        Ok(line)
    }
}

/// Display that keeps the text of every row, used where no hardware is attached.
#[derive(Debug, Default)]
pub struct FakeDisplay {
    pub rows: [String<DISPLAY_COLUMNS>; DISPLAY_ROWS],
}

impl Display for FakeDisplay {
    fn print_string(&mut self, row: u8, col: u8, text: &str) {
        let Some(line) = self.rows.get_mut(usize::from(row)) else {
            return;
        };
        line.truncate(usize::from(col));
        while line.len() < usize::from(col) && line.push(' ').is_ok() {}
        for c in text.chars() {
            if line.push(c).is_err() {
                break;
            }
        }
    }

    fn print_value(&mut self, row: u8, value: i32, divider_exponent: u8, unit: &str) {
        let divider = 10i64.pow(u32::from(divider_exponent));
        let value = i64::from(value);
        let sign = if value < 0 { "-" } else { "" };
        let text: String<DISPLAY_COLUMNS> = if divider_exponent == 0 {
            format!(DISPLAY_COLUMNS; "{value} {unit}")
        } else {
            format!(
                DISPLAY_COLUMNS;
                "{sign}{}.{:0width$} {unit}",
                value.abs() / divider,
                value.abs() % divider,
                width = usize::from(divider_exponent)
            )
        }
        .unwrap_or_default();
        self.print_string(row, 0, &text);
    }

    fn clear(&mut self) {
        for row in self.rows.iter_mut() {
            row.clear();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct RecordingLog {
        lines: heapless::Vec<String<LOG_LINE_SIZE>, 4>,
    }

    impl SerialLog for RecordingLog {
        fn write_line(&mut self, line: &str) -> crate::Result<()> {
            let line = String::try_from(line).map_err(|_| Error::BufferTooSmallError)?;
            self.lines.push(line).map_err(|_| Error::BufferTooSmallError)
        }
    }

    const SAMPLE: Sample = Sample {
        vout_mv: 12_345,
        iout_ua: 1_500,
        vmcu_mv: 3300,
        tmcu_degrees: -4,
        range: RangeLevel::Middle,
        bypass: false,
    };

    #[test]
    fn test_refresh_display() {
        let display = SharedDisplay::new(FakeDisplay::default());
        let (samples, errors) = (SampleStore::new(), ErrorStack::new());
        samples.publish(SAMPLE);
        let mut reporter = Reporter::new(&display, RecordingLog::default(), &samples, &errors, false);
        reporter.refresh();
        display.lock(|display| {
            assert_eq!(display.rows[0].as_str(), "12.345 V");
            assert_eq!(display.rows[1].as_str(), "1.500 mA");
            assert_eq!(display.rows[2].as_str(), "MID");
            assert_eq!(display.rows[3].as_str(), "3.300 V");
        });
        assert!(reporter.log().lines.is_empty());

        samples.set_bypass(true);
        reporter.refresh();
        display.lock(|display| assert_eq!(display.rows[1].as_str(), "BYPASS"));
    }

    #[test]
    fn test_serial_log_line() {
        let display = SharedDisplay::new(FakeDisplay::default());
        let (samples, errors) = (SampleStore::new(), ErrorStack::new());
        samples.publish(SAMPLE);
        let mut reporter = Reporter::new(&display, RecordingLog::default(), &samples, &errors, true);
        reporter.refresh();
        samples.publish(Sample {
            tmcu_degrees: TMCU_UNAVAILABLE,
            bypass: true,
            ..SAMPLE
        });
        reporter.refresh();
        let lines = &reporter.log().lines;
        assert_eq!(lines[0].as_str(), "12345,1500,MID,3300,-4");
        assert_eq!(lines[1].as_str(), "12345,-1,MID,3300,");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_serial_log_failure_recorded() {
        struct BrokenLog;
        impl SerialLog for BrokenLog {
            fn write_line(&mut self, _line: &str) -> crate::Result<()> {
                Err(Error::UartWriteError)
            }
        }

        let display = SharedDisplay::new(FakeDisplay::default());
        let (samples, errors) = (SampleStore::new(), ErrorStack::new());
        Reporter::new(&display, BrokenLog, &samples, &errors, true).refresh();
        assert_eq!(errors.drain().pop_front(), Some(0x040B));
    }

    #[test]
    fn test_banner() {
        let display = SharedDisplay::new(FakeDisplay::default());
        let info = FirmwareInfo {
            major_version: 1,
            minor_version: 4,
            commit_index: 12,
            ..Default::default()
        };
        display.banner(&info, Some([0x00, 0x00, 0xA1, 0xB2]));
        display.lock(|display| {
            assert_eq!(display.rows[1].as_str(), "FW 1.4-12");
            assert_eq!(display.rows[2].as_str(), "ID 0000A1B2");
        });
        display.clear();
        display.lock(|display| assert!(display.rows.iter().all(|row| row.is_empty())));
    }
}
