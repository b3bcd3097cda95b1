//! Interfaces towards the board: converters, relay lines, display, serial log and watchdog.

#[cfg(feature = "nrf")]
use embassy_nrf::{gpio::Output, wdt::WatchdogHandle};

/// Converter inputs read by the sampling path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcChannel {
    /// Precision reference used for ratio calibration.
    Reference,
    Vout,
    Iout,
    Vmcu,
    Tmcu,
}

/// Source of calibrated 12-bit converter codes.
pub trait AdcChannels {
    /// Converts one channel and returns its raw code.
    fn convert(
        &mut self,
        channel: AdcChannel,
    ) -> impl core::future::Future<Output = crate::Result<u16>>;
}

/// Converter returning preset codes, used where no hardware is attached.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FakeAdc {
    /// Codes indexed by `AdcChannel`.
    pub codes: [u16; 5],
    /// Channel whose conversions fail with a timeout.
    pub failing: Option<AdcChannel>,
}

impl FakeAdc {
    pub fn new(codes: [u16; 5]) -> Self {
        Self {
            codes,
            failing: None,
        }
    }

    pub fn set(&mut self, channel: AdcChannel, code: u16) {
        self.codes[channel as usize] = code;
    }
}

impl AdcChannels for FakeAdc {
    async fn convert(&mut self, channel: AdcChannel) -> crate::Result<u16> {
        if self.failing == Some(channel) {
            return Err(crate::error::Error::TimeoutError);
        }
        Ok(self.codes[channel as usize])
    }
}

/// Trait for driving one relay line.
pub trait RelayPin {
    /// Sets the pin output to high.
    fn set_high(&mut self);
    /// Sets the pin output to low.
    fn set_low(&mut self);
}

/// Pin that remembers its level, used where no hardware is attached.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FakePin {
    pub high: bool,
}

impl RelayPin for FakePin {
    fn set_high(&mut self) {
        self.high = true;
    }
    fn set_low(&mut self) {
        self.high = false;
    }
}

#[cfg(feature = "nrf")]
impl RelayPin for Output<'static> {
    fn set_high(&mut self) {
        self.set_high();
    }

    fn set_low(&mut self) {
        self.set_low();
    }
}

/// Character display.
pub trait Display {
    /// Prints `text` at `row`, `col`.
    fn print_string(&mut self, row: u8, col: u8, text: &str);
    /// Prints `value / 10^divider_exponent` followed by `unit` on `row`.
    fn print_value(&mut self, row: u8, value: i32, divider_exponent: u8, unit: &str);
    fn clear(&mut self);
}

/// Line oriented text output.
pub trait SerialLog {
    fn write_line(&mut self, line: &str) -> crate::Result<()>;
}

/// Hardware watchdog.
pub trait Watchdog {
    /// Reloads the watchdog counter.
    fn feed(&mut self);
}

#[cfg(feature = "nrf")]
impl Watchdog for WatchdogHandle {
    fn feed(&mut self) {
        self.pet();
    }
}

/// Watchdog used when none is armed.
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&mut self) {}
}

/// Serial log that drops every line.
pub struct NoSerialLog;

impl SerialLog for NoSerialLog {
    fn write_line(&mut self, _line: &str) -> crate::Result<()> {
        Ok(())
    }
}
