use defmt::{info, warn};
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::saadc::{self, ChannelConfig, Gain, Reference, Resolution, Saadc, VddInput};
use embassy_nrf::temp::{self, Temp};
use embassy_nrf::uarte::{self, UarteRxWithIdle, UarteTx};
use embassy_nrf::wdt::{self, WatchdogHandle};
use embassy_nrf::{bind_interrupts, peripherals};
use psumon_common::error::Error;
use psumon_common::hw::{Display, SerialLog};

use crate::sensors::NrfAdc;

bind_interrupts!(struct Irqs {
    SAADC => saadc::InterruptHandler;
    TEMP => temp::InterruptHandler;
    UARTE0 => uarte::InterruptHandler<peripherals::UARTE0>;
    UARTE1 => uarte::InterruptHandler<peripherals::UARTE1>;
});

/// Watchdog period, in 32768 Hz ticks.
const WATCHDOG_TIMEOUT_TICKS: u32 = 32768 * 10;

pub struct Device {
    pub adc: NrfAdc,
    pub relays: [Output<'static>; 3],
    pub bypass: Input<'static>,
    pub modem_tx: UarteTx<'static>,
    pub modem_rx: UarteRxWithIdle<'static>,
    pub serial_log: UartLog,
    pub display: RttDisplay,
    pub watchdog: WatchdogHandle,
}

impl Device {
    pub fn new() -> crate::Result<Self> {
        let p = embassy_nrf::init(Default::default());

        let mut modem_config = uarte::Config::default();
        modem_config.baudrate = uarte::Baudrate::BAUD9600;
        let uart1 = uarte::Uarte::new(p.UARTE1, Irqs, p.P0_15, p.P0_16, modem_config);
        let (modem_tx, modem_rx) = uart1.split_with_idle(p.TIMER0, p.PPI_CH0, p.PPI_CH1);
        let log_tx = UarteTx::new(p.UARTE0, Irqs, p.P0_06, Default::default());

        let mut reference = ChannelConfig::single_ended(p.P0_02);
        reference.reference = Reference::VDD1_4;
        reference.gain = Gain::GAIN1_4;
        let mut vout = ChannelConfig::single_ended(p.P0_03);
        vout.reference = Reference::VDD1_4;
        vout.gain = Gain::GAIN1_4;
        let mut iout = ChannelConfig::single_ended(p.P0_04);
        iout.reference = Reference::VDD1_4;
        iout.gain = Gain::GAIN1_4;
        let mut vdd = ChannelConfig::single_ended(VddInput);
        vdd.reference = Reference::INTERNAL;
        vdd.gain = Gain::GAIN1_6;
        let mut config = saadc::Config::default();
        config.resolution = Resolution::_12BIT;
        let saadc = Saadc::new(p.SAADC, Irqs, config, [reference, vout, iout, vdd]);
        let temp = Temp::new(p.TEMP, Irqs);

        let relays = [
            Output::new(p.P1_10, Level::Low, OutputDrive::Standard),
            Output::new(p.P1_11, Level::Low, OutputDrive::Standard),
            Output::new(p.P1_12, Level::Low, OutputDrive::Standard),
        ];
        let bypass = Input::new(p.P1_13, Pull::Up);

        let mut wdt_config = wdt::Config::try_new(&p.WDT).ok_or(Error::InvalidArgument)?;
        wdt_config.timeout_ticks = WATCHDOG_TIMEOUT_TICKS;
        let (_wdt, [watchdog]) = wdt::Watchdog::try_new(p.WDT, wdt_config).map_err(|_| {
            warn!("Watchdog already running with another configuration");
            Error::InvalidArgument
        })?;
        info!("Peripherals initialized");

        Ok(Self {
            adc: NrfAdc::new(saadc, temp),
            relays,
            bypass,
            modem_tx,
            modem_rx,
            serial_log: UartLog { tx: log_tx },
            display: RttDisplay,
            watchdog,
        })
    }
}

/// Serial log on a transmit-only UARTE.
pub struct UartLog {
    tx: UarteTx<'static>,
}

impl SerialLog for UartLog {
    fn write_line(&mut self, line: &str) -> crate::Result<()> {
        self.tx
            .blocking_write(line.as_bytes())
            .and_then(|_| self.tx.blocking_write(b"\r\n"))
            .map_err(|_| Error::UartWriteError)
    }
}

/// Display mirrored to the RTT log, the board has no character display.
pub struct RttDisplay;

impl Display for RttDisplay {
    fn print_string(&mut self, row: u8, col: u8, text: &str) {
        info!("Display {}:{} {}", row, col, text);
    }

    fn print_value(&mut self, row: u8, value: i32, divider_exponent: u8, unit: &str) {
        info!("Display {}: {}e-{} {}", row, value, divider_exponent, unit);
    }

    fn clear(&mut self) {
        info!("Display cleared");
    }
}
