//! Runtime configuration, selected once at startup.

use embassy_time::Duration;

/// Full scale of the 12-bit converters.
pub const ADC_FULL_SCALE: u16 = 4095;

/// Timing and feature switches of the monitor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonitorConfig {
    /// Period of the fast sampling trigger.
    pub sampling_period: Duration,
    /// Period of the display/serial-log refresh.
    pub reporting_period: Duration,
    /// Seconds between two radio reports.
    pub report_period_s: u64,
    /// Supply level above which the board is considered powered.
    pub vmcu_on_mv: i32,
    /// Supply level below which the board is considered off.
    pub vmcu_off_mv: i32,
    /// Send frames over the radio modem.
    pub radio: bool,
    /// Mirror live values to the serial log.
    pub serial_log: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_period: Duration::from_millis(100),
            reporting_period: Duration::from_millis(300),
            report_period_s: 300,
            vmcu_on_mv: 3300,
            vmcu_off_mv: 3200,
            radio: true,
            serial_log: false,
        }
    }
}

/// Parameters of the range auto-selection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeConfig {
    /// Averaged code above which the next range up is selected (~95 % of full scale).
    pub upper_threshold: u16,
    /// Averaged code below which the next range down is selected (~0.7 % of full scale).
    pub lower_threshold: u16,
    /// Delay before the relay of the previous range is released.
    pub recovery_ms: u32,
    /// Extra delay before another switch is allowed.
    pub stabilization_ms: u32,
    /// Consecutive low readings required before a downshift. Zero switches immediately.
    pub downshift_confirm_cycles: u8,
    /// Time the relays stay open after an overflow trip before the widest range is retried.
    pub overflow_holdoff_ms: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            upper_threshold: 3890,
            lower_threshold: 28,
            recovery_ms: 100,
            stabilization_ms: 100,
            downshift_confirm_cycles: 0,
            overflow_holdoff_ms: 5000,
        }
    }
}

/// Board variant data: divider network and sense resistors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardConfig {
    /// Voltage of the precision reference, in millivolts.
    pub ref_voltage_mv: i64,
    /// Output divider ratio numerator.
    pub divider_num: i64,
    /// Output divider ratio denominator.
    pub divider_den: i64,
    /// Total resistance of the output divider, loading the supply.
    pub divider_resistance_ohm: i64,
    /// Gain of the current-sense amplifier.
    pub current_gain: i64,
    /// Sense resistor of the Low, Middle and High ranges, in milliohms.
    pub sense_resistor_mohm: [i64; 3],
}

impl BoardConfig {
    /// Boards with a 2:1 output divider.
    pub const DIVIDER_2_1: Self = Self {
        ref_voltage_mv: 2048,
        divider_num: 2,
        divider_den: 1,
        divider_resistance_ohm: 200_000,
        current_gain: 50,
        sense_resistor_mohm: [100_000, 1_000, 10],
    };

    /// Boards with a 5.99:1 output divider.
    pub const DIVIDER_599_100: Self = Self {
        ref_voltage_mv: 2048,
        divider_num: 599,
        divider_den: 100,
        divider_resistance_ohm: 599_000,
        current_gain: 50,
        sense_resistor_mohm: [100_000, 1_000, 10],
    };
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::DIVIDER_599_100
    }
}

/// AT driver timing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModemConfig {
    /// Interval between two scans of the reply buffers.
    pub poll_interval: Duration,
    /// Maximum waiting time for an expected reply.
    pub reply_timeout: Duration,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            reply_timeout: Duration::from_millis(7000),
        }
    }
}

/// Build and reset information carried by the startup frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FirmwareInfo {
    pub reset_reason: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub commit_index: u8,
    /// Leading 28 bits of the commit hash.
    pub commit_id: u32,
    pub dirty: bool,
}
