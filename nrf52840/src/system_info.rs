use embassy_nrf::pac;
use psumon_common::config::FirmwareInfo;

const fn parse_or_zero(text: &str, radix: u32) -> u32 {
    match u32::from_str_radix(text, radix) {
        Ok(value) => value,
        Err(_) => 0,
    }
}

const MAJOR_VERSION: u32 = parse_or_zero(env!("CARGO_PKG_VERSION_MAJOR"), 10);
const MINOR_VERSION: u32 = parse_or_zero(env!("CARGO_PKG_VERSION_MINOR"), 10);
const COMMIT_ID: u32 = parse_or_zero(env!("PSUMON_COMMIT_ID"), 16);
const COMMIT_INDEX: u32 = parse_or_zero(env!("PSUMON_COMMIT_INDEX"), 10);
const DIRTY: bool = parse_or_zero(env!("PSUMON_DIRTY"), 10) != 0;

/// Reads and clears the reset reason register.
///
/// Only the lowest byte is kept: pin reset, watchdog, soft reset and lockup.
fn take_reset_reason() -> u8 {
    let reason = pac::POWER.resetreas().read();
    pac::POWER.resetreas().write_value(reason);
    (reason.0 & 0xFF) as u8
}

/// Build information of this image together with the reason of the last reset.
pub fn firmware_info() -> FirmwareInfo {
    FirmwareInfo {
        reset_reason: take_reset_reason(),
        major_version: MAJOR_VERSION.min(u8::MAX as u32) as u8,
        minor_version: MINOR_VERSION.min(u8::MAX as u32) as u8,
        commit_index: COMMIT_INDEX.min(u8::MAX as u32) as u8,
        commit_id: COMMIT_ID,
        dirty: DIRTY,
    }
}
