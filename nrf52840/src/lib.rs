#![no_std]
#![no_main]

pub mod device;
pub mod sensors;
pub mod system_info;
pub mod tasks;

pub use psumon_common::error;
type Result<T> = psumon_common::Result<T>;

use cortex_m_semihosting::debug;
use defmt_rtt as _;
use panic_probe as _;

#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

/// Hardfault handler.
///
/// Terminates the application and makes a semihosting-capable debug tool exit
/// with an error.
#[cortex_m_rt::exception]
unsafe fn HardFault(_frame: &cortex_m_rt::ExceptionFrame) -> ! {
    loop {
        debug::exit(debug::EXIT_FAILURE);
    }
}
