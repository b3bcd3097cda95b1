#![no_std]

pub mod analog;
pub mod at;
pub mod config;
pub mod error;
pub mod frame;
pub mod hw;
pub mod range;
pub mod report;
pub mod sampler;
pub mod status;
pub mod supervisor;
pub mod uplink;

pub type Result<T> = core::result::Result<T, error::Error>;

#[cfg(all(target_abi = "eabihf", target_os = "none"))]
pub type RawMutex = embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
#[cfg(not(all(target_abi = "eabihf", target_os = "none")))]
pub type RawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
