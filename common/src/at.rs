//! AT-command driver towards the radio modem.

#[cfg(feature = "nrf")]
pub mod nrf;
pub mod response;
pub mod uart;
