//! Sigfox modem operations on top of the AT driver.

#[cfg(feature = "defmt")]
use defmt::info;
use embedded_hal_async::delay::DelayNs;
use heapless::{String, Vec, format};
#[cfg(not(feature = "defmt"))]
use log::info;

use crate::at::response::{AT_COMMAND_SIZE, ENDPOINT_ID_LEN, encode_hex, parse_endpoint_id};
use crate::at::uart::{AtUart, Tx};
use crate::error::Error;
use crate::frame::{MAX_PAYLOAD, UplinkFrame};

pub const RESET_COMMAND: &str = "$RC";
pub const ID_COMMAND: &str = "$I=10";
/// Class parameter sent along with an out-of-band bit.
pub const OUT_OF_BAND_CLASS: u8 = 2;

pub type EndpointId = [u8; ENDPOINT_ID_LEN];

/// Operations of a Sigfox radio modem.
pub trait SigfoxModem {
    /// Resets the modem.
    fn reset(&mut self) -> impl Future<Output = crate::Result<()>>;

    /// Reads the endpoint id of the modem.
    fn endpoint_id(&mut self) -> impl Future<Output = crate::Result<EndpointId>>;

    /// Transmits a single bit message.
    fn send_out_of_band_bit(&mut self, bit: bool) -> impl Future<Output = crate::Result<()>>;

    /// Transmits `payload`, at most `MAX_PAYLOAD` bytes.
    fn send_frame(&mut self, payload: &[u8]) -> impl Future<Output = crate::Result<()>>;

    /// Encodes and transmits `frame`.
    fn send_uplink(&mut self, frame: &UplinkFrame) -> impl Future<Output = crate::Result<()>> {
        async move {
            let payload = frame.encode()?;
            self.send_frame(&payload).await
        }
    }
}

impl<T: Tx, D: DelayNs> SigfoxModem for AtUart<'_, T, D> {
    async fn reset(&mut self) -> crate::Result<()> {
        self.call_at(RESET_COMMAND).await
    }

    async fn endpoint_id(&mut self) -> crate::Result<EndpointId> {
        self.call_at(ID_COMMAND).await?;
        // An OK without any identifier in front of it.
        let id = self.replies(parse_endpoint_id).map_err(|_| Error::ModemError)?;
        info!("Modem endpoint id: {:x}", u32::from_be_bytes(id));
        Ok(id)
    }

    async fn send_out_of_band_bit(&mut self, bit: bool) -> crate::Result<()> {
        let command: String<AT_COMMAND_SIZE> =
            format!(AT_COMMAND_SIZE; "$SB={},{}", u8::from(bit), OUT_OF_BAND_CLASS)
                .map_err(|_| Error::BufferTooSmallError)?;
        self.call_at(&command).await
    }

    async fn send_frame(&mut self, payload: &[u8]) -> crate::Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }
        let hex: String<{ 2 * MAX_PAYLOAD }> = encode_hex(payload)?;
        let command: String<AT_COMMAND_SIZE> = format!(AT_COMMAND_SIZE; "$SF={hex}")
            .map_err(|_| Error::BufferTooSmallError)?;
        self.call_at(&command).await
    }
}

/// One operation requested from a `FakeModem`.
#[derive(Clone, Debug, PartialEq)]
pub enum ModemCall {
    Reset,
    EndpointId,
    OutOfBand(bool),
    Frame(Vec<u8, MAX_PAYLOAD>),
}

/// Modem that records every call, to be used in tests.
#[derive(Default)]
pub struct FakeModem {
    pub calls: Vec<ModemCall, 16>,
    pub endpoint_id: EndpointId,
    /// Error returned by every call while set.
    pub failure: Option<Error>,
}

impl FakeModem {
    fn record(&mut self, call: ModemCall) -> crate::Result<()> {
        self.calls.push(call).map_err(|_| Error::BufferTooSmallError)?;
        self.failure.map_or(Ok(()), Err)
    }

    /// Frames sent so far.
    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.calls.iter().filter_map(|call| match call {
            ModemCall::Frame(payload) => Some(payload.as_slice()),
            _ => None,
        })
    }
}

impl SigfoxModem for FakeModem {
    async fn reset(&mut self) -> crate::Result<()> {
        self.record(ModemCall::Reset)
    }

    async fn endpoint_id(&mut self) -> crate::Result<EndpointId> {
        self.record(ModemCall::EndpointId)?;
        Ok(self.endpoint_id)
    }

    async fn send_out_of_band_bit(&mut self, bit: bool) -> crate::Result<()> {
        self.record(ModemCall::OutOfBand(bit))
    }

    async fn send_frame(&mut self, payload: &[u8]) -> crate::Result<()> {
        let payload = Vec::from_slice(payload).map_err(|_| Error::PayloadTooLarge)?;
        self.record(ModemCall::Frame(payload))
    }
}
