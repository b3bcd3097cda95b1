//! Converter channels of the nRF52840: SAADC inputs and the die temperature sensor.

use defmt::warn;
use embassy_nrf::saadc::Saadc;
use embassy_nrf::temp::Temp;
use psumon_common::analog::McuSensors;
use psumon_common::config::ADC_FULL_SCALE;
use psumon_common::error::Error;
use psumon_common::hw::{AdcChannel, AdcChannels};

/// Number of SAADC channels: reference, output voltage, current sense and VDD.
pub const SAADC_CHANNELS: usize = 4;

/// The temperature "code" is the die temperature in kelvin.
const KELVIN_OFFSET: i32 = 273;
/// VDD is sampled with gain 1/6 against the 0.6 V internal reference.
const VDD_FULL_SCALE_MV: i32 = 3600;

pub struct NrfAdc {
    saadc: Saadc<'static, SAADC_CHANNELS>,
    temp: Temp<'static>,
}

impl NrfAdc {
    pub fn new(saadc: Saadc<'static, SAADC_CHANNELS>, temp: Temp<'static>) -> Self {
        Self { saadc, temp }
    }

    /// Runs the SAADC offset calibration.
    pub async fn calibrate(&mut self) {
        self.saadc.calibrate().await;
    }

    fn saadc_index(channel: AdcChannel) -> Option<usize> {
        match channel {
            AdcChannel::Reference => Some(0),
            AdcChannel::Vout => Some(1),
            AdcChannel::Iout => Some(2),
            AdcChannel::Vmcu => Some(3),
            AdcChannel::Tmcu => None,
        }
    }
}

impl AdcChannels for NrfAdc {
    async fn convert(&mut self, channel: AdcChannel) -> crate::Result<u16> {
        let Some(idx) = Self::saadc_index(channel) else {
            let degrees: i32 = self.temp.read().await.to_num();
            return u16::try_from(degrees + KELVIN_OFFSET).map_err(|_| Error::InvalidArgument);
        };

        let mut buf = [0i16; SAADC_CHANNELS];
        self.saadc.sample(&mut buf).await;
        let raw = buf[idx];
        if raw < 0 {
            // Single ended inputs dip slightly below zero around ground.
            warn!("Negative SAADC reading {} on {}", raw, channel);
        }
        Ok(raw.clamp(0, ADC_FULL_SCALE as i16) as u16)
    }
}

/// Supply and die temperature of the nRF52840.
#[derive(Clone, Copy, Default)]
pub struct NrfSensors;

impl McuSensors for NrfSensors {
    fn vmcu_mv(&self, code: u16) -> crate::Result<i32> {
        Ok(i32::from(code) * VDD_FULL_SCALE_MV / (i32::from(ADC_FULL_SCALE) + 1))
    }

    fn tmcu_degrees(&self, code: u16, _vmcu_mv: i32) -> crate::Result<i32> {
        Ok(i32::from(code) - KELVIN_OFFSET)
    }
}
