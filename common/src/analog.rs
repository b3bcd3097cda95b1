//! Conversion of raw converter codes into engineering units.

#[cfg(feature = "defmt")]
use defmt::{debug, info};
#[cfg(not(feature = "defmt"))]
use log::{debug, info};

use crate::config::BoardConfig;
use crate::error::Error;
use crate::hw::{AdcChannel, AdcChannels};
use crate::range::RangeLevel;

/// Largest temperature magnitude that fits the 7-bit field next to the "unavailable" sentinel.
pub const TMCU_MAX_MAGNITUDE: i32 = 126;

/// Device specific formulas for the controller's own supply and die temperature.
pub trait McuSensors {
    /// Converts the supply channel code into millivolts.
    fn vmcu_mv(&self, code: u16) -> crate::Result<i32>;

    /// Converts the temperature channel code into degrees, given the current supply.
    fn tmcu_degrees(&self, code: u16, vmcu_mv: i32) -> crate::Result<i32>;
}

/// Factory calibration words of an internal reference and a linear temperature sensor.
///
/// The supply is derived from the internal reference measured against it, the temperature
/// from two calibration points taken at `ts_cal_mv`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactoryCalibration {
    pub vrefint_cal: u16,
    pub vrefint_cal_mv: i32,
    pub ts_cal1: u16,
    pub ts_cal1_degrees: i32,
    pub ts_cal2: u16,
    pub ts_cal2_degrees: i32,
    pub ts_cal_mv: i32,
}

impl McuSensors for FactoryCalibration {
    fn vmcu_mv(&self, code: u16) -> crate::Result<i32> {
        if code == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(self.vrefint_cal_mv * i32::from(self.vrefint_cal) / i32::from(code))
    }

    fn tmcu_degrees(&self, code: u16, vmcu_mv: i32) -> crate::Result<i32> {
        let span = i32::from(self.ts_cal2) - i32::from(self.ts_cal1);
        if span == 0 || self.ts_cal_mv == 0 {
            return Err(Error::InvalidArgument);
        }
        let scaled = i64::from(code) * i64::from(vmcu_mv) / i64::from(self.ts_cal_mv);
        let degrees = (scaled - i64::from(self.ts_cal1))
            * i64::from(self.ts_cal2_degrees - self.ts_cal1_degrees)
            / i64::from(span)
            + i64::from(self.ts_cal1_degrees);
        Ok(degrees.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }
}

/// Quantities produced by the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Quantity {
    Vmcu,
    Tmcu,
    Vout,
    IoutMv,
    IoutUa,
}

/// State of the range controller needed for the current conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IoutReading {
    /// Averaged raw code of the active range.
    pub raw_code: u16,
    pub range: RangeLevel,
}

pub struct AnalogPipeline<S: McuSensors> {
    board: BoardConfig,
    sensors: S,
    ref_code: Option<u16>,
    vmcu_mv: Option<i32>,
    vout_mv: Option<i32>,
}

impl<S: McuSensors> AnalogPipeline<S> {
    pub fn new(board: BoardConfig, sensors: S) -> Self {
        Self {
            board,
            sensors,
            ref_code: None,
            vmcu_mv: None,
            vout_mv: None,
        }
    }

    /// Samples the precision reference and stores its code.
    pub async fn calibrate<A: AdcChannels>(&mut self, adc: &mut A) -> crate::Result<()> {
        let code = adc.convert(AdcChannel::Reference).await?;
        self.set_calibration(code)?;
        info!("Reference calibrated, code {}", code);
        Ok(())
    }

    pub fn set_calibration(&mut self, ref_code: u16) -> crate::Result<()> {
        if ref_code == 0 {
            return Err(Error::InvalidArgument);
        }
        self.ref_code = Some(ref_code);
        Ok(())
    }

    pub fn calibration(&self) -> Option<u16> {
        self.ref_code
    }

    /// Converts one quantity.
    ///
    /// `IoutUa` uses `iout` instead of a fresh conversion and is compensated with the last
    /// converted `Vout`.
    pub async fn read<A: AdcChannels>(
        &mut self,
        adc: &mut A,
        quantity: Quantity,
        iout: IoutReading,
    ) -> crate::Result<i32> {
        let value = match quantity {
            Quantity::Vmcu => {
                let code = adc.convert(AdcChannel::Vmcu).await?;
                self.vmcu_from_code(code)
            }
            Quantity::Tmcu => {
                let code = adc.convert(AdcChannel::Tmcu).await?;
                self.tmcu_from_code(code)
            }
            Quantity::Vout => {
                let code = adc.convert(AdcChannel::Vout).await?;
                self.vout_from_code(code)
            }
            Quantity::IoutMv => {
                let code = adc.convert(AdcChannel::Iout).await?;
                self.iout_mv_from_code(code)
            }
            Quantity::IoutUa => self.iout_ua(iout),
        };
        if let Ok(value) = value.as_ref() {
            debug!("{:?} = {}", quantity, value);
        }
        value
    }

    pub fn vmcu_from_code(&mut self, code: u16) -> crate::Result<i32> {
        let vmcu_mv = self.sensors.vmcu_mv(code)?;
        self.vmcu_mv = Some(vmcu_mv);
        Ok(vmcu_mv)
    }

    /// Die temperature clamped to the range of the frame field.
    pub fn tmcu_from_code(&self, code: u16) -> crate::Result<i32> {
        let vmcu_mv = self.vmcu_mv.ok_or(Error::CalibrationMissing)?;
        let degrees = self.sensors.tmcu_degrees(code, vmcu_mv)?;
        Ok(degrees.clamp(-TMCU_MAX_MAGNITUDE, TMCU_MAX_MAGNITUDE))
    }

    pub fn vout_from_code(&mut self, code: u16) -> crate::Result<i32> {
        let ref_code = i64::from(self.ref_code.ok_or(Error::CalibrationMissing)?);
        let vout_mv = i64::from(code) * self.board.ref_voltage_mv * self.board.divider_num
            / (ref_code * self.board.divider_den);
        let vout_mv = Self::saturate(vout_mv);
        self.vout_mv = Some(vout_mv);
        Ok(vout_mv)
    }

    pub fn iout_mv_from_code(&self, code: u16) -> crate::Result<i32> {
        let ref_code = i64::from(self.ref_code.ok_or(Error::CalibrationMissing)?);
        Ok(Self::saturate(i64::from(code) * self.board.ref_voltage_mv / ref_code))
    }

    /// Output current in microamps, without the current drawn by the output divider.
    pub fn iout_ua(&self, iout: IoutReading) -> crate::Result<i32> {
        let ref_code = i64::from(self.ref_code.ok_or(Error::CalibrationMissing)?);
        let Some(idx) = iout.range.relay() else {
            return Ok(0);
        };
        let denominator = ref_code * self.board.current_gain * self.board.sense_resistor_mohm[idx];
        if denominator <= 0 || self.board.divider_resistance_ohm <= 0 {
            return Err(Error::InvalidArgument);
        }
        let iout_ua =
            i64::from(iout.raw_code) * self.board.ref_voltage_mv * 1_000_000 / denominator;
        let divider_ua =
            i64::from(self.vout_mv.unwrap_or(0)) * 1000 / self.board.divider_resistance_ohm;
        Ok(Self::saturate((iout_ua - divider_ua).max(0)))
    }

    fn saturate(value: i64) -> i32 {
        value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}
