//! Fast measurement cycle: converts every channel, steps the range controller and publishes the
//! resulting sample.

#[cfg(feature = "defmt")]
use defmt::{debug, warn};
#[cfg(not(feature = "defmt"))]
use log::{debug, warn};

use crate::analog::{AnalogPipeline, IoutReading, McuSensors, Quantity};
use crate::error::{Error, ErrorSource};
use crate::hw::{AdcChannel, AdcChannels, RelayPin};
use crate::range::{RangeLevel, SharedRange};
use crate::status::{ErrorStack, Sample, SampleStore, TMCU_UNAVAILABLE};

pub struct Sampler<'a, A: AdcChannels, S: McuSensors, P: RelayPin> {
    adc: A,
    pipeline: AnalogPipeline<S>,
    range: &'a SharedRange<P>,
    samples: &'a SampleStore,
    errors: &'a ErrorStack,
    period_ms: u32,
}

impl<'a, A: AdcChannels, S: McuSensors, P: RelayPin> Sampler<'a, A, S, P> {
    pub fn new(
        adc: A,
        pipeline: AnalogPipeline<S>,
        range: &'a SharedRange<P>,
        samples: &'a SampleStore,
        errors: &'a ErrorStack,
        period_ms: u32,
    ) -> Self {
        Self {
            adc,
            pipeline,
            range,
            samples,
            errors,
            period_ms,
        }
    }

    pub fn pipeline(&self) -> &AnalogPipeline<S> {
        &self.pipeline
    }

    /// Calibrates the pipeline against the precision reference.
    pub async fn calibrate(&mut self) -> crate::Result<()> {
        self.pipeline
            .calibrate(&mut self.adc)
            .await
            .inspect_err(|err| self.errors.push_once(ErrorSource::Analog, *err))
    }

    /// Runs one measurement cycle and publishes its sample.
    pub async fn sample(&mut self) -> Sample {
        let previous = self.samples.latest();

        let vmcu_mv = self.read(Quantity::Vmcu).await.unwrap_or(previous.vmcu_mv);
        let tmcu_degrees = self
            .read(Quantity::Tmcu)
            .await
            .map(|degrees| degrees as i8)
            .unwrap_or(TMCU_UNAVAILABLE);
        let vout_mv = self.read(Quantity::Vout).await.unwrap_or(previous.vout_mv);

        let code = match self.adc.convert(AdcChannel::Iout).await {
            Ok(code) => Some(code),
            Err(err) => {
                self.errors.push_once(ErrorSource::Analog, err);
                None
            }
        };
        let iout = match code {
            Some(code) => self.step_range(code, previous.bypass),
            None => self.range.lock(|range| IoutReading {
                raw_code: range.current_raw_code(),
                range: range.current_range(),
            }),
        };
        let iout_ua = match self.pipeline.iout_ua(iout) {
            Ok(iout_ua) => iout_ua,
            Err(err) => {
                self.report(err).await;
                previous.iout_ua
            }
        };

        let sample = Sample {
            vout_mv,
            iout_ua,
            vmcu_mv,
            tmcu_degrees,
            range: iout.range,
            // The bypass line may have changed during the cycle.
            bypass: self.samples.latest().bypass,
        };
        self.samples.publish(sample);
        debug!("Sample: {:?}", sample);
        sample
    }

    async fn read(&mut self, quantity: Quantity) -> crate::Result<i32> {
        let value = self
            .pipeline
            .read(&mut self.adc, quantity, IoutReading::default())
            .await;
        if let Err(err) = value {
            self.report(err).await;
        }
        value
    }

    fn step_range(&mut self, code: u16, bypass: bool) -> IoutReading {
        let (result, raw_code) = self.range.lock(|range| {
            let result = range.step(self.period_ms, code, bypass);
            (result, range.current_raw_code())
        });
        let range = match result {
            Ok(range) => range,
            Err(err) => {
                self.errors.push_once(ErrorSource::Range, err);
                RangeLevel::None
            }
        };
        IoutReading { raw_code, range }
    }

    /// Records a conversion failure. A missing calibration is fixed right away.
    async fn report(&mut self, err: Error) {
        self.errors.push_once(ErrorSource::Analog, err);
        if err == Error::CalibrationMissing {
            warn!("Conversion without calibration, recalibrating");
            let _ = self.calibrate().await;
        }
    }
}

/// Applies a bypass switch edge.
pub fn on_bypass_change<P: RelayPin>(active: bool, range: &SharedRange<P>, samples: &SampleStore) {
    samples.set_bypass(active);
    if active {
        range.lock(|range| range.engage_bypass());
    }
}
