use defmt::{error, info};
use embassy_nrf::gpio::{Input, Output};
use embassy_nrf::uarte::UarteRxWithIdle;
use embassy_time::{Duration, Ticker};
use psumon_common::at::response::ModemReplyBuffer;
use psumon_common::at::uart::rx_loop;
use psumon_common::range::SharedRange;
use psumon_common::report::Reporter;
use psumon_common::sampler::{Sampler, on_bypass_change};
use psumon_common::status::SampleStore;

use crate::device::{RttDisplay, UartLog};
use crate::sensors::{NrfAdc, NrfSensors};

pub type Relay = Output<'static>;
pub type NrfSampler = Sampler<'static, NrfAdc, NrfSensors, Relay>;
pub type NrfReporter = Reporter<'static, RttDisplay, UartLog>;

/// Feeds every byte received from the modem into the reply buffer.
#[embassy_executor::task]
pub async fn modem_reader(rx: UarteRxWithIdle<'static>, replies: &'static ModemReplyBuffer) {
    rx_loop(rx, replies).await
}

/// Fast trigger: one measurement cycle per tick.
#[embassy_executor::task]
pub async fn sampling_loop(mut sampler: NrfSampler, period: Duration) {
    if let Err(err) = sampler.calibrate().await {
        error!("Initial calibration failed: {}", err);
    }
    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        sampler.sample().await;
    }
}

/// Slow trigger: refreshes the display and the serial log.
#[embassy_executor::task]
pub async fn reporting_loop(mut reporter: NrfReporter, period: Duration) {
    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        reporter.refresh();
    }
}

/// Tracks the bypass switch, which pulls its line low while engaged.
#[embassy_executor::task]
pub async fn bypass_watch(
    mut input: Input<'static>,
    range: &'static SharedRange<Relay>,
    samples: &'static SampleStore,
) {
    on_bypass_change(input.is_low(), range, samples);
    loop {
        input.wait_for_any_edge().await;
        let active = input.is_low();
        info!("Bypass {}", if active { "engaged" } else { "released" });
        on_bypass_change(active, range, samples);
    }
}
