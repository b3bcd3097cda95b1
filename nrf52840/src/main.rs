#![no_std]
#![no_main]

use defmt::{error, info};
use embassy_executor::Spawner;
use embassy_time::{Delay, Instant, Timer};
use psumon_common::analog::AnalogPipeline;
use psumon_common::at::response::ModemReplyBuffer;
use psumon_common::at::uart::AtUart;
use psumon_common::config::{BoardConfig, ModemConfig, MonitorConfig, RangeConfig};
use psumon_common::range::{RangeController, SharedRange};
use psumon_common::report::{Reporter, SharedDisplay};
use psumon_common::sampler::Sampler;
use psumon_common::status::{ErrorStack, SampleStore};
use psumon_common::supervisor::{Shared, Supervisor};
use psumon_nrf52840::{
    self as _,
    device::{Device, RttDisplay},
    sensors::NrfSensors,
    system_info::firmware_info,
    tasks::{Relay, bypass_watch, modem_reader, reporting_loop, sampling_loop},
};
use static_cell::StaticCell;

static REPLIES: ModemReplyBuffer = ModemReplyBuffer::new();
static SAMPLES: SampleStore = SampleStore::new();
static ERRORS: ErrorStack = ErrorStack::new();
static RANGE: StaticCell<SharedRange<Relay>> = StaticCell::new();
static DISPLAY: StaticCell<SharedDisplay<RttDisplay>> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let info = firmware_info();
    let device = match Device::new() {
        Ok(device) => device,
        Err(err) => {
            error!("Device initialization failed: {}", err);
            return;
        }
    };
    let Device {
        mut adc,
        relays,
        bypass,
        modem_tx,
        modem_rx,
        serial_log,
        display,
        watchdog,
    } = device;
    info!(
        "PSU monitor {}.{}-{}, reset reason {:#x}",
        info.major_version, info.minor_version, info.commit_index, info.reset_reason
    );

    let config = MonitorConfig::default();
    let range: &'static SharedRange<Relay> =
        RANGE.init(SharedRange::new(RangeController::new(relays, RangeConfig::default())));
    let display: &'static SharedDisplay<RttDisplay> = DISPLAY.init(SharedDisplay::new(display));

    adc.calibrate().await;
    let pipeline = AnalogPipeline::new(BoardConfig::default(), NrfSensors);
    let sampler = Sampler::new(
        adc,
        pipeline,
        range,
        &SAMPLES,
        &ERRORS,
        config.sampling_period.as_millis() as u32,
    );
    let reporter = Reporter::new(display, serial_log, &SAMPLES, &ERRORS, config.serial_log);

    spawner.spawn(modem_reader(modem_rx, &REPLIES).unwrap());
    spawner.spawn(sampling_loop(sampler, config.sampling_period).unwrap());
    spawner.spawn(reporting_loop(reporter, config.reporting_period).unwrap());
    spawner.spawn(bypass_watch(bypass, range, &SAMPLES).unwrap());

    let modem = AtUart::new(modem_tx, Delay, &REPLIES, ModemConfig::default());
    let shared = Shared {
        range,
        samples: &SAMPLES,
        errors: &ERRORS,
        display,
    };
    let mut supervisor = Supervisor::new(config, info, modem, watchdog, shared);
    loop {
        supervisor.tick(Instant::now().as_secs()).await;
        Timer::after(config.sampling_period).await;
    }
}
