use embassy_futures::block_on;
use psumon_common::analog::{AnalogPipeline, FactoryCalibration};
use psumon_common::config::{BoardConfig, FirmwareInfo, MonitorConfig, RangeConfig};
use psumon_common::frame::{MonitoringFrame, StartupFrame, decode_error_stack};
use psumon_common::hw::{AdcChannel, FakeAdc, FakePin, NoSerialLog, NoWatchdog};
use psumon_common::range::{RangeController, RangeLevel, SharedRange};
use psumon_common::report::{FakeDisplay, Reporter, SharedDisplay};
use psumon_common::sampler::{Sampler, on_bypass_change};
use psumon_common::status::{ErrorStack, SampleStore};
use psumon_common::supervisor::{Shared, Supervisor, SupervisorState};
use psumon_common::uplink::FakeModem;

const CAL: FactoryCalibration = FactoryCalibration {
    vrefint_cal: 1650,
    vrefint_cal_mv: 3000,
    ts_cal1: 670,
    ts_cal1_degrees: 30,
    ts_cal2: 870,
    ts_cal2_degrees: 130,
    ts_cal_mv: 3000,
};

/// Supply code giving 3093 mV, below the OFF threshold.
const VMCU_LOW: u16 = 1600;
/// Supply code giving 3535 mV, above the ON threshold.
const VMCU_HIGH: u16 = 1400;

const INFO: FirmwareInfo = FirmwareInfo {
    reset_reason: 1,
    major_version: 0,
    minor_version: 3,
    commit_index: 7,
    commit_id: 0x00C0FFEE,
    dirty: false,
};

fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

#[test]
fn power_cycle_and_reports() {
    init_logging();
    let range = SharedRange::new(RangeController::new(
        [FakePin::default(); 3],
        RangeConfig::default(),
    ));
    let (samples, errors) = (SampleStore::new(), ErrorStack::new());
    let display = SharedDisplay::new(FakeDisplay::default());

    let mut adc = FakeAdc::new([2048, 1024, 1000, VMCU_LOW, 700]);
    let pipeline = AnalogPipeline::new(BoardConfig::DIVIDER_2_1, CAL);
    let mut sampler = Sampler::new(adc, pipeline, &range, &samples, &errors, 100);
    let mut reporter = Reporter::new(&display, NoSerialLog, &samples, &errors, false);
    let shared = Shared {
        range: &range,
        samples: &samples,
        errors: &errors,
        display: &display,
    };
    let modem = FakeModem {
        endpoint_id: [0xDE, 0xAD, 0xBE, 0xEF],
        ..Default::default()
    };
    let mut supervisor = Supervisor::new(MonitorConfig::default(), INFO, modem, NoWatchdog, shared);

    block_on(sampler.calibrate()).unwrap();
    block_on(sampler.sample());
    assert_eq!(block_on(supervisor.tick(0)), SupervisorState::VmcuMonitoring);
    assert_eq!(range.lock(|range| range.current_range()), RangeLevel::None);

    // Supply comes up.
    adc.set(AdcChannel::Vmcu, VMCU_HIGH);
    let pipeline = AnalogPipeline::new(BoardConfig::DIVIDER_2_1, CAL);
    let mut sampler = Sampler::new(adc, pipeline, &range, &samples, &errors, 100);
    block_on(sampler.calibrate()).unwrap();
    block_on(sampler.sample());
    assert_eq!(block_on(supervisor.tick(1)), SupervisorState::PowerOnReset);
    assert_eq!(block_on(supervisor.tick(1)), SupervisorState::PeriodCheck);
    assert_eq!(supervisor.next_report_s(), 301);
    display.lock(|display| assert_eq!(display.rows[2].as_str(), "ID DEADBEEF"));

    let startup = StartupFrame::decode(supervisor.modem().frames().next().unwrap()).unwrap();
    assert_eq!(startup, StartupFrame::from(&INFO));

    // Middle of the High range, no switching.
    for _ in 0..5 {
        block_on(sampler.sample());
        reporter.refresh();
    }
    let sample = samples.latest();
    assert_eq!(sample.range, RangeLevel::High);
    assert_eq!(sample.vmcu_mv, 3535);
    display.lock(|display| assert_eq!(display.rows[2].as_str(), "HIGH"));

    let mut uptime_s = 1;
    while supervisor.state() != SupervisorState::Sigfox {
        uptime_s += 10;
        block_on(supervisor.tick(uptime_s));
    }
    assert_eq!(uptime_s, 311);
    block_on(supervisor.tick(uptime_s));
    assert_eq!(supervisor.next_report_s(), 601);

    let frames: Vec<&[u8]> = supervisor.modem().frames().collect();
    assert_eq!(frames.len(), 2);
    let monitoring = MonitoringFrame::decode(frames[1]).unwrap();
    assert_eq!(monitoring, MonitoringFrame::from_sample(&sample));
    assert!(errors.is_empty());
}

#[test]
fn overflow_is_reported() {
    init_logging();
    let range = SharedRange::new(RangeController::new(
        [FakePin::default(); 3],
        RangeConfig::default(),
    ));
    let (samples, errors) = (SampleStore::new(), ErrorStack::new());
    let display = SharedDisplay::new(FakeDisplay::default());
    let adc = FakeAdc::new([2048, 1024, 10, VMCU_HIGH, 700]);
    let pipeline = AnalogPipeline::new(BoardConfig::DIVIDER_599_100, CAL);
    let mut sampler = Sampler::new(adc, pipeline, &range, &samples, &errors, 100);
    let shared = Shared {
        range: &range,
        samples: &samples,
        errors: &errors,
        display: &display,
    };
    let mut supervisor = Supervisor::new(
        MonitorConfig::default(),
        FirmwareInfo::default(),
        FakeModem::default(),
        NoWatchdog,
        shared,
    );

    block_on(sampler.calibrate()).unwrap();
    block_on(sampler.sample());
    block_on(supervisor.tick(0));
    block_on(supervisor.tick(0));

    // A tiny load walks the range down one level at a time.
    let mut seen: Vec<RangeLevel> = Vec::new();
    for _ in 0..20 {
        let sample = block_on(sampler.sample());
        if seen.last() != Some(&sample.range) {
            seen.push(sample.range);
        }
    }
    assert_eq!(seen, [RangeLevel::Middle, RangeLevel::Low]);

    // A short on the output walks it back up and trips.
    let adc = FakeAdc::new([2048, 1024, 4095, VMCU_HIGH, 700]);
    let pipeline = AnalogPipeline::new(BoardConfig::DIVIDER_599_100, CAL);
    let mut sampler = Sampler::new(adc, pipeline, &range, &samples, &errors, 100);
    block_on(sampler.calibrate()).unwrap();
    let mut seen: Vec<RangeLevel> = Vec::new();
    for _ in 0..40 {
        let sample = block_on(sampler.sample());
        if seen.last() != Some(&sample.range) {
            seen.push(sample.range);
        }
    }
    assert_eq!(
        seen,
        [RangeLevel::Low, RangeLevel::Middle, RangeLevel::High, RangeLevel::None]
    );
    assert!(range.lock(|range| range.tripped()));
    assert_eq!(range.lock(|range| range.relays().map(|pin| pin.high)), [false; 3]);
    assert_eq!(errors.len(), 1);

    // The bypass takes over the load and re-energizes the widest range.
    on_bypass_change(true, &range, &samples);
    assert_eq!(range.lock(|range| range.current_range()), RangeLevel::High);
    let sample = block_on(sampler.sample());
    assert!(sample.bypass);

    let mut uptime_s = 0;
    while supervisor.state() != SupervisorState::Sigfox {
        uptime_s += 60;
        block_on(supervisor.tick(uptime_s));
    }
    block_on(supervisor.tick(uptime_s));
    let frames: Vec<&[u8]> = supervisor.modem().frames().collect();
    let monitoring = MonitoringFrame::decode(frames[1]).unwrap();
    assert_eq!(monitoring.range, RangeLevel::None);
    assert_eq!(monitoring.iout_ua, (1 << 24) - 1);
    assert_eq!(decode_error_stack(frames[2]).unwrap().as_slice(), [0x0106]);
}
