//! Foreground state machine: power detection, one-shot startup reporting and the periodic radio
//! report.

#[cfg(feature = "defmt")]
use defmt::{info, warn};
use heapless::Vec;
#[cfg(not(feature = "defmt"))]
use log::{info, warn};

use crate::config::{FirmwareInfo, MonitorConfig};
use crate::error::{Error, ErrorSource};
use crate::frame::{MonitoringFrame, StartupFrame, UplinkFrame};
use crate::hw::{Display, RelayPin, Watchdog};
use crate::range::SharedRange;
use crate::report::SharedDisplay;
use crate::status::{ERROR_STACK_SIZE, ErrorStack, SampleStore};
use crate::uplink::{EndpointId, SigfoxModem};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SupervisorState {
    #[default]
    VmcuMonitoring,
    PowerOnReset,
    PeriodCheck,
    Sigfox,
    Off,
}

/// Resources shared with the sampling and reporting tasks.
pub struct Shared<'a, P: RelayPin, D: Display> {
    pub range: &'a SharedRange<P>,
    pub samples: &'a SampleStore,
    pub errors: &'a ErrorStack,
    pub display: &'a SharedDisplay<D>,
}

pub struct Supervisor<'a, M: SigfoxModem, W: Watchdog, P: RelayPin, D: Display> {
    state: SupervisorState,
    config: MonitorConfig,
    info: FirmwareInfo,
    modem: M,
    watchdog: W,
    shared: Shared<'a, P, D>,
    initialized: bool,
    startup_sent: bool,
    next_report_s: u64,
    endpoint_id: Option<EndpointId>,
}

impl<'a, M: SigfoxModem, W: Watchdog, P: RelayPin, D: Display> Supervisor<'a, M, W, P, D> {
    pub fn new(
        config: MonitorConfig,
        info: FirmwareInfo,
        modem: M,
        watchdog: W,
        shared: Shared<'a, P, D>,
    ) -> Self {
        Self {
            state: SupervisorState::VmcuMonitoring,
            config,
            info,
            modem,
            watchdog,
            shared,
            initialized: false,
            startup_sent: false,
            next_report_s: 0,
            endpoint_id: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Uptime in seconds of the next radio report.
    pub fn next_report_s(&self) -> u64 {
        self.next_report_s
    }

    pub fn endpoint_id(&self) -> Option<EndpointId> {
        self.endpoint_id
    }

    pub fn modem(&self) -> &M {
        &self.modem
    }

    /// Runs the action of the current state and moves to the next one.
    pub async fn tick(&mut self, uptime_s: u64) -> SupervisorState {
        self.watchdog.feed();
        let next = match self.state {
            SupervisorState::VmcuMonitoring => self.check_vmcu(),
            SupervisorState::PowerOnReset => {
                self.power_on_reset(uptime_s).await;
                SupervisorState::PeriodCheck
            }
            SupervisorState::PeriodCheck => self.check_period(uptime_s),
            SupervisorState::Sigfox => {
                self.report().await;
                SupervisorState::VmcuMonitoring
            }
            SupervisorState::Off => {
                self.power_off().await;
                SupervisorState::VmcuMonitoring
            }
        };
        if next != self.state {
            info!("Supervisor {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        next
    }

    fn check_vmcu(&self) -> SupervisorState {
        let vmcu_mv = self.shared.samples.latest().vmcu_mv;
        if vmcu_mv < self.config.vmcu_off_mv && self.initialized {
            SupervisorState::Off
        } else if vmcu_mv > self.config.vmcu_on_mv {
            if self.initialized {
                SupervisorState::PeriodCheck
            } else {
                SupervisorState::PowerOnReset
            }
        } else {
            SupervisorState::VmcuMonitoring
        }
    }

    async fn power_on_reset(&mut self, uptime_s: u64) {
        self.shared.range.lock(|range| range.init());

        if self.config.radio {
            let endpoint_id = self.modem.endpoint_id().await;
            self.endpoint_id = self.record(endpoint_id);
            self.watchdog.feed();
        }
        self.shared.display.banner(&self.info, self.endpoint_id);
        self.watchdog.feed();

        if self.config.radio {
            if !self.startup_sent {
                let frame = UplinkFrame::Startup(StartupFrame::from(&self.info));
                let result = self.modem.send_uplink(&frame).await;
                // Latched even on failure, the error is reported with the next frame.
                self.startup_sent = true;
                self.record(result);
                self.watchdog.feed();
            }
            let result = self.modem.send_out_of_band_bit(true).await;
            self.record(result);
            self.watchdog.feed();
        }

        self.initialized = true;
        self.next_report_s = uptime_s + self.config.report_period_s;
        info!("Powered on, next report at {}s", self.next_report_s);
    }

    fn check_period(&mut self, uptime_s: u64) -> SupervisorState {
        if uptime_s < self.next_report_s {
            return SupervisorState::VmcuMonitoring;
        }
        self.next_report_s += self.config.report_period_s;
        if self.next_report_s <= uptime_s {
            self.next_report_s = uptime_s + self.config.report_period_s;
        }
        if self.config.radio {
            SupervisorState::Sigfox
        } else {
            SupervisorState::VmcuMonitoring
        }
    }

    async fn report(&mut self) {
        let sample = self.shared.samples.latest();
        let frame = UplinkFrame::Monitoring(MonitoringFrame::from_sample(&sample));
        let result = self.modem.send_uplink(&frame).await;
        self.record(result);
        self.watchdog.feed();

        if self.shared.errors.is_empty() {
            return;
        }
        let dropped = self.shared.errors.dropped();
        if dropped > 0 {
            warn!("{} error codes were dropped", dropped);
        }
        let codes: Vec<u16, ERROR_STACK_SIZE> = self.shared.errors.drain().into_iter().collect();
        let result = self.modem.send_uplink(&UplinkFrame::ErrorStack(codes)).await;
        self.record(result);
        self.watchdog.feed();
    }

    async fn power_off(&mut self) {
        self.shared.range.lock(|range| range.power_down());
        self.initialized = false;
        self.shared.display.clear();
        if self.config.radio {
            let result = self.modem.send_out_of_band_bit(false).await;
            self.record(result);
            self.watchdog.feed();
        }
        info!("Powered off");
    }

    /// Pushes a failed modem operation onto the error stack.
    fn record<T>(&self, result: crate::Result<T>) -> Option<T> {
        result
            .inspect_err(|err: &Error| {
                warn!("Modem operation failed: {}", err);
                self.shared.errors.push(ErrorSource::Uplink, *err);
            })
            .ok()
    }
}
