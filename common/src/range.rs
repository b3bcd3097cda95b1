use core::cell::RefCell;

#[cfg(feature = "defmt")]
use defmt::{info, warn};
use embassy_sync::blocking_mutex::Mutex;
#[cfg(not(feature = "defmt"))]
use log::{info, warn};

use crate::RawMutex;
use crate::config::RangeConfig;
use crate::error::Error;
use crate::hw::RelayPin;

/// Current-sense range, ordered from the most sensitive to the widest span.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RangeLevel {
    /// No sense resistor connected.
    #[default]
    None = 0,
    Low = 1,
    Middle = 2,
    High = 3,
}

impl RangeLevel {
    /// Index of the relay line and sense resistor of this range.
    pub fn relay(self) -> Option<usize> {
        match self {
            RangeLevel::None => None,
            RangeLevel::Low => Some(0),
            RangeLevel::Middle => Some(1),
            RangeLevel::High => Some(2),
        }
    }

    fn up(self) -> Option<Self> {
        match self {
            RangeLevel::None => Some(RangeLevel::Low),
            RangeLevel::Low => Some(RangeLevel::Middle),
            RangeLevel::Middle => Some(RangeLevel::High),
            RangeLevel::High => None,
        }
    }

    fn down(self) -> Option<Self> {
        match self {
            RangeLevel::High => Some(RangeLevel::Middle),
            RangeLevel::Middle => Some(RangeLevel::Low),
            RangeLevel::Low | RangeLevel::None => None,
        }
    }
}

impl TryFrom<u8> for RangeLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RangeLevel::None),
            1 => Ok(RangeLevel::Low),
            2 => Ok(RangeLevel::Middle),
            3 => Ok(RangeLevel::High),
            _ => Err(Error::ParseError),
        }
    }
}

pub const AVERAGE_WINDOW: usize = 8;

/// Moving average over the last `AVERAGE_WINDOW` raw codes.
#[derive(Default)]
struct MovingAverage {
    samples: [u16; AVERAGE_WINDOW],
    pos: usize,
    filled: bool,
    sum: u32,
}

impl MovingAverage {
    /// Adds a code and returns the new average. The first code after a reset fills the window.
    fn push(&mut self, code: u16) -> u16 {
        if !self.filled {
            self.samples = [code; AVERAGE_WINDOW];
            self.sum = u32::from(code) * AVERAGE_WINDOW as u32;
            self.pos = 0;
            self.filled = true;
        } else {
            self.sum -= u32::from(self.samples[self.pos]);
            self.samples[self.pos] = code;
            self.sum += u32::from(code);
            self.pos = (self.pos + 1) % AVERAGE_WINDOW;
        }
        self.average()
    }

    fn average(&self) -> u16 {
        (self.sum / AVERAGE_WINDOW as u32) as u16
    }

    fn reset(&mut self) {
        self.filled = false;
        self.sum = 0;
    }
}

/// The single outstanding range switch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeSwitchTimer {
    from: RangeLevel,
    elapsed_ms: u32,
    released: bool,
}

/// Selects the sense resistor and drives its relay line.
///
/// Switching is make-before-break: the relay of the new range is closed first and the previous
/// one is opened only after the recovery delay, so the load current is never interrupted.
pub struct RangeController<P: RelayPin> {
    relays: [P; 3],
    config: RangeConfig,
    range: RangeLevel,
    average: MovingAverage,
    pending: Option<RangeSwitchTimer>,
    tripped: bool,
    tripped_ms: u32,
    low_cycles: u8,
}

impl<P: RelayPin> RangeController<P> {
    /// Creates a controller with every relay open. Call `init` to energize the output.
    pub fn new(mut relays: [P; 3], config: RangeConfig) -> Self {
        for relay in relays.iter_mut() {
            relay.set_low();
        }
        Self {
            relays,
            config,
            range: RangeLevel::None,
            average: MovingAverage::default(),
            pending: None,
            tripped: false,
            tripped_ms: 0,
            low_cycles: 0,
        }
    }

    /// Resets to the widest range so the load is powered right away.
    pub fn init(&mut self) {
        self.force(RangeLevel::High);
        self.tripped = false;
        info!("Range initialized to {:?}", self.range);
    }

    /// Opens every relay.
    pub fn power_down(&mut self) {
        self.force(RangeLevel::None);
        self.tripped = false;
        info!("Range powered down");
    }

    pub fn current_range(&self) -> RangeLevel {
        self.range
    }

    /// Moving average of the raw current code of the active range.
    pub fn current_raw_code(&self) -> u16 {
        self.average.average()
    }

    /// True while a make-before-break switch is in progress.
    pub fn switch_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// True after an overflow trip, until the controller re-arms.
    ///
    /// With every relay open the current channel reads zero whatever the load does, so the
    /// widest range is only retried after `overflow_holdoff_ms`.
    pub fn tripped(&self) -> bool {
        self.tripped
    }

    pub fn relays(&self) -> &[P; 3] {
        &self.relays
    }

    /// Forces the widest range while the bypass switch carries the load.
    ///
    /// The other relays open at once and a pending switch is dropped.
    pub fn engage_bypass(&mut self) {
        if self.range != RangeLevel::High || self.pending.is_some() {
            self.force(RangeLevel::High);
            info!("Bypass engaged, range forced to High");
        }
        self.tripped = false;
    }

    /// Runs one control cycle.
    ///
    /// `period_ms` is the time elapsed since the previous cycle, `iout_raw_code` the fresh code of
    /// the current channel. Returns the selected range, or `RangeOverflow` after tripping.
    pub fn step(
        &mut self,
        period_ms: u32,
        iout_raw_code: u16,
        bypass_active: bool,
    ) -> crate::Result<RangeLevel> {
        self.advance_switch(period_ms);
        let average = self.average.push(iout_raw_code);

        if bypass_active {
            self.engage_bypass();
            return Ok(self.range);
        }

        if self.range == RangeLevel::None {
            if !self.tripped {
                return Ok(self.range);
            }
            self.tripped_ms = self.tripped_ms.saturating_add(period_ms);
            if self.tripped_ms >= self.config.overflow_holdoff_ms
                && average <= self.config.upper_threshold
            {
                self.force(RangeLevel::High);
                self.tripped = false;
                info!("Range re-armed after overflow");
            }
            return Ok(self.range);
        }

        if self.pending.is_some() {
            return Ok(self.range);
        }

        if average > self.config.upper_threshold {
            self.low_cycles = 0;
            match self.range.up() {
                Some(next) => self.switch_to(next),
                None => {
                    self.trip();
                    return Err(Error::RangeOverflow);
                }
            }
        } else if average < self.config.lower_threshold && self.range > RangeLevel::Low {
            self.low_cycles = self.low_cycles.saturating_add(1);
            if self.low_cycles > self.config.downshift_confirm_cycles
                && let Some(next) = self.range.down()
            {
                self.low_cycles = 0;
                self.switch_to(next);
            }
        } else {
            self.low_cycles = 0;
        }

        Ok(self.range)
    }

    fn advance_switch(&mut self, period_ms: u32) {
        let Some(timer) = self.pending.as_mut() else {
            return;
        };
        timer.elapsed_ms = timer.elapsed_ms.saturating_add(period_ms);
        if !timer.released && timer.elapsed_ms >= self.config.recovery_ms {
            if let Some(idx) = timer.from.relay() {
                self.relays[idx].set_low();
            }
            timer.released = true;
        }
        if timer.elapsed_ms >= self.config.recovery_ms + self.config.stabilization_ms {
            self.pending = None;
        }
    }

    fn switch_to(&mut self, next: RangeLevel) {
        if let Some(idx) = next.relay() {
            self.relays[idx].set_high();
        }
        info!("Range switch {:?} -> {:?}", self.range, next);
        self.pending = Some(RangeSwitchTimer {
            from: self.range,
            elapsed_ms: 0,
            released: false,
        });
        self.range = next;
        self.average.reset();
    }

    /// Jumps to `range` without overlap.
    fn force(&mut self, range: RangeLevel) {
        if let Some(idx) = range.relay() {
            self.relays[idx].set_high();
        }
        for (idx, relay) in self.relays.iter_mut().enumerate() {
            if Some(idx) != range.relay() {
                relay.set_low();
            }
        }
        self.range = range;
        self.pending = None;
        self.low_cycles = 0;
        self.average.reset();
    }

    fn trip(&mut self) {
        for relay in self.relays.iter_mut() {
            relay.set_low();
        }
        warn!("Current above the widest range, all relays open");
        self.range = RangeLevel::None;
        self.pending = None;
        self.low_cycles = 0;
        self.tripped = true;
        self.tripped_ms = 0;
    }
}

/// Range controller shared between the sampling path, the bypass line and the supervisor.
pub struct SharedRange<P: RelayPin> {
    inner: Mutex<RawMutex, RefCell<RangeController<P>>>,
}

impl<P: RelayPin> SharedRange<P> {
    pub fn new(controller: RangeController<P>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(controller)),
        }
    }

    /// Runs `f` on the controller inside a critical section.
    pub fn lock<R>(&self, f: impl FnOnce(&mut RangeController<P>) -> R) -> R {
        self.inner.lock(|controller| f(&mut controller.borrow_mut()))
    }
}
