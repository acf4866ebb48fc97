use serde::{Deserialize, Serialize};

use crate::{
    config::MonitorConfig,
    indicator::{blink_intensity, FULL, OFF},
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    #[default]
    Cold,
    Hot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameActive,
    BecameInactive,
}

/// Indicator writes produced by one tick. `None` leaves the channel as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndicatorFrame {
    pub active: Option<u8>,
    pub inactive: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub transition: Option<Transition>,
    pub indicators: IndicatorFrame,
}

/// Warmup/cooldown state machine turning a rate into a debounced hot/cold
/// mode.
///
/// `count_up` and `count_down` are never both nonzero. A tick on the wrong
/// side of the threshold clears the opposing counter, so only an unbroken
/// run of ticks can complete a dwell period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HysteresisState {
    mode: Mode,
    count_up: u32,
    count_down: u32,
}

impl HysteresisState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn count_up(&self) -> u32 {
        self.count_up
    }

    pub fn count_down(&self) -> u32 {
        self.count_down
    }

    /// Advances one control tick with the latest decayed `rate`.
    pub fn step(&mut self, rate: f64, config: &MonitorConfig) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if rate > config.threshold() {
            match self.mode {
                Mode::Cold => {
                    self.count_down = 0;
                    self.count_up = self.count_up.saturating_add(1);
                    if self.count_up >= config.warmup_ticks() {
                        self.mode = Mode::Hot;
                        self.count_up = 0;
                        outcome.transition = Some(Transition::BecameActive);
                    } else {
                        outcome.indicators.inactive = Some(blink_intensity(self.count_up));
                    }
                }
                Mode::Hot => {
                    self.count_up = 0;
                    self.count_down = 0;
                    outcome.indicators = IndicatorFrame {
                        active: Some(FULL),
                        inactive: Some(OFF),
                    };
                }
            }
        } else {
            match self.mode {
                Mode::Hot => {
                    self.count_up = 0;
                    self.count_down = self.count_down.saturating_add(1);
                    if self.count_down >= config.cooldown_ticks() {
                        self.mode = Mode::Cold;
                        self.count_down = 0;
                        outcome.transition = Some(Transition::BecameInactive);
                    } else {
                        outcome.indicators.active = Some(blink_intensity(self.count_down));
                    }
                }
                Mode::Cold => {
                    self.count_up = 0;
                    self.count_down = 0;
                    outcome.indicators = IndicatorFrame {
                        active: Some(OFF),
                        inactive: Some(FULL),
                    };
                }
            }
        }

        outcome
    }
}
