use std::{sync::Arc, thread};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    callbacks::TransitionCallbacks,
    config::{MonitorConfig, CONTROL_TICK},
    hysteresis::{HysteresisState, Mode, Transition},
    indicator::{apply_frame, IndicatorOutput},
    meter::{decay_loop, ActivityMeter},
    sampler::{sampling_loop, SampleSource, SensitivityThreshold},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub running: bool,
    pub mode: Mode,
    pub count_up: u32,
    pub count_down: u32,
    pub rate: f64,
    pub total_marks: u64,
    pub last_transition_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct ControlStatus {
    state: HysteresisState,
    last_transition_at: Option<DateTime<Utc>>,
}

/// Owns the sampler thread, the meter decay task and the control loop.
///
/// The meter outlives restarts; hysteresis state starts over as `Cold` on
/// every `start`.
pub struct MonitorController {
    config: MonitorConfig,
    callbacks: Arc<TransitionCallbacks>,
    meter: Arc<ActivityMeter>,
    status: Arc<Mutex<ControlStatus>>,
    cancel_token: Option<CancellationToken>,
    sampler: Option<oneshot::Receiver<Result<()>>>,
    decay: Option<JoinHandle<()>>,
    control: Option<JoinHandle<()>>,
}

impl MonitorController {
    pub fn new(config: MonitorConfig, callbacks: TransitionCallbacks) -> Self {
        Self {
            config,
            callbacks: Arc::new(callbacks),
            meter: Arc::new(ActivityMeter::new()),
            status: Arc::new(Mutex::new(ControlStatus::default())),
            cancel_token: None,
            sampler: None,
            decay: None,
            control: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn meter(&self) -> Arc<ActivityMeter> {
        Arc::clone(&self.meter)
    }

    /// False once the monitor has been stopped or has shut itself down.
    pub fn is_running(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Spawns the sampler, decay and control units. Must be called from
    /// inside a tokio runtime.
    pub async fn start<S, I>(&mut self, source: S, indicator: I) -> Result<()>
    where
        S: SampleSource + 'static,
        I: IndicatorOutput + 'static,
    {
        if self.is_running() {
            bail!("monitor already running");
        }

        // Reap a previous run that ended on its own.
        if self.cancel_token.is_some() {
            if let Err(err) = self.stop().await {
                log_warn!("previous monitor run ended with an error: {err:#}");
            }
        }

        if self.config.debug() {
            log_info!("Parameters:");
            log_info!("  threshold:     {}", self.config.threshold());
            log_info!("  sensitivity:   {}", self.config.sensitivity());
            log_info!("  warmup:        {}", self.config.warmup_ticks());
            log_info!("  cooldown:      {}", self.config.cooldown_ticks());
        }

        *self.status.lock().await = ControlStatus::default();

        let cancel_token = CancellationToken::new();

        let (done_tx, done_rx) = oneshot::channel();
        let threshold = SensitivityThreshold::from_sensitivity(self.config.sensitivity());
        let meter = Arc::clone(&self.meter);
        let token = cancel_token.clone();
        thread::Builder::new()
            .name("vibration-sampler".to_string())
            .spawn(move || {
                // Cancels on unwind too, so a panicking source still stops the monitor.
                let _guard = token.clone().drop_guard();
                let result = sampling_loop(source, meter, threshold, token);
                let _ = done_tx.send(result);
            })
            .context("failed to spawn vibration sampler thread")?;

        let decay = tokio::spawn(decay_loop(Arc::clone(&self.meter), cancel_token.clone()));

        let control = tokio::spawn(control_loop(
            self.config.clone(),
            Arc::clone(&self.meter),
            Arc::clone(&self.callbacks),
            indicator,
            Arc::clone(&self.status),
            cancel_token.clone(),
        ));

        self.cancel_token = Some(cancel_token);
        self.sampler = Some(done_rx);
        self.decay = Some(decay);
        self.control = Some(control);
        Ok(())
    }

    /// Resolves once the monitor has been told to stop, either by `stop` or
    /// because one of its units failed. Resolves immediately when idle.
    pub async fn stopped(&self) {
        if let Some(token) = &self.cancel_token {
            token.cancelled().await;
        }
    }

    /// Stops the sampler, then lets the control loop finish its tick and
    /// release the indicators. Safe to call more than once.
    ///
    /// Returns the sampler's error if it died on a sensor read, or a join
    /// error if a callback panicked.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let sampler_result = match self.sampler.take() {
            Some(done_rx) => done_rx
                .await
                .unwrap_or_else(|_| Err(anyhow!("vibration sampler exited without reporting"))),
            None => Ok(()),
        };

        let control_result = match self.control.take() {
            Some(handle) => handle.await.context("control loop task failed to join"),
            None => Ok(()),
        };

        if let Some(handle) = self.decay.take() {
            handle.await.context("meter decay task failed to join")?;
        }

        sampler_result?;
        control_result
    }

    pub async fn snapshot(&self) -> MonitorSnapshot {
        let status = self.status.lock().await;
        MonitorSnapshot {
            running: self.is_running(),
            mode: status.state.mode(),
            count_up: status.state.count_up(),
            count_down: status.state.count_down(),
            rate: self.meter.current_rate(),
            total_marks: self.meter.count(),
            last_transition_at: status.last_transition_at,
        }
    }
}

async fn control_loop<I: IndicatorOutput>(
    config: MonitorConfig,
    meter: Arc<ActivityMeter>,
    callbacks: Arc<TransitionCallbacks>,
    mut indicator: I,
    status: Arc<Mutex<ControlStatus>>,
    cancel_token: CancellationToken,
) {
    // Bring everything down if this task ends early, panics included.
    let _guard = cancel_token.clone().drop_guard();

    let mut ticker = time::interval(CONTROL_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut state = HysteresisState::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("control loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let rate = meter.current_rate();
                if config.debug() {
                    log_info!("{}", tick_line(rate, &state));
                }

                let outcome = state.step(rate, &config);
                apply_frame(&mut indicator, outcome.indicators);

                {
                    let mut guard = status.lock().await;
                    guard.state = state.clone();
                    if outcome.transition.is_some() {
                        guard.last_transition_at = Some(Utc::now());
                    }
                }

                if let Some(transition) = outcome.transition {
                    if config.debug() {
                        match transition {
                            Transition::BecameActive => log_info!(
                                "Sensor has exceeded threshold for warmup - triggering 'hot' callback"
                            ),
                            Transition::BecameInactive => log_info!(
                                "Sensor has gone below threshold for cooldown - triggering 'cold' callback"
                            ),
                        }
                    }
                    callbacks.fire(transition);
                }
            }
        }
    }

    if let Err(err) = indicator.release() {
        log_warn!("failed to release indicators: {err:?}");
    }
}

fn tick_line(rate: f64, state: &HysteresisState) -> String {
    format!(
        "Rate: {:.4}   Mode: {:?}   CountUp: {}   CountDown: {}",
        rate,
        state.mode(),
        state.count_up(),
        state.count_down()
    )
}
