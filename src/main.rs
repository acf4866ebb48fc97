use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{error, info, warn};
use shaker_lib::{
    indicator::DEFAULT_LED_ROOT,
    source::{iio::DEFAULT_IIO_DEVICE, IioAccelerometer, ReplaySource},
    FileConfig, IndicatorOutput, MonitorConfig, MonitorController, NoIndicator, Notifier,
    SampleSource, SysfsLeds, TransitionCallbacks,
};
use tokio_util::task::TaskTracker;

const DEFAULT_NOTIFY_PRIORITY: u32 = 10;
const DEFAULT_COOLDOWN: u32 = 360;
/// How long shutdown waits for notifications that are still being sent.
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Monitor for activation of a sensor, and send alerts.
#[derive(Debug, Parser)]
#[command(name = "shaker")]
#[command(about = "Monitor for activation of a sensor, and send alerts")]
struct Cli {
    /// Name of the appliance we're monitoring.
    #[arg(long)]
    name: Option<String>,
    /// Decayed rate (events/sec) at which we consider the sensor active.
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f64>,
    /// Sensitivity of the sensor (movement threshold = 1 + val).
    #[arg(long, allow_negative_numbers = true)]
    sensitivity: Option<f64>,
    /// Seconds the sensor must stay active before going 'hot'.
    #[arg(long)]
    warmup: Option<u32>,
    /// Seconds the sensor must stay inactive before going 'cold'.
    #[arg(long)]
    cooldown: Option<u32>,
    /// Show debug information.
    #[arg(long)]
    debug: bool,
    /// IIO accelerometer device directory.
    #[arg(long)]
    device: Option<String>,
    /// Replay samples from a JSON file instead of reading a sensor.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Sysfs LED lit while the appliance is running.
    #[arg(long)]
    active_led: Option<String>,
    /// Sysfs LED lit while the appliance is idle.
    #[arg(long)]
    inactive_led: Option<String>,
    /// Endpoint for "finished running" notifications, e.g. http://einstein/notification.
    #[arg(long)]
    notify_url: Option<String>,
    /// Priority attached to notifications.
    #[arg(long)]
    notify_priority: Option<u32>,
    /// JSON settings file; command line flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug)]
struct Settings {
    name: String,
    monitor: MonitorConfig,
    device: String,
    replay: Option<PathBuf>,
    leds: Option<(String, String)>,
    notify_url: Option<String>,
    notify_priority: u32,
}

impl Settings {
    fn resolve(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let defaults = MonitorConfig::default();

        let name = cli
            .name
            .or(file.name)
            .context("--name is required (or set \"name\" in the config file)")?;

        let monitor = MonitorConfig::new(
            cli.threshold.or(file.threshold).unwrap_or(defaults.threshold()),
            cli.sensitivity
                .or(file.sensitivity)
                .unwrap_or(defaults.sensitivity()),
            cli.warmup.or(file.warmup).unwrap_or(defaults.warmup_ticks()),
            cli.cooldown.or(file.cooldown).unwrap_or(DEFAULT_COOLDOWN),
            cli.debug || file.debug.unwrap_or(false),
        )?;

        let leds = match (
            cli.active_led.or(file.active_led),
            cli.inactive_led.or(file.inactive_led),
        ) {
            (Some(active), Some(inactive)) => Some((active, inactive)),
            (None, None) => None,
            _ => bail!("--active-led and --inactive-led must be given together"),
        };

        Ok(Self {
            name,
            monitor,
            device: cli
                .device
                .or(file.device)
                .unwrap_or_else(|| DEFAULT_IIO_DEVICE.to_string()),
            replay: cli.replay,
            leds,
            notify_url: cli.notify_url.or(file.notify_url),
            notify_priority: cli
                .notify_priority
                .or(file.notify_priority)
                .unwrap_or(DEFAULT_NOTIFY_PRIORITY),
        })
    }

    fn open_source(&self) -> Result<Box<dyn SampleSource>> {
        match &self.replay {
            Some(path) => Ok(Box::new(ReplaySource::from_json_file(
                path,
                Duration::from_millis(10),
            )?)),
            None => Ok(Box::new(IioAccelerometer::open(Path::new(&self.device))?)),
        }
    }

    fn open_indicator(&self) -> Result<Box<dyn IndicatorOutput>> {
        match &self.leds {
            Some((active, inactive)) => Ok(Box::new(SysfsLeds::open(
                Path::new(DEFAULT_LED_ROOT),
                active,
                inactive,
            )?)),
            None => Ok(Box::new(NoIndicator)),
        }
    }
}

fn lock_started(started: &Mutex<Option<DateTime<Utc>>>) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
    match started.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn describe_run(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m {seconds:02}s")
    }
}

fn build_callbacks(
    name: &str,
    notifier: Option<Notifier>,
    priority: u32,
    pending: TaskTracker,
) -> TransitionCallbacks {
    let started: Arc<Mutex<Option<DateTime<Utc>>>> = Arc::new(Mutex::new(None));

    let on_active = {
        let name = name.to_string();
        let started = Arc::clone(&started);
        move || {
            *lock_started(&started) = Some(Utc::now());
            info!("{name} has started running");
        }
    };

    let on_inactive = {
        let name = name.to_string();
        move || {
            let message = match lock_started(&started).take() {
                Some(at) => format!(
                    "{name} has finished running (ran for {})",
                    describe_run(Utc::now() - at)
                ),
                None => format!("{name} has finished running"),
            };
            info!("{message}");

            if let Some(notifier) = notifier.clone() {
                pending.spawn(async move { notifier.notify(&message, priority).await });
            }
        }
    };

    TransitionCallbacks::new(on_active, on_inactive)
}

async fn drain_notifications(pending: &TaskTracker) {
    pending.close();
    if pending.is_empty() {
        return;
    }
    info!("Waiting for {} pending notification(s)", pending.len());
    if tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, pending.wait())
        .await
        .is_err()
    {
        warn!(
            "gave up on {} notification(s) after {}s",
            pending.len(),
            NOTIFY_DRAIN_TIMEOUT.as_secs()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let settings = Settings::resolve(cli)?;
    info!("Starting up appliance: {}", settings.name);

    let notifier = settings
        .notify_url
        .as_deref()
        .map(Notifier::from_url)
        .transpose()?;
    if notifier.is_none() {
        warn!("no --notify-url given; transitions will only be logged");
    }

    let source = settings.open_source()?;
    let indicator = settings.open_indicator()?;

    let pending = TaskTracker::new();
    let callbacks = build_callbacks(
        &settings.name,
        notifier,
        settings.notify_priority,
        pending.clone(),
    );
    let mut monitor = MonitorController::new(settings.monitor.clone(), callbacks);
    monitor.start(source, indicator).await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!("failed to listen for shutdown signal: {err}");
            }
        }
        _ = monitor.stopped() => {}
    }

    info!("Shutting down appliance");
    let result = monitor.stop().await;
    drain_notifications(&pending).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaker_lib::Transition;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    #[test]
    fn describes_short_and_long_runs() {
        assert_eq!(describe_run(chrono::Duration::seconds(65)), "1m 05s");
        assert_eq!(describe_run(chrono::Duration::seconds(2 * 3600 + 7 * 60)), "2h 07m");
        assert_eq!(describe_run(chrono::Duration::seconds(-3)), "0m 00s");
    }

    #[test]
    fn cli_overrides_file_and_defaults_apply() {
        let cli = Cli::parse_from(["shaker", "--name", "washer", "--warmup", "30"]);
        let settings = Settings::resolve(cli).unwrap();

        assert_eq!(settings.name, "washer");
        assert_eq!(settings.monitor.warmup_ticks(), 30);
        assert_eq!(settings.monitor.cooldown_ticks(), DEFAULT_COOLDOWN);
        assert_eq!(settings.monitor.threshold(), 1.0);
        assert_eq!(settings.notify_priority, DEFAULT_NOTIFY_PRIORITY);
        assert!(settings.leds.is_none());
    }

    #[test]
    fn negative_sensitivity_is_rejected() {
        let cli = Cli::parse_from(["shaker", "--name", "dryer", "--sensitivity", "-0.5"]);
        let err = Settings::resolve(cli).unwrap_err();
        assert!(err.to_string().contains("sensitivity must be >= 0"));
    }

    #[test]
    fn name_is_required() {
        let cli = Cli::parse_from(["shaker"]);
        assert!(Settings::resolve(cli).is_err());
    }

    #[test]
    fn leds_come_in_pairs() {
        let cli = Cli::parse_from(["shaker", "--name", "washer", "--active-led", "green"]);
        assert!(Settings::resolve(cli).is_err());
    }

    #[tokio::test]
    async fn shutdown_waits_for_inflight_notification() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let notifier = Notifier::from_url(&format!("http://127.0.0.1:{port}/notification")).unwrap();
        let pending = TaskTracker::new();
        let callbacks = build_callbacks("washer", Some(notifier), 3, pending.clone());

        callbacks.fire(Transition::BecameInactive);
        assert_eq!(pending.len(), 1);

        drain_notifications(&pending).await;
        assert!(pending.is_empty());

        let request = server.await.unwrap();
        assert!(request.contains("message=washer%20has%20finished%20running"));
        assert!(request.contains("priority=3"));
    }

    #[tokio::test]
    async fn drain_returns_immediately_without_notifications() {
        let pending = TaskTracker::new();
        let callbacks = build_callbacks("dryer", None, 10, pending.clone());
        callbacks.fire(Transition::BecameActive);
        callbacks.fire(Transition::BecameInactive);

        drain_notifications(&pending).await;
        assert!(pending.is_closed());
        assert!(pending.is_empty());
    }
}
