use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use shaker_lib::{
    Channel, IndicatorOutput, Mode, MonitorConfig, MonitorController, SampleSource,
    SensorSample, TransitionCallbacks,
};

struct AtRest;

impl SampleSource for AtRest {
    fn read(&mut self) -> Result<SensorSample> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(SensorSample::new(0.0, 0.0, 1.0))
    }
}

/// Fails after a handful of good reads.
struct Unplugged {
    reads_left: usize,
}

impl SampleSource for Unplugged {
    fn read(&mut self) -> Result<SensorSample> {
        if self.reads_left == 0 {
            return Err(anyhow!("LIS3DH stopped responding"));
        }
        self.reads_left -= 1;
        Ok(SensorSample::new(0.0, 0.0, 1.0))
    }
}

/// Panics partway through, like a driver bug would.
struct Faulty {
    reads_left: usize,
}

impl SampleSource for Faulty {
    fn read(&mut self) -> Result<SensorSample> {
        if self.reads_left == 0 {
            panic!("i2c driver bug");
        }
        self.reads_left -= 1;
        Ok(SensorSample::new(0.0, 0.0, 1.0))
    }
}

#[derive(Clone, Default)]
struct Recorder {
    writes: Arc<Mutex<Vec<(Channel, u8)>>>,
    released: Arc<AtomicUsize>,
}

impl Recorder {
    fn last(&self, channel: Channel) -> Option<u8> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| *c == channel)
            .map(|(_, v)| *v)
    }
}

impl IndicatorOutput for Recorder {
    fn set_intensity(&mut self, channel: Channel, value: u8) -> Result<()> {
        self.writes.lock().unwrap().push((channel, value));
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn logging_callbacks(events: &Arc<Mutex<Vec<&'static str>>>) -> TransitionCallbacks {
    let on_active = {
        let events = Arc::clone(events);
        move || events.lock().unwrap().push("active")
    };
    let on_inactive = {
        let events = Arc::clone(events);
        move || events.lock().unwrap().push("inactive")
    };
    TransitionCallbacks::new(on_active, on_inactive)
}

#[tokio::test(start_paused = true)]
async fn burst_of_activity_goes_hot_then_cools_down() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let config = MonitorConfig::new(1.0, 0.1, 3, 2, true).unwrap();
    let mut monitor = MonitorController::new(config, logging_callbacks(&events));
    let recorder = Recorder::default();

    // 50 marks in the first decay window => 10 events/sec.
    let meter = monitor.meter();
    for _ in 0..50 {
        meter.mark();
    }

    monitor.start(AtRest, recorder.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(recorder.last(Channel::Inactive), Some(100));
    assert_eq!(recorder.last(Channel::Active), Some(0));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*events.lock().unwrap(), vec!["active"]);
    let snapshot = monitor.snapshot().await;
    assert_eq!(snapshot.mode, Mode::Hot);
    assert!(snapshot.last_transition_at.is_some());
    assert_eq!(snapshot.total_marks, 50);

    // Rate decays below 1/sec after ~28 decay ticks with no new marks.
    tokio::time::sleep(Duration::from_secs(190)).await;
    assert_eq!(*events.lock().unwrap(), vec!["active", "inactive"]);
    assert_eq!(monitor.snapshot().await.mode, Mode::Cold);
    assert_eq!(recorder.last(Channel::Inactive), Some(100));

    monitor.stop().await.unwrap();
    monitor.stop().await.unwrap();
    assert_eq!(recorder.released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn quiet_sensor_never_fires() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let config = MonitorConfig::new(1.0, 0.1, 0, 0, false).unwrap();
    let mut monitor = MonitorController::new(config, logging_callbacks(&events));

    monitor.start(AtRest, Recorder::default()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    monitor.stop().await.unwrap();

    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sensor_failure_stops_the_monitor() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut monitor =
        MonitorController::new(MonitorConfig::default(), logging_callbacks(&events));
    let recorder = Recorder::default();

    monitor
        .start(Unplugged { reads_left: 10 }, recorder.clone())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), monitor.stopped())
        .await
        .expect("monitor should stop on its own");

    let err = monitor.stop().await.unwrap_err();
    assert!(format!("{err:#}").contains("LIS3DH stopped responding"));
    assert_eq!(recorder.released.load(Ordering::SeqCst), 1);

    // A second stop has nothing left to report.
    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn panicking_callback_takes_the_monitor_down() {
    let config = MonitorConfig::new(0.5, 0.1, 0, 0, false).unwrap();
    let callbacks = TransitionCallbacks::new(|| panic!("notification sink exploded"), || {});
    let mut monitor = MonitorController::new(config, callbacks);

    let meter = monitor.meter();
    for _ in 0..10 {
        meter.mark();
    }
    meter.tick();

    monitor.start(AtRest, Recorder::default()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), monitor.stopped())
        .await
        .expect("monitor should stop after the callback panics");

    let err = monitor.stop().await.unwrap_err();
    assert!(err.to_string().contains("control loop task failed to join"));
}

#[tokio::test]
async fn panicking_source_stops_the_monitor() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut monitor =
        MonitorController::new(MonitorConfig::default(), logging_callbacks(&events));
    let recorder = Recorder::default();

    monitor
        .start(Faulty { reads_left: 5 }, recorder.clone())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), monitor.stopped())
        .await
        .expect("monitor should stop once the sampler thread dies");
    assert!(!monitor.is_running());

    let err = monitor.stop().await.unwrap_err();
    assert!(err
        .to_string()
        .contains("vibration sampler exited without reporting"));
    assert_eq!(recorder.released.load(Ordering::SeqCst), 1);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn monitor_can_restart_after_sensor_failure() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut monitor =
        MonitorController::new(MonitorConfig::default(), logging_callbacks(&events));
    let first = Recorder::default();

    monitor
        .start(Unplugged { reads_left: 3 }, first.clone())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), monitor.stopped())
        .await
        .expect("monitor should stop on its own");

    assert!(!monitor.is_running());
    assert!(!monitor.snapshot().await.running);

    // No explicit stop: start reaps the failed run itself.
    let second = Recorder::default();
    monitor.start(AtRest, second.clone()).await.unwrap();
    assert!(monitor.is_running());
    assert!(monitor.snapshot().await.running);
    assert_eq!(first.released.load(Ordering::SeqCst), 1);

    monitor.stop().await.unwrap();
    assert!(!monitor.is_running());
    assert_eq!(second.released.load(Ordering::SeqCst), 1);
}
