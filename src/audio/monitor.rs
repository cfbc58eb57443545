//! Background sampling loop that turns a microphone into speaking edges.
//!
//! [`SpeakingMonitor`] owns one worker thread.  The thread opens the cpal
//! stream itself (streams are not `Send` everywhere), drains chunks into an
//! [`ActivityDetector`] and ticks it at `tick_hz`.  Every edge is handed to
//! the `on_change` callback.
//!
//! Stopping the monitor (drop, [`SpeakingMonitor::stop`] or
//! [`SpeakingMonitor::select_device`]) sets a stop flag and joins the thread,
//! which drops the stream and the analysis window before returning.  A
//! pipeline that was reporting speaking reports `false` on its way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::capture::{AudioCapture, AudioChunk, SamplingError};
use super::detector::{ActivityDetector, DetectorSettings};
use super::level::downmix;

pub const DEFAULT_TICK_HZ: u32 = 60;

/// Callback invoked on every speaking edge, from the sampling thread.
pub type SpeakingCallback = Arc<dyn Fn(bool) + Send + Sync>;

// ---------------------------------------------------------------------------
// MonitorStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MonitorStatus {
    #[default]
    Stopped,
    Running { device: String },
    /// Device missing or stream failed; retried on the next device selection.
    Unavailable(String),
}

impl MonitorStatus {
    pub fn label(&self) -> String {
        match self {
            MonitorStatus::Stopped => "Microphone off".into(),
            MonitorStatus::Running { device } => format!("Listening: {device}"),
            MonitorStatus::Unavailable(reason) => format!("Microphone unavailable: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// MonitorSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    /// Input device name; `None` selects the system default.
    pub device: Option<String>,
    pub detector: DetectorSettings,
    pub tick_hz: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            device: None,
            detector: DetectorSettings::default(),
            tick_hz: DEFAULT_TICK_HZ,
        }
    }
}

impl MonitorSettings {
    fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }
}

// ---------------------------------------------------------------------------
// SpeakingMonitor
// ---------------------------------------------------------------------------

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct SpeakingMonitor {
    settings: MonitorSettings,
    on_change: SpeakingCallback,
    status: Arc<Mutex<MonitorStatus>>,
    worker: Option<Worker>,
}

impl SpeakingMonitor {
    /// Spawn the sampling thread for `settings.device`.
    ///
    /// A missing device is not an error here: the status becomes
    /// [`MonitorStatus::Unavailable`] and the callback is never fired.  Only
    /// a failure to spawn the thread is returned.
    pub fn start(settings: MonitorSettings, on_change: SpeakingCallback) -> Result<Self, SamplingError> {
        let mut monitor = Self {
            settings,
            on_change,
            status: Arc::new(Mutex::new(MonitorStatus::Stopped)),
            worker: None,
        };
        monitor.spawn()?;
        Ok(monitor)
    }

    pub fn status(&self) -> MonitorStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn device(&self) -> Option<&str> {
        self.settings.device.as_deref()
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// `false` once the sampling thread has exited, including when the
    /// device was unavailable or its stream ended.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.thread.is_finished())
    }

    /// Tear down the current pipeline and rebuild it on `device`.
    pub fn select_device(&mut self, device: Option<String>) -> Result<(), SamplingError> {
        log::info!(
            "audio: switching input to {}",
            device.as_deref().unwrap_or("system default")
        );
        self.stop();
        self.settings.device = device;
        self.spawn()
    }

    /// Stop the hardware stream and join the sampling thread.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Relaxed);
        if worker.thread.join().is_err() {
            log::error!("audio: sampling thread panicked");
            (self.on_change)(false);
        }
        set_status(&self.status, MonitorStatus::Stopped);
    }

    fn spawn(&mut self) -> Result<(), SamplingError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let status = Arc::clone(&self.status);
            let on_change = Arc::clone(&self.on_change);
            let settings = self.settings.clone();
            std::thread::Builder::new()
                .name("speaking-monitor".into())
                .spawn(move || sampling_loop(settings, stop, status, on_change))?
        };
        self.worker = Some(Worker { stop, thread });
        Ok(())
    }
}

impl Drop for SpeakingMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_status(status: &Mutex<MonitorStatus>, value: MonitorStatus) {
    match status.lock() {
        Ok(mut s) => *s = value,
        Err(e) => *e.into_inner() = value,
    }
}

fn sampling_loop(
    settings: MonitorSettings,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<MonitorStatus>>,
    on_change: SpeakingCallback,
) {
    let capture = match AudioCapture::open(settings.device.as_deref()) {
        Ok(capture) => capture,
        Err(e) => {
            log::warn!("audio: {e}");
            set_status(&status, MonitorStatus::Unavailable(e.to_string()));
            return;
        }
    };

    let (tx, rx) = mpsc::channel::<AudioChunk>();
    let _stream = match capture.start(tx) {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("audio: {e}");
            set_status(&status, MonitorStatus::Unavailable(e.to_string()));
            return;
        }
    };

    log::info!(
        "audio: listening on {} ({} Hz, {} ch)",
        capture.device_name(),
        capture.sample_rate(),
        capture.channels()
    );
    set_status(
        &status,
        MonitorStatus::Running {
            device: capture.device_name().to_string(),
        },
    );

    let mut detector = ActivityDetector::new(settings.detector.clone());
    let period = settings.tick_period();

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(period);

        loop {
            match rx.try_recv() {
                Ok(chunk) => detector.push_samples(&downmix(&chunk.samples, chunk.channels)),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    log::warn!("audio: input stream ended");
                    set_status(&status, MonitorStatus::Unavailable("input stream ended".into()));
                    if let Some(edge) = detector.reset() {
                        on_change(edge);
                    }
                    return;
                }
            }
        }

        if let Some(speaking) = detector.tick(Instant::now()) {
            log::debug!("audio: speaking={speaking} level={:.4}", detector.level());
            on_change(speaking);
        }
    }

    if let Some(edge) = detector.reset() {
        on_change(edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tick_period_follows_tick_hz() {
        let settings = MonitorSettings {
            tick_hz: 50,
            ..MonitorSettings::default()
        };
        assert_eq!(settings.tick_period(), Duration::from_millis(20));

        let zero = MonitorSettings {
            tick_hz: 0,
            ..MonitorSettings::default()
        };
        assert_eq!(zero.tick_period(), Duration::from_secs(1));
    }

    #[test]
    fn status_labels() {
        assert_eq!(MonitorStatus::default().label(), "Microphone off");
        assert_eq!(
            MonitorStatus::Running {
                device: "USB".into()
            }
            .label(),
            "Listening: USB"
        );
    }

    #[test]
    fn missing_device_is_unavailable_and_silent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let settings = MonitorSettings {
            device: Some("definitely-not-a-real-input-device".into()),
            ..MonitorSettings::default()
        };

        let mut monitor = SpeakingMonitor::start(
            settings,
            Arc::new(move |_: bool| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        // Let the worker run to completion.
        if let Some(worker) = monitor.worker.take() {
            worker.thread.join().unwrap();
        }
        assert!(matches!(monitor.status(), MonitorStatus::Unavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exited_worker_is_not_running_and_can_be_retried() {
        let settings = MonitorSettings {
            device: Some("definitely-not-a-real-input-device".into()),
            ..MonitorSettings::default()
        };
        let mut monitor = SpeakingMonitor::start(settings, Arc::new(|_: bool| {})).unwrap();

        for _ in 0..200 {
            if !monitor.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!monitor.is_running());
        assert!(matches!(monitor.status(), MonitorStatus::Unavailable(_)));

        // Same device again: a fresh worker is spawned and fails the same way.
        let device = monitor.device().map(ToOwned::to_owned);
        monitor.select_device(device).unwrap();
        assert!(monitor.worker.is_some());
    }

    #[test]
    fn stop_is_idempotent() {
        let settings = MonitorSettings {
            device: Some("definitely-not-a-real-input-device".into()),
            ..MonitorSettings::default()
        };
        let mut monitor = SpeakingMonitor::start(settings, Arc::new(|_: bool| {})).unwrap();
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert_eq!(monitor.status(), MonitorStatus::Stopped);
    }
}
