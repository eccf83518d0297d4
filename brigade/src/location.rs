//! Device position sources.
//!
//! A [`LocationSource`] offers the two operations a platform location service
//! has: a one-shot [`current_position`](LocationSource::current_position)
//! probe and a continuous [`watch_position`](LocationSource::watch_position)
//! stream. Dropping the stream's receiver cancels the watch.

use std::future::Future;
use std::time::Duration;

use brigade_proto::location::Coordinate;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Capacity of a watch stream.
const WATCH_BUFFER: usize = 16;

/// Why a position could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// The user or platform refused access to the position.
    #[error("location permission denied")]
    PermissionDenied,
    /// No position could be determined.
    #[error("position unavailable")]
    PositionUnavailable,
    /// No position arrived within the requested timeout.
    #[error("location request timed out")]
    Timeout,
}

/// Options passed to the location service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationOptions {
    /// Prefer precise positioning over battery life.
    pub enable_high_accuracy: bool,
    /// Upper bound on a single position request.
    pub timeout: Duration,
    /// Accept a cached position up to this old.
    pub maximum_age: Duration,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_millis(5000),
            maximum_age: Duration::from_millis(10_000),
        }
    }
}

/// A position reported by the location service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Where the device is.
    pub coordinate: Coordinate,
    /// Estimated accuracy radius in metres, if known.
    pub accuracy_m: Option<f64>,
    /// When the position was taken.
    pub timestamp: DateTime<Utc>,
}

impl Fix {
    /// A fix taken now with unknown accuracy.
    #[must_use]
    pub fn now(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            accuracy_m: None,
            timestamp: Utc::now(),
        }
    }
}

/// Item yielded by a watch stream.
pub type FixResult = Result<Fix, LocationError>;

/// A platform location service.
pub trait LocationSource: Send + Sync + 'static {
    /// One-shot position request.
    ///
    /// Callers bound this with `options.timeout`; implementations may also
    /// resolve with [`LocationError::Timeout`] themselves.
    fn current_position(
        &self,
        options: &LocationOptions,
    ) -> impl Future<Output = FixResult> + Send;

    /// Start a continuous watch. Every position change or failure is sent on
    /// the returned receiver. Dropping the receiver ends the watch.
    fn watch_position(&self, options: &LocationOptions) -> mpsc::Receiver<FixResult>;
}

/// A device that never moves. Used when the position is configured.
#[derive(Debug, Clone, Copy)]
pub struct StaticSource {
    coordinate: Coordinate,
}

impl StaticSource {
    /// Always reports `coordinate`.
    #[must_use]
    pub const fn new(coordinate: Coordinate) -> Self {
        Self { coordinate }
    }
}

impl LocationSource for StaticSource {
    async fn current_position(&self, _options: &LocationOptions) -> FixResult {
        Ok(Fix::now(self.coordinate))
    }

    fn watch_position(&self, _options: &LocationOptions) -> mpsc::Receiver<FixResult> {
        let (tx, rx) = mpsc::channel(1);
        // The position never changes, so one fix ends the watch.
        let _ = tx.try_send(Ok(Fix::now(self.coordinate)));
        rx
    }
}

/// A device without positioning. Every request is denied.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSource;

impl LocationSource for UnavailableSource {
    async fn current_position(&self, _options: &LocationOptions) -> FixResult {
        Err(LocationError::PermissionDenied)
    }

    fn watch_position(&self, _options: &LocationOptions) -> mpsc::Receiver<FixResult> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(Err(LocationError::PermissionDenied));
        rx
    }
}

/// Test source driven by hand.
///
/// Watches stay open until their receiver is dropped; [`push`](Self::push)
/// delivers to all of them. Probes answer with the configured result, or
/// never answer when none is set.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    inner: Mutex<ScriptedInner>,
}

#[derive(Debug, Default)]
struct ScriptedInner {
    watchers: Vec<mpsc::Sender<FixResult>>,
    probe: Option<FixResult>,
    probes: usize,
    last_options: Option<LocationOptions>,
}

impl ScriptedSource {
    /// A source with no watchers whose probes hang.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `result` to every open watch. Returns how many received it.
    pub fn push(&self, result: FixResult) -> usize {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|tx| !tx.is_closed());
        inner
            .watchers
            .iter()
            .filter(|tx| tx.try_send(result).is_ok())
            .count()
    }

    /// What the next probes resolve to. `None` makes them hang.
    pub fn set_probe(&self, result: Option<FixResult>) {
        self.inner.lock().probe = result;
    }

    /// Number of watches whose receiver is still alive.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner
            .lock()
            .watchers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Number of `current_position` calls so far.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.inner.lock().probes
    }

    /// Options passed to the most recent request.
    #[must_use]
    pub fn last_options(&self) -> Option<LocationOptions> {
        self.inner.lock().last_options
    }
}

impl LocationSource for ScriptedSource {
    async fn current_position(&self, options: &LocationOptions) -> FixResult {
        let probe = {
            let mut inner = self.inner.lock();
            inner.probes += 1;
            inner.last_options = Some(*options);
            inner.probe
        };
        match probe {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    fn watch_position(&self, options: &LocationOptions) -> mpsc::Receiver<FixResult> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let mut inner = self.inner.lock();
        inner.last_options = Some(*options);
        inner.watchers.push(tx);
        rx
    }
}
