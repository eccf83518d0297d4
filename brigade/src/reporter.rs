//! Outbound location reporter.
//!
//! Samples this device's position and reports it upstream, independently of
//! how other members' presence is learned.
//!
//! ```text
//! Disabled ─enable()─► Acquiring ─first fix or fallback─► Reporting
//!     ▲                    │                                  │
//!     └────────────────────┴──────────── disable() ───────────┘
//! ```
//!
//! Two tasks run while enabled: a watch task that reports every new fix as
//! it arrives, and a timer task that re-sends the latest position on a fixed
//! cadence (probing once per tick while nothing is known yet). Reports are
//! fire-and-forget: a failure is logged and the next tick supersedes it.

use std::sync::Arc;
use std::time::Duration;

use brigade_proto::location::Coordinate;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::BackendApi;
use crate::location::{FixResult, LocationError, LocationOptions, LocationSource};
use crate::session::MIN_CADENCE;

/// Reported when no real position is available.
pub const DEFAULT_FALLBACK: Coordinate = Coordinate::new(46.2508, 16.3755);

/// Reporter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReporterConfig {
    /// Re-send cadence for the latest position.
    pub interval: Duration,
    /// Coordinate substituted on location failures.
    pub fallback: Coordinate,
    /// Options for the location service.
    pub options: LocationOptions,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            fallback: DEFAULT_FALLBACK,
            options: LocationOptions::default(),
        }
    }
}

/// Lifecycle of the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReporterState {
    /// Not sampling.
    Disabled,
    /// Sampling, no position known yet.
    Acquiring,
    /// A position (real or fallback) is known and being reported.
    Reporting,
}

impl std::fmt::Display for ReporterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Acquiring => write!(f, "acquiring"),
            Self::Reporting => write!(f, "reporting"),
        }
    }
}

/// The position the reporter currently sends.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Position {
    Unknown,
    Fallback(Coordinate),
    Fix(Coordinate),
}

impl Position {
    const fn coordinate(self) -> Option<Coordinate> {
        match self {
            Self::Unknown => None,
            Self::Fallback(c) | Self::Fix(c) => Some(c),
        }
    }
}

/// State shared by the watch and timer tasks.
struct Shared<B, L> {
    backend: Arc<B>,
    source: Arc<L>,
    config: ReporterConfig,
    position: Mutex<Position>,
    state: watch::Sender<ReporterState>,
}

impl<B: BackendApi, L: LocationSource> Shared<B, L> {
    /// Records a real fix and reports it.
    async fn on_fix(&self, coordinate: Coordinate) {
        *self.position.lock() = Position::Fix(coordinate);
        self.state.send_replace(ReporterState::Reporting);
        self.report(coordinate).await;
    }

    /// Applies the degraded-position policy to a location failure.
    ///
    /// Before any real fix the fallback is substituted and reported. After
    /// a real fix the failure is only logged; the last fix stays current.
    async fn on_error(&self, err: LocationError) {
        let substitute = {
            let mut position = self.position.lock();
            match *position {
                Position::Fix(_) => None,
                Position::Unknown | Position::Fallback(_) => {
                    *position = Position::Fallback(self.config.fallback);
                    Some(self.config.fallback)
                }
            }
        };
        match substitute {
            Some(fallback) => {
                tracing::info!(
                    err = %err,
                    fallback = %fallback,
                    "location unavailable, using fallback"
                );
                self.state.send_replace(ReporterState::Reporting);
                self.report(fallback).await;
            }
            None => tracing::debug!(err = %err, "location error, keeping last fix"),
        }
    }

    async fn on_result(&self, result: FixResult) {
        match result {
            Ok(fix) => self.on_fix(fix.coordinate).await,
            Err(err) => self.on_error(err).await,
        }
    }

    /// One-shot probe bounded by the configured timeout.
    async fn probe(&self) -> FixResult {
        let options = self.config.options;
        tokio::time::timeout(options.timeout, self.source.current_position(&options))
            .await
            .unwrap_or(Err(LocationError::Timeout))
    }

    async fn report(&self, coordinate: Coordinate) {
        match self.backend.report_location(coordinate).await {
            Ok(response) => tracing::debug!(
                position = %coordinate,
                active = response.active_count,
                "location reported"
            ),
            Err(e) => tracing::warn!(position = %coordinate, err = %e, "location report failed"),
        }
    }
}

struct Running {
    watch_task: JoinHandle<()>,
    timer_task: JoinHandle<()>,
}

/// Samples the device position and reports it on a fixed cadence.
pub struct LocationReporter<B, L> {
    backend: Arc<B>,
    source: Arc<L>,
    config: ReporterConfig,
    state: watch::Sender<ReporterState>,
    running: Mutex<Option<Running>>,
}

impl<B: BackendApi, L: LocationSource> LocationReporter<B, L> {
    /// Creates a disabled reporter.
    pub fn new(backend: Arc<B>, source: Arc<L>, config: ReporterConfig) -> Self {
        let (state, _) = watch::channel(ReporterState::Disabled);
        Self {
            backend,
            source,
            config,
            state,
            running: Mutex::new(None),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ReporterState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ReporterState> {
        self.state.subscribe()
    }

    /// Start sampling and reporting. No-op if already enabled.
    pub fn enable(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        self.state.send_replace(ReporterState::Acquiring);
        let shared = Arc::new(Shared {
            backend: Arc::clone(&self.backend),
            source: Arc::clone(&self.source),
            config: self.config,
            position: Mutex::new(Position::Unknown),
            state: self.state.clone(),
        });

        let fixes = self.source.watch_position(&self.config.options);
        let watch_task = tokio::spawn(run_watch(Arc::clone(&shared), fixes));
        let timer_task = tokio::spawn(run_timer(shared));

        tracing::info!(interval = ?self.config.interval, "location reporting enabled");
        *running = Some(Running {
            watch_task,
            timer_task,
        });
    }

    /// Stop sampling. Cancels both tasks and releases the watch.
    ///
    /// Returns once the tasks are gone. No-op if already disabled.
    pub async fn disable(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.watch_task.abort();
        running.timer_task.abort();
        let _ = running.watch_task.await;
        let _ = running.timer_task.await;
        self.state.send_replace(ReporterState::Disabled);
        tracing::info!("location reporting disabled");
    }

    /// Returns `true` while enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl<B, L> Drop for LocationReporter<B, L> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.watch_task.abort();
            running.timer_task.abort();
        }
    }
}

async fn run_watch<B: BackendApi, L: LocationSource>(
    shared: Arc<Shared<B, L>>,
    mut fixes: mpsc::Receiver<FixResult>,
) {
    while let Some(result) = fixes.recv().await {
        shared.on_result(result).await;
    }
    tracing::debug!("location watch ended");
}

async fn run_timer<B: BackendApi, L: LocationSource>(shared: Arc<Shared<B, L>>) {
    let period = shared.config.interval;
    let mut deadline = Instant::now() + period;

    loop {
        tokio::time::sleep_until(deadline).await;
        let current = shared.position.lock().coordinate();
        match current {
            Some(coordinate) => shared.report(coordinate).await,
            None => {
                let result = shared.probe().await;
                shared.on_result(result).await;
            }
        }
        deadline = next_deadline(deadline, period, Instant::now());
    }
}

/// The first cadence point after `now`. Points that passed while a probe or
/// report was still running are skipped, never fired late.
fn next_deadline(last: Instant, period: Duration, now: Instant) -> Instant {
    let period = period.max(MIN_CADENCE);
    let mut next = last + period;
    while next <= now {
        next += period;
    }
    next
}
