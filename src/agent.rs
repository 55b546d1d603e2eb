//! The sampling tick loop.
//!
//! One tick: a detached transmission when an aligned interval has closed,
//! day rollover check, app snapshot, connection snapshot plus staged DNS
//! queries, then save. The transmission captures the day before this tick's
//! snapshots move `last_seen` past the interval end. The DNS capture runs on
//! its own worker thread and feeds the shared connection aggregator under its
//! lock; reverse lookups for new addresses happen outside that lock.

use crate::capture::{CaptureError, CaptureSource, DnsCapture, RawConnection};
use crate::config::{Config, ConfigError};
use crate::core::{
    AppTickStats, AppUsageAggregator, ConnectionAggregator, ConnectionTickStats, DailyStore,
    Interval, SharedConnectionAggregator,
};
use crate::network::{FqdnCache, ReverseResolver};
use crate::transmission::{SendOutcome, TransmitError, Transmitter};
use chrono::{DateTime, NaiveDate, Utc};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub date: Option<NaiveDate>,
    /// The outgoing date, when this tick rolled over
    pub rolled_over: Option<NaiveDate>,
    /// `None` when the app snapshot failed
    pub apps: Option<AppTickStats>,
    /// `None` when the connection snapshot failed
    pub connections: Option<ConnectionTickStats>,
    pub saved: bool,
    /// Interval handed to a background transmission
    pub transmission: Option<Interval>,
}

pub struct Agent<C: CaptureSource> {
    capture: C,
    store: DailyStore,
    apps: AppUsageAggregator,
    connections: SharedConnectionAggregator,
    tick_interval: Duration,
    transmitter: Option<Arc<Transmitter>>,
    interval_len: chrono::Duration,
    last_scheduled: Option<Interval>,
    started_at: DateTime<Utc>,
    in_flight: Arc<AtomicBool>,
    dns: Option<DnsCapture>,
    dns_worker: Option<JoinHandle<()>>,
    dns_running: Arc<AtomicBool>,
}

impl<C: CaptureSource> Agent<C> {
    /// Create an agent whose first day is today.
    pub fn new(
        capture: C,
        config: &Config,
        resolver: Box<dyn ReverseResolver>,
    ) -> Result<Self, ConfigError> {
        Self::starting_at(capture, config, resolver, Utc::now())
    }

    /// Create an agent whose first day is the date of `now`.
    pub fn starting_at(
        capture: C,
        config: &Config,
        resolver: Box<dyn ReverseResolver>,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let calendar = config.calendar()?;
        let policy = config.retention_policy();

        Ok(Self {
            capture,
            store: DailyStore::open(config.paths().daily_dir, calendar, now),
            apps: AppUsageAggregator::new(policy),
            connections: ConnectionAggregator::new(policy, FqdnCache::new(resolver)).into_shared(),
            tick_interval: config.tick_interval,
            transmitter: None,
            interval_len: chrono::Duration::minutes(10),
            last_scheduled: None,
            started_at: now,
            in_flight: Arc::new(AtomicBool::new(false)),
            dns: None,
            dns_worker: None,
            dns_running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Transmit every closed interval of the transmitter's configured length.
    pub fn with_transmitter(mut self, transmitter: Arc<Transmitter>) -> Self {
        self.interval_len = transmitter.config().interval();
        self.transmitter = Some(transmitter);
        self
    }

    pub fn store(&self) -> &DailyStore {
        &self.store
    }

    pub fn apps(&self) -> &AppUsageAggregator {
        &self.apps
    }

    pub fn connections(&self) -> SharedConnectionAggregator {
        self.connections.clone()
    }

    pub fn capture_mut(&mut self) -> &mut C {
        &mut self.capture
    }

    /// Run one sampling tick at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            transmission: self.maybe_transmit(now).map(|(interval, _detached)| interval),
            ..TickReport::default()
        };

        if let Some(previous) = self.store.roll_over_if_needed(now) {
            self.apps.reset();
            self.connections.write().reset();
            report.rolled_over = Some(previous);
        }
        report.date = Some(self.store.current_date());

        match self.capture.snapshot_apps() {
            Ok(snapshot) => {
                report.apps = Some(self.apps.ingest(&snapshot, now, self.store.aggregate_mut()));
            }
            Err(e) => tracing::warn!(error = %e, "app snapshot failed, skipping apps this tick"),
        }

        match self.capture.snapshot_connections() {
            Ok(raw) => {
                self.resolve_new_addresses(&raw);
                let stats = self
                    .connections
                    .write()
                    .tick(&raw, now, self.store.aggregate_mut());
                report.connections = Some(stats);
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection snapshot failed, skipping connections this tick")
            }
        }

        match self.store.save() {
            Ok(()) => report.saved = true,
            Err(e) => tracing::warn!(error = %e, "failed to save daily aggregate"),
        }

        tracing::debug!(
            apps = ?report.apps,
            connections = ?report.connections,
            "tick complete"
        );
        report
    }

    /// Reverse-resolve uncached socket addresses without holding the table lock.
    fn resolve_new_addresses(&self, raw: &[RawConnection]) {
        let (resolver, pending) = {
            let connections = self.connections.read();
            (connections.cache().resolver(), connections.unresolved(raw))
        };
        if pending.is_empty() {
            return;
        }

        let answers: Vec<_> = pending
            .into_iter()
            .map(|ip| (ip, resolver.reverse_lookup(ip)))
            .collect();
        let mut connections = self.connections.write();
        for (ip, answer) in answers {
            connections.cache_mut().insert(ip, answer);
        }
    }

    /// Start a background send for the latest closed interval, once per interval.
    ///
    /// Intervals that closed before this agent started are skipped. The
    /// current day is captured before returning, so the worker sends the
    /// state as of the last tick. Returns the interval and the worker handle;
    /// dropping the handle detaches the worker.
    pub fn maybe_transmit(&mut self, now: DateTime<Utc>) -> Option<(Interval, JoinHandle<()>)> {
        let transmitter = self.transmitter.clone()?;
        let interval = Interval::aligned_ending_at(now, self.interval_len);
        if interval.end <= self.started_at || self.last_scheduled == Some(interval) {
            return None;
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!(%interval, "previous transmission still running");
            return None;
        }
        self.last_scheduled = Some(interval);

        let same_day = self.store.calendar().date_of(interval.start) == self.store.current_date();
        let snapshot = same_day.then(|| self.store.aggregate().clone());

        let in_flight = self.in_flight.clone();
        let handle = thread::spawn(move || {
            let result = match &snapshot {
                Some(day) => transmitter.send_from(&interval, day),
                None => transmitter.send(&interval),
            };
            match result {
                Ok(SendOutcome::Sent { .. }) | Ok(SendOutcome::AlreadyTransmitted) => {}
                Ok(SendOutcome::Failed { retry_count, error }) => {
                    tracing::debug!(%interval, retry_count, error = %error, "interval left unsent");
                }
                Err(TransmitError::Disabled) => tracing::debug!("transmission disabled"),
                Err(e) => tracing::warn!(%interval, error = %e, "transmission skipped"),
            }
            in_flight.store(false, Ordering::SeqCst);
        });
        Some((interval, handle))
    }

    /// Start the capture source's DNS stream and a worker draining it.
    ///
    /// Returns `false` when the source has no DNS capability.
    pub fn start_dns_capture(&mut self) -> Result<bool, CaptureError> {
        if self.dns.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        let Some(capture) = self.capture.dns_query_stream()? else {
            return Ok(false);
        };

        let receiver = capture.receiver().clone();
        let connections = self.connections.clone();
        let running = self.dns_running.clone();
        running.store(true, Ordering::SeqCst);

        self.dns_worker = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match receiver.recv_timeout(Duration::from_millis(100)) {
                    Ok(line) => {
                        connections.write().record_dns_line(&line);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }));
        self.dns = Some(capture);
        tracing::info!("DNS capture started");
        Ok(true)
    }

    /// Tick every `tick_interval` until `running` is cleared, then stop.
    pub fn run(&mut self, running: Arc<AtomicBool>) {
        let mut next_tick = Instant::now();

        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= next_tick {
                self.tick(Utc::now());
                next_tick += self.tick_interval;
                if next_tick < now {
                    next_tick = now + self.tick_interval;
                }
            }
            thread::sleep(Duration::from_millis(100));
        }

        self.stop();
    }

    /// Terminate the DNS capture, join its worker and flush today.
    pub fn stop(&mut self) {
        self.dns_running.store(false, Ordering::SeqCst);
        if let Some(mut capture) = self.dns.take() {
            capture.stop();
            if capture.dropped_lines() > 0 {
                tracing::warn!(dropped = capture.dropped_lines(), "DNS lines dropped on a full queue");
            }
        }
        if let Some(worker) = self.dns_worker.take() {
            if worker.join().is_err() {
                tracing::error!("DNS worker panicked");
            }
        }
        if let Err(e) = self.store.save() {
            tracing::error!(error = %e, "failed to flush daily aggregate on stop");
        }
    }
}
