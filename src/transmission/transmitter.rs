//! Interval transmission: dedup check, load, filter, audit copy, bounded
//! retry, one log entry per outcome.

use crate::config::{ConfigError, StoragePaths, TransmissionConfig};
use crate::core::{filter, load_document, Calendar, DailyAggregate, Interval, LoadError};
use crate::transmission::log::SharedTransmissionLog;
use crate::transmission::payload::{build_payload, sample_payload, TransmissionPayload};
use crate::transmission::transport::{Transport, TransportError};
use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Waits between attempts. Injected so tests never sleep.
pub type DelayFn = Arc<dyn Fn(Duration) + Send + Sync>;

/// Why an interval was not attempted at all.
///
/// None of these consume a transmission log entry.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("transmission is disabled")]
    Disabled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot load interval data: {0}")]
    Load(#[from] LoadError),

    /// Only raised by connection tests; interval sends log transport failures instead.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of an interval send that got past the pre-checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { retry_count: u32, payload_size: usize },
    /// A successful entry already exists for the interval
    AlreadyTransmitted,
    /// Every attempt failed; logged with `retry_count` equal to the attempts made
    Failed { retry_count: u32, error: TransportError },
}

pub struct Transmitter {
    config: TransmissionConfig,
    daily_dir: PathBuf,
    audit_dir: PathBuf,
    calendar: Calendar,
    log: SharedTransmissionLog,
    transport: Arc<dyn Transport>,
    delay: DelayFn,
}

impl Transmitter {
    pub fn new(
        config: TransmissionConfig,
        paths: &StoragePaths,
        log: SharedTransmissionLog,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            daily_dir: paths.daily_dir.clone(),
            audit_dir: paths.audit_dir.clone(),
            calendar: Calendar::Local,
            log,
            transport,
            delay: Arc::new(std::thread::sleep),
        }
    }

    /// Calendar used to pick the day document for an interval.
    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_delay(mut self, delay: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    pub fn config(&self) -> &TransmissionConfig {
        &self.config
    }

    pub fn log(&self) -> &SharedTransmissionLog {
        &self.log
    }

    /// Transmit one interval, reading its day document from disk.
    pub fn send(&self, interval: &Interval) -> Result<SendOutcome, TransmitError> {
        self.send_with(interval, |date| load_document(&self.daily_dir, date))
    }

    /// Transmit one interval from a day document captured by the caller.
    ///
    /// The tick loop uses this to send the state as of the last tick before
    /// `interval.end`, before the next tick moves `last_seen` past it.
    pub fn send_from(
        &self,
        interval: &Interval,
        day: &DailyAggregate,
    ) -> Result<SendOutcome, TransmitError> {
        self.send_with(interval, |_| Ok(day.clone()))
    }

    fn send_with<F>(&self, interval: &Interval, load: F) -> Result<SendOutcome, TransmitError>
    where
        F: FnOnce(NaiveDate) -> Result<DailyAggregate, LoadError>,
    {
        if !self.config.enabled {
            return Err(TransmitError::Disabled);
        }
        let endpoint = self.config.endpoint()?;

        if self.log.was_transmitted(interval) {
            tracing::debug!(%interval, "interval already transmitted");
            return Ok(SendOutcome::AlreadyTransmitted);
        }

        let date = self.calendar.date_of(interval.start);
        let day = load(date).map_err(|e| {
            tracing::error!(%interval, error = %e, "aborting transmission");
            e
        })?;

        let filtered = filter(&day, interval);
        let payload = build_payload(&self.config.device_id, interval, &filtered, Utc::now());
        let payload_size = payload.size();

        match write_audit_copy(&self.audit_dir, interval, &payload) {
            Ok(path) => tracing::debug!(path = %path.display(), "saved audit copy"),
            Err(e) => tracing::warn!(error = %e, "failed to save audit copy"),
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.transport.post(&endpoint, &payload) {
                Ok(()) => {
                    let retry_count = attempt - 1;
                    self.log
                        .record(interval, true, None, retry_count, payload_size);
                    tracing::info!(%interval, payload_size, retry_count, "interval transmitted");
                    return Ok(SendOutcome::Sent {
                        retry_count,
                        payload_size,
                    });
                }
                Err(e) => {
                    tracing::warn!(%interval, attempt, max_attempts, error = %e, "transmission attempt failed");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        let backoff = self.config.backoff_unit_secs * u64::from(attempt);
                        (self.delay)(Duration::from_secs(backoff));
                    }
                }
            }
        }

        let error =
            last_error.unwrap_or_else(|| TransportError::Network("no attempt made".to_string()));
        self.log.record(
            interval,
            false,
            Some(error.to_string()),
            max_attempts,
            payload_size,
        );
        tracing::error!(%interval, error = %error, "transmission failed after retries");
        Ok(SendOutcome::Failed {
            retry_count: max_attempts,
            error,
        })
    }

    /// POST one sample payload: no retries, no log entry, no dedup.
    pub fn test_connection(&self) -> Result<(), TransmitError> {
        let endpoint = self.config.endpoint()?;
        let payload = sample_payload(&self.config.device_id, Utc::now());
        self.transport.post(&endpoint, &payload)?;
        Ok(())
    }
}

/// Path of the audit copy for an interval.
pub fn audit_path(dir: &Path, interval: &Interval) -> PathBuf {
    dir.join(format!(
        "transmission_{}.json",
        interval.start.format("%Y%m%d_%H%M%S")
    ))
}

fn write_audit_copy(
    dir: &Path,
    interval: &Interval,
    payload: &TransmissionPayload,
) -> Result<PathBuf, std::io::Error> {
    std::fs::create_dir_all(dir)?;
    let path = audit_path(dir, interval);
    let json = serde_json::to_string_pretty(payload).map_err(std::io::Error::other)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{document_path, DailyAggregate};
    use crate::transmission::log::create_shared_log;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use parking_lot::Mutex;

    /// Fails the first `failures` posts, then succeeds.
    struct ScriptedTransport {
        failures: Mutex<u32>,
        posts: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                posts: Mutex::new(0),
            })
        }
    }

    impl Transport for ScriptedTransport {
        fn post(&self, _: &crate::transmission::Endpoint, _: &TransmissionPayload) -> Result<(), TransportError> {
            *self.posts.lock() += 1;
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::Network("connection refused".into()));
            }
            Ok(())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn interval() -> Interval {
        Interval::new(start(), start() + ChronoDuration::minutes(10))
    }

    fn enabled_config() -> TransmissionConfig {
        TransmissionConfig {
            endpoint_url: "https://collector.example.com/v1/usage".into(),
            api_key: "test-key".into(),
            device_id: "host-00000000".into(),
            enabled: true,
            ..TransmissionConfig::default()
        }
    }

    fn setup(
        transport: Arc<ScriptedTransport>,
    ) -> (tempfile::TempDir, Transmitter, Arc<Mutex<Vec<Duration>>>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::under(dir.path());
        std::fs::create_dir_all(&paths.daily_dir).unwrap();
        let day = DailyAggregate::new(start().date_naive());
        std::fs::write(
            document_path(&paths.daily_dir, day.date),
            serde_json::to_string(&day).unwrap(),
        )
        .unwrap();

        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = delays.clone();
        let transmitter = Transmitter::new(enabled_config(), &paths, create_shared_log(), transport)
            .with_calendar(Calendar::Zone(chrono_tz::UTC))
            .with_delay(move |d| recorded.lock().push(d));
        (dir, transmitter, delays)
    }

    #[test]
    fn test_success_is_logged_and_deduplicated() {
        let transport = ScriptedTransport::failing(0);
        let (dir, transmitter, _) = setup(transport.clone());

        let outcome = transmitter.send(&interval()).unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Sent {
                retry_count: 0,
                payload_size: 0
            }
        );
        assert_eq!(
            transmitter.send(&interval()).unwrap(),
            SendOutcome::AlreadyTransmitted
        );
        assert_eq!(*transport.posts.lock(), 1);
        assert_eq!(transmitter.log().len(), 1);

        let audit = audit_path(&StoragePaths::under(dir.path()).audit_dir, &interval());
        assert!(audit.ends_with("transmission_20240301_100000.json"));
        assert!(audit.exists());
    }

    #[test]
    fn test_retry_then_success() {
        let (_dir, transmitter, delays) = setup(ScriptedTransport::failing(2));

        let outcome = transmitter.send(&interval()).unwrap();
        assert!(matches!(outcome, SendOutcome::Sent { retry_count: 2, .. }));
        assert_eq!(
            *delays.lock(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_exhausted_retries_log_one_failure() {
        let transport = ScriptedTransport::failing(10);
        let (_dir, transmitter, delays) = setup(transport.clone());

        let outcome = transmitter.send(&interval()).unwrap();
        assert!(matches!(outcome, SendOutcome::Failed { retry_count: 3, .. }));
        assert_eq!(*transport.posts.lock(), 3);
        // no wait after the final attempt
        assert_eq!(delays.lock().len(), 2);

        let entries = transmitter.log().entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(entries[0].retry_count, 3);
        assert!(entries[0].error.as_deref().unwrap().contains("connection refused"));

        // a failure does not suppress the next attempt for the same window
        transmitter.send(&interval()).unwrap();
        assert_eq!(*transport.posts.lock(), 6);
    }

    #[test]
    fn test_disabled_and_unconfigured_short_circuit() {
        let transport = ScriptedTransport::failing(0);
        let (dir, _, _) = setup(transport.clone());
        let paths = StoragePaths::under(dir.path());

        let disabled = Transmitter::new(
            TransmissionConfig {
                enabled: false,
                ..enabled_config()
            },
            &paths,
            create_shared_log(),
            transport.clone(),
        );
        assert!(matches!(disabled.send(&interval()), Err(TransmitError::Disabled)));

        let no_key = Transmitter::new(
            TransmissionConfig {
                api_key: String::new(),
                ..enabled_config()
            },
            &paths,
            create_shared_log(),
            transport.clone(),
        );
        assert!(matches!(
            no_key.send(&interval()),
            Err(TransmitError::Config(ConfigError::MissingApiKey))
        ));
        assert!(no_key.log().is_empty());
        assert_eq!(*transport.posts.lock(), 0);
    }

    #[test]
    fn test_load_error_aborts_without_log_entry() {
        let transport = ScriptedTransport::failing(0);
        let (dir, transmitter, _) = setup(transport.clone());
        let paths = StoragePaths::under(dir.path());
        std::fs::write(document_path(&paths.daily_dir, start().date_naive()), "{broken").unwrap();

        assert!(matches!(
            transmitter.send(&interval()),
            Err(TransmitError::Load(LoadError::Corrupt { .. }))
        ));
        assert!(transmitter.log().is_empty());
        assert_eq!(*transport.posts.lock(), 0);
    }

    #[test]
    fn test_send_from_uses_given_day() {
        let transport = ScriptedTransport::failing(0);
        let (dir, transmitter, _) = setup(transport.clone());
        let paths = StoragePaths::under(dir.path());
        // the document on disk is unreadable; the captured day is used instead
        std::fs::write(document_path(&paths.daily_dir, start().date_naive()), "{broken").unwrap();

        let mut day = DailyAggregate::new(start().date_naive());
        let seen = start() + ChronoDuration::minutes(9);
        day.apps.insert(
            "Safari".into(),
            crate::core::AppUsageRecord {
                name: "Safari".into(),
                foreground_time: 15,
                focus_time: 15,
                first_seen: seen,
                last_seen: seen,
                is_active: true,
                is_focused: true,
            },
        );

        let outcome = transmitter.send_from(&interval(), &day).unwrap();
        assert!(matches!(outcome, SendOutcome::Sent { payload_size: 1, .. }));
        assert!(transmitter.log().was_transmitted(&interval()));
        assert_eq!(
            transmitter.send_from(&interval(), &day).unwrap(),
            SendOutcome::AlreadyTransmitted
        );
        assert_eq!(*transport.posts.lock(), 1);
    }

    #[test]
    fn test_connection_test_does_not_log() {
        let transport = ScriptedTransport::failing(1);
        let (_dir, transmitter, _) = setup(transport);

        assert!(matches!(
            transmitter.test_connection(),
            Err(TransmitError::Transport(_))
        ));
        assert!(transmitter.test_connection().is_ok());
        assert!(transmitter.log().is_empty());
    }
}
