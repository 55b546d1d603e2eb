//! End-to-end tests: capture fixtures through aggregation, storage,
//! interval extraction and transmission.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use usage_agent::capture::{ConnectionState, FixtureCapture, RawConnection};
use usage_agent::config::{Config, StoragePaths, TransmissionConfig};
use usage_agent::core::{filter, Calendar, Interval};
use usage_agent::network::StaticResolver;
use usage_agent::transmission::{
    audit_path, create_shared_log, create_shared_log_with_persistence, Endpoint, SendOutcome,
    TransmissionPayload, Transmitter, Transport, TransportError,
};
use usage_agent::Agent;

/// Records every payload; fails while `failing` is set.
#[derive(Default)]
struct RecordingTransport {
    failing: Mutex<bool>,
    payloads: Mutex<Vec<TransmissionPayload>>,
    attempts: Mutex<u32>,
}

impl Transport for RecordingTransport {
    fn post(&self, _: &Endpoint, payload: &TransmissionPayload) -> Result<(), TransportError> {
        *self.attempts.lock() += 1;
        if *self.failing.lock() {
            return Err(TransportError::Status {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.payloads.lock().push(payload.clone());
        Ok(())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn config(dir: &std::path::Path) -> Config {
    Config {
        data_path: dir.to_path_buf(),
        timezone: Some("UTC".to_string()),
        ..Config::default()
    }
}

fn transmission_config() -> TransmissionConfig {
    TransmissionConfig {
        endpoint_url: "https://collector.example.com/v1/usage".to_string(),
        api_key: "integration-key".to_string(),
        device_id: "test-host-1a2b3c4d".to_string(),
        enabled: true,
        interval_minutes: 10,
        ..TransmissionConfig::default()
    }
}

fn github_agent(dir: &std::path::Path) -> Agent<FixtureCapture> {
    let ip: IpAddr = "140.82.112.4".parse().unwrap();
    let mut capture = FixtureCapture::new();
    capture.set_apps(["Google Chrome", "Slack"], Some("Google Chrome"));
    capture.set_connections(vec![RawConnection::new(
        "140.82.112.4",
        443,
        "Chrome",
        ConnectionState::Established,
    )]);
    Agent::starting_at(
        capture,
        &config(dir),
        Box::new(StaticResolver::new().with(ip, "github.com.")),
        t0(),
    )
    .unwrap()
}

fn transmitter(
    paths: &StoragePaths,
    transport: Arc<RecordingTransport>,
) -> Transmitter {
    Transmitter::new(transmission_config(), paths, create_shared_log(), transport)
        .with_calendar(Calendar::Zone(chrono_tz::UTC))
        .with_delay(|_| {})
}

#[test]
fn two_ticks_produce_an_active_https_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = github_agent(dir.path());

    agent.tick(t0());
    agent.tick(t0() + Duration::seconds(15));

    let shared = agent.connections();
    let connections = shared.read();
    let record = connections.live_record("github.com:443").unwrap();
    assert_eq!(record.duration, 30);
    assert!(record.is_active);
    assert_eq!(record.domain, "github.com");
    assert_eq!(record.protocol, "HTTPS");

    let saved = agent.store().load(agent.store().current_date()).unwrap();
    assert_eq!(saved.connections["github.com:443"], *record);
    assert_eq!(saved.network_totals.total_duration, 30);
}

#[test]
fn duration_grows_by_one_tick_per_observed_tick() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = github_agent(dir.path());

    let mut previous = 0;
    for i in 0..8 {
        // every third tick the destination disappears
        let connections = if i % 3 == 2 {
            vec![]
        } else {
            vec![RawConnection::new(
                "140.82.112.4",
                443,
                "Chrome",
                ConnectionState::Established,
            )]
        };
        let observed = !connections.is_empty();
        agent.capture_mut().set_connections(connections);
        agent.tick(t0() + Duration::seconds(15 * i));

        let duration = agent.store().aggregate().connections["github.com:443"].duration;
        let expected = if observed { previous + 15 } else { previous };
        assert_eq!(duration, expected);
        previous = duration;
    }
}

#[test]
fn transmits_the_interval_once() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StoragePaths::under(dir.path());
    let mut agent = github_agent(dir.path());
    for i in 0..4 {
        agent.tick(t0() + Duration::seconds(60 + 15 * i));
    }

    let transport = Arc::new(RecordingTransport::default());
    let transmitter = transmitter(&paths, transport.clone());
    let interval = Interval::new(t0(), t0() + Duration::minutes(10));

    let outcome = transmitter.send(&interval).unwrap();
    assert!(matches!(
        outcome,
        SendOutcome::Sent {
            retry_count: 0,
            payload_size: 2
        }
    ));
    assert_eq!(transmitter.send(&interval).unwrap(), SendOutcome::AlreadyTransmitted);

    let payloads = transport.payloads.lock();
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload.device_id, "test-host-1a2b3c4d");
    assert_eq!(payload.start_time, "2024-03-01T10:00:00Z");
    assert_eq!(payload.apps[0].active_app, "Google Chrome");
    assert_eq!(payload.networks[0].fqdn, "github.com");
    assert_eq!(payload.networks[0].protocol, "HTTPS");
    assert!(audit_path(&paths.audit_dir, &interval).exists());
}

#[test]
fn failed_transmission_is_logged_once_and_retried_later() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StoragePaths::under(dir.path());
    let mut agent = github_agent(dir.path());
    agent.tick(t0() + Duration::seconds(30));

    let transport = Arc::new(RecordingTransport::default());
    *transport.failing.lock() = true;
    let transmitter = transmitter(&paths, transport.clone());
    let interval = Interval::new(t0(), t0() + Duration::minutes(10));

    let outcome = transmitter.send(&interval).unwrap();
    assert!(matches!(outcome, SendOutcome::Failed { retry_count: 3, .. }));

    let entries = transmitter.log().entries();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].retry_count, 3);
    assert!(!transmitter.log().was_transmitted(&interval));

    // the audit copy exists even though nothing was delivered
    assert!(audit_path(&paths.audit_dir, &interval).exists());

    *transport.failing.lock() = false;
    let outcome = transmitter.send(&interval).unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { retry_count: 0, .. }));
    assert_eq!(*transport.attempts.lock(), 4);
    assert!(transmitter.log().was_transmitted(&interval));
}

#[test]
fn interval_filter_uses_last_seen() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = github_agent(dir.path());

    // seen at T-1s only
    agent.tick(t0() - Duration::seconds(1));
    let day = agent.store().aggregate().clone();
    let interval = Interval::new(t0(), t0() + Duration::seconds(15));
    assert!(filter(&day, &interval).connections.is_empty());

    // seen again at T+10s
    agent.tick(t0() + Duration::seconds(10));
    let day = agent.store().aggregate().clone();
    let filtered = filter(&day, &interval);
    assert_eq!(filtered.connections.len(), 1);
    assert!(filtered.connections.contains_key("github.com:443"));
}

#[test]
fn agent_schedules_each_closed_interval_once() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StoragePaths::under(dir.path());
    let transport = Arc::new(RecordingTransport::default());
    let transmitter = Transmitter::new(
        transmission_config(),
        &paths,
        create_shared_log_with_persistence(paths.log_path.clone()),
        transport.clone(),
    )
    .with_calendar(Calendar::Zone(chrono_tz::UTC))
    .with_delay(|_| {});

    let mut agent = github_agent(dir.path());
    agent.tick(t0() + Duration::minutes(5));
    let mut agent = agent.with_transmitter(Arc::new(transmitter));

    let now = t0() + Duration::minutes(10) + Duration::seconds(15);
    let (interval, worker) = agent.maybe_transmit(now).unwrap();
    worker.join().unwrap();
    assert_eq!(interval, Interval::new(t0(), t0() + Duration::minutes(10)));
    assert!(agent.maybe_transmit(now + Duration::seconds(15)).is_none());

    assert_eq!(transport.payloads.lock().len(), 1);
    assert!(paths.log_path.exists());
}
