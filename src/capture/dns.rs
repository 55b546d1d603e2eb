//! Cancellable stream of raw DNS query lines.
//!
//! A reader thread pulls lines from a capture process (or any reader) and
//! pushes them into a bounded channel. The consumer drains the channel at
//! its own pace; when the channel is full new lines are dropped.

use crate::capture::CaptureError;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Capacity of the line queue between the reader and the consumer.
pub const DNS_QUEUE_CAPACITY: usize = 10_000;

/// A running DNS line stream.
pub struct DnsCapture {
    receiver: Receiver<String>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl DnsCapture {
    /// Spawn a capture process and stream its stdout line by line.
    pub fn spawn(mut command: Command) -> Result<Self, CaptureError> {
        let program = format!("{:?}", command.get_program());
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::CommandFailed {
                command: program.clone(),
                message: e.to_string(),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::CommandFailed {
                command: program,
                message: "stdout was not captured".to_string(),
            })?;

        let mut capture = Self::from_reader(BufReader::new(stdout));
        capture.child = Some(child);
        Ok(capture)
    }

    /// Stream lines from an arbitrary reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (sender, receiver) = bounded(DNS_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));

        let handle = {
            let running = running.clone();
            let dropped = dropped.clone();
            thread::spawn(move || read_lines(reader, sender, running, dropped))
        };

        Self {
            receiver,
            running,
            dropped,
            child: None,
            reader: Some(handle),
        }
    }

    /// Get the receiver for captured lines.
    pub fn receiver(&self) -> &Receiver<String> {
        &self.receiver
    }

    /// Check if the reader is still producing lines.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of lines dropped because the queue was full.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Terminate the capture process and join the reader thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "DNS capture process already exited");
            }
            match child.wait() {
                Ok(status) => tracing::debug!(%status, "DNS capture process exited"),
                Err(e) => tracing::debug!(error = %e, "failed to reap DNS capture process"),
            }
        }

        if let Some(handle) = self.reader.take() {
            // Killing the child closes the pipe, which ends the read loop
            if handle.join().is_err() {
                tracing::debug!("DNS reader thread panicked");
            }
        }
    }
}

impl Drop for DnsCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_lines<R: BufRead>(
    reader: R,
    sender: Sender<String>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) {
    for line in reader.lines() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "DNS capture read error");
                break;
            }
        };

        match sender.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total.is_power_of_two() {
                    tracing::warn!(dropped = total, "DNS line queue full, dropping lines");
                }
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }

    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    #[test]
    fn test_reader_lines_reach_receiver() {
        let input = "line one\nline two\n";
        let mut capture = DnsCapture::from_reader(Cursor::new(input));

        let first = capture
            .receiver()
            .recv_timeout(Duration::from_secs(1))
            .unwrap();
        let second = capture
            .receiver()
            .recv_timeout(Duration::from_secs(1))
            .unwrap();
        assert_eq!(first, "line one");
        assert_eq!(second, "line two");

        capture.stop();
        assert!(!capture.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_reaps_spawned_process() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo one; exec sleep 30"]);
        let mut capture = DnsCapture::spawn(command).unwrap();
        assert_eq!(
            capture.receiver().recv_timeout(Duration::from_secs(5)).unwrap(),
            "one"
        );

        let started = std::time::Instant::now();
        capture.stop();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!capture.is_running());
        assert!(capture.child.is_none());

        // a second stop finds nothing left to reap
        capture.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_after_process_exited() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo done"]);
        let mut capture = DnsCapture::spawn(command).unwrap();
        let receiver = capture.receiver().clone();
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), "done");
        assert!(receiver.recv_timeout(Duration::from_secs(5)).is_err());

        capture.stop();
        assert!(!capture.is_running());
    }

    #[test]
    fn test_receiver_disconnects_when_reader_ends() {
        let capture = DnsCapture::from_reader(Cursor::new("only\n"));
        let receiver = capture.receiver().clone();
        assert_eq!(
            receiver.recv_timeout(Duration::from_secs(1)).unwrap(),
            "only"
        );
        // Reader thread exits after EOF and drops its sender
        assert!(receiver.recv_timeout(Duration::from_secs(1)).is_err());
    }
}
